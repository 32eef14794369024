use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::core::error::Result;
use crate::core::types::SerialNum;
use crate::storage::directory::AttributeDirectory;
use crate::storage::file_lock::FileLock;
use crate::storage::meta_info::sync_dir;

/// Per-node base directory for one sub-database's attributes. Owns the
/// name -> directory registry and completes interrupted removals at startup.
pub struct DiskLayout {
    base_dir: PathBuf,
    _lock: FileLock,
    dirs: RwLock<HashMap<String, Arc<AttributeDirectory>>>,
}

impl DiskLayout {
    /// Creates the base dir if needed, completes leftover `.removed`
    /// directories, and registers every attribute subdirectory found.
    pub fn create(base_dir: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let layout = Self::create_simple(base_dir)?;
        layout.complete_pending_removals()?;
        layout.scan_dir();
        Ok(layout)
    }

    /// Like `create` but without scanning; used by tests and tooling that
    /// register directories explicitly.
    pub fn create_simple(base_dir: impl Into<PathBuf>) -> Result<Arc<Self>> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        if let Some(parent) = base_dir.parent() {
            sync_dir(parent)?;
        }
        let lock = FileLock::acquire(&base_dir, true)?;
        Ok(Arc::new(DiskLayout {
            base_dir,
            _lock: lock,
            dirs: RwLock::new(HashMap::new()),
        }))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn complete_pending_removals(&self) -> Result<()> {
        for entry in fs::read_dir(&self.base_dir)?.flatten() {
            let path = entry.path();
            if path.is_dir() && path.extension().is_some_and(|e| e == "removed") {
                info!(dir = %path.display(), "completing interrupted attribute removal");
                fs::remove_dir_all(&path)?;
                sync_dir(&self.base_dir)?;
            }
        }
        Ok(())
    }

    fn scan_dir(self: &Arc<Self>) {
        let Ok(entries) = fs::read_dir(&self.base_dir) else {
            return;
        };
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    self.create_attribute_dir(name);
                }
            }
        }
    }

    pub fn list_attributes(&self) -> Vec<String> {
        self.dirs.read().keys().cloned().collect()
    }

    pub fn get_attribute_dir(&self, name: &str) -> Option<Arc<AttributeDirectory>> {
        self.dirs.read().get(name).cloned()
    }

    pub fn create_attribute_dir(self: &Arc<Self>, name: &str) -> Arc<AttributeDirectory> {
        if let Some(existing) = self.get_attribute_dir(name) {
            return existing;
        }
        let mut dirs = self.dirs.write();
        dirs.entry(name.to_string())
            .or_insert_with(|| AttributeDirectory::new(self, name))
            .clone()
    }

    /// Drops an attribute's snapshots and its on-disk directory; called when
    /// the field is no longer configured. Serial gates which snapshots may
    /// be invalidated.
    pub fn remove_attribute_dir(self: &Arc<Self>, name: &str, serial: SerialNum) -> Result<()> {
        let Some(dir) = self.get_attribute_dir(name) else {
            return Ok(());
        };
        let Some(writer) = dir.get_writer() else {
            // already detached by a competing removal
            return Ok(());
        };
        writer.invalidate_old_snapshots(serial.saturating_add(1));
        writer.remove_invalid_snapshots()?;
        if writer.remove_disk_dir()? {
            debug!(attribute = name, "removed attribute directory");
            let mut dirs = self.dirs.write();
            dirs.remove(name);
            writer.detach();
        }
        Ok(())
    }
}
