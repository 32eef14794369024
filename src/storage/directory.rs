use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

use crate::core::error::Result;
use crate::core::types::SerialNum;
use crate::storage::disk_layout::DiskLayout;
use crate::storage::meta_info::{IndexMetaInfo, SnapshotMeta, snapshot_dir_name, sync_dir};

/// Sum of file sizes under a directory tree.
pub fn tree_size(path: &Path) -> u64 {
    let mut total = 0;
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        if meta.is_dir() {
            total += tree_size(&entry.path());
        } else {
            total += meta.len();
        }
    }
    total
}

fn modification_time(path: &Path) -> Option<DateTime<Utc>> {
    fs::metadata(path).ok()?.modified().ok().map(DateTime::<Utc>::from)
}

struct DirState {
    snap_info: IndexMetaInfo,
    /// None while a snapshot is being written; filled at validation.
    disk_sizes: BTreeMap<SerialNum, Option<u64>>,
    writer_active: bool,
    last_flush_time: Option<DateTime<Utc>>,
}

/// Per-attribute on-disk snapshot registry plus the single-writer mutex
/// every flusher must hold. Holds a weak back-reference to the disk layout
/// for path composition; a detached directory refuses new writers.
pub struct AttributeDirectory {
    layout: Mutex<Weak<DiskLayout>>,
    base_dir: PathBuf,
    name: String,
    state: Mutex<DirState>,
    writer_cv: Condvar,
}

impl AttributeDirectory {
    pub(crate) fn new(layout: &Arc<DiskLayout>, name: &str) -> Arc<Self> {
        let base_dir = layout.base_dir().to_path_buf();
        let dir = Arc::new(AttributeDirectory {
            layout: Mutex::new(Arc::downgrade(layout)),
            base_dir,
            name: name.to_string(),
            state: Mutex::new(DirState {
                snap_info: IndexMetaInfo::new(PathBuf::new()),
                disk_sizes: BTreeMap::new(),
                writer_active: false,
                last_flush_time: None,
            }),
            writer_cv: Condvar::new(),
        });
        dir.load_and_recover();
        dir
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir_path(&self) -> PathBuf {
        if self.name.is_empty() {
            self.base_dir.clone()
        } else {
            self.base_dir.join(&self.name)
        }
    }

    pub fn snapshot_dir(&self, serial: SerialNum) -> PathBuf {
        self.dir_path().join(snapshot_dir_name(serial))
    }

    /// Snapshot data file for the codec: `<dir>/snapshot-<serial>/<name>.dat`.
    pub fn attribute_file_path(&self, serial: SerialNum) -> PathBuf {
        self.snapshot_dir(serial).join(format!("{}.dat", self.name))
    }

    /// Loads meta-info and applies crash recovery: snapshots still marked
    /// invalid (flush started, never validated) are deleted, and snapshot
    /// directories with no marker at all are deleted.
    fn load_and_recover(&self) {
        let dir_path = self.dir_path();
        let mut state = self.state.lock();
        state.snap_info = IndexMetaInfo::new(&dir_path);
        if let Err(e) = state.snap_info.load() {
            warn!(dir = %dir_path.display(), error = %e, "could not read attribute meta-info; treating directory as empty");
        }
        let invalid: Vec<SerialNum> = state
            .snap_info
            .snapshots()
            .iter()
            .filter(|s| !s.valid)
            .map(|s| s.serial)
            .collect();
        let mut changed = false;
        for serial in invalid {
            let snap_dir = dir_path.join(snapshot_dir_name(serial));
            debug!(dir = %snap_dir.display(), "removing unvalidated snapshot left by a crashed flush");
            let _ = fs::remove_dir_all(&snap_dir);
            state.snap_info.remove_snapshot(serial);
            changed = true;
        }
        // Unmarked snapshot-* directories (validation never reached the
        // registry) are also stale.
        if let Ok(entries) = fs::read_dir(&dir_path) {
            for entry in entries.flatten() {
                let file_name = entry.file_name();
                let Some(stem) = file_name.to_str() else { continue };
                if let Some(serial_str) = stem.strip_prefix("snapshot-") {
                    if let Ok(serial) = serial_str.parse::<SerialNum>() {
                        if state.snap_info.get_snapshot(serial).is_none() {
                            debug!(dir = %entry.path().display(), "removing orphaned snapshot directory");
                            let _ = fs::remove_dir_all(entry.path());
                        }
                    }
                }
            }
        }
        if changed {
            state.snap_info.save();
        }
        for snap in state.snap_info.snapshots().to_vec() {
            let size = tree_size(&dir_path.join(&snap.dir_name));
            state.disk_sizes.insert(snap.serial, Some(size));
        }
        if let Some(best) = state.snap_info.best_snapshot() {
            let dir_name = best.dir_name.clone();
            state.last_flush_time = modification_time(&dir_path.join(dir_name));
        }
    }

    /// Serial of the best valid snapshot; 0 when nothing has been flushed.
    /// Transaction-log replay resumes from this + 1.
    pub fn flushed_serial_num(&self) -> SerialNum {
        self.state
            .lock()
            .snap_info
            .best_snapshot()
            .map(|s| s.serial)
            .unwrap_or(0)
    }

    pub fn last_flush_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_flush_time
    }

    pub fn set_last_flush_time(&self, time: DateTime<Utc>) {
        self.state.lock().last_flush_time = Some(time);
    }

    pub fn empty(&self) -> bool {
        self.state.lock().snap_info.is_empty()
    }

    /// Transient disk usage: every snapshot except the best one, including
    /// in-progress snapshots whose size is computed by traversal on demand.
    pub fn transient_disk_usage(&self) -> u64 {
        let (known, to_traverse) = {
            let state = self.state.lock();
            let best = state.snap_info.best_snapshot().map(|s| s.serial);
            let mut known = 0u64;
            let mut to_traverse = Vec::new();
            for (serial, size) in &state.disk_sizes {
                if Some(*serial) == best {
                    continue;
                }
                match size {
                    Some(s) => known += s,
                    None => to_traverse.push(*serial),
                }
            }
            (known, to_traverse)
        };
        known
            + to_traverse
                .iter()
                .map(|serial| tree_size(&self.snapshot_dir(*serial)))
                .sum::<u64>()
    }

    /// Blocks until the writer slot is free. Returns None when the
    /// directory has been detached from its layout (no more writes).
    pub fn get_writer(self: &Arc<Self>) -> Option<DirWriter> {
        let mut state = self.state.lock();
        while state.writer_active {
            self.writer_cv.wait(&mut state);
        }
        if self.layout.lock().upgrade().is_none() {
            return None;
        }
        state.writer_active = true;
        Some(DirWriter { dir: Arc::clone(self) })
    }

    /// Non-blocking writer acquisition; used by flushers which cancel when
    /// another flusher already holds the directory.
    pub fn try_get_writer(self: &Arc<Self>) -> Option<DirWriter> {
        let mut state = self.state.lock();
        if state.writer_active || self.layout.lock().upgrade().is_none() {
            return None;
        }
        state.writer_active = true;
        Some(DirWriter { dir: Arc::clone(self) })
    }

    fn release_writer(&self) {
        let mut state = self.state.lock();
        state.writer_active = false;
        drop(state);
        self.writer_cv.notify_all();
    }
}

/// Exclusive write access to one attribute directory; at most one exists at
/// a time. Dropping it wakes the next waiter.
pub struct DirWriter {
    dir: Arc<AttributeDirectory>,
}

impl DirWriter {
    pub fn snapshot_dir(&self, serial: SerialNum) -> PathBuf {
        self.dir.snapshot_dir(serial)
    }

    pub fn attribute_file_path(&self, serial: SerialNum) -> PathBuf {
        self.dir.attribute_file_path(serial)
    }

    pub fn flushed_serial_num(&self) -> SerialNum {
        self.dir.flushed_serial_num()
    }

    pub fn set_last_flush_time(&self, time: DateTime<Utc>) {
        self.dir.set_last_flush_time(time);
    }

    /// Step 1 of the flush protocol: register the snapshot as invalid and
    /// persist the registry before any data is written.
    pub fn create_invalid_snapshot(&self, serial: SerialNum) -> Result<()> {
        let dir_path = self.dir.dir_path();
        if self.dir.empty() {
            fs::create_dir_all(&dir_path)?;
            sync_dir(dir_path.parent().unwrap_or(&dir_path))?;
        }
        fs::create_dir_all(self.dir.snapshot_dir(serial))?;
        let mut state = self.dir.state.lock();
        state.snap_info.add_snapshot(SnapshotMeta {
            valid: false,
            serial,
            dir_name: snapshot_dir_name(serial),
        });
        state.disk_sizes.insert(serial, None);
        state.snap_info.save();
        Ok(())
    }

    /// Step 4: fsync the snapshot dir and its parent, then persist the
    /// validity marker.
    pub fn mark_valid_snapshot(&self, serial: SerialNum) -> Result<()> {
        let snapshot_dir = self.dir.snapshot_dir(serial);
        sync_dir(&snapshot_dir)?;
        sync_dir(&self.dir.dir_path())?;
        let size = tree_size(&snapshot_dir);
        let mut state = self.dir.state.lock();
        debug_assert!(matches!(state.snap_info.get_snapshot(serial), Some(s) if !s.valid));
        state.snap_info.validate_snapshot(serial);
        state.disk_sizes.insert(serial, Some(size));
        state.snap_info.save();
        Ok(())
    }

    /// Marks every valid snapshot older than `serial` invalid.
    pub fn invalidate_old_snapshots(&self, serial: SerialNum) {
        let mut state = self.dir.state.lock();
        let stale: Vec<SerialNum> = state
            .snap_info
            .snapshots()
            .iter()
            .filter(|s| s.valid && s.serial < serial)
            .map(|s| s.serial)
            .collect();
        for old in &stale {
            state.snap_info.invalidate_snapshot(*old);
        }
        if !stale.is_empty() {
            state.snap_info.save();
        }
    }

    pub fn invalidate_snapshots_older_than_best(&self) {
        let best = {
            let state = self.dir.state.lock();
            state.snap_info.best_snapshot().map(|s| s.serial)
        };
        if let Some(serial) = best {
            self.invalidate_old_snapshots(serial);
        }
    }

    /// Deletes every invalid snapshot directory and drops it from the
    /// registry.
    pub fn remove_invalid_snapshots(&self) -> Result<()> {
        let to_remove: Vec<SnapshotMeta> = {
            let state = self.dir.state.lock();
            state
                .snap_info
                .snapshots()
                .iter()
                .filter(|s| !s.valid)
                .cloned()
                .collect()
        };
        if to_remove.is_empty() {
            return Ok(());
        }
        for snap in &to_remove {
            fs::remove_dir_all(self.dir.dir_path().join(&snap.dir_name)).or_else(|e| {
                if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
            })?;
        }
        sync_dir(&self.dir.dir_path())?;
        let mut state = self.dir.state.lock();
        for snap in &to_remove {
            state.snap_info.remove_snapshot(snap.serial);
            state.disk_sizes.remove(&snap.serial);
        }
        state.snap_info.save();
        Ok(())
    }

    /// Removes the whole attribute directory once no snapshots remain, via
    /// the rename protocol: rename to `<name>.removed`, sync parent, delete,
    /// sync parent.
    pub fn remove_disk_dir(&self) -> Result<bool> {
        if !self.dir.empty() {
            return Ok(false);
        }
        let dir_path = self.dir.dir_path();
        if dir_path.exists() {
            // Attribute names may contain dots; append rather than replace
            let removed = self.dir.base_dir.join(format!("{}.removed", self.dir.name));
            fs::rename(&dir_path, &removed)?;
            sync_dir(&self.dir.base_dir)?;
            fs::remove_dir_all(&removed)?;
            sync_dir(&self.dir.base_dir)?;
        }
        Ok(true)
    }

    /// Severs the layout back-reference; subsequent writer requests fail.
    pub fn detach(&self) {
        debug_assert!(self.dir.empty());
        *self.dir.layout.lock() = Weak::new();
    }
}

impl Drop for DirWriter {
    fn drop(&mut self) {
        self.dir.release_writer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk_layout::DiskLayout;

    fn layout() -> (tempfile::TempDir, Arc<DiskLayout>) {
        let tmp = tempfile::tempdir().unwrap();
        let layout = DiskLayout::create(tmp.path().join("attributes")).unwrap();
        (tmp, layout)
    }

    #[test]
    fn flush_protocol_and_best_snapshot() {
        let (_tmp, layout) = layout();
        let dir = layout.create_attribute_dir("price");
        assert!(dir.empty());
        assert_eq!(dir.flushed_serial_num(), 0);

        let writer = dir.get_writer().unwrap();
        writer.create_invalid_snapshot(100).unwrap();
        std::fs::write(writer.attribute_file_path(100), b"payload").unwrap();
        assert_eq!(dir.flushed_serial_num(), 0);
        writer.mark_valid_snapshot(100).unwrap();
        assert_eq!(dir.flushed_serial_num(), 100);

        writer.create_invalid_snapshot(200).unwrap();
        std::fs::write(writer.attribute_file_path(200), b"payload2").unwrap();
        writer.mark_valid_snapshot(200).unwrap();
        writer.invalidate_snapshots_older_than_best();
        writer.remove_invalid_snapshots().unwrap();
        assert_eq!(dir.flushed_serial_num(), 200);
        assert!(!dir.snapshot_dir(100).exists());
    }

    #[test]
    fn crash_between_create_and_validate_discards_snapshot() {
        let (tmp, layout) = layout();
        {
            let dir = layout.create_attribute_dir("price");
            let writer = dir.get_writer().unwrap();
            writer.create_invalid_snapshot(100).unwrap();
            std::fs::write(writer.attribute_file_path(100), b"good").unwrap();
            writer.mark_valid_snapshot(100).unwrap();
            // Crash: snapshot-200 created but never validated
            writer.create_invalid_snapshot(200).unwrap();
            std::fs::write(writer.attribute_file_path(200), b"partial").unwrap();
        }
        drop(layout);

        let layout = DiskLayout::create(tmp.path().join("attributes")).unwrap();
        let dir = layout.get_attribute_dir("price").unwrap();
        assert_eq!(dir.flushed_serial_num(), 100);
        assert!(!dir.snapshot_dir(200).exists());
        assert!(dir.snapshot_dir(100).exists());
    }

    #[test]
    fn orphaned_snapshot_dir_is_removed_on_startup() {
        let (tmp, layout) = layout();
        {
            let dir = layout.create_attribute_dir("price");
            let writer = dir.get_writer().unwrap();
            writer.create_invalid_snapshot(10).unwrap();
            writer.mark_valid_snapshot(10).unwrap();
            // Simulate a snapshot dir whose registry entry never made it
            std::fs::create_dir_all(dir.dir_path().join("snapshot-99")).unwrap();
        }
        drop(layout);
        let layout = DiskLayout::create(tmp.path().join("attributes")).unwrap();
        let dir = layout.get_attribute_dir("price").unwrap();
        assert_eq!(dir.flushed_serial_num(), 10);
        assert!(!dir.dir_path().join("snapshot-99").exists());
    }

    #[test]
    fn single_writer_at_a_time() {
        let (_tmp, layout) = layout();
        let dir = layout.create_attribute_dir("price");
        let writer = dir.try_get_writer().unwrap();
        assert!(dir.try_get_writer().is_none());
        drop(writer);
        assert!(dir.try_get_writer().is_some());
    }

    #[test]
    fn transient_usage_excludes_best() {
        let (_tmp, layout) = layout();
        let dir = layout.create_attribute_dir("price");
        let writer = dir.get_writer().unwrap();
        writer.create_invalid_snapshot(1).unwrap();
        std::fs::write(writer.attribute_file_path(1), vec![0u8; 100]).unwrap();
        writer.mark_valid_snapshot(1).unwrap();
        writer.create_invalid_snapshot(2).unwrap();
        std::fs::write(writer.attribute_file_path(2), vec![0u8; 300]).unwrap();
        // snapshot-2 still invalid: counted via traversal
        assert_eq!(dir.transient_disk_usage(), 300);
        writer.mark_valid_snapshot(2).unwrap();
        // best is now snapshot-2; snapshot-1 is the transient one
        assert_eq!(dir.transient_disk_usage(), 100);
    }
}
