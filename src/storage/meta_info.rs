use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::error;

use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::SerialNum;

/// One registered snapshot of an attribute directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotMeta {
    pub valid: bool,
    pub serial: SerialNum,
    pub dir_name: String,
}

pub fn snapshot_dir_name(serial: SerialNum) -> String {
    format!("snapshot-{}", serial)
}

/// The per-attribute snapshot registry, persisted as `meta-info.txt`: one
/// ASCII line per snapshot, `valid snapshot-<serial>` or
/// `invalid snapshot-<serial>`.
#[derive(Debug)]
pub struct IndexMetaInfo {
    dir: PathBuf,
    snapshots: Vec<SnapshotMeta>,
}

const META_FILE: &str = "meta-info.txt";

impl IndexMetaInfo {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        IndexMetaInfo { dir: dir.into(), snapshots: Vec::new() }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    pub fn load(&mut self) -> Result<()> {
        let path = self.path();
        if !path.exists() {
            return Ok(());
        }
        let content = fs::read_to_string(&path)?;
        let mut snapshots = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let flag = parts.next().unwrap_or("");
            let dir_name = parts.next().unwrap_or("");
            let valid = match flag {
                "valid" => true,
                "invalid" => false,
                _ => {
                    return Err(Error::new(
                        ErrorKind::Parse,
                        format!("bad meta-info line '{}' in {}", line, path.display()),
                    ));
                }
            };
            let serial = dir_name
                .strip_prefix("snapshot-")
                .and_then(|s| s.parse::<SerialNum>().ok())
                .ok_or_else(|| {
                    Error::new(
                        ErrorKind::Parse,
                        format!("bad snapshot name '{}' in {}", dir_name, path.display()),
                    )
                })?;
            snapshots.push(SnapshotMeta { valid, serial, dir_name: dir_name.to_string() });
        }
        snapshots.sort_by_key(|s| s.serial);
        self.snapshots = snapshots;
        Ok(())
    }

    /// Atomically rewrites the meta-info file (tmp file, rename, dir sync).
    /// Failure here is the data-integrity boundary: the process aborts so
    /// the last persisted registry plus the transaction log stay
    /// authoritative.
    pub fn save(&self) {
        if let Err(e) = self.try_save() {
            error!(dir = %self.dir.display(), error = %e, "could not save attribute meta-info file");
            std::process::abort();
        }
    }

    fn try_save(&self) -> Result<()> {
        let tmp = self.dir.join(format!("{}.new", META_FILE));
        {
            let mut file = File::create(&tmp)?;
            for snap in &self.snapshots {
                let flag = if snap.valid { "valid" } else { "invalid" };
                writeln!(file, "{} {}", flag, snap.dir_name)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, self.path())?;
        sync_dir(&self.dir)?;
        Ok(())
    }

    pub fn snapshots(&self) -> &[SnapshotMeta] {
        &self.snapshots
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn add_snapshot(&mut self, snap: SnapshotMeta) {
        self.snapshots.retain(|s| s.serial != snap.serial);
        self.snapshots.push(snap);
        self.snapshots.sort_by_key(|s| s.serial);
    }

    pub fn get_snapshot(&self, serial: SerialNum) -> Option<&SnapshotMeta> {
        self.snapshots.iter().find(|s| s.serial == serial)
    }

    pub fn validate_snapshot(&mut self, serial: SerialNum) {
        if let Some(snap) = self.snapshots.iter_mut().find(|s| s.serial == serial) {
            snap.valid = true;
        }
    }

    pub fn invalidate_snapshot(&mut self, serial: SerialNum) {
        if let Some(snap) = self.snapshots.iter_mut().find(|s| s.serial == serial) {
            snap.valid = false;
        }
    }

    pub fn remove_snapshot(&mut self, serial: SerialNum) {
        self.snapshots.retain(|s| s.serial != serial);
    }

    /// Highest-serial valid snapshot.
    pub fn best_snapshot(&self) -> Option<&SnapshotMeta> {
        self.snapshots.iter().filter(|s| s.valid).max_by_key(|s| s.serial)
    }
}

pub fn sync_dir(dir: &Path) -> Result<()> {
    let handle = File::open(dir)?;
    handle.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut info = IndexMetaInfo::new(dir.path());
        info.add_snapshot(SnapshotMeta { valid: false, serial: 200, dir_name: snapshot_dir_name(200) });
        info.add_snapshot(SnapshotMeta { valid: true, serial: 100, dir_name: snapshot_dir_name(100) });
        info.save();

        let mut loaded = IndexMetaInfo::new(dir.path());
        loaded.load().unwrap();
        assert_eq!(loaded.snapshots().len(), 2);
        assert_eq!(loaded.snapshots()[0].serial, 100);
        assert_eq!(loaded.best_snapshot().unwrap().serial, 100);

        loaded.validate_snapshot(200);
        assert_eq!(loaded.best_snapshot().unwrap().serial, 200);
    }

    #[test]
    fn empty_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut info = IndexMetaInfo::new(dir.path());
        info.load().unwrap();
        assert!(info.is_empty());
        assert!(info.best_snapshot().is_none());
    }

    #[test]
    fn malformed_lines_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(META_FILE), "valid not-a-snapshot\n").unwrap();
        let mut info = IndexMetaInfo::new(dir.path());
        assert!(info.load().is_err());
    }
}
