use std::fs::{File, OpenOptions};
use std::path::Path;

use crate::core::error::{Error, ErrorKind, Result};

/// Single-node guarantee for an attribute base directory: one process owns
/// the tree at a time.
pub struct FileLock {
    file: File,
    exclusive: bool,
}

impl FileLock {
    pub fn acquire(base_dir: &Path, exclusive: bool) -> Result<Self> {
        let lock_path = base_dir.join(".lock");

        let file = if exclusive {
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(false)
                .open(&lock_path)?
        } else {
            OpenOptions::new().read(true).open(&lock_path)?
        };

        #[cfg(unix)]
        {
            use libc::{LOCK_EX, LOCK_NB, LOCK_SH, flock};
            use std::os::unix::io::AsRawFd;

            let fd = file.as_raw_fd();
            let operation = if exclusive { LOCK_EX } else { LOCK_SH } | LOCK_NB;

            unsafe {
                if flock(fd, operation) != 0 {
                    return Err(Error::new(
                        ErrorKind::Io,
                        format!("failed to lock attribute base dir {}", base_dir.display()),
                    ));
                }
            }
        }

        Ok(FileLock { file, exclusive })
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use libc::{LOCK_UN, flock};
            use std::os::unix::io::AsRawFd;

            let fd = self.file.as_raw_fd();
            unsafe {
                flock(fd, LOCK_UN);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_lock_excludes_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let lock = FileLock::acquire(dir.path(), true).unwrap();
        assert!(lock.is_exclusive());
        assert!(FileLock::acquire(dir.path(), true).is_err());
        drop(lock);
        assert!(FileLock::acquire(dir.path(), true).is_ok());
    }
}
