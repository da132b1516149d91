//! Advisory driver lock.
//!
//! Driver runs that change host network state on the same host are
//! serialized with an exclusive `flock` on a per-driver lock file. The lock
//! is held by a [`DriverLock`] and released when it is dropped.

use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

use crate::error::{DriverError, Result};

/// Held exclusive lock on a driver lock file.
pub struct DriverLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl DriverLock {
    /// Lock file path for the driver `name` in `dir`.
    pub fn path_for(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("vnm-{}-lock", name))
    }

    /// Open the lock file of driver `name` and block until it is locked.
    #[instrument]
    pub fn acquire(dir: &Path, name: &str) -> Result<Self> {
        let path = Self::path_for(dir, name);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| DriverError::LockFailed(format!("{}: {}", path.display(), e)))?;

        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| DriverError::LockFailed(format!("{}: {}", path.display(), errno)))?;

        debug!(path = %path.display(), "Driver lock acquired");

        Ok(Self { _lock: lock, path })
    }

    /// Path of the locked file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DriverLock {
    fn drop(&mut self) {
        debug!(path = %self.path.display(), "Driver lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn try_lock(path: &Path) -> bool {
        let file = File::open(path).unwrap();
        Flock::lock(file, FlockArg::LockExclusiveNonblock).is_ok()
    }

    #[test]
    fn test_lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();

        let lock = DriverLock::acquire(dir.path(), "firewall").unwrap();
        assert_eq!(lock.path(), dir.path().join("vnm-firewall-lock"));
        assert!(!try_lock(lock.path()));

        let path = lock.path().to_path_buf();
        drop(lock);
        assert!(try_lock(&path));
    }

    #[test]
    fn test_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = DriverLock::acquire(&dir.path().join("absent"), "firewall");
        assert!(matches!(result, Err(DriverError::LockFailed(_))));
    }
}
