//! Process-local exclusive lock on a WAL directory.
//!
//! The WAL's in-memory chain state (`next_sequence`, `last_hash`) is only
//! correct if exactly one engine owns the directory, so a second open of the
//! same directory in this process fails with `AlreadyLocked`. A `wal.lock`
//! marker file is also written for operator visibility; it is advisory and a
//! stale marker left by a crashed process never blocks a fresh open.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use crate::error::{Result, WalError};

/// Marker file name inside a locked WAL directory.
pub const LOCK_FILE_NAME: &str = "wal.lock";

fn locked_dirs() -> &'static Mutex<HashSet<PathBuf>> {
    static LOCKED: OnceLock<Mutex<HashSet<PathBuf>>> = OnceLock::new();
    LOCKED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive in-process ownership of one WAL directory.
///
/// Released on drop.
#[derive(Debug)]
pub struct DirLock {
    canonical: PathBuf,
    marker: PathBuf,
}

impl DirLock {
    /// Acquires the lock for `dir`, which must already exist.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let canonical = dir.canonicalize()?;

        {
            let mut locked = locked_dirs().lock().expect("dir lock registry poisoned");
            if !locked.insert(canonical.clone()) {
                return Err(WalError::AlreadyLocked { path: canonical });
            }
        }

        let marker = canonical.join(LOCK_FILE_NAME);
        if let Err(err) = std::fs::write(&marker, format!("{}\n", std::process::id())) {
            locked_dirs()
                .lock()
                .expect("dir lock registry poisoned")
                .remove(&canonical);
            return Err(err.into());
        }

        Ok(Self { canonical, marker })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.marker);
        locked_dirs()
            .lock()
            .expect("dir lock registry poisoned")
            .remove(&self.canonical);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_fails_until_release() {
        let dir = TempDir::new().unwrap();
        let lock = DirLock::acquire(dir.path()).unwrap();
        assert!(dir.path().join(LOCK_FILE_NAME).exists());

        let err = DirLock::acquire(dir.path()).unwrap_err();
        assert!(matches!(err, WalError::AlreadyLocked { .. }));

        drop(lock);
        assert!(!dir.path().join(LOCK_FILE_NAME).exists());
        let _relock = DirLock::acquire(dir.path()).unwrap();
    }

    #[test]
    fn stale_marker_does_not_block() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(LOCK_FILE_NAME), "99999\n").unwrap();
        let _lock = DirLock::acquire(dir.path()).unwrap();
    }
}
