//! Cross-process lock over the desktop store file.
//!
//! The lock is the exclusive creation of a zero-byte marker file next to the
//! store; whichever process creates it holds the lock. Contenders retry with
//! exponential backoff until an overall timeout.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;
use tracing::{debug, warn};

use super::StoreError;
use crate::constants::store::{LOCK_RETRY_CAP, LOCK_RETRY_START, LOCK_TIMEOUT};

pub struct StoreLock {
    path: PathBuf,
}

impl StoreLock {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire the lock with the default 10 s bound.
    pub fn acquire(&self) -> Result<LockGuard, StoreError> {
        self.acquire_within(LOCK_TIMEOUT)
    }

    /// Acquire the lock, retrying with backoff up to `timeout`.
    pub fn acquire_within(&self, timeout: std::time::Duration) -> Result<LockGuard, StoreError> {
        let started = Instant::now();
        let mut delay = LOCK_RETRY_START;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&self.path) {
                Ok(_) => {
                    debug!(lock = %self.path.display(), "store lock acquired");
                    return Ok(LockGuard {
                        path: self.path.clone(),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if started.elapsed() >= timeout {
                        return Err(StoreError::LockTimeout { waited: timeout });
                    }
                    thread::sleep(delay);
                    delay = (delay * 2).min(LOCK_RETRY_CAP);
                }
                // Missing parent directory: create it and retry immediately.
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    if let Some(parent) = self.path.parent() {
                        std::fs::create_dir_all(parent).map_err(StoreError::Io)?;
                    }
                }
                Err(e) => return Err(StoreError::Io(e)),
            }
        }
    }
}

/// Held lock; dropping it deletes the marker file best-effort.
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            // Release failures are swallowed; a stale marker only delays the
            // next acquirer until its timeout.
            warn!(lock = %self.path.display(), error = %e, "failed to release store lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn lock_in(dir: &tempfile::TempDir) -> StoreLock {
        StoreLock::new(dir.path().join("desktops.lock"))
    }

    #[test]
    fn test_acquire_creates_marker_and_release_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        let guard = lock.acquire_within(Duration::from_millis(200)).unwrap();
        assert!(lock.path().exists());
        drop(guard);
        assert!(!lock.path().exists());
    }

    #[test]
    fn test_contended_lock_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        let _held = lock.acquire_within(Duration::from_millis(200)).unwrap();

        let second = StoreLock::new(lock.path().to_path_buf());
        let err = second
            .acquire_within(Duration::from_millis(50))
            .err()
            .expect("second acquire should time out");
        assert!(matches!(err, StoreError::LockTimeout { .. }));
    }

    #[test]
    fn test_reacquire_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = lock_in(&dir);
        drop(lock.acquire_within(Duration::from_millis(200)).unwrap());
        assert!(lock.acquire_within(Duration::from_millis(200)).is_ok());
    }

    #[test]
    fn test_acquire_creates_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let lock = StoreLock::new(dir.path().join("nested/deeper/desktops.lock"));
        let guard = lock.acquire_within(Duration::from_millis(200)).unwrap();
        assert!(lock.path().exists());
        drop(guard);
    }
}
