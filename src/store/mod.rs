//! Durable, lock-protected store of desktop profiles.
//!
//! The store is a JSON array of [`Desktop`] records shared by every
//! cooperating process (main app, background monitor, helpers). Reads are
//! served from an mtime-keyed in-process cache when the file has not changed
//! on disk; writes always go through the cross-process marker-file lock.

mod lock;

pub use lock::{LockGuard, StoreLock};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info};

use crate::constants::store::{APP_DIR, FILENAME, LOCK_FILENAME, LOCK_TIMEOUT};
use crate::types::Desktop;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store lock not acquired within {waited:?}")]
    LockTimeout { waited: Duration },
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

struct CachedSnapshot {
    mtime: SystemTime,
    raw: String,
}

/// Service object owning the store file, its lock and its read cache.
///
/// Constructed once and passed by reference to all callers; there is no
/// ambient global state.
pub struct DesktopStore {
    path: PathBuf,
    lock: StoreLock,
    lock_timeout: Duration,
    cache: Option<CachedSnapshot>,
}

impl DesktopStore {
    /// Store under the platform config dir (`<config>/multidesk/desktops.json`).
    pub fn open_default() -> Self {
        let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        dir.push(APP_DIR);
        Self::at(&dir)
    }

    /// Store rooted at an explicit directory.
    pub fn at(dir: &Path) -> Self {
        Self {
            path: dir.join(FILENAME),
            lock: StoreLock::new(dir.join(LOCK_FILENAME)),
            lock_timeout: LOCK_TIMEOUT,
            cache: None,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the current profile list.
    ///
    /// A missing file is an empty store. A corrupt file is logged and treated
    /// as empty; corruption must never crash a caller. The only surfaced
    /// failure is lock contention on a cache miss. Every call deserializes
    /// fresh objects, so mutating a returned list never leaks into later
    /// loads.
    pub fn load(&mut self) -> Result<Vec<Desktop>, StoreError> {
        let mtime = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => {
                self.cache = None;
                return Ok(Vec::new());
            }
        };

        if let Some(cache) = &self.cache
            && cache.mtime == mtime
        {
            debug!(store = %self.path.display(), "serving desktops from cache");
            return Ok(self.parse(&cache.raw));
        }

        // Changed (or never seen) on disk: re-read under the lock so a
        // concurrent writer cannot hand us a half-written file.
        let _guard = self.lock.acquire_within(self.lock_timeout)?;
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => {
                self.cache = None;
                return Ok(Vec::new());
            }
        };
        let mtime = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .unwrap_or(mtime);
        let desktops = self.parse(&raw);
        self.cache = Some(CachedSnapshot { mtime, raw });
        Ok(desktops)
    }

    /// Persist the full profile list atomically under the cross-process lock,
    /// then refresh the read cache from the just-written state.
    pub fn save(&mut self, desktops: &[Desktop]) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(desktops)?;

        let _guard = self.lock.acquire_within(self.lock_timeout)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &raw)?;
        fs::rename(&tmp, &self.path)?;

        let mtime = fs::metadata(&self.path).and_then(|m| m.modified())?;
        self.cache = Some(CachedSnapshot { mtime, raw });
        info!(store = %self.path.display(), count = desktops.len(), "desktop store saved");
        Ok(())
    }

    fn parse(&self, raw: &str) -> Vec<Desktop> {
        match serde_json::from_str(raw) {
            Ok(desktops) => desktops,
            Err(e) => {
                error!(
                    store = %self.path.display(),
                    error = %e,
                    "desktop store is unreadable, treating as empty"
                );
                Vec::new()
            }
        }
    }
}
