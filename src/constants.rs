//! Application-wide constants
//!
//! Single source of truth for filenames, timeouts and retention limits used
//! across the crate.

/// Desktop store layout and locking
pub mod store {
    use std::time::Duration;

    /// Directory under the platform config dir that owns all persisted state
    pub const APP_DIR: &str = "multidesk";

    /// Backing file for the desktop profile list
    pub const FILENAME: &str = "desktops.json";

    /// Zero-byte marker file co-located with the store file
    pub const LOCK_FILENAME: &str = "desktops.lock";

    /// First retry delay when the lock marker already exists
    pub const LOCK_RETRY_START: Duration = Duration::from_millis(1);

    /// Backoff ceiling between lock attempts
    pub const LOCK_RETRY_CAP: Duration = Duration::from_millis(100);

    /// Overall bound on lock acquisition before giving up
    pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);
}

/// Shell icon list view protocol
pub mod shell {
    use std::time::Duration;

    /// Bound on the item-count query (the underlying send has no native timeout)
    pub const COUNT_TIMEOUT: Duration = Duration::from_secs(3);

    /// Fixed text slot size per icon, in 2-byte code units (MAX_PATH)
    pub const MAX_TEXT_UNITS: usize = 260;

    /// Grace period for explorer to rebuild its windows after a restart
    pub const RESTART_SETTLE: Duration = Duration::from_secs(4);
}

/// Per-user shell-folder registry values
pub mod registry {
    /// Key holding the expandable-string desktop value
    pub const USER_SHELL_FOLDERS: &str =
        r"Software\Microsoft\Windows\CurrentVersion\Explorer\User Shell Folders";

    /// Key holding the plain-string desktop value kept for older consumers
    pub const SHELL_FOLDERS: &str =
        r"Software\Microsoft\Windows\CurrentVersion\Explorer\Shell Folders";

    /// Value name under both keys
    pub const DESKTOP_VALUE: &str = "Desktop";

    /// Subdirectory of the app dir receiving registry snapshots
    pub const BACKUP_DIR: &str = "backups";

    /// Filename prefix for registry snapshots
    pub const BACKUP_PREFIX: &str = "registry-";

    /// Snapshots retained after pruning, newest first
    pub const BACKUP_KEEP: usize = 10;
}

/// Auto-switch monitor defaults
pub mod monitor {
    use std::time::Duration;

    /// Rules file under the app dir
    pub const RULES_FILENAME: &str = "rules.json";

    /// Default poll interval for the process scan
    pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

    /// Default cooldown after a successful auto-switch
    pub const COOLDOWN: Duration = Duration::from_secs(60);
}

/// Baseline profile synthesized on first run
pub mod baseline {
    /// Name of the protected profile capturing the pre-tool system state
    pub const NAME: &str = "Original Desktop";
}
