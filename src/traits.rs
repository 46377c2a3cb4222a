//! Seams between the orchestration logic and the live operating system.
//!
//! The switcher and the monitor are generic over these traits so the
//! registry, the shell icon view and the process list can be replaced by
//! in-memory fakes in tests, and so every policy module builds and tests on
//! any platform.

use anyhow::Result;

use crate::types::IconPosition;

/// Raw per-user shell-folder registry values, captured for backups.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DesktopPathValues {
    /// Expandable-string value ("User Shell Folders").
    pub modern: Option<String>,
    /// Plain-string value ("Shell Folders") kept for older consumers.
    pub legacy: Option<String>,
}

/// The OS side of a desktop switch: the registered desktop directory and the
/// wallpaper.
pub trait DesktopBackend {
    /// Effective desktop directory currently registered for the user.
    fn desktop_path(&self) -> Result<String>;

    /// Both raw registry values, for backup snapshots.
    fn raw_desktop_values(&self) -> Result<DesktopPathValues>;

    /// Write `path` into both shell-folder values together. Either write
    /// failing fails the whole operation.
    fn set_desktop_path(&self, path: &str) -> Result<()>;

    fn set_wallpaper(&self, path: &str) -> Result<()>;
}

/// Tallies from one icon-layout restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub restored: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// The live desktop's icon grid.
pub trait IconSurface {
    /// Snapshot the current icon layout. Failures degrade to an empty
    /// snapshot; capture must never fail the caller.
    fn capture(&self) -> Vec<IconPosition>;

    /// Re-apply a stored layout, skipping entries whose index is outside the
    /// live icon range.
    fn restore(&self, positions: &[IconPosition]) -> RestoreOutcome;
}

/// Source of the currently running process names for the auto-switch scan.
pub trait ProcessScanner {
    /// Executable names of all live processes, one scan per call. Processes
    /// the scanner may not inspect are silently omitted.
    fn running_names(&mut self) -> Vec<String>;
}

/// The switch surface the auto-switch monitor drives.
pub trait DesktopSwitching {
    /// Name of the currently active profile, if any.
    fn active_desktop(&mut self) -> Option<String>;

    /// Perform a full switch to `name`. Returns `true` when a switch actually
    /// happened (not already active, target known).
    fn switch_to(&mut self, name: &str) -> Result<bool>;
}
