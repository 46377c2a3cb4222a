//! **multidesk** — virtual desktops for the Windows shell.
//!
//! Windows has one desktop folder per user; multidesk fakes several by
//! swapping which directory the shell treats as "the desktop" and
//! persisting each profile's wallpaper and icon layout across the swap.
//! A switch captures the outgoing desktop's icon positions out of the
//! shell's own list view, rewrites the per-user shell-folder registry
//! values, and — after the caller restarts explorer — restores the incoming
//! profile's layout.
//!
//! # Architecture
//!
//! The orchestration logic is decoupled from the live OS through the traits
//! in [`traits`]:
//!
//! * [`traits::DesktopBackend`] — the registered desktop path and wallpaper
//!   (live implementation: [`registry::ShellFolders`]).
//! * [`traits::IconSurface`] — icon layout capture/restore (live
//!   implementation: the cross-process list-view engine in [`shell`]).
//! * [`traits::ProcessScanner`] — the process scan feeding the
//!   auto-switch [`monitor`].
//!
//! Everything outside the `cfg(windows)` implementations builds and tests
//! on any platform.

pub mod constants;
pub mod monitor;
pub mod registry;
pub mod shell;
pub mod store;
pub mod switcher;
pub mod timeout;
pub mod traits;
pub mod types;
