//! Icon capture/restore engine for the shell's desktop list view.
//!
//! The desktop icons live in a `SysListView32` control inside the shell
//! process. Positions and display names are read and written through list-view
//! messages whose buffers must live in the shell's own address space, so the
//! engine allocates remote memory, batches reads and writes, and releases
//! everything on every exit path.

pub mod codec;

#[cfg(windows)]
mod discovery;
#[cfg(windows)]
mod remote;
#[cfg(windows)]
mod view;

#[cfg(windows)]
pub use discovery::find_icon_list_view;
#[cfg(windows)]
pub use view::{DesktopIconView, LiveIconSurface};

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("desktop icon window not found")]
    WindowNotFound,
    #[error("shell did not answer within {0:?}")]
    Timeout(Duration),
    #[error("cannot open shell process {0} for memory access")]
    ProcessAccess(u32),
    #[error("remote memory operation failed: {0}")]
    Memory(String),
}
