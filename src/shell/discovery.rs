//! Locating the shell's icon list view.
//!
//! The control hangs off "Program Manager", but since the shell started
//! hosting wallpaper in sibling `WorkerW` windows the `SHELLDLL_DefView`
//! host can live in either place. Both paths are tried in order; the walk
//! must match the real shell's layout exactly or captures target the wrong
//! window.

use tracing::debug;
use windows::Win32::Foundation::HWND;
use windows::Win32::UI::WindowsAndMessaging::{FindWindowExW, FindWindowW};
use windows::core::w;

use super::ShellError;

/// Find the `SysListView32` rendering the desktop icons.
pub fn find_icon_list_view() -> Result<HWND, ShellError> {
    let progman =
        unsafe { FindWindowW(w!("Progman"), None) }.map_err(|_| ShellError::WindowNotFound)?;
    let def_view = find_def_view(progman).ok_or(ShellError::WindowNotFound)?;
    let list_view = unsafe { FindWindowExW(Some(def_view), None, w!("SysListView32"), None) }
        .map_err(|_| ShellError::WindowNotFound)?;
    debug!(hwnd = ?list_view, "desktop icon list view located");
    Ok(list_view)
}

/// The window hosting the icon view: first a walk over top-level `WorkerW`
/// siblings looking for one that owns a `SHELLDLL_DefView` child, then the
/// child directly under `Progman`.
fn find_def_view(progman: HWND) -> Option<HWND> {
    let mut worker: Option<HWND> = None;
    loop {
        worker = unsafe { FindWindowExW(None, worker, w!("WorkerW"), None) }.ok();
        let Some(host) = worker else { break };
        if let Ok(def_view) =
            unsafe { FindWindowExW(Some(host), None, w!("SHELLDLL_DefView"), None) }
        {
            debug!(worker = ?host, "icon view hosted by wallpaper worker window");
            return Some(def_view);
        }
    }
    unsafe { FindWindowExW(Some(progman), None, w!("SHELLDLL_DefView"), None) }.ok()
}
