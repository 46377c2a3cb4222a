//! Capture and restore of desktop icon positions.

use core::ffi::c_void;
use std::mem::size_of;

use tracing::{debug, info, warn};
use windows::Win32::Foundation::{HWND, LPARAM, POINT, WPARAM};
use windows::Win32::Graphics::Gdi::InvalidateRect;
use windows::Win32::UI::Controls::{
    LVIF_TEXT, LVITEMW, LVM_GETITEMCOUNT, LVM_GETITEMPOSITION, LVM_GETITEMTEXTW,
    LVM_SETITEMPOSITION, LVM_UPDATE,
};
use windows::Win32::UI::WindowsAndMessaging::{GetWindowThreadProcessId, SendMessageW};
use windows::core::PWSTR;

use super::codec::{decode_text_slot, pack_position, plan_restore};
use super::remote::RemoteProcess;
use super::{ShellError, find_icon_list_view};
use crate::constants::shell::{COUNT_TIMEOUT, MAX_TEXT_UNITS};
use crate::timeout::{TimedResult, run_with_timeout};
use crate::traits::{IconSurface, RestoreOutcome};
use crate::types::IconPosition;

/// Live engine bound to the shell's icon list view window.
pub struct DesktopIconView {
    hwnd: HWND,
}

impl DesktopIconView {
    /// Bind to the current shell's icon view. Must be re-run after an
    /// explorer restart; the old window handle dies with the old process.
    pub fn locate() -> Result<Self, ShellError> {
        Ok(Self {
            hwnd: find_icon_list_view()?,
        })
    }

    /// Item count, bounded by a worker-thread deadline: the send blocks
    /// forever when the shell is hung.
    fn item_count(&self) -> Result<usize, ShellError> {
        let raw = self.hwnd.0 as isize;
        let result = run_with_timeout(COUNT_TIMEOUT, move || {
            let hwnd = HWND(raw as *mut c_void);
            unsafe { SendMessageW(hwnd, LVM_GETITEMCOUNT, None, None) }.0
        });
        match result {
            TimedResult::Completed(n) => Ok(n.max(0) as usize),
            TimedResult::TimedOut => Err(ShellError::Timeout(COUNT_TIMEOUT)),
        }
    }

    fn try_capture(&self) -> Result<Vec<IconPosition>, ShellError> {
        let count = self.item_count()?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut pid = 0u32;
        unsafe { GetWindowThreadProcessId(self.hwnd, Some(&mut pid)) };
        let process = RemoteProcess::open(pid)?;

        let slot_bytes = MAX_TEXT_UNITS * 2;
        let points = process.alloc(count * size_of::<POINT>())?;
        let items = process.alloc(count * size_of::<LVITEMW>())?;
        let texts = process.alloc(count * slot_bytes)?;

        // Item-request structures are built locally, each pointing its text
        // destination at its own slot in the remote text buffer, and shipped
        // in a single batched write.
        let mut requests = Vec::with_capacity(count);
        for i in 0..count {
            let mut item = LVITEMW::default();
            item.mask = LVIF_TEXT;
            item.iItem = i as i32;
            item.pszText = PWSTR((texts.addr() + i * slot_bytes) as *mut u16);
            item.cchTextMax = MAX_TEXT_UNITS as i32;
            requests.push(item);
        }
        let request_bytes = unsafe {
            std::slice::from_raw_parts(
                requests.as_ptr() as *const u8,
                count * size_of::<LVITEMW>(),
            )
        };
        items.write(request_bytes)?;

        // Per-item sends, in strict index order: the message protocol has no
        // batch form for position or text queries.
        for i in 0..count {
            let point_dest = points.addr() + i * size_of::<POINT>();
            let item_dest = items.addr() + i * size_of::<LVITEMW>();
            unsafe {
                SendMessageW(
                    self.hwnd,
                    LVM_GETITEMPOSITION,
                    Some(WPARAM(i)),
                    Some(LPARAM(point_dest as isize)),
                );
                SendMessageW(
                    self.hwnd,
                    LVM_GETITEMTEXTW,
                    Some(WPARAM(i)),
                    Some(LPARAM(item_dest as isize)),
                );
            }
        }

        let point_bytes = points.read_all()?;
        let text_bytes = texts.read_all()?;

        let mut captured = Vec::with_capacity(count);
        for i in 0..count {
            let p = &point_bytes[i * size_of::<POINT>()..];
            let x = i32::from_ne_bytes(p[0..4].try_into().unwrap_or_default());
            let y = i32::from_ne_bytes(p[4..8].try_into().unwrap_or_default());

            let slot = &text_bytes[i * slot_bytes..(i + 1) * slot_bytes];
            let units: Vec<u16> = slot
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            let name = decode_text_slot(&units);
            if name.is_empty() {
                debug!(index = i, "icon with empty name skipped");
                continue;
            }
            captured.push(IconPosition {
                index: i as u32,
                name,
                x,
                y,
            });
        }
        info!(count = captured.len(), live = count, "desktop icon layout captured");
        Ok(captured)
        // Remote buffers and the process handle are released here on every
        // path, success or error, by their drops.
    }
}

/// [`IconSurface`] that re-discovers the list view on every call.
///
/// Window handles die with the shell process, so anything spanning an
/// explorer restart (the switch orchestrator, the monitor) must not hold a
/// bound [`DesktopIconView`] across calls.
pub struct LiveIconSurface;

impl IconSurface for LiveIconSurface {
    fn capture(&self) -> Vec<IconPosition> {
        match DesktopIconView::locate() {
            Ok(view) => view.capture(),
            Err(e) => {
                warn!(error = %e, "icon view unavailable, capture degraded to empty snapshot");
                Vec::new()
            }
        }
    }

    fn restore(&self, positions: &[IconPosition]) -> RestoreOutcome {
        match DesktopIconView::locate() {
            Ok(view) => view.restore(positions),
            Err(e) => {
                warn!(error = %e, "icon view unavailable, restore skipped");
                RestoreOutcome {
                    skipped: positions.len(),
                    ..Default::default()
                }
            }
        }
    }
}

impl IconSurface for DesktopIconView {
    fn capture(&self) -> Vec<IconPosition> {
        match self.try_capture() {
            Ok(positions) => positions,
            Err(e) => {
                warn!(error = %e, "icon capture degraded to an empty snapshot");
                Vec::new()
            }
        }
    }

    fn restore(&self, positions: &[IconPosition]) -> RestoreOutcome {
        let live = match self.item_count() {
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "icon restore skipped, item count unavailable");
                return RestoreOutcome {
                    skipped: positions.len(),
                    ..Default::default()
                };
            }
        };

        let (in_range, out_of_range) = plan_restore(positions, live);
        for stale in &out_of_range {
            // Icons removed since capture; the rest of the batch still applies.
            warn!(
                index = stale.index,
                name = %stale.name,
                live = live,
                "stored icon index outside live range, skipping"
            );
        }

        let mut outcome = RestoreOutcome {
            skipped: out_of_range.len(),
            ..Default::default()
        };
        for pos in in_range {
            let packed = LPARAM(pack_position(pos.x, pos.y));
            let moved = unsafe {
                SendMessageW(
                    self.hwnd,
                    LVM_SETITEMPOSITION,
                    Some(WPARAM(pos.index as usize)),
                    Some(packed),
                )
            };
            unsafe {
                SendMessageW(
                    self.hwnd,
                    LVM_UPDATE,
                    Some(WPARAM(pos.index as usize)),
                    Some(LPARAM(0)),
                )
            };
            if moved.0 != 0 {
                outcome.restored += 1;
            } else {
                outcome.failed += 1;
            }
        }

        if live > 0 {
            unsafe {
                let _ = InvalidateRect(Some(self.hwnd), None, true);
            }
        }
        info!(
            restored = outcome.restored,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "icon layout restore finished"
        );
        outcome
    }
}
