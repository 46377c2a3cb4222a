//! Bounded execution of blocking calls that have no native timeout.
//!
//! The shell's item-count query can hang indefinitely when explorer is
//! unresponsive, so it runs on a short-lived worker and the caller waits with
//! a deadline. Timing out is a distinct outcome, not an error shaped like the
//! other failures.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimedResult<T> {
    Completed(T),
    TimedOut,
}

impl<T> TimedResult<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            TimedResult::Completed(v) => Some(v),
            TimedResult::TimedOut => None,
        }
    }
}

/// Run `task` on a disposable worker thread, waiting at most `deadline`.
///
/// On timeout the worker is abandoned; it finishes (or hangs) on its own and
/// its result is discarded when the channel closes.
pub fn run_with_timeout<T, F>(deadline: Duration, task: F) -> TimedResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(task());
    });
    match rx.recv_timeout(deadline) {
        Ok(value) => TimedResult::Completed(value),
        Err(_) => TimedResult::TimedOut,
    }
}
