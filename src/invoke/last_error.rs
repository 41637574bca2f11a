//! Per-thread capture of the native "last error" value

use std::cell::Cell;

thread_local! {
    static LAST_ERROR: Cell<i32> = const { Cell::new(0) };
}

/// Record the OS error of the calling thread; call right after the native call
#[inline]
pub(crate) fn capture() {
    let code = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    LAST_ERROR.with(|e| e.set(code));
}

/// Error saved by the most recent call on this thread that requested it
pub fn last_error() -> i32 {
    LAST_ERROR.with(|e| e.get())
}

/// Overwrite the saved error of this thread
pub fn set_last_error(code: i32) {
    LAST_ERROR.with(|e| e.set(code));
}
