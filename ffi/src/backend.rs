//! Backend selection functions

use std::ffi::{CString, c_char, c_int};
use std::ptr;
use std::sync::{Mutex, OnceLock};

use calc_shared::codes;

use crate::{borrow_str, guard, publish};

static AVAILABLE: OnceLock<CString> = OnceLock::new();
static CURRENT: Mutex<Option<CString>> = Mutex::new(None);

/// Comma-joined backend names in availability order, e.g. `"rust,cemu"`.
///
/// The string lives for the rest of the process.
#[unsafe(no_mangle)]
pub extern "C" fn emu_backend_get_available() -> *const c_char {
    guard(ptr::null(), |d| {
        AVAILABLE
            .get_or_init(|| {
                CString::new(d.available_backends().join(",")).unwrap_or_default()
            })
            .as_ptr()
    })
}

/// Name of the active backend, or null when none has been selected.
///
/// The string stays valid until the next call.
#[unsafe(no_mangle)]
pub extern "C" fn emu_backend_get_current() -> *const c_char {
    guard(ptr::null(), |d| publish(&CURRENT, d.current_backend()))
}

/// Switch to backend `name`, ending any live session.
///
/// Returns 0 or a negative error code. On failure the previous backend
/// stays active.
///
/// # Safety
///
/// `name` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn emu_backend_set(name: *const c_char) -> c_int {
    let Some(name) = (unsafe { borrow_str(name) }) else {
        return codes::EMPTY_OR_INVALID_INPUT;
    };
    guard(codes::NO_BACKEND_AVAILABLE, |d| match d.set_backend(name) {
        Ok(()) => codes::OK,
        Err(err) => err.code(),
    })
}

/// Number of backends in the catalog.
#[unsafe(no_mangle)]
pub extern "C" fn emu_backend_count() -> c_int {
    guard(0, |d| c_int::try_from(d.backend_count()).unwrap_or(c_int::MAX))
}
