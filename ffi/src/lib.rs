//! C ABI for the calc backend host
//!
//! Every function here forwards to one process-wide [`Dispatcher`]. The
//! dispatcher is built from the platform config on first use, or from an
//! explicit file by calling `emu_init` first.
//!
//! Session handles are opaque `Emu*` values that encode the session token;
//! they are never dereferenced. No panic crosses this boundary.
//!
//! The declarations live in `include/calc/calc_emu.h`.

mod backend;
mod session;

#[cfg(test)]
mod tests;

use std::ffi::{CStr, CString, c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::ptr;
use std::sync::{Mutex, OnceLock, PoisonError};

use calc_core::registry::SessionHandle;
use calc_core::{Dispatcher, config};
use calc_shared::codes;

pub use backend::*;
pub use session::*;

/// Opaque session handle type seen by C.
#[repr(C)]
pub struct Emu {
    _private: [u8; 0],
}

/// Log callback type seen by C.
pub type EmuLogCallback = unsafe extern "C" fn(message: *const c_char);

static DISPATCHER: OnceLock<Dispatcher> = OnceLock::new();

fn dispatcher() -> &'static Dispatcher {
    DISPATCHER.get_or_init(|| Dispatcher::from_config(&config::load()))
}

/// Install `dispatcher` as the process-wide one. Fails if one exists.
fn install(dispatcher: Dispatcher) -> Result<(), Dispatcher> {
    DISPATCHER.set(dispatcher)
}

/// Run `f` against the dispatcher, returning `quiescent` if it panics.
fn guard<R>(quiescent: R, f: impl FnOnce(&'static Dispatcher) -> R) -> R {
    panic::catch_unwind(AssertUnwindSafe(|| f(dispatcher()))).unwrap_or(quiescent)
}

fn handle_to_ptr(handle: SessionHandle) -> *mut Emu {
    usize::try_from(handle.get()).map_or(ptr::null_mut(), ptr::without_provenance_mut)
}

fn ptr_to_handle(emu: *const Emu) -> Option<SessionHandle> {
    SessionHandle::from_raw(emu.addr() as u64)
}

/// Borrow a NUL-terminated string, `None` if null or not UTF-8.
///
/// # Safety
///
/// `s` must be null or a valid NUL-terminated string for `'a`.
unsafe fn borrow_str<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(s) }.to_str().ok()
}

/// Store `value` in `slot` and return a pointer valid until the slot is
/// next written.
fn publish(slot: &Mutex<Option<CString>>, value: Option<String>) -> *const c_char {
    let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
    *slot = value.and_then(|s| CString::new(s.replace('\0', " ")).ok());
    slot.as_ref().map_or(ptr::null(), |s| s.as_ptr())
}

/// Build the dispatcher from `config_path`, or from the platform config
/// when null.
///
/// Returns 0, or `EMU_ERR_INSTANCE_ALREADY_ACTIVE` if the host was already
/// initialized (including implicitly by an earlier call).
///
/// # Safety
///
/// `config_path` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn emu_init(config_path: *const c_char) -> c_int {
    if DISPATCHER.get().is_some() {
        return codes::INSTANCE_ALREADY_ACTIVE;
    }
    let path = unsafe { borrow_str(config_path) }.map(PathBuf::from);
    let result = panic::catch_unwind(|| {
        let config = match &path {
            Some(path) => config::load_or_default(path),
            None => config::load(),
        };
        install(Dispatcher::from_config(&config))
    });
    match result {
        Ok(Ok(())) => {
            tracing::info!(config = ?path, "calc host initialized");
            codes::OK
        }
        Ok(Err(_)) => codes::INSTANCE_ALREADY_ACTIVE,
        Err(_) => codes::NOT_INITIALIZED,
    }
}

/// Install a log listener called with each backend log line, or clear it
/// with null.
#[unsafe(no_mangle)]
pub extern "C" fn emu_set_log_callback(callback: Option<EmuLogCallback>) {
    guard((), |d| {
        let listener = callback.map(|callback| {
            std::sync::Arc::new(move |line: &str| {
                if let Ok(line) = CString::new(line.replace('\0', " ")) {
                    // SAFETY: the host keeps the callback valid until it
                    // replaces or clears it.
                    unsafe { callback(line.as_ptr()) }
                }
            }) as calc_core::LogListener
        });
        d.set_log_callback(listener);
    })
}

static DRAINED: Mutex<Option<CString>> = Mutex::new(None);

/// Take buffered backend log lines, newline-joined and oldest first.
///
/// The string stays valid until the next call. Empty when nothing is
/// buffered.
#[unsafe(no_mangle)]
pub extern "C" fn emu_drain_logs() -> *const c_char {
    guard(ptr::null(), |d| publish(&DRAINED, Some(d.drain_logs().join("\n"))))
}

/// Scratch directory for backends that serialize through files.
///
/// # Safety
///
/// `path` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn emu_set_scratch_dir(path: *const c_char) -> c_int {
    let Some(path) = (unsafe { borrow_str(path) }) else {
        return codes::EMPTY_OR_INVALID_INPUT;
    };
    let path = PathBuf::from(path);
    guard(codes::NOT_INITIALIZED, |d| {
        d.set_scratch_dir(path);
        codes::OK
    })
}
