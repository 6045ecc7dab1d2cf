//! Status codes that cross the C ABI.
//!
//! Zero is success. Negative values are errors. `run_cycles` and
//! `save_state` return non-negative counts on success instead of zero.

pub const OK: i32 = 0;

/// Handle does not match the live session.
pub const INVALID_HANDLE: i32 = -1;
/// Input buffer is empty, null, or exceeds the flash ceiling.
pub const EMPTY_OR_INVALID_INPUT: i32 = -2;
/// Session exists but no ROM has been loaded.
pub const NOT_INITIALIZED: i32 = -3;
/// No backend could be selected.
pub const NO_BACKEND_AVAILABLE: i32 = -4;
/// A second instance was requested while one is live.
pub const INSTANCE_ALREADY_ACTIVE: i32 = -5;
/// Backend name is not in the catalog.
pub const UNKNOWN_BACKEND: i32 = -6;
/// Backend module could not be opened.
pub const MODULE_LOAD_FAILED: i32 = -7;
/// Backend module is missing a required symbol.
pub const SYMBOL_MISSING: i32 = -8;

/// Operation not implemented by this backend.
pub const UNSUPPORTED: i32 = -100;
/// Output buffer below the required size.
pub const BUFFER_TOO_SMALL: i32 = -101;
/// Save-state image shorter than the minimum image length.
pub const DATA_TOO_SHORT: i32 = -102;
/// Save-state version tag does not match the backend.
pub const VERSION_MISMATCH: i32 = -103;
/// Scratch file for a file-backed core could not be used.
pub const SCRATCH_IO: i32 = -104;
/// Core rejected the save-state payload.
pub const DATA_CORRUPT: i32 = -105;
/// Core failed to serialize its state.
pub const SAVE_FAILED: i32 = -106;

/// Human-readable name of a status code, for logs and the CLI.
pub fn describe(code: i32) -> &'static str {
    match code {
        OK => "ok",
        INVALID_HANDLE => "invalid handle",
        EMPTY_OR_INVALID_INPUT => "empty or invalid input",
        NOT_INITIALIZED => "not initialized",
        NO_BACKEND_AVAILABLE => "no backend available",
        INSTANCE_ALREADY_ACTIVE => "instance already active",
        UNKNOWN_BACKEND => "unknown backend",
        MODULE_LOAD_FAILED => "module load failed",
        SYMBOL_MISSING => "symbol missing",
        UNSUPPORTED => "unsupported",
        BUFFER_TOO_SMALL => "buffer too small",
        DATA_TOO_SHORT => "data too short",
        VERSION_MISMATCH => "version mismatch",
        SCRATCH_IO => "scratch file i/o",
        DATA_CORRUPT => "data corrupt",
        SAVE_FAILED => "save failed",
        c if c > 0 => "positive status",
        _ => "backend-specific error",
    }
}
