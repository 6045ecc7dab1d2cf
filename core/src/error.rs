//! Error taxonomy shared by the registry, the session guard and the façade.
//!
//! Every variant maps to a stable status code in [`calc_shared::codes`] so
//! the C ABI can report it. Backends report failures as bare codes, which
//! [`EmuError::from_code`] maps back.

use calc_shared::codes;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmuError {
    #[error("an emulator instance is already active")]
    InstanceAlreadyActive,

    #[error("handle does not match the live session")]
    InvalidHandle,

    #[error("no ROM has been loaded")]
    NotInitialized,

    #[error("input is empty or exceeds the flash size")]
    EmptyOrInvalidInput,

    #[error("output buffer is too small")]
    BufferTooSmall,

    #[error("save-state version does not match this backend")]
    VersionMismatch,

    #[error("save-state image is too short")]
    DataTooShort,

    #[error("save-state payload was rejected by the core")]
    DataCorrupt,

    #[error("core failed to serialize its state")]
    SaveFailed,

    #[error("scratch file error: {0}")]
    ScratchIo(String),

    #[error("operation not supported by this backend")]
    Unsupported,

    #[error("backend '{0}' is not in the catalog")]
    UnknownBackend(String),

    #[error("backend '{backend}' could not be loaded: {reason}")]
    ModuleLoadFailed { backend: String, reason: String },

    #[error("backend '{backend}' is missing symbol '{symbol}'")]
    SymbolMissing { backend: String, symbol: String },

    #[error("no backend available")]
    NoBackendAvailable,

    #[error("backend returned status {code}")]
    Backend { code: i32 },
}

impl EmuError {
    /// Stable status code for the C ABI.
    pub fn code(&self) -> i32 {
        match self {
            EmuError::InstanceAlreadyActive => codes::INSTANCE_ALREADY_ACTIVE,
            EmuError::InvalidHandle => codes::INVALID_HANDLE,
            EmuError::NotInitialized => codes::NOT_INITIALIZED,
            EmuError::EmptyOrInvalidInput => codes::EMPTY_OR_INVALID_INPUT,
            EmuError::BufferTooSmall => codes::BUFFER_TOO_SMALL,
            EmuError::VersionMismatch => codes::VERSION_MISMATCH,
            EmuError::DataTooShort => codes::DATA_TOO_SHORT,
            EmuError::DataCorrupt => codes::DATA_CORRUPT,
            EmuError::SaveFailed => codes::SAVE_FAILED,
            EmuError::ScratchIo(_) => codes::SCRATCH_IO,
            EmuError::Unsupported => codes::UNSUPPORTED,
            EmuError::UnknownBackend(_) => codes::UNKNOWN_BACKEND,
            EmuError::ModuleLoadFailed { .. } => codes::MODULE_LOAD_FAILED,
            EmuError::SymbolMissing { .. } => codes::SYMBOL_MISSING,
            EmuError::NoBackendAvailable => codes::NO_BACKEND_AVAILABLE,
            EmuError::Backend { code } => *code,
        }
    }

    /// Map a status code reported by a backend.
    ///
    /// Codes that carry detail on the host side (catalog and loader errors)
    /// have none when they come from a backend, so they stay
    /// [`EmuError::Backend`].
    pub fn from_code(code: i32) -> Self {
        match code {
            codes::INSTANCE_ALREADY_ACTIVE => EmuError::InstanceAlreadyActive,
            codes::INVALID_HANDLE => EmuError::InvalidHandle,
            codes::NOT_INITIALIZED => EmuError::NotInitialized,
            codes::EMPTY_OR_INVALID_INPUT => EmuError::EmptyOrInvalidInput,
            codes::BUFFER_TOO_SMALL => EmuError::BufferTooSmall,
            codes::VERSION_MISMATCH => EmuError::VersionMismatch,
            codes::DATA_TOO_SHORT => EmuError::DataTooShort,
            codes::DATA_CORRUPT => EmuError::DataCorrupt,
            codes::SAVE_FAILED => EmuError::SaveFailed,
            codes::SCRATCH_IO => EmuError::ScratchIo(String::from("reported by backend")),
            codes::UNSUPPORTED => EmuError::Unsupported,
            codes::NO_BACKEND_AVAILABLE => EmuError::NoBackendAvailable,
            code => EmuError::Backend { code },
        }
    }
}

/// Turn a backend status into a `Result`. Zero is success.
pub fn check_status(code: i32) -> Result<(), EmuError> {
    if code == codes::OK {
        Ok(())
    } else {
        Err(EmuError::from_code(code))
    }
}
