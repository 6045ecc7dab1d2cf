//! Calc Core - backend host for calculator emulator cores
//!
//! This crate lets a host application drive interchangeable emulator
//! cores through one stable surface.
//!
//! # Architecture
//!
//! - [`Backend`] - Operation table every core is reached through
//! - [`SingletonAdapter`] - Session guard for cores with process-global state
//! - [`StateCodec`] - Versioned save-state envelope
//! - [`BackendRegistry`] - Catalog, active backend, and dynamic module loading
//! - [`Dispatcher`] - Thread-safe façade with a bounded backend log ring

pub mod backend;
pub mod config;
pub mod error;
pub mod facade;
pub mod logs;
pub mod registry;
pub mod singleton;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod test_utils;

pub use backend::dylib::{BackendVTable, DynamicBackend, StaticSymbols, SymbolSource};
pub use backend::{Backend, FrameView, LogSink, RawHandle};
pub use config::HostConfig;
pub use error::EmuError;
pub use facade::Dispatcher;
pub use logs::{LogListener, LogRing};
pub use registry::{BackendCatalog, BackendEntry, BackendRegistry, SessionHandle};
pub use singleton::{GlobalCore, SingletonAdapter};
pub use state::{StateCodec, StateHeader};
