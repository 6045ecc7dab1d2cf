//! Backend registry
//!
//! Holds the catalog, the one active backend and the one live session on
//! it. Switching backends binds the new one before the old one is
//! released, so a failed switch leaves the previous backend in place.
//! A session never outlives the backend that minted it.

mod catalog;

pub use catalog::{
    BackendCatalog, BackendEntry, BackendFactory, BackendSource, module_file_name, module_path,
};

use std::num::NonZeroU64;
use std::path::{Path, PathBuf};

use crate::backend::{Backend, LogSink, RawHandle};
use crate::error::EmuError;

/// Caller-visible session token.
///
/// Tokens are never reused within a registry, so a handle kept past
/// `destroy` or a backend switch never matches a later session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(NonZeroU64);

impl SessionHandle {
    pub fn from_raw(value: u64) -> Option<Self> {
        NonZeroU64::new(value).map(Self)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

struct ActiveBackend {
    name: String,
    backend: Box<dyn Backend>,
}

#[derive(Debug, Clone, Copy)]
struct LiveSession {
    handle: SessionHandle,
    raw: RawHandle,
}

pub struct BackendRegistry {
    catalog: BackendCatalog,
    active: Option<ActiveBackend>,
    session: Option<LiveSession>,
    last_token: u64,
    log_sink: Option<LogSink>,
    scratch_dir: Option<PathBuf>,
}

impl BackendRegistry {
    pub fn new(catalog: BackendCatalog) -> Self {
        Self {
            catalog,
            active: None,
            session: None,
            last_token: 0,
            log_sink: None,
            scratch_dir: None,
        }
    }

    pub fn catalog(&self) -> &BackendCatalog {
        &self.catalog
    }

    pub fn list_available(&self) -> Vec<String> {
        self.catalog.list_available()
    }

    pub fn count(&self) -> usize {
        self.catalog.count()
    }

    /// Name of the active backend.
    pub fn current(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.name.as_str())
    }

    /// Sink installed into every backend this registry activates.
    pub fn set_log_sink(&mut self, sink: Option<LogSink>) {
        self.log_sink = sink.clone();
        if let Some(active) = self.active.as_mut() {
            active.backend.set_log_sink(sink);
        }
    }

    /// Scratch directory for backends that ask for one. Applied to the
    /// active backend now and to every backend activated later.
    pub fn set_scratch_dir(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if let Some(active) = self.active.as_mut()
            && active.backend.supports_scratch_dir()
        {
            active.backend.set_scratch_dir(&dir);
        }
        self.scratch_dir = Some(dir);
    }

    pub fn scratch_dir(&self) -> Option<&Path> {
        self.scratch_dir.as_deref()
    }

    /// Activate backend `name`.
    ///
    /// The new backend is built first. Only once that succeeds is the live
    /// session destroyed and the old backend released; on failure the
    /// registry is unchanged.
    pub fn load(&mut self, name: &str) -> Result<(), EmuError> {
        let entry = self
            .catalog
            .get(name)
            .ok_or_else(|| EmuError::UnknownBackend(name.to_string()))?;

        let mut backend = match entry.instantiate() {
            Ok(backend) => backend,
            Err(err) => {
                tracing::warn!(backend = name, error = %err, "backend failed to load");
                return Err(err);
            }
        };

        self.destroy_session();
        if let Some(old) = self.active.take() {
            tracing::info!(backend = %old.name, "unloading backend");
            drop(old);
        }

        backend.set_log_sink(self.log_sink.clone());
        if let Some(dir) = &self.scratch_dir
            && backend.supports_scratch_dir()
        {
            backend.set_scratch_dir(dir);
        }

        tracing::info!(backend = name, "backend loaded");
        self.active = Some(ActiveBackend {
            name: name.to_string(),
            backend,
        });
        Ok(())
    }

    /// Switch to backend `name`, ending any live session first.
    ///
    /// Names outside the catalog are rejected before anything changes.
    pub fn set(&mut self, name: &str) -> Result<(), EmuError> {
        if !self.catalog.contains(name) {
            return Err(EmuError::UnknownBackend(name.to_string()));
        }
        self.destroy_session();
        self.load(name)
    }

    /// Make sure some backend is active, trying the default first and then
    /// the rest of the catalog in order.
    pub fn ensure_active(&mut self) -> Result<(), EmuError> {
        if self.active.is_some() {
            return Ok(());
        }
        let candidates: Vec<String> = self
            .catalog
            .selection_order()
            .into_iter()
            .map(str::to_string)
            .collect();
        for name in candidates {
            if self.load(&name).is_ok() {
                return Ok(());
            }
        }
        tracing::warn!("no backend could be loaded");
        Err(EmuError::NoBackendAvailable)
    }

    /// Start a session on the active backend, selecting one if needed.
    pub fn create_session(&mut self) -> Result<SessionHandle, EmuError> {
        self.ensure_active()?;
        if self.session.is_some() {
            return Err(EmuError::InstanceAlreadyActive);
        }
        let active = self.active.as_mut().ok_or(EmuError::NoBackendAvailable)?;
        let raw = active
            .backend
            .create()
            .ok_or(EmuError::InstanceAlreadyActive)?;

        self.last_token += 1;
        let handle = SessionHandle::from_raw(self.last_token).ok_or(EmuError::InvalidHandle)?;
        self.session = Some(LiveSession { handle, raw });
        Ok(handle)
    }

    /// End the session if `handle` is the live one.
    pub fn destroy_session_for(&mut self, handle: SessionHandle) -> bool {
        if self.session.is_some_and(|s| s.handle == handle) {
            self.destroy_session();
            true
        } else {
            false
        }
    }

    fn destroy_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        if let Some(active) = self.active.as_mut() {
            active.backend.destroy(session.raw);
        }
    }

    pub fn live_session(&self) -> Option<SessionHandle> {
        self.session.map(|s| s.handle)
    }

    /// The active backend and the raw handle behind `handle`, if `handle`
    /// is the live session.
    pub fn session_backend(&mut self, handle: SessionHandle) -> Option<(&mut dyn Backend, RawHandle)> {
        let session = self.session.filter(|s| s.handle == handle)?;
        let active = self.active.as_mut()?;
        Some((active.backend.as_mut(), session.raw))
    }

    /// Shared-reference form of [`BackendRegistry::session_backend`].
    pub fn session_backend_ref(&self, handle: SessionHandle) -> Option<(&dyn Backend, RawHandle)> {
        let session = self.session.filter(|s| s.handle == handle)?;
        let active = self.active.as_ref()?;
        Some((active.backend.as_ref(), session.raw))
    }
}

impl Drop for BackendRegistry {
    fn drop(&mut self) {
        self.destroy_session();
    }
}
