//! Dispatch façade
//!
//! [`Dispatcher`] is the surface hosts call. It owns the registry behind a
//! single lock, so a backend switch can never interleave with an operation
//! on the old backend. Backend log lines go to a separate [`LogRing`] with
//! its own lock, so a backend may log from inside any operation. The host
//! listener is called only after the registry lock is released.
//!
//! Session operations take a [`SessionHandle`]. A handle that is not the
//! live session gets the quiescent result and changes nothing.

#[cfg(test)]
mod tests;

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::FrameView;
use crate::config::HostConfig;
use crate::error::EmuError;
use crate::logs::{LogListener, LogRing};
use crate::registry::{BackendCatalog, BackendRegistry, SessionHandle};

pub struct Dispatcher {
    registry: Mutex<BackendRegistry>,
    logs: Arc<LogRing>,
}

impl Dispatcher {
    pub fn new(catalog: BackendCatalog) -> Self {
        Self::with_log_ring(catalog, Arc::new(LogRing::default()))
    }

    pub fn with_log_ring(catalog: BackendCatalog, logs: Arc<LogRing>) -> Self {
        let mut registry = BackendRegistry::new(catalog);
        registry.set_log_sink(Some(logs.sink()));
        Self {
            registry: Mutex::new(registry),
            logs,
        }
    }

    /// Dispatcher over the dynamic catalog described by `config`.
    pub fn from_config(config: &HostConfig) -> Self {
        Self::from_config_with_catalog(config, BackendCatalog::from_config(&config.backends))
    }

    /// Dispatcher using `config` for everything but the catalog.
    pub fn from_config_with_catalog(config: &HostConfig, catalog: BackendCatalog) -> Self {
        let dispatcher =
            Self::with_log_ring(catalog, Arc::new(LogRing::new(config.logging.ring_capacity)));
        if let Some(dir) = &config.session.scratch_dir {
            dispatcher.set_scratch_dir(dir.clone());
        }
        dispatcher
    }

    fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            guard: ManuallyDrop::new(self.registry.lock().unwrap_or_else(PoisonError::into_inner)),
            logs: &self.logs,
        }
    }

    pub fn logs(&self) -> &Arc<LogRing> {
        &self.logs
    }

    // ------------------------------------------------------------------
    // Backend selection
    // ------------------------------------------------------------------

    /// Catalog names in availability order.
    pub fn available_backends(&self) -> Vec<String> {
        self.lock().list_available()
    }

    pub fn backend_count(&self) -> usize {
        self.lock().count()
    }

    pub fn current_backend(&self) -> Option<String> {
        self.lock().current().map(str::to_string)
    }

    /// Switch backends. Any live session is destroyed first; a failed
    /// switch leaves the previous backend active.
    pub fn set_backend(&self, name: &str) -> Result<(), EmuError> {
        let mut registry = self.lock();
        tracing::info!(backend = name, "switching backend");
        registry.set(name)
    }

    pub fn set_scratch_dir(&self, dir: impl Into<PathBuf>) {
        self.lock().set_scratch_dir(dir);
    }

    // ------------------------------------------------------------------
    // Logs
    // ------------------------------------------------------------------

    /// Listener called with every backend log line.
    pub fn set_log_callback(&self, listener: Option<LogListener>) {
        self.logs.set_listener(listener);
    }

    /// Take every buffered backend log line, oldest first.
    pub fn drain_logs(&self) -> Vec<String> {
        self.logs.drain()
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Start the session, selecting the default backend if none is active.
    pub fn create(&self) -> Result<SessionHandle, EmuError> {
        let result = self.lock().create_session();
        if let Err(err) = &result {
            tracing::warn!(error = %err, "create failed");
        }
        result
    }

    pub fn destroy(&self, handle: SessionHandle) {
        self.lock().destroy_session_for(handle);
    }

    pub fn load_rom(&self, handle: SessionHandle, rom: &[u8]) -> Result<(), EmuError> {
        let mut registry = self.lock();
        let (backend, raw) = registry
            .session_backend(handle)
            .ok_or(EmuError::InvalidHandle)?;
        backend.load_rom(raw, rom).map_err(EmuError::from_code)
    }

    pub fn reset(&self, handle: SessionHandle) {
        if let Some((backend, raw)) = self.lock().session_backend(handle) {
            backend.reset(raw);
        }
    }

    pub fn power_on(&self, handle: SessionHandle) {
        if let Some((backend, raw)) = self.lock().session_backend(handle) {
            backend.power_on(raw);
        }
    }

    /// Run about `cycles` cycles; returns the number executed.
    pub fn run_cycles(&self, handle: SessionHandle, cycles: i32) -> i32 {
        match self.lock().session_backend(handle) {
            Some((backend, raw)) => backend.run_cycles(raw, cycles),
            None => 0,
        }
    }

    /// Call `f` with the current frame while the lock is held.
    ///
    /// A mismatched handle sees [`FrameView::EMPTY`].
    pub fn framebuffer<R>(&self, handle: SessionHandle, f: impl FnOnce(FrameView<'_>) -> R) -> R {
        let mut registry = self.lock();
        match registry.session_backend(handle) {
            Some((backend, raw)) => f(backend.framebuffer(raw)),
            None => f(FrameView::EMPTY),
        }
    }

    /// Frame dimensions, `(0, 0)` for a mismatched handle.
    pub fn framebuffer_size(&self, handle: SessionHandle) -> (usize, usize) {
        self.framebuffer(handle, |view| (view.width, view.height))
    }

    /// Copy the current frame into `out` and return its dimensions.
    pub fn copy_framebuffer(
        &self,
        handle: SessionHandle,
        out: &mut [u32],
    ) -> Result<(usize, usize), EmuError> {
        let mut registry = self.lock();
        let (backend, raw) = registry
            .session_backend(handle)
            .ok_or(EmuError::InvalidHandle)?;
        let view = backend.framebuffer(raw);
        let pixels = view.pixels.ok_or(EmuError::NotInitialized)?;
        let dst = out.get_mut(..pixels.len()).ok_or(EmuError::BufferTooSmall)?;
        dst.copy_from_slice(pixels);
        Ok((view.width, view.height))
    }

    pub fn set_key(&self, handle: SessionHandle, row: i32, col: i32, pressed: bool) {
        if let Some((backend, raw)) = self.lock().session_backend(handle) {
            backend.set_key(raw, row, col, pressed);
        }
    }

    pub fn backlight(&self, handle: SessionHandle) -> u8 {
        match self.lock().session_backend_ref(handle) {
            Some((backend, raw)) => backend.backlight(raw),
            None => 0,
        }
    }

    pub fn is_lcd_on(&self, handle: SessionHandle) -> bool {
        match self.lock().session_backend_ref(handle) {
            Some((backend, raw)) => backend.is_lcd_on(raw),
            None => false,
        }
    }

    /// Upper bound on a save-state image, zero when nothing is loaded.
    pub fn save_state_size(&self, handle: SessionHandle) -> usize {
        match self.lock().session_backend_ref(handle) {
            Some((backend, raw)) => backend.save_state_size(raw),
            None => 0,
        }
    }

    /// Write a save-state image into `out` and return its length.
    pub fn save_state(&self, handle: SessionHandle, out: &mut [u8]) -> Result<usize, EmuError> {
        let mut registry = self.lock();
        let (backend, raw) = registry
            .session_backend(handle)
            .ok_or(EmuError::InvalidHandle)?;
        backend.save_state(raw, out).map_err(EmuError::from_code)
    }

    /// Save into a freshly sized buffer, trimmed to the image length.
    pub fn save_state_vec(&self, handle: SessionHandle) -> Result<Vec<u8>, EmuError> {
        let mut registry = self.lock();
        let (backend, raw) = registry
            .session_backend(handle)
            .ok_or(EmuError::InvalidHandle)?;
        let size = backend.save_state_size(raw);
        if size == 0 {
            return Err(EmuError::NotInitialized);
        }
        let mut image = vec![0u8; size];
        let len = backend
            .save_state(raw, &mut image)
            .map_err(EmuError::from_code)?;
        image.truncate(len);
        Ok(image)
    }

    pub fn load_state(&self, handle: SessionHandle, image: &[u8]) -> Result<(), EmuError> {
        let mut registry = self.lock();
        let (backend, raw) = registry
            .session_backend(handle)
            .ok_or(EmuError::InvalidHandle)?;
        backend.load_state(raw, image).map_err(EmuError::from_code)
    }

    pub fn live_session(&self) -> Option<SessionHandle> {
        self.lock().live_session()
    }
}

/// Registry lock that flushes queued log lines to the host listener once
/// released.
struct RegistryGuard<'a> {
    guard: ManuallyDrop<MutexGuard<'a, BackendRegistry>>,
    logs: &'a LogRing,
}

impl Deref for RegistryGuard<'_> {
    type Target = BackendRegistry;

    fn deref(&self) -> &BackendRegistry {
        &self.guard
    }
}

impl DerefMut for RegistryGuard<'_> {
    fn deref_mut(&mut self) -> &mut BackendRegistry {
        &mut self.guard
    }
}

impl Drop for RegistryGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the guard is never used again after this.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.logs.deliver_pending();
    }
}
