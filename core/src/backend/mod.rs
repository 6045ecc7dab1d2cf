//! Backend contract
//!
//! A backend is one emulator core behind a fixed set of operations. The
//! host never talks to a core directly; it goes through [`Backend`], which
//! is implemented by in-process adapters ([`crate::SingletonAdapter`]) and
//! by modules loaded at runtime ([`dylib::DynamicBackend`]).
//!
//! Operations on a handle that is not the backend's live session must be
//! quiescent: zero, false, an empty frame, or an error code. They never
//! touch core state.

pub mod dylib;
pub mod export;

use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

/// Opaque session handle minted by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(NonZeroUsize);

impl RawHandle {
    pub fn new(value: usize) -> Option<Self> {
        NonZeroUsize::new(value).map(Self)
    }

    pub fn get(self) -> usize {
        self.0.get()
    }

    pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
        Self::new(ptr as usize)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.get() as *mut c_void
    }
}

/// Borrowed view of a backend's framebuffer.
///
/// `pixels` is `None` until a ROM has been loaded. Dimensions are always
/// reported, even when there are no pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameView<'a> {
    pub width: usize,
    pub height: usize,
    pub pixels: Option<&'a [u32]>,
}

impl FrameView<'static> {
    /// No backend, no session.
    pub const EMPTY: Self = FrameView {
        width: 0,
        height: 0,
        pixels: None,
    };
}

impl<'a> FrameView<'a> {
    pub fn without_pixels(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: None,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

/// Receives log lines from a backend.
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// One emulator core.
///
/// Status codes follow [`calc_shared::codes`]: zero is success, negative
/// values are errors.
pub trait Backend: Send {
    /// Catalog name, e.g. `"cemu"`.
    fn name(&self) -> &str;

    /// Start a session. `None` when the backend cannot host another one.
    fn create(&mut self) -> Option<RawHandle>;

    /// End a session. Unknown handles are ignored.
    fn destroy(&mut self, handle: RawHandle);

    /// Install or clear the log sink. Applies to every session.
    fn set_log_sink(&mut self, sink: Option<LogSink>);

    fn load_rom(&mut self, handle: RawHandle, rom: &[u8]) -> Result<(), i32>;

    fn reset(&mut self, handle: RawHandle);

    fn power_on(&mut self, handle: RawHandle);

    /// Run for about `cycles` cycles and return how many were executed.
    fn run_cycles(&mut self, handle: RawHandle, cycles: i32) -> i32;

    /// Render the current frame into backend-owned storage and return it.
    fn framebuffer(&mut self, handle: RawHandle) -> FrameView<'_>;

    fn set_key(&mut self, handle: RawHandle, row: i32, col: i32, pressed: bool);

    fn backlight(&self, handle: RawHandle) -> u8;

    fn is_lcd_on(&self, handle: RawHandle) -> bool;

    /// Upper bound on a save-state image, zero when nothing is loaded.
    fn save_state_size(&self, handle: RawHandle) -> usize;

    /// Write a save-state image into `out` and return its length.
    fn save_state(&mut self, handle: RawHandle, out: &mut [u8]) -> Result<usize, i32>;

    fn load_state(&mut self, handle: RawHandle, image: &[u8]) -> Result<(), i32>;

    /// Whether the backend wants a scratch directory.
    fn supports_scratch_dir(&self) -> bool {
        false
    }

    /// Directory for temporary files. Ignored unless
    /// [`Backend::supports_scratch_dir`] is true.
    fn set_scratch_dir(&mut self, _dir: &Path) {}
}
