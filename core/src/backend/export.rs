//! Exporting a [`Backend`] as a loadable module.
//!
//! [`export_backend!`](crate::export_backend) expands to the `backend_*`
//! C functions that [`super::dylib::BackendVTable::bind`] looks for. Build
//! the crate that invokes it as a `cdylib` named `emu_<name>` and the
//! registry can load it.
//!
//! The exported backend lives in a static [`ExportedBackend`], created on
//! first use. No panic crosses the C boundary: a panicking operation
//! returns its quiescent result instead.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::ptr;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use calc_shared::codes;

use super::dylib::LogCallback;
use super::{Backend, LogSink, RawHandle};

/// Process-wide slot for the backend a module exports.
pub struct ExportedBackend<T> {
    backend: Mutex<Option<T>>,
    init: fn() -> T,
    name: OnceLock<CString>,
}

impl<T: Backend> ExportedBackend<T> {
    pub const fn new(init: fn() -> T) -> Self {
        Self {
            backend: Mutex::new(None),
            init,
            name: OnceLock::new(),
        }
    }

    fn with<R>(&self, quiescent: R, f: impl FnOnce(&mut T) -> R) -> R {
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut guard = self.backend.lock().unwrap_or_else(PoisonError::into_inner);
            let backend = guard.get_or_insert_with(self.init);
            f(backend)
        }));
        result.unwrap_or(quiescent)
    }

    fn with_handle<R>(
        &self,
        handle: *mut c_void,
        quiescent: R,
        f: impl FnOnce(&mut T, RawHandle) -> R,
    ) -> R {
        match RawHandle::from_ptr(handle) {
            Some(handle) => self.with(quiescent, |backend| f(backend, handle)),
            None => quiescent,
        }
    }

    pub fn name_ptr(&self) -> *const c_char {
        if let Some(name) = self.name.get() {
            return name.as_ptr();
        }
        match self.with(None, |backend| CString::new(backend.name()).ok()) {
            Some(name) => self.name.get_or_init(|| name).as_ptr(),
            None => ptr::null(),
        }
    }

    pub fn create(&self) -> *mut c_void {
        self.with(ptr::null_mut(), |backend| {
            backend.create().map_or(ptr::null_mut(), RawHandle::as_ptr)
        })
    }

    pub fn destroy(&self, handle: *mut c_void) {
        self.with_handle(handle, (), |backend, handle| backend.destroy(handle))
    }

    pub fn set_log_callback(&self, callback: Option<LogCallback>) {
        let sink = callback.map(|callback| {
            Arc::new(move |line: &str| {
                if let Ok(line) = CString::new(line.replace('\0', " ")) {
                    // SAFETY: the host keeps the callback valid until it
                    // replaces or clears it.
                    unsafe { callback(line.as_ptr()) }
                }
            }) as LogSink
        });
        self.with((), |backend| backend.set_log_sink(sink))
    }

    /// # Safety
    ///
    /// `data` must be null or point to `len` readable bytes.
    pub unsafe fn load_rom(&self, handle: *mut c_void, data: *const u8, len: usize) -> c_int {
        let rom = unsafe { byte_slice(data, len) };
        self.with_handle(handle, codes::INVALID_HANDLE, |backend, handle| {
            match backend.load_rom(handle, rom) {
                Ok(()) => codes::OK,
                Err(code) => code,
            }
        })
    }

    pub fn reset(&self, handle: *mut c_void) {
        self.with_handle(handle, (), |backend, handle| backend.reset(handle))
    }

    pub fn power_on(&self, handle: *mut c_void) {
        self.with_handle(handle, (), |backend, handle| backend.power_on(handle))
    }

    pub fn run_cycles(&self, handle: *mut c_void, cycles: c_int) -> c_int {
        self.with_handle(handle, 0, |backend, handle| backend.run_cycles(handle, cycles))
    }

    /// # Safety
    ///
    /// `width` and `height` must each be null or valid for a write.
    pub unsafe fn framebuffer(
        &self,
        handle: *mut c_void,
        width: *mut c_int,
        height: *mut c_int,
    ) -> *const u32 {
        let (w, h, pixels) = self.with_handle(handle, (0, 0, ptr::null()), |backend, handle| {
            let view = backend.framebuffer(handle);
            let pixels = view.pixels.map_or(ptr::null(), <[u32]>::as_ptr);
            (view.width, view.height, pixels)
        });
        // SAFETY: checked for null; the caller guarantees validity.
        unsafe {
            if !width.is_null() {
                *width = c_int::try_from(w).unwrap_or(0);
            }
            if !height.is_null() {
                *height = c_int::try_from(h).unwrap_or(0);
            }
        }
        pixels
    }

    pub fn set_key(&self, handle: *mut c_void, row: c_int, col: c_int, down: c_int) {
        self.with_handle(handle, (), |backend, handle| {
            backend.set_key(handle, row, col, down != 0)
        })
    }

    pub fn backlight(&self, handle: *mut c_void) -> u8 {
        self.with_handle(handle, 0, |backend, handle| backend.backlight(handle))
    }

    pub fn is_lcd_on(&self, handle: *mut c_void) -> c_int {
        self.with_handle(handle, 0, |backend, handle| {
            c_int::from(backend.is_lcd_on(handle))
        })
    }

    pub fn save_state_size(&self, handle: *mut c_void) -> usize {
        self.with_handle(handle, 0, |backend, handle| backend.save_state_size(handle))
    }

    /// # Safety
    ///
    /// `out` must be null or point to `capacity` writable bytes.
    pub unsafe fn save_state(&self, handle: *mut c_void, out: *mut u8, capacity: usize) -> c_int {
        let out: &mut [u8] = if out.is_null() {
            &mut []
        } else {
            // SAFETY: non-null and sized by the caller.
            unsafe { std::slice::from_raw_parts_mut(out, capacity) }
        };
        self.with_handle(handle, codes::INVALID_HANDLE, |backend, handle| {
            match backend.save_state(handle, out) {
                Ok(len) => c_int::try_from(len).unwrap_or(codes::BUFFER_TOO_SMALL),
                Err(code) => code,
            }
        })
    }

    /// # Safety
    ///
    /// `data` must be null or point to `len` readable bytes.
    pub unsafe fn load_state(&self, handle: *mut c_void, data: *const u8, len: usize) -> c_int {
        let image = unsafe { byte_slice(data, len) };
        self.with_handle(handle, codes::INVALID_HANDLE, |backend, handle| {
            match backend.load_state(handle, image) {
                Ok(()) => codes::OK,
                Err(code) => code,
            }
        })
    }

    /// # Safety
    ///
    /// `path` must be null or a NUL-terminated string.
    pub unsafe fn set_temp_dir(&self, path: *const c_char) {
        if path.is_null() {
            return;
        }
        let dir = PathBuf::from(unsafe { CStr::from_ptr(path) }.to_string_lossy().into_owned());
        self.with((), |backend| {
            if backend.supports_scratch_dir() {
                backend.set_scratch_dir(&dir);
            }
        })
    }
}

unsafe fn byte_slice<'a>(data: *const u8, len: usize) -> &'a [u8] {
    if data.is_null() {
        &[]
    } else {
        // SAFETY: non-null and sized by the caller.
        unsafe { std::slice::from_raw_parts(data, len) }
    }
}

/// Export a [`Backend`](crate::Backend) type as `backend_*` C functions.
///
/// ```ignore
/// calc_core::export_backend!(MyBackend);                 // uses Default
/// calc_core::export_backend!(MyBackend, MyBackend::new); // explicit constructor
/// ```
///
/// Also generates `__calc_exported_backend::symbols()`, a symbol table for
/// binding the backend in-process.
#[macro_export]
macro_rules! export_backend {
    ($backend:ty) => {
        $crate::export_backend!($backend, <$backend as ::std::default::Default>::default);
    };
    ($backend:ty, $init:expr) => {
        #[doc(hidden)]
        pub mod __calc_exported_backend {
            #[allow(unused_imports)]
            use super::*;
            use ::std::ffi::{c_char, c_int, c_void};
            use $crate::backend::dylib::{LogCallback, StaticSymbols};
            use $crate::backend::export::ExportedBackend;

            static BACKEND: ExportedBackend<$backend> = ExportedBackend::new($init);

            #[unsafe(no_mangle)]
            pub extern "C" fn backend_get_name() -> *const c_char {
                BACKEND.name_ptr()
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn backend_create() -> *mut c_void {
                BACKEND.create()
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn backend_destroy(handle: *mut c_void) {
                BACKEND.destroy(handle)
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn backend_set_log_callback(callback: Option<LogCallback>) {
                BACKEND.set_log_callback(callback)
            }

            /// # Safety
            ///
            /// `data` must be null or point to `len` readable bytes.
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn backend_load_rom(
                handle: *mut c_void,
                data: *const u8,
                len: usize,
            ) -> c_int {
                unsafe { BACKEND.load_rom(handle, data, len) }
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn backend_reset(handle: *mut c_void) {
                BACKEND.reset(handle)
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn backend_power_on(handle: *mut c_void) {
                BACKEND.power_on(handle)
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn backend_run_cycles(handle: *mut c_void, cycles: c_int) -> c_int {
                BACKEND.run_cycles(handle, cycles)
            }

            /// # Safety
            ///
            /// `width` and `height` must each be null or valid for a write.
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn backend_framebuffer(
                handle: *mut c_void,
                width: *mut c_int,
                height: *mut c_int,
            ) -> *const u32 {
                unsafe { BACKEND.framebuffer(handle, width, height) }
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn backend_set_key(
                handle: *mut c_void,
                row: c_int,
                col: c_int,
                down: c_int,
            ) {
                BACKEND.set_key(handle, row, col, down)
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn backend_get_backlight(handle: *mut c_void) -> u8 {
                BACKEND.backlight(handle)
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn backend_is_lcd_on(handle: *mut c_void) -> c_int {
                BACKEND.is_lcd_on(handle)
            }

            #[unsafe(no_mangle)]
            pub extern "C" fn backend_save_state_size(handle: *mut c_void) -> usize {
                BACKEND.save_state_size(handle)
            }

            /// # Safety
            ///
            /// `out` must be null or point to `capacity` writable bytes.
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn backend_save_state(
                handle: *mut c_void,
                out: *mut u8,
                capacity: usize,
            ) -> c_int {
                unsafe { BACKEND.save_state(handle, out, capacity) }
            }

            /// # Safety
            ///
            /// `data` must be null or point to `len` readable bytes.
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn backend_load_state(
                handle: *mut c_void,
                data: *const u8,
                len: usize,
            ) -> c_int {
                unsafe { BACKEND.load_state(handle, data, len) }
            }

            /// # Safety
            ///
            /// `path` must be null or a NUL-terminated string.
            #[unsafe(no_mangle)]
            pub unsafe extern "C" fn backend_set_temp_dir(path: *const c_char) {
                unsafe { BACKEND.set_temp_dir(path) }
            }

            /// Every exported function by symbol name.
            pub fn symbols() -> StaticSymbols {
                [
                    ("backend_get_name", backend_get_name as *mut c_void),
                    ("backend_create", backend_create as *mut c_void),
                    ("backend_destroy", backend_destroy as *mut c_void),
                    ("backend_set_log_callback", backend_set_log_callback as *mut c_void),
                    ("backend_load_rom", backend_load_rom as *mut c_void),
                    ("backend_reset", backend_reset as *mut c_void),
                    ("backend_power_on", backend_power_on as *mut c_void),
                    ("backend_run_cycles", backend_run_cycles as *mut c_void),
                    ("backend_framebuffer", backend_framebuffer as *mut c_void),
                    ("backend_set_key", backend_set_key as *mut c_void),
                    ("backend_get_backlight", backend_get_backlight as *mut c_void),
                    ("backend_is_lcd_on", backend_is_lcd_on as *mut c_void),
                    ("backend_save_state_size", backend_save_state_size as *mut c_void),
                    ("backend_save_state", backend_save_state as *mut c_void),
                    ("backend_load_state", backend_load_state as *mut c_void),
                    ("backend_set_temp_dir", backend_set_temp_dir as *mut c_void),
                ]
                .into_iter()
                .collect()
            }
        }
    };
}
