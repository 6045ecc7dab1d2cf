//! Backends loaded from shared modules at runtime.
//!
//! A backend module exports the operation table as plain C functions named
//! `<prefix><operation>`, with `backend_` as the usual prefix. Every name
//! in [`REQUIRED_SYMBOLS`] must resolve or the module is rejected. Binding
//! is all-or-nothing: a partially bound table never exists.
//!
//! The module stays open for as long as the [`DynamicBackend`] that bound
//! it, and is closed when that value is dropped.

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::RwLock;

use super::{Backend, FrameView, LogSink, RawHandle};
use crate::error::EmuError;

/// Prefix used by modules built with [`crate::export_backend!`].
pub const DEFAULT_SYMBOL_PREFIX: &str = "backend_";

/// Operations every module must export.
pub const REQUIRED_SYMBOLS: [&str; 14] = [
    "create",
    "destroy",
    "set_log_callback",
    "load_rom",
    "reset",
    "power_on",
    "run_cycles",
    "framebuffer",
    "set_key",
    "get_backlight",
    "is_lcd_on",
    "save_state_size",
    "save_state",
    "load_state",
];

/// Operations a module may leave out.
pub const OPTIONAL_SYMBOLS: [&str; 2] = ["set_temp_dir", "get_name"];

pub type LogCallback = unsafe extern "C" fn(message: *const c_char);

pub type GetNameFn = unsafe extern "C" fn() -> *const c_char;
pub type CreateFn = unsafe extern "C" fn() -> *mut c_void;
pub type DestroyFn = unsafe extern "C" fn(handle: *mut c_void);
pub type SetLogCallbackFn = unsafe extern "C" fn(callback: Option<LogCallback>);
pub type LoadRomFn = unsafe extern "C" fn(handle: *mut c_void, data: *const u8, len: usize) -> c_int;
pub type HandleFn = unsafe extern "C" fn(handle: *mut c_void);
pub type RunCyclesFn = unsafe extern "C" fn(handle: *mut c_void, cycles: c_int) -> c_int;
pub type FramebufferFn =
    unsafe extern "C" fn(handle: *mut c_void, width: *mut c_int, height: *mut c_int) -> *const u32;
pub type SetKeyFn = unsafe extern "C" fn(handle: *mut c_void, row: c_int, col: c_int, down: c_int);
pub type GetBacklightFn = unsafe extern "C" fn(handle: *mut c_void) -> u8;
pub type IsLcdOnFn = unsafe extern "C" fn(handle: *mut c_void) -> c_int;
pub type SaveStateSizeFn = unsafe extern "C" fn(handle: *mut c_void) -> usize;
pub type SaveStateFn =
    unsafe extern "C" fn(handle: *mut c_void, out: *mut u8, capacity: usize) -> c_int;
pub type LoadStateFn = unsafe extern "C" fn(handle: *mut c_void, data: *const u8, len: usize) -> c_int;
pub type SetTempDirFn = unsafe extern "C" fn(path: *const c_char);

/// Something that can look up exported symbols by name.
pub trait SymbolSource {
    /// Address of `name`, or `None` when it is not exported.
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>>;
}

impl SymbolSource for libloading::Library {
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
        let mut symbol = Vec::with_capacity(name.len() + 1);
        symbol.extend_from_slice(name.as_bytes());
        symbol.push(0);
        // SAFETY: the symbol is read as an untyped address only; it is given
        // a signature in `BackendVTable::bind`.
        let address = unsafe { self.get::<*mut c_void>(&symbol) }.ok()?;
        NonNull::new(*address)
    }
}

/// Symbol table for backends linked into the host binary.
#[derive(Debug, Default, Clone)]
pub struct StaticSymbols {
    symbols: HashMap<String, NonNull<c_void>>,
}

// SAFETY: the table holds function addresses, which are valid on any thread.
unsafe impl Send for StaticSymbols {}
unsafe impl Sync for StaticSymbols {}

impl StaticSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, address: *mut c_void) {
        if let Some(address) = NonNull::new(address) {
            self.symbols.insert(name.into(), address);
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.symbols.remove(name);
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl FromIterator<(&'static str, *mut c_void)> for StaticSymbols {
    fn from_iter<T: IntoIterator<Item = (&'static str, *mut c_void)>>(iter: T) -> Self {
        let mut table = Self::new();
        for (name, address) in iter {
            table.insert(name, address);
        }
        table
    }
}

impl SymbolSource for StaticSymbols {
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
        self.symbols.get(name).copied()
    }
}

/// Bound operation table of one backend module.
#[derive(Debug, Clone, Copy)]
pub struct BackendVTable {
    pub create: CreateFn,
    pub destroy: DestroyFn,
    pub set_log_callback: SetLogCallbackFn,
    pub load_rom: LoadRomFn,
    pub reset: HandleFn,
    pub power_on: HandleFn,
    pub run_cycles: RunCyclesFn,
    pub framebuffer: FramebufferFn,
    pub set_key: SetKeyFn,
    pub get_backlight: GetBacklightFn,
    pub is_lcd_on: IsLcdOnFn,
    pub save_state_size: SaveStateSizeFn,
    pub save_state: SaveStateFn,
    pub load_state: LoadStateFn,
    pub set_temp_dir: Option<SetTempDirFn>,
    pub get_name: Option<GetNameFn>,
}

impl BackendVTable {
    /// Resolve every operation of `backend` from `source`.
    ///
    /// # Safety
    ///
    /// Each symbol `source` resolves under `prefix` must be a function with
    /// the matching signature above.
    pub unsafe fn bind(
        backend: &str,
        prefix: &str,
        source: &dyn SymbolSource,
    ) -> Result<Self, EmuError> {
        let lookup = |name: &str| source.resolve(&format!("{prefix}{name}"));
        let required = |name: &str| {
            lookup(name).ok_or_else(|| EmuError::SymbolMissing {
                backend: backend.to_string(),
                symbol: format!("{prefix}{name}"),
            })
        };

        // SAFETY: function pointers and data pointers have the same size on
        // every supported target; the caller guarantees the signatures.
        macro_rules! bind {
            ($name:literal) => {
                unsafe { std::mem::transmute::<*mut c_void, _>(required($name)?.as_ptr()) }
            };
        }
        macro_rules! bind_optional {
            ($name:literal) => {
                lookup($name)
                    .map(|address| unsafe { std::mem::transmute::<*mut c_void, _>(address.as_ptr()) })
            };
        }

        let vtable = BackendVTable {
            create: bind!("create"),
            destroy: bind!("destroy"),
            set_log_callback: bind!("set_log_callback"),
            load_rom: bind!("load_rom"),
            reset: bind!("reset"),
            power_on: bind!("power_on"),
            run_cycles: bind!("run_cycles"),
            framebuffer: bind!("framebuffer"),
            set_key: bind!("set_key"),
            get_backlight: bind!("get_backlight"),
            is_lcd_on: bind!("is_lcd_on"),
            save_state_size: bind!("save_state_size"),
            save_state: bind!("save_state"),
            load_state: bind!("load_state"),
            set_temp_dir: bind_optional!("set_temp_dir"),
            get_name: bind_optional!("get_name"),
        };
        Ok(vtable)
    }
}

/// Sink that C log callbacks are forwarded to.
///
/// The C callback carries no context pointer, so the sink is process-wide.
/// Only the active module is ever given the trampoline.
static MODULE_LOG_SINK: RwLock<Option<LogSink>> = RwLock::new(None);

unsafe extern "C" fn module_log_trampoline(message: *const c_char) {
    if message.is_null() {
        return;
    }
    // SAFETY: modules pass a NUL-terminated string valid for the call.
    let line = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    if let Ok(sink) = MODULE_LOG_SINK.read()
        && let Some(sink) = sink.as_ref()
    {
        sink(&line);
    }
}

/// A backend reached through a bound [`BackendVTable`].
pub struct DynamicBackend {
    name: String,
    vtable: BackendVTable,
    // Dropped after `vtable` is last used; closes the module.
    _module: Option<libloading::Library>,
}

impl DynamicBackend {
    /// Open the module at `path` and bind its operations.
    ///
    /// The module is closed again if any required symbol is missing.
    pub fn open(name: &str, path: &Path, prefix: &str) -> Result<Self, EmuError> {
        // SAFETY: running a module's initializers is inherent to loading a
        // backend; the catalog only points at backend modules.
        let module = unsafe { libloading::Library::new(path) }.map_err(|e| {
            EmuError::ModuleLoadFailed {
                backend: name.to_string(),
                reason: e.to_string(),
            }
        })?;
        // SAFETY: `prefix` names the backend operation table.
        let vtable = unsafe { BackendVTable::bind(name, prefix, &module)? };
        tracing::debug!(backend = name, path = %path.display(), "bound backend module");

        Ok(Self {
            name: name.to_string(),
            vtable,
            _module: Some(module),
        })
    }

    /// Bind a backend whose symbols are already in this process.
    ///
    /// # Safety
    ///
    /// Same contract as [`BackendVTable::bind`], and the symbols must stay
    /// valid for the life of the returned value.
    pub unsafe fn from_symbols(
        name: &str,
        prefix: &str,
        source: &dyn SymbolSource,
    ) -> Result<Self, EmuError> {
        let vtable = unsafe { BackendVTable::bind(name, prefix, source)? };
        Ok(Self {
            name: name.to_string(),
            vtable,
            _module: None,
        })
    }

    /// Name the module reports for itself, which may differ from the
    /// catalog name.
    pub fn reported_name(&self) -> Option<String> {
        let get_name = self.vtable.get_name?;
        // SAFETY: `get_name` returns a static NUL-terminated string or null.
        let ptr = unsafe { get_name() };
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    pub fn vtable(&self) -> &BackendVTable {
        &self.vtable
    }
}

fn dim(value: c_int) -> usize {
    usize::try_from(value).unwrap_or(0)
}

fn rc_to_result(rc: c_int) -> Result<(), i32> {
    if rc == 0 { Ok(()) } else { Err(rc) }
}

// SAFETY (all calls below): the table was bound against this module's
// exports, handles are ones the module minted, and slices passed in are
// valid for the length given.
impl Backend for DynamicBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&mut self) -> Option<RawHandle> {
        RawHandle::from_ptr(unsafe { (self.vtable.create)() })
    }

    fn destroy(&mut self, handle: RawHandle) {
        unsafe { (self.vtable.destroy)(handle.as_ptr()) }
    }

    fn set_log_sink(&mut self, sink: Option<LogSink>) {
        let installed = sink.is_some();
        if let Ok(mut slot) = MODULE_LOG_SINK.write() {
            *slot = sink;
        }
        let callback: Option<LogCallback> = if installed {
            Some(module_log_trampoline)
        } else {
            None
        };
        unsafe { (self.vtable.set_log_callback)(callback) }
    }

    fn load_rom(&mut self, handle: RawHandle, rom: &[u8]) -> Result<(), i32> {
        rc_to_result(unsafe { (self.vtable.load_rom)(handle.as_ptr(), rom.as_ptr(), rom.len()) })
    }

    fn reset(&mut self, handle: RawHandle) {
        unsafe { (self.vtable.reset)(handle.as_ptr()) }
    }

    fn power_on(&mut self, handle: RawHandle) {
        unsafe { (self.vtable.power_on)(handle.as_ptr()) }
    }

    fn run_cycles(&mut self, handle: RawHandle, cycles: i32) -> i32 {
        unsafe { (self.vtable.run_cycles)(handle.as_ptr(), cycles) }
    }

    fn framebuffer(&mut self, handle: RawHandle) -> FrameView<'_> {
        let (mut width, mut height) = (0, 0);
        let pixels = unsafe { (self.vtable.framebuffer)(handle.as_ptr(), &mut width, &mut height) };
        let (width, height) = (dim(width), dim(height));
        if pixels.is_null() {
            return FrameView::without_pixels(width, height);
        }
        // SAFETY: the module owns `width * height` pixels at `pixels` until
        // its next call, and `&mut self` prevents one while the view lives.
        let pixels = unsafe { std::slice::from_raw_parts(pixels, width * height) };
        FrameView {
            width,
            height,
            pixels: Some(pixels),
        }
    }

    fn set_key(&mut self, handle: RawHandle, row: i32, col: i32, pressed: bool) {
        unsafe { (self.vtable.set_key)(handle.as_ptr(), row, col, c_int::from(pressed)) }
    }

    fn backlight(&self, handle: RawHandle) -> u8 {
        unsafe { (self.vtable.get_backlight)(handle.as_ptr()) }
    }

    fn is_lcd_on(&self, handle: RawHandle) -> bool {
        unsafe { (self.vtable.is_lcd_on)(handle.as_ptr()) != 0 }
    }

    fn save_state_size(&self, handle: RawHandle) -> usize {
        unsafe { (self.vtable.save_state_size)(handle.as_ptr()) }
    }

    fn save_state(&mut self, handle: RawHandle, out: &mut [u8]) -> Result<usize, i32> {
        let rc = unsafe { (self.vtable.save_state)(handle.as_ptr(), out.as_mut_ptr(), out.len()) };
        usize::try_from(rc).map_err(|_| rc)
    }

    fn load_state(&mut self, handle: RawHandle, image: &[u8]) -> Result<(), i32> {
        rc_to_result(unsafe {
            (self.vtable.load_state)(handle.as_ptr(), image.as_ptr(), image.len())
        })
    }

    fn supports_scratch_dir(&self) -> bool {
        self.vtable.set_temp_dir.is_some()
    }

    fn set_scratch_dir(&mut self, dir: &Path) {
        let Some(set_temp_dir) = self.vtable.set_temp_dir else {
            return;
        };
        match CString::new(dir.to_string_lossy().into_owned()) {
            Ok(path) => unsafe { set_temp_dir(path.as_ptr()) },
            Err(_) => tracing::warn!(backend = %self.name, "scratch dir path contains NUL, ignored"),
        }
    }
}

impl Drop for DynamicBackend {
    fn drop(&mut self) {
        // The module may be closed right after this; it must not keep the
        // trampoline.
        unsafe { (self.vtable.set_log_callback)(None) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_module_fails_to_load() {
        let err = DynamicBackend::open(
            "ghost",
            Path::new("/nonexistent/libemu_ghost.so"),
            DEFAULT_SYMBOL_PREFIX,
        )
        .err()
        .unwrap();
        assert!(matches!(err, EmuError::ModuleLoadFailed { ref backend, .. } if backend == "ghost"));
    }

    #[test]
    fn test_empty_table_reports_first_missing_symbol() {
        let err = unsafe { BackendVTable::bind("empty", "backend_", &StaticSymbols::new()) }
            .err()
            .unwrap();
        assert_eq!(
            err,
            EmuError::SymbolMissing {
                backend: "empty".into(),
                symbol: "backend_create".into(),
            }
        );
    }

    #[test]
    fn test_static_symbols_skip_null() {
        let mut table = StaticSymbols::new();
        table.insert("backend_create", std::ptr::null_mut());
        assert!(table.is_empty());
        assert!(table.resolve("backend_create").is_none());
    }
}
