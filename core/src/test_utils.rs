//! Shared test utilities for unit and integration tests

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use calc_shared::cert::testing::rom_with_certificate;
use calc_shared::{DeviceVariant, FLASH_SIZE};

use crate::backend::{Backend, FrameView, LogSink, RawHandle};
use crate::registry::BackendEntry;
use crate::singleton::{GlobalCore, SingletonAdapter};

// ============================================================================
// Mock global core
// ============================================================================

const MOCK_STATE_MAGIC: &[u8; 4] = b"MOCK";

/// Deterministic stand-in for a process-global emulator core.
///
/// `FILE_BACKED` selects whether the adapter must route save-states
/// through a scratch file.
#[derive(Default)]
pub struct MockCore<const FILE_BACKED: bool = false> {
    pub flash: Vec<u8>,
    pub variant: Option<DeviceVariant>,
    pub clock_hz: u32,
    pub powered: bool,
    pub cycles: u64,
    pub keys: [[bool; 8]; 8],
    /// Every core call, in order.
    pub calls: Vec<&'static str>,
    log: Option<LogSink>,
}

/// Mock core that only serializes through files.
pub type FileBackedMockCore = MockCore<true>;

impl<const FILE_BACKED: bool> MockCore<FILE_BACKED> {
    pub fn new() -> Self {
        Self::default()
    }

    fn emit(&self, line: &str) {
        if let Some(sink) = &self.log {
            sink(line);
        }
    }
}

impl<const FILE_BACKED: bool> GlobalCore for MockCore<FILE_BACKED> {
    const NAME: &'static str = "mock";
    const FILE_BACKED_STATE: bool = FILE_BACKED;

    fn attach_log(&mut self, sink: Option<LogSink>) {
        self.log = sink;
    }

    fn init(&mut self, variant: DeviceVariant) {
        self.calls.push("init");
        self.flash = vec![0xFF; FLASH_SIZE];
        self.variant = Some(variant);
        self.cycles = 0;
        self.powered = false;
    }

    fn free(&mut self) {
        self.calls.push("free");
        self.flash.clear();
        self.variant = None;
    }

    fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    fn reset(&mut self) {
        self.calls.push("reset");
        self.cycles = 0;
        self.keys = [[false; 8]; 8];
    }

    fn set_clock(&mut self, hz: u32) {
        self.calls.push("set_clock");
        self.clock_hz = hz;
    }

    fn power_on(&mut self) {
        self.calls.push("power_on");
        self.powered = true;
        self.emit("power on");
    }

    fn run(&mut self, cycles: u64) -> u64 {
        self.cycles += cycles;
        cycles
    }

    fn draw_frame(&mut self, out: &mut [u32]) {
        let shade = 0xFF00_0000 | (self.cycles as u32 & 0x00FF_FFFF);
        out.fill(shade);
    }

    fn key_event(&mut self, row: u8, col: u8, pressed: bool) {
        self.keys[row as usize][col as usize] = pressed;
    }

    fn backlight(&self) -> u8 {
        if self.powered { 0xFF } else { 0 }
    }

    fn lcd_on(&self) -> bool {
        self.powered
    }

    fn save(&mut self, out: &mut dyn Write) -> io::Result<()> {
        self.calls.push("save");
        out.write_all(MOCK_STATE_MAGIC)?;
        out.write_all(&self.cycles.to_le_bytes())?;
        out.write_all(&[u8::from(self.powered)])
    }

    fn restore(&mut self, input: &mut dyn Read) -> io::Result<()> {
        self.calls.push("restore");
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if &magic != MOCK_STATE_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "not a mock state"));
        }
        let mut cycles = [0u8; 8];
        input.read_exact(&mut cycles)?;
        let mut powered = [0u8; 1];
        input.read_exact(&mut powered)?;
        self.cycles = u64::from_le_bytes(cycles);
        self.powered = powered[0] != 0;
        Ok(())
    }
}

pub type MockAdapter = SingletonAdapter<MockCore>;

/// A small ROM that classifies as `(model_id, device_id)`.
pub fn test_rom(model_id: u8, device_id: u8) -> Vec<u8> {
    rom_with_certificate(model_id, device_id)
}

/// A small ROM that classifies as the TI-84 Plus CE.
pub fn ti84_rom() -> Vec<u8> {
    test_rom(0x13, 0x00)
}

/// Catalog entry building a fresh [`MockAdapter`] under `name`.
pub fn mock_entry(name: &str) -> BackendEntry {
    let name = name.to_string();
    BackendEntry::builtin(name.clone(), move || {
        Ok(Box::new(NamedBackend {
            name: name.clone(),
            inner: MockAdapter::default(),
        }) as Box<dyn Backend>)
    })
}

/// Reports a catalog name instead of the one the inner backend reports.
struct NamedBackend<B> {
    name: String,
    inner: B,
}

impl<B: Backend> Backend for NamedBackend<B> {
    fn name(&self) -> &str {
        &self.name
    }
    fn create(&mut self) -> Option<RawHandle> {
        self.inner.create()
    }
    fn destroy(&mut self, handle: RawHandle) {
        self.inner.destroy(handle)
    }
    fn set_log_sink(&mut self, sink: Option<LogSink>) {
        self.inner.set_log_sink(sink)
    }
    fn load_rom(&mut self, handle: RawHandle, rom: &[u8]) -> Result<(), i32> {
        self.inner.load_rom(handle, rom)
    }
    fn reset(&mut self, handle: RawHandle) {
        self.inner.reset(handle)
    }
    fn power_on(&mut self, handle: RawHandle) {
        self.inner.power_on(handle)
    }
    fn run_cycles(&mut self, handle: RawHandle, cycles: i32) -> i32 {
        self.inner.run_cycles(handle, cycles)
    }
    fn framebuffer(&mut self, handle: RawHandle) -> FrameView<'_> {
        self.inner.framebuffer(handle)
    }
    fn set_key(&mut self, handle: RawHandle, row: i32, col: i32, pressed: bool) {
        self.inner.set_key(handle, row, col, pressed)
    }
    fn backlight(&self, handle: RawHandle) -> u8 {
        self.inner.backlight(handle)
    }
    fn is_lcd_on(&self, handle: RawHandle) -> bool {
        self.inner.is_lcd_on(handle)
    }
    fn save_state_size(&self, handle: RawHandle) -> usize {
        self.inner.save_state_size(handle)
    }
    fn save_state(&mut self, handle: RawHandle, out: &mut [u8]) -> Result<usize, i32> {
        self.inner.save_state(handle, out)
    }
    fn load_state(&mut self, handle: RawHandle, image: &[u8]) -> Result<(), i32> {
        self.inner.load_state(handle, image)
    }
    fn supports_scratch_dir(&self) -> bool {
        self.inner.supports_scratch_dir()
    }
    fn set_scratch_dir(&mut self, dir: &Path) {
        self.inner.set_scratch_dir(dir)
    }
}

// ============================================================================
// Probe backend
// ============================================================================

/// Ordered record of everything probes did, shared between tests and the
/// probes they create.
pub type ProbeEvents = Arc<Mutex<Vec<String>>>;

pub fn probe_events() -> ProbeEvents {
    Arc::new(Mutex::new(Vec::new()))
}

/// Backend that records every call as `"<name>:<op>"` and logs `"<name>:drop"`
/// when it is dropped, so tests can check call order against unloading.
pub struct ProbeBackend {
    name: String,
    events: ProbeEvents,
    session: Option<RawHandle>,
    loaded: bool,
    frame: Vec<u32>,
    log: Option<LogSink>,
    wants_scratch: bool,
    pub scratch_dir: Option<PathBuf>,
}

impl ProbeBackend {
    pub fn new(name: &str, events: &ProbeEvents) -> Self {
        Self {
            name: name.to_string(),
            events: Arc::clone(events),
            session: None,
            loaded: false,
            frame: vec![0; calc_shared::LCD_PIXELS],
            log: None,
            wants_scratch: false,
            scratch_dir: None,
        }
    }

    pub fn with_scratch_support(mut self) -> Self {
        self.wants_scratch = true;
        self
    }

    fn record(&self, op: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(format!("{}:{op}", self.name));
        }
    }

    fn is_live(&self, handle: RawHandle) -> bool {
        self.session == Some(handle)
    }
}

impl Drop for ProbeBackend {
    fn drop(&mut self) {
        self.record("drop");
    }
}

impl Backend for ProbeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&mut self) -> Option<RawHandle> {
        self.record("create");
        if self.session.is_some() {
            return None;
        }
        self.session = RawHandle::new(0x10);
        self.session
    }

    fn destroy(&mut self, handle: RawHandle) {
        self.record("destroy");
        if self.is_live(handle) {
            self.session = None;
            self.loaded = false;
        }
    }

    fn set_log_sink(&mut self, sink: Option<LogSink>) {
        self.record(if sink.is_some() { "log_sink" } else { "log_sink_cleared" });
        self.log = sink;
        if let Some(sink) = &self.log {
            sink(&format!("{} attached", self.name));
        }
    }

    fn load_rom(&mut self, handle: RawHandle, rom: &[u8]) -> Result<(), i32> {
        self.record("load_rom");
        if !self.is_live(handle) {
            return Err(calc_shared::codes::INVALID_HANDLE);
        }
        if rom.is_empty() {
            return Err(calc_shared::codes::EMPTY_OR_INVALID_INPUT);
        }
        self.loaded = true;
        Ok(())
    }

    fn reset(&mut self, _handle: RawHandle) {
        self.record("reset");
    }

    fn power_on(&mut self, _handle: RawHandle) {
        self.record("power_on");
    }

    fn run_cycles(&mut self, handle: RawHandle, cycles: i32) -> i32 {
        if self.is_live(handle) && self.loaded {
            cycles.max(0)
        } else {
            0
        }
    }

    fn framebuffer(&mut self, handle: RawHandle) -> FrameView<'_> {
        if self.is_live(handle) && self.loaded {
            FrameView {
                width: calc_shared::LCD_WIDTH,
                height: calc_shared::LCD_HEIGHT,
                pixels: Some(&self.frame),
            }
        } else {
            FrameView::without_pixels(calc_shared::LCD_WIDTH, calc_shared::LCD_HEIGHT)
        }
    }

    fn set_key(&mut self, _handle: RawHandle, _row: i32, _col: i32, _pressed: bool) {
        self.record("set_key");
    }

    fn backlight(&self, handle: RawHandle) -> u8 {
        if self.is_live(handle) && self.loaded { 0x80 } else { 0 }
    }

    fn is_lcd_on(&self, handle: RawHandle) -> bool {
        self.is_live(handle) && self.loaded
    }

    fn save_state_size(&self, handle: RawHandle) -> usize {
        if self.is_live(handle) && self.loaded { 16 } else { 0 }
    }

    fn save_state(&mut self, handle: RawHandle, out: &mut [u8]) -> Result<usize, i32> {
        if !self.is_live(handle) {
            return Err(calc_shared::codes::INVALID_HANDLE);
        }
        if out.len() < 16 {
            return Err(calc_shared::codes::BUFFER_TOO_SMALL);
        }
        out[..8].copy_from_slice(b"PROBESTA");
        Ok(8)
    }

    fn load_state(&mut self, handle: RawHandle, _image: &[u8]) -> Result<(), i32> {
        if !self.is_live(handle) {
            return Err(calc_shared::codes::INVALID_HANDLE);
        }
        Err(calc_shared::codes::UNSUPPORTED)
    }

    fn supports_scratch_dir(&self) -> bool {
        self.wants_scratch
    }

    fn set_scratch_dir(&mut self, dir: &Path) {
        self.record("scratch_dir");
        self.scratch_dir = Some(dir.to_path_buf());
    }
}

/// Catalog entry building a [`ProbeBackend`] that records into `events`.
pub fn probe_entry(name: &str, events: &ProbeEvents) -> BackendEntry {
    let owned = name.to_string();
    let events = Arc::clone(events);
    BackendEntry::builtin(name, move || {
        Ok(Box::new(ProbeBackend::new(&owned, &events)) as Box<dyn Backend>)
    })
}

/// Catalog entry whose factory always fails, as a broken module would.
pub fn failing_entry(name: &str) -> BackendEntry {
    let owned = name.to_string();
    BackendEntry::builtin(name, move || {
        Err(crate::EmuError::SymbolMissing {
            backend: owned.clone(),
            symbol: "backend_load_rom".to_string(),
        })
    })
}

/// Snapshot of recorded events.
pub fn events_of(events: &ProbeEvents) -> Vec<String> {
    events.lock().map(|e| e.clone()).unwrap_or_default()
}
