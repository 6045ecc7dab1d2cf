//! Session guard for cores with process-global state
//!
//! Many emulator cores keep their machine state in globals and can only
//! host one machine per process. [`SingletonAdapter`] puts such a core
//! behind the [`Backend`] contract: it hands out at most one live handle,
//! checks every call against it, and makes every operation on a stale or
//! foreign handle quiescent.
//!
//! [`GlobalCore`] is what the adapter needs from the core itself.


use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use calc_shared::constants::{self, DEFAULT_CLOCK_HZ, FLASH_SIZE, key_in_range};
use calc_shared::{CE_STATE_FORMAT, DeviceTable, DeviceVariant, StateFormat};

use crate::backend::{Backend, FrameView, LogSink, RawHandle};
use crate::error::EmuError;
use crate::state::{ScratchFile, StateCodec};

/// A core whose machine state is process-global.
pub trait GlobalCore: Send + 'static {
    /// Backend name the adapter reports.
    const NAME: &'static str;
    const LCD_WIDTH: usize = constants::LCD_WIDTH;
    const LCD_HEIGHT: usize = constants::LCD_HEIGHT;
    const CLOCK_HZ: u32 = DEFAULT_CLOCK_HZ;
    const STATE_FORMAT: StateFormat = CE_STATE_FORMAT;
    /// The core can only serialize to and from a file.
    const FILE_BACKED_STATE: bool = false;

    /// Route core log output to `sink`, or back to the core's default.
    fn attach_log(&mut self, sink: Option<LogSink>);

    /// Set up machine state for `variant`.
    fn init(&mut self, variant: DeviceVariant);

    /// Release machine state. Only called after [`GlobalCore::init`].
    fn free(&mut self);

    /// Flash memory, valid between `init` and `free`.
    fn flash_mut(&mut self) -> &mut [u8];

    fn reset(&mut self);

    fn set_clock(&mut self, hz: u32);

    fn power_on(&mut self);

    /// Run about `cycles` cycles and return how many ran.
    fn run(&mut self, cycles: u64) -> u64;

    /// Render the LCD into `out`, `LCD_WIDTH * LCD_HEIGHT` pixels.
    fn draw_frame(&mut self, out: &mut [u32]);

    fn key_event(&mut self, row: u8, col: u8, pressed: bool);

    fn backlight(&self) -> u8;

    fn lcd_on(&self) -> bool;

    fn save(&mut self, out: &mut dyn Write) -> io::Result<()>;

    fn restore(&mut self, input: &mut dyn Read) -> io::Result<()>;
}

struct LiveSession {
    handle: RawHandle,
    /// Set once a ROM load completes.
    variant: Option<DeviceVariant>,
    frame: Vec<u32>,
}

/// [`Backend`] over a [`GlobalCore`], allowing one session at a time.
pub struct SingletonAdapter<C: GlobalCore> {
    core: C,
    codec: StateCodec,
    table: DeviceTable,
    session: Option<LiveSession>,
    next_handle: usize,
    log: Option<LogSink>,
    scratch_dir: Option<PathBuf>,
}

impl<C: GlobalCore> SingletonAdapter<C> {
    pub fn new(core: C) -> Self {
        Self {
            core,
            codec: StateCodec::from_format(C::STATE_FORMAT),
            table: DeviceTable::builtin(),
            session: None,
            next_handle: 1,
            log: None,
            scratch_dir: None,
        }
    }

    /// Classify ROMs against `table` instead of the built-in pairs.
    pub fn with_device_table(mut self, table: DeviceTable) -> Self {
        self.table = table;
        self
    }

    pub fn core(&self) -> &C {
        &self.core
    }

    /// Variant of the loaded ROM, if `handle` is live and loaded.
    pub fn variant(&self, handle: RawHandle) -> Option<DeviceVariant> {
        self.live(handle).and_then(|s| s.variant)
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    fn live(&self, handle: RawHandle) -> Option<&LiveSession> {
        self.session.as_ref().filter(|s| s.handle == handle)
    }

    fn is_loaded(&self, handle: RawHandle) -> bool {
        self.variant(handle).is_some()
    }

    fn check_loaded(&self, handle: RawHandle) -> Result<(), EmuError> {
        match self.live(handle) {
            None => Err(EmuError::InvalidHandle),
            Some(s) if s.variant.is_none() => Err(EmuError::NotInitialized),
            Some(_) => Ok(()),
        }
    }

    fn log(&self, message: &str) {
        match &self.log {
            Some(sink) => sink(message),
            None => tracing::info!(backend = C::NAME, "{message}"),
        }
    }

    /// Start the session, or fail if one is already live.
    pub fn try_create(&mut self) -> Result<RawHandle, EmuError> {
        if self.session.is_some() {
            self.log("instance already active");
            return Err(EmuError::InstanceAlreadyActive);
        }
        let handle = RawHandle::new(self.next_handle).ok_or(EmuError::InstanceAlreadyActive)?;
        self.next_handle = self.next_handle.checked_add(1).unwrap_or(1);
        self.session = Some(LiveSession {
            handle,
            variant: None,
            frame: Vec::new(),
        });
        Ok(handle)
    }

    pub fn try_load_rom(&mut self, handle: RawHandle, rom: &[u8]) -> Result<(), EmuError> {
        let was_loaded = match self.live(handle) {
            Some(session) => session.variant.is_some(),
            None => return Err(EmuError::InvalidHandle),
        };
        if rom.is_empty() || rom.len() > FLASH_SIZE {
            self.log(&format!("rejected ROM of {} bytes", rom.len()));
            return Err(EmuError::EmptyOrInvalidInput);
        }

        let classification = self.table.classify(rom);
        if classification.is_fallback() {
            self.log(&format!(
                "could not determine device type, using {}",
                classification.variant
            ));
        }
        let variant = classification.variant;

        if let Some(session) = self.session.as_mut() {
            session.variant = None;
        }
        if was_loaded {
            self.core.free();
        }
        self.core.init(variant);

        let flash = self.core.flash_mut();
        if flash.len() < rom.len() {
            self.core.free();
            self.log("core flash is smaller than the ROM");
            return Err(EmuError::EmptyOrInvalidInput);
        }
        flash[..rom.len()].copy_from_slice(rom);

        self.core.reset();
        self.core.set_clock(C::CLOCK_HZ);

        if let Some(session) = self.session.as_mut() {
            session.variant = Some(variant);
            session.frame = vec![0; C::LCD_WIDTH * C::LCD_HEIGHT];
        }
        self.log(&format!("loaded {} byte ROM as {variant}", rom.len()));
        Ok(())
    }

    pub fn try_save_state(&mut self, handle: RawHandle, out: &mut [u8]) -> Result<usize, EmuError> {
        self.check_loaded(handle)?;
        let codec = self.codec;
        let core = &mut self.core;

        if C::FILE_BACKED_STATE {
            codec.check_capacity(out)?;
            let mut scratch = ScratchFile::create(self.scratch_dir.as_deref())?;
            codec.save(out, |w| {
                core.save(scratch.file_mut())?;
                scratch.copy_to(w).map(|_| ())
            })
        } else {
            codec.save(out, |w| core.save(w))
        }
    }

    pub fn try_load_state(&mut self, handle: RawHandle, image: &[u8]) -> Result<(), EmuError> {
        self.check_loaded(handle)?;
        let codec = self.codec;
        let core = &mut self.core;

        if C::FILE_BACKED_STATE {
            codec.validate(image)?;
            let mut scratch = ScratchFile::create(self.scratch_dir.as_deref())?;
            codec.load(image, |r| {
                scratch.fill_from(r)?;
                core.restore(scratch.file_mut())
            })
        } else {
            codec.load(image, |r| core.restore(r))
        }
    }
}

impl<C: GlobalCore + Default> Default for SingletonAdapter<C> {
    fn default() -> Self {
        Self::new(C::default())
    }
}

impl<C: GlobalCore> Backend for SingletonAdapter<C> {
    fn name(&self) -> &str {
        C::NAME
    }

    fn create(&mut self) -> Option<RawHandle> {
        self.try_create().ok()
    }

    fn destroy(&mut self, handle: RawHandle) {
        let Some(session) = self.session.take_if(|s| s.handle == handle) else {
            return;
        };
        if session.variant.is_some() {
            self.core.free();
        }
        self.log("instance destroyed");
    }

    fn set_log_sink(&mut self, sink: Option<LogSink>) {
        self.core.attach_log(sink.clone());
        self.log = sink;
    }

    fn load_rom(&mut self, handle: RawHandle, rom: &[u8]) -> Result<(), i32> {
        self.try_load_rom(handle, rom).map_err(|e| e.code())
    }

    fn reset(&mut self, handle: RawHandle) {
        if self.is_loaded(handle) {
            self.core.reset();
        }
    }

    fn power_on(&mut self, handle: RawHandle) {
        if self.is_loaded(handle) {
            self.core.power_on();
        }
    }

    fn run_cycles(&mut self, handle: RawHandle, cycles: i32) -> i32 {
        if cycles <= 0 || !self.is_loaded(handle) {
            return 0;
        }
        let ran = self.core.run(cycles as u64);
        i32::try_from(ran).unwrap_or(i32::MAX)
    }

    fn framebuffer(&mut self, handle: RawHandle) -> FrameView<'_> {
        match self.session.as_mut() {
            Some(session) if session.handle == handle && session.variant.is_some() => {
                self.core.draw_frame(&mut session.frame);
                FrameView {
                    width: C::LCD_WIDTH,
                    height: C::LCD_HEIGHT,
                    pixels: Some(&session.frame),
                }
            }
            _ => FrameView::without_pixels(C::LCD_WIDTH, C::LCD_HEIGHT),
        }
    }

    fn set_key(&mut self, handle: RawHandle, row: i32, col: i32, pressed: bool) {
        if self.is_loaded(handle) && key_in_range(row, col) {
            self.core.key_event(row as u8, col as u8, pressed);
        }
    }

    fn backlight(&self, handle: RawHandle) -> u8 {
        if self.is_loaded(handle) {
            self.core.backlight()
        } else {
            0
        }
    }

    fn is_lcd_on(&self, handle: RawHandle) -> bool {
        self.is_loaded(handle) && self.core.lcd_on()
    }

    fn save_state_size(&self, handle: RawHandle) -> usize {
        if self.is_loaded(handle) {
            self.codec.size_bound()
        } else {
            0
        }
    }

    fn save_state(&mut self, handle: RawHandle, out: &mut [u8]) -> Result<usize, i32> {
        self.try_save_state(handle, out).map_err(|e| e.code())
    }

    fn load_state(&mut self, handle: RawHandle, image: &[u8]) -> Result<(), i32> {
        self.try_load_state(handle, image).map_err(|e| e.code())
    }

    fn supports_scratch_dir(&self) -> bool {
        C::FILE_BACKED_STATE
    }

    fn set_scratch_dir(&mut self, dir: &Path) {
        self.scratch_dir = Some(dir.to_path_buf());
    }
}
