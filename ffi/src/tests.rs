//! Tests for the C ABI
//!
//! All tests share the process-wide dispatcher, so each one holds
//! `TEST_LOCK` and starts from a fresh session on the "rust" backend.

use std::ffi::{CStr, CString, c_char, c_int};
use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use calc_core::BackendCatalog;
use calc_core::test_utils::{mock_entry, ti84_rom};

use super::*;

static TEST_LOCK: Mutex<()> = Mutex::new(());

fn setup() -> MutexGuard<'static, ()> {
    let guard = TEST_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    let _ = install(Dispatcher::new(
        BackendCatalog::new()
            .with(mock_entry("rust"))
            .with(mock_entry("cemu")),
    ));
    let rust = CString::new("rust").unwrap();
    assert_eq!(unsafe { emu_backend_set(rust.as_ptr()) }, codes::OK);
    emu_set_log_callback(None);
    emu_drain_logs();
    guard
}

fn read_str(s: *const c_char) -> Option<String> {
    if s.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned())
    }
}

fn loaded_emu() -> *mut Emu {
    let emu = emu_create();
    assert!(!emu.is_null());
    let rom = ti84_rom();
    assert_eq!(unsafe { emu_load_rom(emu, rom.as_ptr(), rom.len()) }, codes::OK);
    emu_power_on(emu);
    emu
}

// ============================================================================
// Backend selection
// ============================================================================

#[test]
fn test_backend_listing() {
    let _guard = setup();
    assert_eq!(read_str(emu_backend_get_available()).as_deref(), Some("rust,cemu"));
    assert_eq!(emu_backend_count(), 2);
    assert_eq!(read_str(emu_backend_get_current()).as_deref(), Some("rust"));
}

#[test]
fn test_backend_set_rejects_bad_names() {
    let _guard = setup();
    let unknown = CString::new("nope").unwrap();
    assert_eq!(unsafe { emu_backend_set(unknown.as_ptr()) }, codes::UNKNOWN_BACKEND);
    assert_eq!(unsafe { emu_backend_set(ptr::null()) }, codes::EMPTY_OR_INVALID_INPUT);
    assert_eq!(read_str(emu_backend_get_current()).as_deref(), Some("rust"));
}

#[test]
fn test_backend_switch_invalidates_handle() {
    let _guard = setup();
    let emu = loaded_emu();
    let cemu = CString::new("cemu").unwrap();
    assert_eq!(unsafe { emu_backend_set(cemu.as_ptr()) }, codes::OK);
    assert_eq!(read_str(emu_backend_get_current()).as_deref(), Some("cemu"));
    assert_eq!(emu_run_cycles(emu, 100), 0);

    let fresh = emu_create();
    assert!(!fresh.is_null());
    assert_ne!(fresh, emu);
    emu_destroy(fresh);
}

#[test]
fn test_init_after_first_use_is_rejected() {
    let _guard = setup();
    assert_eq!(unsafe { emu_init(ptr::null()) }, codes::INSTANCE_ALREADY_ACTIVE);
}

// ============================================================================
// Sessions
// ============================================================================

#[test]
fn test_single_session() {
    let _guard = setup();
    let emu = emu_create();
    assert!(!emu.is_null());
    assert!(emu_create().is_null());
    emu_destroy(emu);

    let again = emu_create();
    assert!(!again.is_null());
    emu_destroy(again);
}

#[test]
fn test_lifecycle() {
    let _guard = setup();
    let emu = loaded_emu();

    assert_eq!(emu_run_cycles(emu, 640), 640);
    assert_eq!(emu_get_backlight(emu), 0xFF);
    assert_eq!(emu_is_lcd_on(emu), 1);
    emu_set_key(emu, 2, 2, 1);
    emu_reset(emu);

    emu_destroy(emu);
    assert_eq!(emu_run_cycles(emu, 640), 0);
    assert_eq!(emu_get_backlight(emu), 0);
}

#[test]
fn test_null_handle_is_quiescent() {
    let _guard = setup();
    let rom = ti84_rom();
    assert_eq!(
        unsafe { emu_load_rom(ptr::null_mut(), rom.as_ptr(), rom.len()) },
        codes::INVALID_HANDLE
    );
    assert_eq!(emu_run_cycles(ptr::null_mut(), 10), 0);
    assert_eq!(emu_get_backlight(ptr::null()), 0);
    assert_eq!(emu_is_lcd_on(ptr::null()), 0);
    assert_eq!(emu_save_state_size(ptr::null()), 0);
    emu_destroy(ptr::null_mut());
    emu_set_key(ptr::null_mut(), 0, 0, 1);

    let (mut w, mut h) = (-1, -1);
    let pixels = unsafe { emu_framebuffer(ptr::null(), &mut w, &mut h) };
    assert!(pixels.is_null());
    assert_eq!((w, h), (0, 0));
}

#[test]
fn test_load_rom_rejects_empty() {
    let _guard = setup();
    let emu = emu_create();
    assert_eq!(
        unsafe { emu_load_rom(emu, ptr::null(), 0) },
        codes::EMPTY_OR_INVALID_INPUT
    );
    emu_destroy(emu);
}

// ============================================================================
// Frames
// ============================================================================

#[test]
fn test_framebuffer_before_and_after_load() {
    let _guard = setup();
    let emu = emu_create();

    let (mut w, mut h): (c_int, c_int) = (0, 0);
    let pixels = unsafe { emu_framebuffer(emu, &mut w, &mut h) };
    assert!(pixels.is_null());
    assert_eq!((w, h), (320, 240));

    let rom = ti84_rom();
    assert_eq!(unsafe { emu_load_rom(emu, rom.as_ptr(), rom.len()) }, codes::OK);
    emu_run_cycles(emu, 9);
    let pixels = unsafe { emu_framebuffer(emu, &mut w, &mut h) };
    assert!(!pixels.is_null());
    let frame = unsafe { std::slice::from_raw_parts(pixels, (w * h) as usize) };
    assert!(frame.iter().all(|&p| p == 0xFF00_0009));

    emu_destroy(emu);
}

#[test]
fn test_framebuffer_copy_holds_until_next_call() {
    let _guard = setup();
    let emu = loaded_emu();
    emu_run_cycles(emu, 3);

    let (mut w, mut h): (c_int, c_int) = (0, 0);
    let first = unsafe { emu_framebuffer(emu, &mut w, &mut h) };
    emu_run_cycles(emu, 4);
    assert_eq!(unsafe { *first }, 0xFF00_0003);

    let second = unsafe { emu_framebuffer(emu, &mut w, &mut h) };
    assert_eq!(unsafe { *second }, 0xFF00_0007);

    emu_destroy(emu);
}

#[test]
fn test_copy_framebuffer() {
    let _guard = setup();
    let emu = loaded_emu();
    emu_run_cycles(emu, 5);

    let mut frame = vec![0u32; 320 * 240];
    let (mut w, mut h): (c_int, c_int) = (0, 0);
    let rc = unsafe { emu_copy_framebuffer(emu, frame.as_mut_ptr(), frame.len(), &mut w, &mut h) };
    assert_eq!(rc, codes::OK);
    assert_eq!((w, h), (320, 240));
    assert_eq!(frame[0], 0xFF00_0005);

    let rc = unsafe { emu_copy_framebuffer(emu, frame.as_mut_ptr(), 10, &mut w, &mut h) };
    assert_eq!(rc, codes::BUFFER_TOO_SMALL);

    emu_destroy(emu);
}

// ============================================================================
// Save states
// ============================================================================

#[test]
fn test_save_and_load_state() {
    let _guard = setup();
    let emu = loaded_emu();
    emu_run_cycles(emu, 42);

    let size = emu_save_state_size(emu);
    assert!(size > 0);
    let mut image = vec![0u8; size];
    let len = unsafe { emu_save_state(emu, image.as_mut_ptr(), image.len()) };
    assert!(len > 0);
    image.truncate(len as usize);

    emu_run_cycles(emu, 1);
    assert_eq!(unsafe { emu_load_state(emu, image.as_ptr(), image.len()) }, codes::OK);
    let (mut w, mut h) = (0, 0);
    let pixels = unsafe { emu_framebuffer(emu, &mut w, &mut h) };
    assert_eq!(unsafe { *pixels }, 0xFF00_002A);

    let mut small = vec![0u8; 16];
    assert_eq!(
        unsafe { emu_save_state(emu, small.as_mut_ptr(), small.len()) },
        codes::BUFFER_TOO_SMALL
    );
    assert_eq!(unsafe { emu_load_state(emu, image.as_ptr(), 3) }, codes::DATA_TOO_SHORT);

    let mut wrong = image.clone();
    wrong[0] ^= 0xFF;
    assert_eq!(
        unsafe { emu_load_state(emu, wrong.as_ptr(), wrong.len()) },
        codes::VERSION_MISMATCH
    );

    emu_destroy(emu);
}

// ============================================================================
// Logs
// ============================================================================

static SEEN: Mutex<Vec<String>> = Mutex::new(Vec::new());

unsafe extern "C" fn record_line(message: *const c_char) {
    let line = unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned();
    SEEN.lock().unwrap_or_else(PoisonError::into_inner).push(line);
}

#[test]
fn test_drain_logs() {
    let _guard = setup();
    let emu = loaded_emu();
    emu_destroy(emu);

    let drained = read_str(emu_drain_logs()).unwrap();
    let lines: Vec<&str> = drained.lines().collect();
    assert!(lines.iter().any(|l| l.starts_with("loaded ")));
    assert_eq!(lines.last(), Some(&"instance destroyed"));

    assert_eq!(read_str(emu_drain_logs()).as_deref(), Some(""));
}

#[test]
fn test_log_callback() {
    let _guard = setup();
    SEEN.lock().unwrap().clear();
    emu_set_log_callback(Some(record_line));

    let emu = loaded_emu();
    emu_set_log_callback(None);
    emu_destroy(emu);

    let seen = SEEN.lock().unwrap();
    assert!(seen.iter().any(|l| l.starts_with("loaded ")));
    assert!(seen.iter().any(|l| l == "power on"));
    assert!(!seen.iter().any(|l| l == "instance destroyed"));
}

#[test]
fn test_scratch_dir_rejects_null() {
    let _guard = setup();
    assert_eq!(unsafe { emu_set_scratch_dir(ptr::null()) }, codes::EMPTY_OR_INVALID_INPUT);
    let dir = CString::new(std::env::temp_dir().to_string_lossy().into_owned()).unwrap();
    assert_eq!(unsafe { emu_set_scratch_dir(dir.as_ptr()) }, codes::OK);
}
