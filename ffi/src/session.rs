//! Session functions
//!
//! A null or stale `Emu*` gets the quiescent result: 0 cycles, a null
//! frame with zero dimensions, backlight 0, LCD off, size 0, and
//! `EMU_ERR_INVALID_HANDLE` from anything that returns a code.

use std::ffi::c_int;
use std::ptr;
use std::sync::{Mutex, PoisonError};

use calc_shared::codes;

use crate::{Emu, guard, handle_to_ptr, ptr_to_handle};

/// Frame copy handed out by `emu_framebuffer`.
static FRAME: Mutex<Vec<u32>> = Mutex::new(Vec::new());

unsafe fn byte_slice<'a>(data: *const u8, len: usize) -> &'a [u8] {
    if data.is_null() {
        &[]
    } else {
        // SAFETY: non-null and sized by the caller.
        unsafe { std::slice::from_raw_parts(data, len) }
    }
}

unsafe fn write_dims(width: *mut c_int, height: *mut c_int, w: usize, h: usize) {
    // SAFETY: checked for null; the caller guarantees validity.
    unsafe {
        if !width.is_null() {
            *width = c_int::try_from(w).unwrap_or(0);
        }
        if !height.is_null() {
            *height = c_int::try_from(h).unwrap_or(0);
        }
    }
}

/// Start the session, selecting the default backend if none is active.
///
/// Returns null if a session is already live or no backend can be loaded.
#[unsafe(no_mangle)]
pub extern "C" fn emu_create() -> *mut Emu {
    guard(ptr::null_mut(), |d| {
        d.create().map_or(ptr::null_mut(), handle_to_ptr)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn emu_destroy(emu: *mut Emu) {
    let Some(handle) = ptr_to_handle(emu) else {
        return;
    };
    guard((), |d| d.destroy(handle))
}

/// Load a ROM image. Returns 0 or a negative error code.
///
/// # Safety
///
/// `data` must be null or point to `len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn emu_load_rom(emu: *mut Emu, data: *const u8, len: usize) -> c_int {
    let Some(handle) = ptr_to_handle(emu) else {
        return codes::INVALID_HANDLE;
    };
    let rom = unsafe { byte_slice(data, len) };
    guard(codes::INVALID_HANDLE, |d| match d.load_rom(handle, rom) {
        Ok(()) => codes::OK,
        Err(err) => err.code(),
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn emu_reset(emu: *mut Emu) {
    if let Some(handle) = ptr_to_handle(emu) {
        guard((), |d| d.reset(handle))
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn emu_power_on(emu: *mut Emu) {
    if let Some(handle) = ptr_to_handle(emu) {
        guard((), |d| d.power_on(handle))
    }
}

/// Run about `cycles` cycles; returns the number executed.
#[unsafe(no_mangle)]
pub extern "C" fn emu_run_cycles(emu: *mut Emu, cycles: c_int) -> c_int {
    match ptr_to_handle(emu) {
        Some(handle) => guard(0, |d| d.run_cycles(handle, cycles)),
        None => 0,
    }
}

/// Current frame as packed 32-bit pixels, or null when nothing is loaded.
///
/// The pixels are one process-wide copy that stays valid until the next
/// call from any thread, so only one thread should read frames this way;
/// `emu_copy_framebuffer` has no such limit. `width` and `height` are
/// written even when null is returned.
///
/// # Safety
///
/// `width` and `height` must each be null or valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn emu_framebuffer(
    emu: *const Emu,
    width: *mut c_int,
    height: *mut c_int,
) -> *const u32 {
    let (w, h, pixels) = match ptr_to_handle(emu) {
        Some(handle) => guard((0, 0, ptr::null()), |d| {
            d.framebuffer(handle, |view| {
                let pixels = view.pixels.map_or(ptr::null(), |pixels| {
                    let mut frame = FRAME.lock().unwrap_or_else(PoisonError::into_inner);
                    frame.clear();
                    frame.extend_from_slice(pixels);
                    frame.as_ptr()
                });
                (view.width, view.height, pixels)
            })
        }),
        None => (0, 0, ptr::null()),
    };
    unsafe { write_dims(width, height, w, h) };
    pixels
}

/// Copy the current frame into `out`, which holds `capacity` pixels.
///
/// Returns 0 or a negative error code.
///
/// # Safety
///
/// `out` must be null or point to `capacity` writable pixels; `width` and
/// `height` must each be null or valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn emu_copy_framebuffer(
    emu: *const Emu,
    out: *mut u32,
    capacity: usize,
    width: *mut c_int,
    height: *mut c_int,
) -> c_int {
    let Some(handle) = ptr_to_handle(emu) else {
        return codes::INVALID_HANDLE;
    };
    let out: &mut [u32] = if out.is_null() {
        &mut []
    } else {
        // SAFETY: non-null and sized by the caller.
        unsafe { std::slice::from_raw_parts_mut(out, capacity) }
    };
    let result = guard(Err(codes::INVALID_HANDLE), |d| {
        d.copy_framebuffer(handle, out).map_err(|e| e.code())
    });
    match result {
        Ok((w, h)) => {
            unsafe { write_dims(width, height, w, h) };
            codes::OK
        }
        Err(code) => code,
    }
}

/// Press (`down != 0`) or release the key at `row`, `col`.
#[unsafe(no_mangle)]
pub extern "C" fn emu_set_key(emu: *mut Emu, row: c_int, col: c_int, down: c_int) {
    if let Some(handle) = ptr_to_handle(emu) {
        guard((), |d| d.set_key(handle, row, col, down != 0))
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn emu_get_backlight(emu: *const Emu) -> u8 {
    match ptr_to_handle(emu) {
        Some(handle) => guard(0, |d| d.backlight(handle)),
        None => 0,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn emu_is_lcd_on(emu: *const Emu) -> c_int {
    match ptr_to_handle(emu) {
        Some(handle) => guard(0, |d| c_int::from(d.is_lcd_on(handle))),
        None => 0,
    }
}

/// Buffer size `emu_save_state` needs, 0 when nothing is loaded.
#[unsafe(no_mangle)]
pub extern "C" fn emu_save_state_size(emu: *const Emu) -> usize {
    match ptr_to_handle(emu) {
        Some(handle) => guard(0, |d| d.save_state_size(handle)),
        None => 0,
    }
}

/// Write a save-state image into `out`.
///
/// Returns the image length or a negative error code.
///
/// # Safety
///
/// `out` must be null or point to `capacity` writable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn emu_save_state(emu: *const Emu, out: *mut u8, capacity: usize) -> c_int {
    let Some(handle) = ptr_to_handle(emu) else {
        return codes::INVALID_HANDLE;
    };
    let out: &mut [u8] = if out.is_null() {
        &mut []
    } else {
        // SAFETY: non-null and sized by the caller.
        unsafe { std::slice::from_raw_parts_mut(out, capacity) }
    };
    guard(codes::INVALID_HANDLE, |d| match d.save_state(handle, out) {
        Ok(len) => c_int::try_from(len).unwrap_or(codes::BUFFER_TOO_SMALL),
        Err(err) => err.code(),
    })
}

/// Restore a save-state image. Returns 0 or a negative error code.
///
/// # Safety
///
/// `data` must be null or point to `len` readable bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn emu_load_state(emu: *mut Emu, data: *const u8, len: usize) -> c_int {
    let Some(handle) = ptr_to_handle(emu) else {
        return codes::INVALID_HANDLE;
    };
    let image = unsafe { byte_slice(data, len) };
    guard(codes::INVALID_HANDLE, |d| match d.load_state(handle, image) {
        Ok(()) => codes::OK,
        Err(err) => err.code(),
    })
}
