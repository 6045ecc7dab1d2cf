//! Hardware constants shared by every backend.

/// LCD width in pixels.
pub const LCD_WIDTH: usize = 320;

/// LCD height in pixels.
pub const LCD_HEIGHT: usize = 240;

/// Pixels in one full frame.
pub const LCD_PIXELS: usize = LCD_WIDTH * LCD_HEIGHT;

/// Flash size of a CE-class calculator. ROM images larger than this are rejected.
pub const FLASH_SIZE: usize = 0x40_0000;

/// Keypad matrix rows.
pub const KEYPAD_ROWS: usize = 8;

/// Keypad matrix columns.
pub const KEYPAD_COLS: usize = 8;

/// Default CPU clock programmed after a ROM load.
pub const DEFAULT_CLOCK_HZ: u32 = 48_000_000;

/// Returns true when `(row, col)` addresses a key in the keypad matrix.
pub fn key_in_range(row: i32, col: i32) -> bool {
    (0..KEYPAD_ROWS as i32).contains(&row) && (0..KEYPAD_COLS as i32).contains(&col)
}
