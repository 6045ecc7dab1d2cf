//! Shared types for the calc emulator host.
//!
//! Everything in here is plain data plus pure functions over byte slices:
//! the certificate field walker, device classification, the save-state
//! format constants, and the status codes that cross the C ABI. Both the
//! host (`calc-core`) and backend modules depend on this crate.

pub mod cert;
pub mod codes;
pub mod constants;
pub mod device;
pub mod state_format;

pub use cert::{CertError, CertField, FieldCursor, field_get};
pub use constants::{
    DEFAULT_CLOCK_HZ, FLASH_SIZE, KEYPAD_COLS, KEYPAD_ROWS, LCD_HEIGHT, LCD_PIXELS, LCD_WIDTH,
    key_in_range,
};
pub use device::{
    CertIds, Classification, DeviceEntry, DeviceTable, DeviceVariant, FallbackReason, classify,
};
pub use state_format::{
    CE_STATE_FORMAT, MIN_IMAGE_LEN, StateFormat, VERSION_TAG_LEN, peek_version,
};
