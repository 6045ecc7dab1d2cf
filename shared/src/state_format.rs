//! Save-state image format.
//!
//! An image is a 32-bit little-endian version tag followed by the core's
//! opaque payload:
//!
//! ```text
//! +----------------+---------------------------+
//! | version (u32)  | payload (core-defined)    |
//! +----------------+---------------------------+
//! ```
//!
//! # Example
//!
//! ```
//! use calc_shared::CE_STATE_FORMAT;
//!
//! assert_eq!(CE_STATE_FORMAT.version, 0xCECE_001B);
//! assert_eq!(CE_STATE_FORMAT.size_bound, 5 * 1024 * 1024);
//! ```

use byteorder::{ByteOrder, LittleEndian};

/// Bytes taken by the version tag.
pub const VERSION_TAG_LEN: usize = 4;

/// Images shorter than this are rejected before the tag is inspected.
pub const MIN_IMAGE_LEN: usize = 8;

/// Version tag and size bound for one backend's images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateFormat {
    /// Tag written at the start of every image. Changes whenever the payload
    /// layout changes.
    pub version: u32,
    /// Upper bound on a full image, tag included. Callers must provide at
    /// least this much room when saving.
    pub size_bound: usize,
}

impl StateFormat {
    pub const fn new(version: u32, size_bound: usize) -> Self {
        Self {
            version,
            size_bound,
        }
    }

    /// Whether `image` starts with this format's tag.
    pub fn matches(&self, image: &[u8]) -> bool {
        peek_version(image) == Some(self.version)
    }
}

/// Format used by the CE cores.
pub const CE_STATE_FORMAT: StateFormat = StateFormat::new(0xCECE_001B, 5 * 1024 * 1024);

/// Read the version tag of `image` without validating anything else.
pub fn peek_version(image: &[u8]) -> Option<u32> {
    image.get(..VERSION_TAG_LEN).map(LittleEndian::read_u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peek_version() {
        let image = [0x1B, 0x00, 0xCE, 0xCE, 0xAA];
        assert_eq!(peek_version(&image), Some(0xCECE_001B));
        assert!(CE_STATE_FORMAT.matches(&image));
        assert_eq!(peek_version(&[0x1B, 0x00]), None);
    }

    #[test]
    fn test_other_format_does_not_match() {
        let other = StateFormat::new(0x0000_0001, 64);
        assert!(!other.matches(&0xCECE_001Bu32.to_le_bytes()));
    }
}
