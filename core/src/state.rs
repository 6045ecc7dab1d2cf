//! Save-state container codec
//!
//! Wraps a core's opaque serialized state in the `[version][payload]`
//! envelope from [`calc_shared::state_format`]. The codec validates the
//! envelope; the payload itself is produced and consumed by the core
//! through `io::Write` / `io::Read`.

use std::io::{self, Cursor, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use calc_shared::state_format::{MIN_IMAGE_LEN, StateFormat, VERSION_TAG_LEN, peek_version};

use crate::error::EmuError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateCodec {
    version: u32,
    size_bound: usize,
}

/// Envelope fields of an image, read without touching the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateHeader {
    pub version: u32,
    pub payload_len: usize,
}

impl StateHeader {
    /// Read the envelope of `image`. `None` when shorter than a valid image.
    pub fn parse(image: &[u8]) -> Option<Self> {
        if image.len() < MIN_IMAGE_LEN {
            return None;
        }
        Some(Self {
            version: peek_version(image)?,
            payload_len: image.len() - VERSION_TAG_LEN,
        })
    }
}

impl StateCodec {
    pub const fn new(version: u32, size_bound: usize) -> Self {
        Self {
            version,
            size_bound,
        }
    }

    pub const fn from_format(format: StateFormat) -> Self {
        Self::new(format.version, format.size_bound)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Fixed upper bound on an image, tag included.
    pub fn size_bound(&self) -> usize {
        self.size_bound
    }

    /// Reject an output buffer smaller than [`StateCodec::size_bound`].
    pub fn check_capacity(&self, out: &[u8]) -> Result<(), EmuError> {
        if out.len() < self.size_bound || out.len() < VERSION_TAG_LEN {
            return Err(EmuError::BufferTooSmall);
        }
        Ok(())
    }

    /// Check the envelope of `image` without touching the payload.
    pub fn validate(&self, image: &[u8]) -> Result<StateHeader, EmuError> {
        let header = StateHeader::parse(image).ok_or(EmuError::DataTooShort)?;
        if header.version != self.version {
            tracing::warn!(
                expected = self.version,
                found = header.version,
                "save-state version mismatch"
            );
            return Err(EmuError::VersionMismatch);
        }
        Ok(header)
    }

    /// Write an image into `out` and return its total length.
    ///
    /// `out` must hold at least [`StateCodec::size_bound`] bytes. A payload
    /// that does not fit in what is left after the tag is `BufferTooSmall`;
    /// any other serializer error is `SaveFailed`.
    pub fn save<F>(&self, out: &mut [u8], serialize: F) -> Result<usize, EmuError>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        self.check_capacity(out)?;

        let (tag, payload) = out.split_at_mut(VERSION_TAG_LEN);
        LittleEndian::write_u32(tag, self.version);

        let mut cursor = Cursor::new(payload);
        serialize(&mut cursor).map_err(|e| match e.kind() {
            io::ErrorKind::WriteZero => EmuError::BufferTooSmall,
            _ => {
                tracing::warn!(error = %e, "state serialization failed");
                EmuError::SaveFailed
            }
        })?;

        Ok(VERSION_TAG_LEN + cursor.position() as usize)
    }

    /// Validate the envelope of `image` and hand the payload to `restore`.
    ///
    /// `restore` is not called when the image is too short or carries a
    /// different version.
    pub fn load<F>(&self, image: &[u8], restore: F) -> Result<(), EmuError>
    where
        F: FnOnce(&mut dyn Read) -> io::Result<()>,
    {
        self.validate(image)?;

        let mut payload = &image[VERSION_TAG_LEN..];
        restore(&mut payload).map_err(|e| {
            tracing::warn!(error = %e, "core rejected save-state payload");
            EmuError::DataCorrupt
        })
    }
}

/// Scoped scratch file for cores that can only serialize through a file.
///
/// Removed when dropped, whichever path the caller leaves by.
pub struct ScratchFile {
    file: tempfile::NamedTempFile,
}

impl ScratchFile {
    /// Create an empty scratch file in `dir`, or in the system temp dir.
    pub fn create(dir: Option<&Path>) -> Result<Self, EmuError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("calc-state-").suffix(".img");
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(scratch_error)?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn file_mut(&mut self) -> &mut std::fs::File {
        self.file.as_file_mut()
    }

    /// Copy the whole file into `out`.
    pub fn copy_to(&mut self, out: &mut dyn Write) -> io::Result<u64> {
        io::Seek::rewind(self.file.as_file_mut())?;
        io::copy(self.file.as_file_mut(), out)
    }

    /// Replace the file contents with everything `input` yields.
    pub fn fill_from(&mut self, input: &mut dyn Read) -> io::Result<u64> {
        let file = self.file.as_file_mut();
        file.set_len(0)?;
        io::Seek::rewind(file)?;
        let copied = io::copy(input, file)?;
        file.flush()?;
        io::Seek::rewind(file)?;
        Ok(copied)
    }
}

fn scratch_error(e: io::Error) -> EmuError {
    EmuError::ScratchIo(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use calc_shared::CE_STATE_FORMAT;
    use std::cell::Cell;

    fn small_codec() -> StateCodec {
        StateCodec::new(0xCECE_001B, 64)
    }

    #[test]
    fn test_save_writes_tag_then_payload() {
        let codec = small_codec();
        let mut out = vec![0u8; 64];
        let len = codec
            .save(&mut out, |w| w.write_all(b"payload"))
            .unwrap();
        assert_eq!(len, 4 + 7);
        assert_eq!(&out[..4], &[0x1B, 0x00, 0xCE, 0xCE]);
        assert_eq!(&out[4..11], b"payload");
    }

    #[test]
    fn test_save_below_bound_is_rejected_before_serializing() {
        let codec = small_codec();
        let mut out = vec![0u8; 63];
        let called = Cell::new(false);
        let err = codec
            .save(&mut out, |_| {
                called.set(true);
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err, EmuError::BufferTooSmall);
        assert!(!called.get());
    }

    #[test]
    fn test_payload_overflow_is_buffer_too_small() {
        let codec = small_codec();
        let mut out = vec![0u8; 64];
        let err = codec.save(&mut out, |w| w.write_all(&[0xAA; 61])).unwrap_err();
        assert_eq!(err, EmuError::BufferTooSmall);
    }

    #[test]
    fn test_serializer_failure_is_save_failed() {
        let codec = small_codec();
        let mut out = vec![0u8; 64];
        let err = codec
            .save(&mut out, |_| Err(io::Error::other("core refused")))
            .unwrap_err();
        assert_eq!(err, EmuError::SaveFailed);
    }

    #[test]
    fn test_load_round_trip() {
        let codec = small_codec();
        let mut out = vec![0u8; 64];
        let len = codec.save(&mut out, |w| w.write_all(b"snapshot")).unwrap();

        let mut restored = Vec::new();
        codec
            .load(&out[..len], |r| r.read_to_end(&mut restored).map(|_| ()))
            .unwrap();
        assert_eq!(restored, b"snapshot");
    }

    #[test]
    fn test_short_image_never_reaches_restorer() {
        let codec = small_codec();
        let called = Cell::new(false);
        let err = codec
            .load(&[0x1B, 0x00, 0xCE, 0xCE, 0x00, 0x00, 0x00], |_| {
                called.set(true);
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err, EmuError::DataTooShort);
        assert!(!called.get());
    }

    #[test]
    fn test_version_mismatch_never_reaches_restorer() {
        let codec = small_codec();
        let mut image = 0xDEAD_BEEFu32.to_le_bytes().to_vec();
        image.extend_from_slice(&[0u8; 16]);
        let called = Cell::new(false);
        let err = codec
            .load(&image, |_| {
                called.set(true);
                Ok(())
            })
            .unwrap_err();
        assert_eq!(err, EmuError::VersionMismatch);
        assert!(!called.get());
    }

    #[test]
    fn test_restorer_failure_is_data_corrupt() {
        let codec = small_codec();
        let mut image = 0xCECE_001Bu32.to_le_bytes().to_vec();
        image.extend_from_slice(&[0u8; 4]);
        let err = codec
            .load(&image, |_| {
                Err(io::Error::new(io::ErrorKind::InvalidData, "bad"))
            })
            .unwrap_err();
        assert_eq!(err, EmuError::DataCorrupt);
    }

    #[test]
    fn test_validate_checks_envelope_only() {
        let codec = small_codec();
        assert_eq!(codec.validate(&[0x1B, 0x00, 0xCE]), Err(EmuError::DataTooShort));

        let mut image = 0xCECE_001Bu32.to_le_bytes().to_vec();
        image.extend_from_slice(b"abcd");
        assert_eq!(
            codec.validate(&image),
            Ok(StateHeader {
                version: 0xCECE_001B,
                payload_len: 4
            })
        );

        image[3] = 0x00;
        assert_eq!(codec.validate(&image), Err(EmuError::VersionMismatch));
    }

    #[test]
    fn test_check_capacity() {
        let codec = small_codec();
        assert_eq!(codec.check_capacity(&[0u8; 63]), Err(EmuError::BufferTooSmall));
        assert_eq!(codec.check_capacity(&[0u8; 64]), Ok(()));
    }

    #[test]
    fn test_header_parse() {
        let mut image = CE_STATE_FORMAT.version.to_le_bytes().to_vec();
        image.extend_from_slice(&[1, 2, 3, 4, 5]);
        let header = StateHeader::parse(&image).unwrap();
        assert_eq!(header.version, 0xCECE_001B);
        assert_eq!(header.payload_len, 5);
        assert!(StateHeader::parse(&image[..7]).is_none());
    }

    #[test]
    fn test_default_format_bound() {
        let codec = StateCodec::from_format(CE_STATE_FORMAT);
        assert_eq!(codec.size_bound(), 5 * 1024 * 1024);
    }

    #[test]
    fn test_scratch_file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let mut scratch = ScratchFile::create(Some(dir.path())).unwrap();
            scratch.file_mut().write_all(b"abc").unwrap();
            let mut copy = Vec::new();
            scratch.copy_to(&mut copy).unwrap();
            assert_eq!(copy, b"abc");
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_scratch_file_fill_from() {
        let mut scratch = ScratchFile::create(None).unwrap();
        let mut input: &[u8] = b"restored bytes";
        scratch.fill_from(&mut input).unwrap();
        let mut read_back = String::new();
        scratch.file_mut().read_to_string(&mut read_back).unwrap();
        assert_eq!(read_back, "restored bytes");
    }

    #[test]
    fn test_scratch_in_missing_dir_is_scratch_io() {
        let err = ScratchFile::create(Some(Path::new("/nonexistent/calc-scratch")))
            .err()
            .unwrap();
        assert!(matches!(err, EmuError::ScratchIo(_)));
    }
}
