//! Certificate field walker
//!
//! The certificate region of a CE ROM is a sequence of type-length-value
//! fields. Each field starts with a big-endian 16-bit type word. The low
//! nibble of that word encodes the payload size:
//!
//! | nibble    | size                               | header length |
//! |-----------|------------------------------------|---------------|
//! | `0x0-0xC` | the nibble itself                  | 2             |
//! | `0xD`     | next byte                          | 3             |
//! | `0xE`     | next two bytes, big-endian         | 4             |
//! | `0xF`     | next four bytes, big-endian        | 6             |
//!
//! The full type word (nibble included) identifies the field, so `0x8012`
//! is "field 0x801 with a two byte payload". Fields nest: the payload of an
//! outer field is itself a window that can be walked with [`FieldCursor`].
//!
//! Decoding is bounds-checked against the window it is given. A field whose
//! header or declared payload runs past the end of the window is reported as
//! [`CertError::MalformedField`], never read.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

const SIZE_IN_U8: u16 = 0xD;
const SIZE_IN_U16: u16 = 0xE;
const SIZE_IN_U32: u16 = 0xF;

/// Errors produced while decoding certificate fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertError {
    #[error("malformed certificate field at offset {offset:#x}: {reason}")]
    MalformedField { offset: usize, reason: &'static str },
}

/// One decoded field, borrowing its payload from the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CertField<'a> {
    /// Full 16-bit type word, size nibble included.
    pub field_type: u16,
    /// Offset of the type word within the window.
    pub offset: usize,
    /// Bytes taken by the type word and any extended size bytes.
    pub header_len: usize,
    pub payload: &'a [u8],
}

impl<'a> CertField<'a> {
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// Header plus payload.
    pub fn total_len(&self) -> usize {
        self.header_len + self.payload.len()
    }

    /// Offset of the first byte after this field.
    pub fn end(&self) -> usize {
        self.offset + self.total_len()
    }

    /// Cursor over the payload, for walking nested fields.
    pub fn children(&self) -> FieldCursor<'a> {
        FieldCursor::new(self.payload)
    }
}

/// Decode the field starting at `offset` within `window`.
pub fn field_get(window: &[u8], offset: usize) -> Result<CertField<'_>, CertError> {
    let malformed = |reason| CertError::MalformedField { offset, reason };

    let rest = window
        .get(offset..)
        .ok_or(malformed("offset outside window"))?;
    let type_bytes = rest.get(..2).ok_or(malformed("truncated type word"))?;
    let field_type = BigEndian::read_u16(type_bytes);

    let (size, header_len): (usize, usize) = match field_type & 0x000F {
        SIZE_IN_U8 => {
            let size = rest.get(2).ok_or(malformed("truncated size byte"))?;
            (*size as usize, 3)
        }
        SIZE_IN_U16 => {
            let size = rest.get(2..4).ok_or(malformed("truncated 16-bit size"))?;
            (BigEndian::read_u16(size) as usize, 4)
        }
        SIZE_IN_U32 => {
            let size = rest.get(2..6).ok_or(malformed("truncated 32-bit size"))?;
            (BigEndian::read_u32(size) as usize, 6)
        }
        inline => (inline as usize, 2),
    };

    let end = header_len
        .checked_add(size)
        .ok_or(malformed("declared size overflows"))?;
    let payload = rest
        .get(header_len..end)
        .ok_or(malformed("declared size exceeds window"))?;

    Ok(CertField {
        field_type,
        offset,
        header_len,
        payload,
    })
}

/// Sequential reader over the fields of one window.
#[derive(Debug, Clone)]
pub struct FieldCursor<'a> {
    window: &'a [u8],
    pos: usize,
}

impl<'a> FieldCursor<'a> {
    pub fn new(window: &'a [u8]) -> Self {
        Self { window, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left between the cursor and the end of the window.
    pub fn remaining(&self) -> usize {
        self.window.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Decode the field under the cursor without moving.
    pub fn peek(&self) -> Result<CertField<'a>, CertError> {
        field_get(self.window, self.pos)
    }

    /// Decode the field under the cursor and step past it.
    ///
    /// On error the cursor stays where it was.
    pub fn advance(&mut self) -> Result<CertField<'a>, CertError> {
        let field = self.peek()?;
        self.pos = field.end();
        Ok(field)
    }

    /// Step past the field under the cursor if its type is `field_type`.
    ///
    /// Returns `Ok(None)` and leaves the cursor in place on a type mismatch.
    pub fn expect(&mut self, field_type: u16) -> Result<Option<CertField<'a>>, CertError> {
        let field = self.peek()?;
        if field.field_type != field_type {
            return Ok(None);
        }
        self.pos = field.end();
        Ok(Some(field))
    }
}

/// Builders for certificate fields and ROM images.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use crate::device::{CERT_SCAN_START, DEVICE_FIELD, MODEL_FIELD, OUTER_FIELD};

    /// Encode a field. The size encoding is taken from the low nibble of
    /// `field_type`; with an inline nibble the payload length must match it.
    pub fn encode_field(field_type: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = field_type.to_be_bytes().to_vec();
        match field_type & 0x000F {
            0xD => out.push(payload.len() as u8),
            0xE => out.extend_from_slice(&(payload.len() as u16).to_be_bytes()),
            0xF => out.extend_from_slice(&(payload.len() as u32).to_be_bytes()),
            inline => assert_eq!(
                inline as usize,
                payload.len(),
                "inline size nibble does not match payload length"
            ),
        }
        out.extend_from_slice(payload);
        out
    }

    /// The inner field chain for a `(model, device)` pair.
    pub fn certificate_chain(model_id: u8, device_id: u8) -> Vec<u8> {
        let mut chain = encode_field(MODEL_FIELD, &[model_id, 0x00]);
        chain.extend(encode_field(0x8021, &[0x04]));
        chain.extend(encode_field(0x8032, &[0x00, 0x01]));
        chain.extend(encode_field(0x80A1, &[0x0B]));
        chain.extend(encode_field(DEVICE_FIELD, &[0x00, device_id]));
        chain
    }

    /// A complete certificate: the outer field wrapping the chain.
    pub fn certificate(model_id: u8, device_id: u8) -> Vec<u8> {
        encode_field(OUTER_FIELD, &certificate_chain(model_id, device_id))
    }

    /// A blank ROM of `len` bytes with `cert` written at `offset`.
    pub fn rom_with_certificate_at(len: usize, offset: usize, cert: &[u8]) -> Vec<u8> {
        let mut rom = vec![0xFF; len];
        rom[offset..offset + cert.len()].copy_from_slice(cert);
        rom
    }

    /// A blank ROM with a certificate in the first scan window.
    pub fn rom_with_certificate(model_id: u8, device_id: u8) -> Vec<u8> {
        rom_with_certificate_at(
            CERT_SCAN_START + 0x1000,
            CERT_SCAN_START,
            &certificate(model_id, device_id),
        )
    }
}
