//! Device classification from ROM certificates
//!
//! A CE ROM carries a certificate in one of a few 64 KiB aligned windows
//! near the start of flash. The certificate is an outer field (`0x800F`)
//! wrapping a fixed chain of five fields. The first carries the model id,
//! the last carries the device id, and the pair selects the hardware
//! variant the core must emulate.
//!
//! Classification never fails. A ROM without a readable certificate, or
//! with a pair that no table entry knows, falls back to the table's default
//! variant and says so in [`Classification::fallback`].

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::cert::{CertError, FieldCursor, field_get};
use crate::constants::FLASH_SIZE;

/// First window offset probed for a certificate.
pub const CERT_SCAN_START: usize = 0x20000;
/// Scanning stops before this offset.
pub const CERT_SCAN_END: usize = 0x40000;
/// Distance between probed windows.
pub const CERT_SCAN_STRIDE: usize = 0x10000;

/// Outer certificate field.
pub const OUTER_FIELD: u16 = 0x800F;
/// Carries the model id in payload byte 0.
pub const MODEL_FIELD: u16 = 0x8012;
/// Carries the device id in payload byte 1.
pub const DEVICE_FIELD: u16 = 0x80C2;

/// Field types between the model and device fields, in order.
const INTERMEDIATE_FIELDS: [u16; 3] = [0x8021, 0x8032, 0x80A1];

/// Hardware variants the cores know how to emulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceVariant {
    Ti84PlusCe,
    Ti83PremiumCe,
    Ti82AdvancedEditionPython,
}

impl DeviceVariant {
    pub const ALL: [DeviceVariant; 3] = [
        DeviceVariant::Ti84PlusCe,
        DeviceVariant::Ti83PremiumCe,
        DeviceVariant::Ti82AdvancedEditionPython,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            DeviceVariant::Ti84PlusCe => "TI-84 Plus CE",
            DeviceVariant::Ti83PremiumCe => "TI-83 Premium CE",
            DeviceVariant::Ti82AdvancedEditionPython => "TI-82 Advanced Edition Python",
        }
    }
}

impl std::fmt::Display for DeviceVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Model and device ids read from a certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CertIds {
    pub model_id: u8,
    pub device_id: u8,
}

/// Why classification fell back to the default variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum FallbackReason {
    /// No window held a complete certificate chain.
    NoCertificate,
    /// A chain was read but its pair is not in the table.
    UnrecognizedPair { model_id: u8, device_id: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub variant: DeviceVariant,
    /// Ids from the certificate, when one was found.
    pub ids: Option<CertIds>,
    /// Offset of the window the certificate was read from.
    pub window_offset: Option<usize>,
    pub fallback: Option<FallbackReason>,
}

impl Classification {
    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceEntry {
    pub model_id: u8,
    pub device_id: u8,
    pub variant: DeviceVariant,
}

/// Maps `(model, device)` pairs to variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTable {
    entries: Vec<DeviceEntry>,
    fallback: DeviceVariant,
}

impl DeviceTable {
    /// An empty table that classifies everything as `fallback`.
    pub fn new(fallback: DeviceVariant) -> Self {
        Self {
            entries: Vec::new(),
            fallback,
        }
    }

    /// The pairs shipped on real hardware.
    pub fn builtin() -> Self {
        Self::new(DeviceVariant::Ti84PlusCe)
            .with_entry(0x13, 0x00, DeviceVariant::Ti84PlusCe)
            .with_entry(0x13, 0x01, DeviceVariant::Ti83PremiumCe)
            .with_entry(0x15, 0x01, DeviceVariant::Ti82AdvancedEditionPython)
    }

    /// Shared instance of [`DeviceTable::builtin`].
    pub fn builtin_ref() -> &'static DeviceTable {
        static BUILTIN: OnceLock<DeviceTable> = OnceLock::new();
        BUILTIN.get_or_init(DeviceTable::builtin)
    }

    /// Add or replace the entry for `(model_id, device_id)`.
    pub fn with_entry(mut self, model_id: u8, device_id: u8, variant: DeviceVariant) -> Self {
        self.insert(model_id, device_id, variant);
        self
    }

    pub fn insert(&mut self, model_id: u8, device_id: u8, variant: DeviceVariant) {
        let entry = DeviceEntry {
            model_id,
            device_id,
            variant,
        };
        match self
            .entries
            .iter_mut()
            .find(|e| e.model_id == model_id && e.device_id == device_id)
        {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn entries(&self) -> &[DeviceEntry] {
        &self.entries
    }

    pub fn fallback(&self) -> DeviceVariant {
        self.fallback
    }

    pub fn lookup(&self, model_id: u8, device_id: u8) -> Option<DeviceVariant> {
        self.entries
            .iter()
            .find(|e| e.model_id == model_id && e.device_id == device_id)
            .map(|e| e.variant)
    }

    /// Classify a ROM image by its certificate.
    pub fn classify(&self, rom: &[u8]) -> Classification {
        let limit = rom.len().min(FLASH_SIZE);

        for offset in (CERT_SCAN_START..CERT_SCAN_END).step_by(CERT_SCAN_STRIDE) {
            if offset >= limit {
                break;
            }
            let window = &rom[offset..limit];

            let ids = match read_certificate(window) {
                Ok(Some(ids)) => ids,
                Ok(None) => continue,
                Err(err) => {
                    tracing::debug!(window = offset, error = %err, "certificate window rejected");
                    continue;
                }
            };

            return match self.lookup(ids.model_id, ids.device_id) {
                Some(variant) => Classification {
                    variant,
                    ids: Some(ids),
                    window_offset: Some(offset),
                    fallback: None,
                },
                None => {
                    tracing::warn!(
                        model_id = ids.model_id,
                        device_id = ids.device_id,
                        fallback = %self.fallback,
                        "unrecognized certificate pair"
                    );
                    Classification {
                        variant: self.fallback,
                        ids: Some(ids),
                        window_offset: Some(offset),
                        fallback: Some(FallbackReason::UnrecognizedPair {
                            model_id: ids.model_id,
                            device_id: ids.device_id,
                        }),
                    }
                }
            };
        }

        tracing::warn!(fallback = %self.fallback, "could not determine device type");
        Classification {
            variant: self.fallback,
            ids: None,
            window_offset: None,
            fallback: Some(FallbackReason::NoCertificate),
        }
    }
}

impl Default for DeviceTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Classify `rom` against the built-in table.
pub fn classify(rom: &[u8]) -> Classification {
    DeviceTable::builtin_ref().classify(rom)
}

/// Read the certificate chain at the start of `window`.
///
/// `Ok(None)` means a field of the wrong type was found where the chain
/// expects another one.
fn read_certificate(window: &[u8]) -> Result<Option<CertIds>, CertError> {
    let outer = field_get(window, 0)?;
    if outer.field_type != OUTER_FIELD {
        return Ok(None);
    }

    let mut chain = FieldCursor::new(outer.payload);

    let Some(model) = chain.expect(MODEL_FIELD)? else {
        return Ok(None);
    };
    let model_id = *model.payload.first().ok_or(CertError::MalformedField {
        offset: model.offset,
        reason: "model field has no payload",
    })?;

    for field_type in INTERMEDIATE_FIELDS {
        if chain.expect(field_type)?.is_none() {
            return Ok(None);
        }
    }

    let Some(device) = chain.expect(DEVICE_FIELD)? else {
        return Ok(None);
    };
    let device_id = *device.payload.get(1).ok_or(CertError::MalformedField {
        offset: device.offset,
        reason: "device field shorter than two bytes",
    })?;

    Ok(Some(CertIds {
        model_id,
        device_id,
    }))
}
