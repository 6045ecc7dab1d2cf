//! Inspect-state command - read a save-state envelope without a backend

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use calc_core::StateHeader;
use calc_shared::CE_STATE_FORMAT;
use calc_shared::state_format::MIN_IMAGE_LEN;
use clap::Args;
use serde::Serialize;

/// Arguments for the inspect-state command
#[derive(Args)]
pub struct InspectArgs {
    /// Save-state image to read
    pub file: PathBuf,

    /// Version tag to check against, in hex (default: the CE format)
    #[arg(long, value_parser = parse_hex_u32)]
    pub version: Option<u32>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StateReport {
    pub version: u32,
    pub expected: u32,
    pub matches: bool,
    pub payload_len: usize,
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid hex value '{s}': {e}"))
}

/// Check `image` against `expected`.
pub fn inspect(image: &[u8], expected: u32) -> Result<StateReport> {
    let Some(header) = StateHeader::parse(image) else {
        bail!(
            "Image is {} bytes; a save-state is at least {MIN_IMAGE_LEN}",
            image.len()
        );
    };
    Ok(StateReport {
        version: header.version,
        expected,
        matches: header.version == expected,
        payload_len: header.payload_len,
    })
}

/// Execute the inspect-state command
pub fn execute(args: InspectArgs) -> Result<()> {
    let image = std::fs::read(&args.file)
        .with_context(|| format!("Failed to read save-state: {}", args.file.display()))?;
    let expected = args.version.unwrap_or(CE_STATE_FORMAT.version);
    let report = inspect(&image, expected)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Version: 0x{:08X}", report.version);
        println!("Payload: {} bytes", report.payload_len);
        if report.matches {
            println!("Matches 0x{:08X}", report.expected);
        } else {
            println!("Does not match 0x{:08X}", report.expected);
        }
    }
    if !report.matches {
        bail!("version mismatch");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(version: u32, payload: &[u8]) -> Vec<u8> {
        let mut bytes = version.to_le_bytes().to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex_u32("0xCECE001B"), Ok(0xCECE_001B));
        assert_eq!(parse_hex_u32("cece001b"), Ok(0xCECE_001B));
        assert!(parse_hex_u32("zz").is_err());
    }

    #[test]
    fn test_inspect_matching_image() {
        let report = inspect(&image(0xCECE_001B, b"payload!"), CE_STATE_FORMAT.version).unwrap();
        assert_eq!(
            report,
            StateReport {
                version: 0xCECE_001B,
                expected: 0xCECE_001B,
                matches: true,
                payload_len: 8,
            }
        );
    }

    #[test]
    fn test_inspect_other_version() {
        let report = inspect(&image(0x1234, b"abcd"), CE_STATE_FORMAT.version).unwrap();
        assert!(!report.matches);
        assert_eq!(report.version, 0x1234);
    }

    #[test]
    fn test_inspect_short_image() {
        assert!(inspect(&[0x1B, 0x00, 0xCE], CE_STATE_FORMAT.version).is_err());
    }
}
