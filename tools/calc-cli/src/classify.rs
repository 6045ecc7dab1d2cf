//! Classify command - identify the calculator a ROM image is for

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use calc_shared::{Classification, FLASH_SIZE, FallbackReason, classify};
use clap::Args;

/// Arguments for the classify command
#[derive(Args)]
pub struct ClassifyArgs {
    /// ROM image to read
    pub rom: PathBuf,

    /// Print the classification as JSON
    #[arg(long)]
    pub json: bool,
}

/// Human-readable summary of a classification.
pub fn render(result: &Classification) -> String {
    let mut out = format!("Device: {}", result.variant);
    if let Some(ids) = result.ids {
        out.push_str(&format!(
            "\nCertificate: model 0x{:02X}, device 0x{:02X}",
            ids.model_id, ids.device_id
        ));
    }
    if let Some(offset) = result.window_offset {
        out.push_str(&format!("\nWindow: 0x{offset:06X}"));
    }
    match result.fallback {
        Some(FallbackReason::NoCertificate) => {
            out.push_str("\nFallback: no certificate found");
        }
        Some(FallbackReason::UnrecognizedPair { .. }) => {
            out.push_str("\nFallback: certificate pair not recognized");
        }
        None => {}
    }
    out
}

/// Execute the classify command
pub fn execute(args: ClassifyArgs) -> Result<()> {
    let rom = std::fs::read(&args.rom)
        .with_context(|| format!("Failed to read ROM: {}", args.rom.display()))?;
    if rom.is_empty() {
        bail!("ROM is empty: {}", args.rom.display());
    }
    if rom.len() > FLASH_SIZE {
        tracing::warn!(
            len = rom.len(),
            ceiling = FLASH_SIZE,
            "ROM is larger than flash; a backend will reject it"
        );
    }

    let result = classify(&rom);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", render(&result));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use calc_shared::cert::testing::rom_with_certificate;

    #[test]
    fn test_render_recognized_rom() {
        let text = render(&classify(&rom_with_certificate(0x13, 0x01)));
        assert!(text.starts_with("Device: "));
        assert!(text.contains("model 0x13, device 0x01"));
        assert!(!text.contains("Fallback"));
    }

    #[test]
    fn test_render_fallback() {
        let text = render(&classify(&[0u8; 64]));
        assert!(text.contains("Fallback: no certificate found"));
    }

    #[test]
    fn test_execute_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ce.rom");
        std::fs::write(&path, rom_with_certificate(0x13, 0x00)).unwrap();
        assert!(execute(ClassifyArgs { rom: path, json: true }).is_ok());
    }

    #[test]
    fn test_execute_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.rom");
        std::fs::write(&path, b"").unwrap();
        assert!(execute(ClassifyArgs { rom: path, json: false }).is_err());
    }
}
