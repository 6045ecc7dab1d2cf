//! Run command - load a ROM and run it headless
//!
//! Runs in bounded bursts so backend logs are flushed between them. The
//! session is always destroyed before returning.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use calc_core::registry::SessionHandle;
use calc_core::{Dispatcher, HostConfig};
use calc_shared::DEFAULT_CLOCK_HZ;
use clap::Args;

/// Cycles per `run_cycles` call.
const BURST_CYCLES: u64 = 1_000_000;

/// Arguments for the run command
#[derive(Args)]
pub struct RunArgs {
    /// ROM image to load
    pub rom: PathBuf,

    /// Backend to run on (defaults to the configured default)
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Cycles to run (default: one emulated second)
    #[arg(short, long, default_value_t = u64::from(DEFAULT_CLOCK_HZ))]
    pub cycles: u64,

    /// Write a save-state image here when done
    #[arg(long)]
    pub save_state: Option<PathBuf>,

    /// Write the final frame here as raw little-endian 32-bit pixels
    #[arg(long)]
    pub dump_frame: Option<PathBuf>,
}

/// What a run produced.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub backend: String,
    pub executed: u64,
    pub lcd_on: bool,
    pub backlight: u8,
    pub frame: Option<(usize, usize, Vec<u32>)>,
    pub state: Option<Vec<u8>>,
}

/// Run `rom` on `dispatcher` for `cycles`, keeping the state image if
/// `keep_state` is set.
pub fn run_rom(
    dispatcher: &Dispatcher,
    backend: Option<&str>,
    rom: &[u8],
    cycles: u64,
    keep_state: bool,
) -> Result<RunSummary> {
    if let Some(name) = backend {
        dispatcher
            .set_backend(name)
            .with_context(|| format!("Failed to select backend '{name}'"))?;
    }
    let handle = dispatcher.create().context("Failed to create a session")?;
    let result = drive(dispatcher, handle, rom, cycles, keep_state);
    dispatcher.destroy(handle);
    flush_logs(dispatcher);
    result
}

fn drive(
    dispatcher: &Dispatcher,
    handle: SessionHandle,
    rom: &[u8],
    cycles: u64,
    keep_state: bool,
) -> Result<RunSummary> {
    dispatcher
        .load_rom(handle, rom)
        .context("Backend rejected the ROM")?;
    dispatcher.power_on(handle);
    flush_logs(dispatcher);

    let mut executed = 0u64;
    while executed < cycles {
        let burst = (cycles - executed).min(BURST_CYCLES);
        let ran = dispatcher.run_cycles(handle, i32::try_from(burst).unwrap_or(i32::MAX));
        if ran <= 0 {
            tracing::warn!(executed, "backend stopped running");
            break;
        }
        executed += ran as u64;
        flush_logs(dispatcher);
    }

    let frame = dispatcher.framebuffer(handle, |view| {
        view.pixels.map(|pixels| (view.width, view.height, pixels.to_vec()))
    });
    let state = if keep_state {
        Some(dispatcher.save_state_vec(handle).context("Failed to save state")?)
    } else {
        None
    };

    Ok(RunSummary {
        backend: dispatcher.current_backend().unwrap_or_default(),
        executed,
        lcd_on: dispatcher.is_lcd_on(handle),
        backlight: dispatcher.backlight(handle),
        frame,
        state,
    })
}

fn flush_logs(dispatcher: &Dispatcher) {
    for line in dispatcher.drain_logs() {
        tracing::info!(target: "calc::backend", "{line}");
    }
}

/// Execute the run command
pub fn execute(args: RunArgs, config: &HostConfig) -> Result<()> {
    let rom = std::fs::read(&args.rom)
        .with_context(|| format!("Failed to read ROM: {}", args.rom.display()))?;
    if rom.is_empty() {
        bail!("ROM is empty: {}", args.rom.display());
    }

    let dispatcher = Dispatcher::from_config(config);
    let summary = run_rom(
        &dispatcher,
        args.backend.as_deref(),
        &rom,
        args.cycles,
        args.save_state.is_some(),
    )?;

    println!("Backend: {}", summary.backend);
    println!("Executed: {} cycles", summary.executed);
    println!(
        "LCD: {} (backlight {})",
        if summary.lcd_on { "on" } else { "off" },
        summary.backlight
    );

    if let (Some(path), Some(state)) = (&args.save_state, &summary.state) {
        std::fs::write(path, state)
            .with_context(|| format!("Failed to write save-state: {}", path.display()))?;
        println!("Saved {} byte state to {}", state.len(), path.display());
    }

    if let Some(path) = &args.dump_frame {
        let (width, height, pixels) = summary
            .frame
            .as_ref()
            .ok_or_else(|| anyhow!("Backend produced no frame"))?;
        std::fs::write(path, bytemuck::cast_slice::<u32, u8>(pixels))
            .with_context(|| format!("Failed to write frame: {}", path.display()))?;
        println!("Wrote {width}x{height} frame to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use calc_core::BackendCatalog;
    use calc_core::test_utils::{failing_entry, mock_entry, ti84_rom};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            BackendCatalog::new()
                .with(mock_entry("rust"))
                .with(mock_entry("cemu")),
        )
    }

    #[test]
    fn test_run_rom_in_bursts() {
        let dispatcher = dispatcher();
        let summary = run_rom(&dispatcher, None, &ti84_rom(), 2_500_000, true).unwrap();

        assert_eq!(summary.backend, "rust");
        assert_eq!(summary.executed, 2_500_000);
        assert!(summary.lcd_on);
        assert_eq!(summary.backlight, 0xFF);

        let (width, height, pixels) = summary.frame.unwrap();
        assert_eq!((width, height), (320, 240));
        assert_eq!(pixels.len(), width * height);

        let state = summary.state.unwrap();
        assert_eq!(calc_shared::peek_version(&state), Some(0xCECE_001B));
        assert_eq!(dispatcher.live_session(), None);
    }

    #[test]
    fn test_run_rom_on_named_backend() {
        let dispatcher = dispatcher();
        let summary = run_rom(&dispatcher, Some("cemu"), &ti84_rom(), 10, false).unwrap();
        assert_eq!(summary.backend, "cemu");
        assert!(summary.state.is_none());
    }

    #[test]
    fn test_run_rom_errors_end_the_session() {
        let dispatcher = dispatcher();
        assert!(run_rom(&dispatcher, Some("nope"), &ti84_rom(), 10, false).is_err());

        let oversized = vec![0u8; calc_shared::FLASH_SIZE + 1];
        assert!(run_rom(&dispatcher, None, &oversized, 10, false).is_err());
        assert_eq!(dispatcher.live_session(), None);
    }

    #[test]
    fn test_run_rom_without_backend() {
        let dispatcher = Dispatcher::new(BackendCatalog::new().with(failing_entry("rust")));
        assert!(run_rom(&dispatcher, None, &ti84_rom(), 10, false).is_err());
    }
}
