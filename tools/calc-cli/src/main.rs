//! Calc CLI - headless host for calc emulator backends
//!
//! # Commands
//!
//! - `calc list` - Show the configured backends
//! - `calc classify <rom>` - Identify the calculator a ROM image is for
//! - `calc inspect-state <file>` - Read a save-state envelope
//! - `calc run <rom>` - Run a ROM for a number of cycles
//!
//! # Usage
//!
//! ```bash
//! # Which device is this dump from?
//! calc classify ti84ce.rom --json
//!
//! # Boot on the cemu backend and keep a save-state
//! calc run ti84ce.rom --backend cemu --cycles 48000000 --save-state boot.state
//! ```
//!
//! Backends and logging come from `config.toml` in the platform config
//! directory, or from `--config`.

mod classify;
mod inspect;
mod list;
mod run;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use calc_core::HostConfig;
use calc_core::config;
use clap::{Parser, Subcommand};

/// Calc CLI - headless host for calc emulator backends
#[derive(Parser)]
#[command(name = "calc")]
#[command(about = "Headless host for calc emulator backends")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the configured backends in availability order
    List(list::ListArgs),

    /// Identify the calculator a ROM image is for
    Classify(classify::ClassifyArgs),

    /// Read a save-state envelope without a backend
    InspectState(inspect::InspectArgs),

    /// Run a ROM for a number of cycles
    Run(run::RunArgs),
}

fn load_config(path: Option<&Path>) -> Result<HostConfig> {
    match path {
        Some(path) => config::load_from(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(config::load()),
    }
}

fn init_logging(config: &HostConfig) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.filter)),
        )
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(&config);

    match cli.command {
        Commands::List(args) => list::execute(args, &config),
        Commands::Classify(args) => classify::execute(args),
        Commands::InspectState(args) => inspect::execute(args),
        Commands::Run(args) => run::execute(args, &config),
    }
}
