//! Host configuration (`config.toml`)
//!
//! Handles loading, saving, and providing defaults for host settings.
//! Settings are stored in TOML format in the platform-specific config
//! directory, or at an explicit path given by the embedding application.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::dylib::DEFAULT_SYMBOL_PREFIX;
use crate::logs::DEFAULT_RING_CAPACITY;

const CONFIG_FILE: &str = "config.toml";

/// Host configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HostConfig {
    /// Backend catalog settings
    #[serde(default)]
    pub backends: BackendsConfig,
    /// Session settings
    #[serde(default)]
    pub session: SessionConfig,
    /// Log buffering and filtering
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which backends exist and where their modules live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Availability order (default: rust, cemu)
    #[serde(default = "default_order")]
    pub order: Vec<String>,
    /// Backend selected lazily when none is active (default: first in order)
    #[serde(default)]
    pub default: Option<String>,
    /// Directory holding `emu_<name>` modules (default: loader search path)
    #[serde(default)]
    pub library_dir: Option<PathBuf>,
    /// Prefix of exported backend symbols (default: "backend_")
    #[serde(default = "default_symbol_prefix")]
    pub symbol_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SessionConfig {
    /// Scratch directory for backends that serialize through files
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Backend log lines kept for draining (default: 200)
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    /// `tracing` filter used when `RUST_LOG` is unset (default: "info")
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_order() -> Vec<String> {
    vec!["rust".to_string(), "cemu".to_string()]
}

fn default_symbol_prefix() -> String {
    DEFAULT_SYMBOL_PREFIX.to_string()
}

fn default_ring_capacity() -> usize {
    DEFAULT_RING_CAPACITY
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            order: default_order(),
            default: None,
            library_dir: None,
            symbol_prefix: default_symbol_prefix(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            ring_capacity: default_ring_capacity(),
            filter: default_filter(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(#[from] std::io::Error),
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\calc\CalcHost\config`
/// On macOS: `~/Library/Application Support/io.calc.CalcHost`
/// On Linux: `~/.config/calchost`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "calc", "CalcHost")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Path of `config.toml` in the platform config directory.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Loads the configuration from the platform config directory.
///
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> HostConfig {
    match config_path() {
        Some(path) => load_or_default(&path),
        None => HostConfig::default(),
    }
}

/// Loads `path`, falling back to defaults on any error.
pub fn load_or_default(path: &Path) -> HostConfig {
    match load_from(path) {
        Ok(config) => config,
        Err(ConfigError::Read { ref source, .. })
            if source.kind() == std::io::ErrorKind::NotFound =>
        {
            HostConfig::default()
        }
        Err(err) => {
            tracing::warn!(error = %err, "using default configuration");
            HostConfig::default()
        }
    }
}

/// Loads `path`, reporting read and parse errors.
pub fn load_from(path: &Path) -> Result<HostConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Saves the configuration to the platform config directory.
///
/// Creates the directory if it doesn't exist.
pub fn save(config: &HostConfig) -> Result<(), ConfigError> {
    match config_path() {
        Some(path) => save_to(config, &path),
        None => Ok(()),
    }
}

/// Writes `config` to `path` as pretty TOML, creating parent directories.
pub fn save_to(config: &HostConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
