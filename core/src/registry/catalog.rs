//! Ordered list of backends the host may select.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::Backend;
use crate::backend::dylib::{DEFAULT_SYMBOL_PREFIX, DynamicBackend};
use crate::config::BackendsConfig;
use crate::error::EmuError;

/// Builds a fresh backend instance.
pub type BackendFactory = Arc<dyn Fn() -> Result<Box<dyn Backend>, EmuError> + Send + Sync>;

/// Where a backend comes from.
#[derive(Clone)]
pub enum BackendSource {
    /// Compiled into the host.
    Builtin(BackendFactory),
    /// Shared module opened at load time.
    Dynamic { path: PathBuf, symbol_prefix: String },
}

impl fmt::Debug for BackendSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendSource::Builtin(_) => f.write_str("Builtin"),
            BackendSource::Dynamic {
                path,
                symbol_prefix,
            } => f
                .debug_struct("Dynamic")
                .field("path", path)
                .field("symbol_prefix", symbol_prefix)
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackendEntry {
    name: String,
    source: BackendSource,
}

impl BackendEntry {
    pub fn builtin<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Box<dyn Backend>, EmuError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            source: BackendSource::Builtin(Arc::new(factory)),
        }
    }

    pub fn dynamic(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        symbol_prefix: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: BackendSource::Dynamic {
                path: path.into(),
                symbol_prefix: symbol_prefix.into(),
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &BackendSource {
        &self.source
    }

    /// Build the backend. For dynamic entries this opens and binds the module.
    pub fn instantiate(&self) -> Result<Box<dyn Backend>, EmuError> {
        match &self.source {
            BackendSource::Builtin(factory) => factory(),
            BackendSource::Dynamic {
                path,
                symbol_prefix,
            } => Ok(Box::new(DynamicBackend::open(&self.name, path, symbol_prefix)?)),
        }
    }
}

/// File name of the module for backend `name` on this platform,
/// e.g. `libemu_cemu.so`.
pub fn module_file_name(name: &str) -> PathBuf {
    PathBuf::from(libloading::library_filename(format!("emu_{name}")))
}

/// Path of the module for backend `name`, inside `dir` when given.
pub fn module_path(dir: Option<&Path>, name: &str) -> PathBuf {
    let file = module_file_name(name);
    match dir {
        Some(dir) => dir.join(file),
        None => file,
    }
}

/// Backends in availability order.
#[derive(Debug, Clone, Default)]
pub struct BackendCatalog {
    entries: Vec<BackendEntry>,
    default: Option<String>,
}

impl BackendCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// One dynamic entry per name in `config.order`.
    pub fn from_config(config: &BackendsConfig) -> Self {
        let mut catalog = Self::new();
        for name in &config.order {
            catalog.register(BackendEntry::dynamic(
                name.clone(),
                module_path(config.library_dir.as_deref(), name),
                config.symbol_prefix.clone(),
            ));
        }
        catalog.default = config.default.clone();
        catalog
    }

    /// Dynamic entries for `names` with the default prefix and loader search path.
    pub fn dynamic(names: &[&str]) -> Self {
        let mut catalog = Self::new();
        for name in names {
            catalog.register(BackendEntry::dynamic(
                *name,
                module_path(None, name),
                DEFAULT_SYMBOL_PREFIX,
            ));
        }
        catalog
    }

    /// Add `entry`, replacing an entry of the same name in place.
    pub fn register(&mut self, entry: BackendEntry) {
        match self.entries.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    pub fn with(mut self, entry: BackendEntry) -> Self {
        self.register(entry);
        self
    }

    pub fn with_default(mut self, name: impl Into<String>) -> Self {
        self.default = Some(name.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&BackendEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn entries(&self) -> &[BackendEntry] {
        &self.entries
    }

    pub fn list_available(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Configured default if it is in the catalog, else the first entry.
    pub fn default_name(&self) -> Option<&str> {
        self.default
            .as_deref()
            .filter(|name| self.contains(name))
            .or_else(|| self.entries.first().map(|e| e.name.as_str()))
    }

    /// Names to try when selecting lazily: the default first, then the
    /// rest in catalog order.
    pub fn selection_order(&self) -> Vec<&str> {
        let mut order: Vec<&str> = self.default_name().into_iter().collect();
        for entry in &self.entries {
            if !order.contains(&entry.name.as_str()) {
                order.push(&entry.name);
            }
        }
        order
    }
}
