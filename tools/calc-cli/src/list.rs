//! List command - show the configured backends

use anyhow::Result;
use calc_core::HostConfig;
use calc_core::registry::{BackendCatalog, BackendSource};
use clap::Args;

/// Arguments for the list command
#[derive(Args)]
pub struct ListArgs {
    /// Also open each module and bind its operations
    #[arg(long)]
    pub probe: bool,
}

/// One line per backend, default first marked with `*`.
pub fn describe_catalog(catalog: &BackendCatalog) -> Vec<String> {
    let default = catalog.default_name();
    catalog
        .entries()
        .iter()
        .map(|entry| {
            let marker = if Some(entry.name()) == default { "*" } else { " " };
            match entry.source() {
                BackendSource::Dynamic { path, .. } => {
                    format!("{marker} {:<8} {}", entry.name(), path.display())
                }
                BackendSource::Builtin(_) => format!("{marker} {:<8} (built in)", entry.name()),
            }
        })
        .collect()
}

/// Execute the list command
pub fn execute(args: ListArgs, config: &HostConfig) -> Result<()> {
    let catalog = BackendCatalog::from_config(&config.backends);
    if catalog.is_empty() {
        println!("No backends configured");
        return Ok(());
    }

    for (line, entry) in describe_catalog(&catalog).into_iter().zip(catalog.entries()) {
        if !args.probe {
            println!("{line}");
            continue;
        }
        match entry.instantiate() {
            Ok(_) => println!("{line}  ok"),
            Err(err) => println!("{line}  {err}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use calc_core::test_utils::mock_entry;

    #[test]
    fn test_describe_catalog_marks_default() {
        let catalog = BackendCatalog::new()
            .with(mock_entry("rust"))
            .with(mock_entry("cemu"))
            .with_default("cemu");
        let lines = describe_catalog(&catalog);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("  rust"));
        assert!(lines[1].starts_with("* cemu"));
        assert!(lines[1].ends_with("(built in)"));
    }

    #[test]
    fn test_describe_dynamic_entries_show_path() {
        let config = HostConfig::default();
        let catalog = BackendCatalog::from_config(&config.backends);
        let lines = describe_catalog(&catalog);
        assert!(lines[0].starts_with("* rust"));
        assert!(lines[0].contains("emu_rust"));
    }
}
