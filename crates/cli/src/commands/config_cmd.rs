//! `stepwise config`: Configuration management commands.

use std::io::Write;
use std::path::Path;

use stepwise_config::AppConfig;

use super::CliResult;

/// Write a default config file. An existing file is kept unless `force`.
pub fn init(path: &Path, force: bool, out: &mut impl Write) -> CliResult {
    if path.exists() && !force {
        writeln!(out, "Config already exists: {} (use --force to overwrite)", path.display())?;
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    tracing::info!(path = %path.display(), "Wrote default configuration");
    writeln!(out, "Created {}", path.display())?;
    Ok(())
}

/// Print the effective configuration as TOML.
pub fn show(config: &AppConfig, out: &mut impl Write) -> CliResult {
    let toml_str = toml::to_string_pretty(config)?;
    writeln!(out, "{toml_str}")?;
    Ok(())
}

pub fn path(out: &mut impl Write) -> CliResult {
    writeln!(out, "{}", AppConfig::config_dir().join("config.toml").display())?;
    Ok(())
}
