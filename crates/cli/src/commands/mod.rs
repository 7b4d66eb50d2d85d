pub mod config_cmd;
pub mod session;

use std::path::Path;

use stepwise_config::AppConfig;

pub type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Load the configuration from `path`, or from the default location, with
/// environment overrides applied.
pub fn load_config(path: Option<&Path>) -> CliResult<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_from(path)?.with_env_overrides(|key| std::env::var(key).ok())?,
        None => AppConfig::load()?,
    };
    Ok(config)
}
