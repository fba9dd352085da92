//! Service configuration loading for the CLI

use anyhow::{Context, Result};
use ldapsync_core::ServiceConfig;

/// Load from `path` or the environment, then apply command-line overrides
pub fn load(
    path: Option<&str>,
    database_url: Option<String>,
    log_level: Option<String>,
) -> Result<ServiceConfig> {
    let mut config = match path {
        Some(path) => ServiceConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => ServiceConfig::from_env(),
    };

    if let Some(url) = database_url {
        config.database.url = url;
    }
    if let Some(level) = log_level {
        config.logging.level = level;
    }

    config.validate()?;
    Ok(config)
}
