//! Subcommand implementations.

pub mod config;
pub mod cursor;
pub mod messages;
pub mod simulate;

use anyhow::{anyhow, Result};
use chainchat_core::config::{Config, ConfigLoadError};

/// Load the service configuration, flattening validation issues into one error.
pub fn load_config(path: Option<&str>) -> Result<Config> {
    match Config::load(path) {
        Ok(config) => Ok(config),
        Err(ConfigLoadError::Invalid(issues)) => {
            let lines: Vec<String> = issues.iter().map(|i| format!("  {}", i)).collect();
            Err(anyhow!("invalid configuration:\n{}", lines.join("\n")))
        }
        Err(ConfigLoadError::Load(e)) => Err(anyhow!("failed to load configuration: {}", e)),
    }
}
