//! Configuration commands.
//!
//! Reads the same layered configuration as `chainchat-ingest` (file plus
//! `CHAINCHAT__*` environment variables).

use anyhow::{bail, Result};
use chainchat_core::config::{Config, ConfigLoadError};
use clap::Subcommand;
use serde_json::json;

use crate::output::{self, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Load and validate configuration, reporting every problem
    Check,
}

pub async fn execute(cmd: ConfigCommands, path: Option<&str>, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Check => check(path, format),
    }
}

fn check(path: Option<&str>, format: OutputFormat) -> Result<()> {
    match Config::load(path) {
        Ok(config) => {
            match format {
                OutputFormat::Table => {
                    output::print_header("Configuration");
                    output::print_detail("Poll interval", &format!("{} ms", config.poller.interval_ms));
                    output::print_detail("Poller id", &config.poller.poller_id);
                    output::print_detail("Event type", &config.source.event_type);
                    output::print_detail("Cursor backend", &format!("{:?}", config.cursor.backend).to_lowercase());
                    output::print_detail(
                        "Generator",
                        &format!(
                            "{} (tick {} ms, {} msg/min)",
                            if config.generator.enabled { "enabled" } else { "disabled" },
                            config.generator.tick_ms,
                            config.generator.messages_per_minute
                        ),
                    );
                    output::print_detail(
                        "Change feed",
                        &format!("{} ({})", config.fanout.change_feed, config.fanout.channel),
                    );
                    println!();
                    output::print_success("Configuration is valid");
                }
                _ => output::print_item(
                    &json!({
                        "valid": true,
                        "poller": {
                            "interval_ms": config.poller.interval_ms,
                            "poller_id": config.poller.poller_id,
                        },
                        "generator": {
                            "enabled": config.generator.enabled,
                            "tick_ms": config.generator.tick_ms,
                            "messages_per_minute": config.generator.messages_per_minute,
                        },
                    }),
                    format,
                )?,
            }
            Ok(())
        }
        Err(ConfigLoadError::Invalid(issues)) => {
            match format {
                OutputFormat::Table => {
                    for issue in &issues {
                        output::print_error(&issue.to_string());
                    }
                }
                _ => {
                    let issues: Vec<_> = issues
                        .iter()
                        .map(|i| json!({ "key": i.key, "problem": i.problem, "env": i.env_var() }))
                        .collect();
                    output::print_item(&json!({ "valid": false, "issues": issues }), format)?;
                }
            }
            bail!("{} invalid configuration value(s)", issues.len())
        }
        Err(ConfigLoadError::Load(e)) => bail!("failed to load configuration: {}", e),
    }
}
