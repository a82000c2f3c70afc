//! Configuration management.
//!
//! Sources, later ones winning: optional file, then `CHAINCHAT__*` environment
//! variables (`CHAINCHAT__POLLER__INTERVAL_MS=2000`). Startup validation runs
//! on the raw layered values before deserialization so that every problem is
//! reported at once, one line per key.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

use crate::error::IngestError;

pub const ENV_PREFIX: &str = "CHAINCHAT";

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Redis configuration (cursor backend)
    #[serde(default)]
    pub redis: RedisConfig,

    /// Ledger event source
    pub source: SourceConfig,

    /// Event poller
    pub poller: PollerConfig,

    /// Cursor persistence
    #[serde(default)]
    pub cursor: CursorConfig,

    /// Synthetic load generator
    pub generator: GeneratorConfig,

    /// Real-time fan-out
    #[serde(default)]
    pub fanout: FanoutConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// JSON-RPC endpoint of a ledger full node
    pub rpc_url: String,

    /// Fully-qualified event type to query
    pub event_type: String,

    /// JSON-RPC method used to page events
    #[serde(default = "default_rpc_method")]
    pub method: String,

    /// Events per page
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Field of the event payload holding the author
    #[serde(default = "default_sender_field")]
    pub sender_field: String,

    /// Field of the event payload holding the message text
    #[serde(default = "default_text_field")]
    pub text_field: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// Fixed tick interval (milliseconds, required)
    pub interval_ms: u64,

    /// Identifies this poller's cursor slot
    #[serde(default = "default_poller_id")]
    pub poller_id: String,

    /// Upper bound on pages drained in one tick
    #[serde(default = "default_max_pages_per_tick")]
    pub max_pages_per_tick: u32,
}

impl PollerConfig {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            poller_id: default_poller_id(),
            max_pages_per_tick: default_max_pages_per_tick(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CursorBackend {
    #[default]
    Postgres,
    Redis,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CursorConfig {
    #[serde(default)]
    pub backend: CursorBackend,

    /// Redis key prefix; the poller id is appended
    #[serde(default = "default_cursor_key_prefix")]
    pub key_prefix: String,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            backend: CursorBackend::default(),
            key_prefix: default_cursor_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    /// Run the generator alongside the poller
    #[serde(default)]
    pub enabled: bool,

    /// Fixed polling granularity (milliseconds, required)
    pub tick_ms: u64,

    /// Target average rate
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: f64,

    /// Message texts to draw from; built-in corpus when absent
    #[serde(default)]
    pub corpus: Option<Vec<String>>,

    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

impl GeneratorConfig {
    pub fn new(tick_ms: u64, messages_per_minute: f64) -> Self {
        Self {
            enabled: true,
            tick_ms,
            messages_per_minute,
            corpus: None,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FanoutConfig {
    /// Feed subscribers from the database change stream
    #[serde(default = "default_change_feed")]
    pub change_feed: bool,

    /// LISTEN/NOTIFY channel
    #[serde(default = "default_channel")]
    pub channel: String,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            change_feed: default_change_feed(),
            channel: default_channel(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// OpenTelemetry OTLP endpoint
    pub otlp_endpoint: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Prometheus exporter listen address (e.g. `0.0.0.0:9100`)
    pub metrics_addr: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_addr: None,
        }
    }
}

// Default value functions
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_rpc_method() -> String { "suix_queryEvents".to_string() }
fn default_page_limit() -> u32 { 50 }
fn default_request_timeout_ms() -> u64 { 10_000 }
fn default_sender_field() -> String { "sender".to_string() }
fn default_text_field() -> String { "text".to_string() }
fn default_poller_id() -> String { "default".to_string() }
fn default_max_pages_per_tick() -> u32 { 10 }
fn default_cursor_key_prefix() -> String { "chainchat:cursor".to_string() }
fn default_messages_per_minute() -> f64 { 30.0 }
fn default_change_feed() -> bool { true }
fn default_channel() -> String { "chat_messages".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }

// ═══════════════════════════════════════════════════════════════════════════════
// Validation
// ═══════════════════════════════════════════════════════════════════════════════

/// One invalid or missing configuration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Dotted key, e.g. `poller.interval_ms`
    pub key: String,
    pub problem: String,
}

impl ConfigIssue {
    fn new(key: &str, problem: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            problem: problem.into(),
        }
    }

    /// Environment variable that sets this key.
    pub fn env_var(&self) -> String {
        format!(
            "{}__{}",
            ENV_PREFIX,
            self.key.replace('.', "__").to_uppercase()
        )
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (set {})", self.key, self.problem, self.env_var())
    }
}

/// Why configuration could not be produced.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("{} invalid configuration value(s)", .0.len())]
    Invalid(Vec<ConfigIssue>),

    #[error(transparent)]
    Load(#[from] IngestError),
}

impl From<config::ConfigError> for ConfigLoadError {
    fn from(error: config::ConfigError) -> Self {
        Self::Load(IngestError::from(error))
    }
}

const REQUIRED_INTERVALS: [&str; 2] = ["poller.interval_ms", "generator.tick_ms"];
const REQUIRED_STRINGS: [&str; 3] = ["database.url", "source.rpc_url", "source.event_type"];

fn check_positive_int(raw: &config::Config, key: &str, required: bool, issues: &mut Vec<ConfigIssue>) {
    match raw.get_string(key) {
        Ok(value) => match value.trim().parse::<i64>() {
            Ok(n) if n > 0 => {}
            Ok(_) => issues.push(ConfigIssue::new(
                key,
                format!("must be a positive integer, got {}", value),
            )),
            Err(_) => issues.push(ConfigIssue::new(
                key,
                format!("must be a positive integer, got {:?}", value),
            )),
        },
        Err(config::ConfigError::NotFound(_)) if required => {
            issues.push(ConfigIssue::new(key, "is required"))
        }
        Err(config::ConfigError::NotFound(_)) => {}
        Err(e) => issues.push(ConfigIssue::new(key, e.to_string())),
    }
}

/// Check the raw layered values, collecting every problem.
pub fn validate(raw: &config::Config) -> Vec<ConfigIssue> {
    let mut issues = Vec::new();

    for key in REQUIRED_INTERVALS {
        check_positive_int(raw, key, true, &mut issues);
    }
    check_positive_int(raw, "poller.max_pages_per_tick", false, &mut issues);
    check_positive_int(raw, "source.page_limit", false, &mut issues);
    check_positive_int(raw, "source.request_timeout_ms", false, &mut issues);

    for key in REQUIRED_STRINGS {
        match raw.get_string(key) {
            Ok(value) if !value.trim().is_empty() => {}
            Ok(_) => issues.push(ConfigIssue::new(key, "must not be empty")),
            Err(_) => issues.push(ConfigIssue::new(key, "is required")),
        }
    }

    if let Ok(value) = raw.get_string("generator.messages_per_minute") {
        match value.trim().parse::<f64>() {
            Ok(rate) if rate.is_finite() && rate > 0.0 => {}
            _ => issues.push(ConfigIssue::new(
                "generator.messages_per_minute",
                format!("must be a positive number, got {:?}", value),
            )),
        }
    }

    if let Ok(value) = raw.get_string("cursor.backend") {
        if !matches!(value.to_lowercase().as_str(), "postgres" | "redis" | "memory") {
            issues.push(ConfigIssue::new(
                "cursor.backend",
                format!("must be one of postgres, redis, memory, got {:?}", value),
            ));
        }
    }

    issues
}

impl Config {
    /// Load configuration from the environment, plus a file when given.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigLoadError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        let raw = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator("|")
                    .with_list_parse_key("generator.corpus"),
            )
            .build()?;

        Self::from_raw(raw)
    }

    /// Validate and deserialize already-layered values.
    pub fn from_raw(raw: config::Config) -> Result<Self, ConfigLoadError> {
        let issues = validate(&raw);
        if !issues.is_empty() {
            return Err(ConfigLoadError::Invalid(issues));
        }

        let cfg: Config = raw.try_deserialize()?;
        Ok(cfg)
    }
}
