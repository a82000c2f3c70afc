//! Error handling for the ingestion pipeline.
//!
//! Every failure in this crate is an [`IngestError`] carrying a machine-readable
//! [`ErrorCode`]. Codes decide three things the loops care about:
//!
//! - whether the failure is transient ([`ErrorCode::is_retryable`])
//! - how loudly it is logged ([`ErrorSeverity`])
//! - which metric bucket it lands in ([`ErrorCode::category`])
//!
//! Steady-state loops (poller, generator, fanout) log and continue; only
//! startup code propagates an `IngestError` out of `main`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use chainchat_core::error::{ErrorCode, ErrorContext, Result};
//!
//! fn load() -> Result<String> {
//!     std::fs::read_to_string("cursor.json")
//!         .with_error_code(ErrorCode::CursorReadFailed)
//! }
//! ```

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, IngestError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Event source (1000-1099)
    SourceUnavailable,
    SourceTimeout,
    SourceMalformedResponse,

    // Message sink (1100-1199)
    InsertFailed,
    MalformedMessage,
    DuplicateRecord,

    // Cursor store (1200-1299)
    CursorReadFailed,
    CursorPersistFailed,
    CursorCorrupt,

    // Storage (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,
    CacheError,
    CacheConnectionFailed,

    // Serialization (2200-2299)
    SerializationError,
    DeserializationError,

    // Fanout (3000-3099)
    SubscriberPanicked,
    ChangeFeedUnavailable,

    // Configuration (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::SourceUnavailable => 1000,
            Self::SourceTimeout => 1001,
            Self::SourceMalformedResponse => 1002,

            Self::InsertFailed => 1100,
            Self::MalformedMessage => 1101,
            Self::DuplicateRecord => 1102,

            Self::CursorReadFailed => 1200,
            Self::CursorPersistFailed => 1201,
            Self::CursorCorrupt => 1202,

            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,
            Self::CacheError => 2002,
            Self::CacheConnectionFailed => 2003,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::SubscriberPanicked => 3000,
            Self::ChangeFeedUnavailable => 3001,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
        }
    }

    /// Transient failures that are expected to clear on a later tick.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable
                | Self::SourceTimeout
                | Self::InsertFailed
                | Self::CursorReadFailed
                | Self::CursorPersistFailed
                | Self::DatabaseError
                | Self::DatabaseConnectionFailed
                | Self::CacheError
                | Self::CacheConnectionFailed
                | Self::ChangeFeedUnavailable
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "source",
            1100..=1199 => "sink",
            1200..=1299 => "cursor",
            2000..=2099 => "storage",
            2200..=2299 => "serialization",
            3000..=3099 => "fanout",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Expected noise (duplicates, bad records from upstream)
    Low,
    /// Transient operational issues
    Medium,
    /// Storage or serialization faults
    High,
    /// The process cannot run correctly
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::DuplicateRecord | ErrorCode::MalformedMessage => Self::Low,

            ErrorCode::SourceUnavailable
            | ErrorCode::SourceTimeout
            | ErrorCode::InsertFailed
            | ErrorCode::CursorPersistFailed
            | ErrorCode::CacheError
            | ErrorCode::ChangeFeedUnavailable
            | ErrorCode::SubscriberPanicked => Self::Medium,

            ErrorCode::SourceMalformedResponse
            | ErrorCode::CursorReadFailed
            | ErrorCode::DatabaseError
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError => Self::High,

            ErrorCode::CursorCorrupt
            | ErrorCode::DatabaseConnectionFailed
            | ErrorCode::CacheConnectionFailed
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration
            | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for the pipeline.
#[derive(Error, Debug)]
pub struct IngestError {
    /// Machine-readable error code
    code: ErrorCode,

    /// Short description, safe to print to operators
    message: Cow<'static, str>,

    /// Detailed message (driver output, offending payload, ...)
    internal_message: Option<String>,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " ({})", internal)?;
        }
        Ok(())
    }
}

impl IngestError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and message.
    pub fn new(code: ErrorCode, message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            message: message.into(),
            internal_message: None,
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both a short and a detailed message.
    pub fn with_internal(
        code: ErrorCode,
        message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// The event source could not be reached.
    pub fn source_unavailable(detail: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::SourceUnavailable, "Event source unavailable", detail)
    }

    /// The event source answered with something we cannot interpret.
    pub fn malformed_response(detail: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::SourceMalformedResponse,
            "Event source returned a malformed response",
            detail,
        )
    }

    /// A message failed validation and will never insert as-is.
    pub fn malformed_message(detail: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::MalformedMessage, "Message is malformed", detail)
    }

    /// A transient insert failure.
    pub fn insert_failed(detail: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InsertFailed, "Failed to insert message", detail)
    }

    /// The stored cursor could not be read.
    pub fn cursor_read(detail: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::CursorReadFailed, "Failed to read cursor", detail)
    }

    /// The cursor could not be written.
    pub fn cursor_persist(detail: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::CursorPersistFailed, "Failed to persist cursor", detail)
    }

    /// The stored cursor could not be decoded.
    pub fn cursor_corrupt(detail: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::CursorCorrupt, "Stored cursor is corrupt", detail)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    /// A subscriber callback panicked during a fanout pass.
    pub fn subscriber_panicked(subscription: impl fmt::Display, detail: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::SubscriberPanicked,
            format!("Subscriber {} panicked", subscription),
            detail,
        )
    }

    /// Wrap a database error under `code` instead of its classified code.
    ///
    /// The error is counted once, under `code`.
    pub fn from_database(error: sqlx::Error, code: ErrorCode) -> Self {
        let (_, message, internal) = classify_sqlx(&error);
        Self::with_internal(code, message, internal).with_source(error)
    }

    /// Wrap a redis error under `code` instead of its classified code.
    pub fn from_cache(error: redis::RedisError, code: ErrorCode) -> Self {
        let (_, message) = classify_redis(&error);
        Self::with_internal(code, message, error.to_string()).with_source(error)
    }

    /// The code a database error converts to by default.
    pub fn database_code(error: &sqlx::Error) -> ErrorCode {
        classify_sqlx(error).0
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }


    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Get the error severity.
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    retryable = self.is_retryable(),
                    message = %self.message,
                    internal_message = ?self.internal_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    message = %self.message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "chainchat_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "retryable" => self.is_retryable().to_string(),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Wrap the error as an internal error with the given message.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Wrap the error with a specific code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| IngestError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| IngestError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| IngestError::internal(message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| IngestError::new(code, "Value not present"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

fn classify_sqlx(error: &sqlx::Error) -> (ErrorCode, &'static str, String) {
    let (code, msg) = match error {
        sqlx::Error::Database(db_err) => {
            if db_err.is_unique_violation() {
                return (
                    ErrorCode::DuplicateRecord,
                    "A record with this identity already exists",
                    db_err.constraint().unwrap_or("unique").to_string(),
                );
            }
            if matches!(
                db_err.kind(),
                sqlx::error::ErrorKind::CheckViolation | sqlx::error::ErrorKind::NotNullViolation
            ) {
                (ErrorCode::MalformedMessage, "Record rejected by a table constraint")
            } else {
                (ErrorCode::DatabaseError, "A database error occurred")
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
            ErrorCode::DatabaseConnectionFailed,
            "Unable to connect to the database",
        ),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => (
            ErrorCode::DeserializationError,
            "Failed to decode a database row",
        ),
        _ => (ErrorCode::DatabaseError, "A database error occurred"),
    };
    (code, msg, error.to_string())
}

fn classify_redis(error: &redis::RedisError) -> (ErrorCode, &'static str) {
    if error.is_connection_refusal() || error.is_connection_dropped() {
        (ErrorCode::CacheConnectionFailed, "Unable to connect to redis")
    } else if error.is_timeout() {
        (ErrorCode::CacheError, "Redis operation timed out")
    } else {
        (ErrorCode::CacheError, "A redis error occurred")
    }
}

impl From<sqlx::Error> for IngestError {
    fn from(error: sqlx::Error) -> Self {
        let (code, msg, internal) = classify_sqlx(&error);
        Self::with_internal(code, msg, internal).with_source(error)
    }
}

impl From<redis::RedisError> for IngestError {
    fn from(error: redis::RedisError) -> Self {
        let (code, msg) = classify_redis(&error);
        Self::with_internal(code, msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<reqwest::Error> for IngestError {
    fn from(error: reqwest::Error) -> Self {
        let (code, msg) = if error.is_timeout() {
            (ErrorCode::SourceTimeout, "Event source request timed out")
        } else if error.is_connect() {
            (ErrorCode::SourceUnavailable, "Failed to connect to event source")
        } else if error.is_decode() {
            (
                ErrorCode::SourceMalformedResponse,
                "Event source returned an undecodable body",
            )
        } else if let Some(status) = error.status() {
            if status.is_server_error() || status.as_u16() == 429 {
                (ErrorCode::SourceUnavailable, "Event source is temporarily unavailable")
            } else {
                (
                    ErrorCode::SourceMalformedResponse,
                    "Event source rejected the request",
                )
            }
        } else {
            (ErrorCode::SourceUnavailable, "Network error talking to event source")
        };

        Self::with_internal(code, msg, error.to_string()).with_source(error)
    }
}

impl From<base64::DecodeError> for IngestError {
    fn from(error: base64::DecodeError) -> Self {
        Self::cursor_corrupt(error.to_string()).with_source(error)
    }
}

impl From<config::ConfigError> for IngestError {
    fn from(error: config::ConfigError) -> Self {
        let (code, msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::CapturingRecorder;

    #[test]
    fn test_error_code_is_retryable() {
        assert!(ErrorCode::SourceUnavailable.is_retryable());
        assert!(ErrorCode::InsertFailed.is_retryable());
        assert!(ErrorCode::CursorPersistFailed.is_retryable());
        assert!(!ErrorCode::MalformedMessage.is_retryable());
        assert!(!ErrorCode::SourceMalformedResponse.is_retryable());
        assert!(!ErrorCode::InvalidConfiguration.is_retryable());
    }

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::SourceTimeout.category(), "source");
        assert_eq!(ErrorCode::DuplicateRecord.category(), "sink");
        assert_eq!(ErrorCode::CursorCorrupt.category(), "cursor");
        assert_eq!(ErrorCode::SubscriberPanicked.category(), "fanout");
        assert_eq!(ErrorCode::MissingConfiguration.category(), "configuration");
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::MalformedMessage),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::InsertFailed),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::DatabaseError),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::CursorCorrupt),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_error_context() {
        let io: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"));
        let err = io.with_error_code(ErrorCode::CursorReadFailed).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CursorReadFailed);
        assert!(err.message().contains("disk on fire"));

        let none: Option<u8> = None;
        let err = none.context("missing").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[test]
    fn test_from_database_counts_under_given_code() {
        let recorder = CapturingRecorder::default();
        let err = metrics::with_local_recorder(&recorder, || {
            IngestError::from_database(sqlx::Error::PoolTimedOut, ErrorCode::CursorReadFailed)
        });

        assert_eq!(err.code(), ErrorCode::CursorReadFailed);
        assert_eq!(err.message(), "Unable to connect to the database");
        assert_eq!(recorder.error_codes(), vec!["CursorReadFailed".to_string()]);
    }

    #[test]
    fn test_database_code_classification() {
        assert_eq!(
            IngestError::database_code(&sqlx::Error::PoolTimedOut),
            ErrorCode::DatabaseConnectionFailed
        );
        assert_eq!(
            IngestError::database_code(&sqlx::Error::RowNotFound),
            ErrorCode::DatabaseError
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let err: IngestError = serde_json::from_str::<u64>("\"nope\"").unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::DeserializationError);
    }

    #[test]
    fn test_error_display() {
        let error = IngestError::with_internal(
            ErrorCode::DatabaseError,
            "Database connection failed",
            "Connection refused: localhost:5432",
        );

        let display = format!("{}", error);
        assert!(display.contains("DatabaseError"));
        assert!(display.contains("Database connection failed"));
        assert!(display.contains("Connection refused"));
    }
}
