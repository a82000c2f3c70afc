#![allow(clippy::result_large_err)]
//! # Chainchat Core
//!
//! Ingests on-chain chat events into PostgreSQL and fans new messages out to
//! live subscribers.
//!
//! ## Architecture
//!
//! - **Poller**: fixed-interval ticks that fetch, deduplicate, persist and advance a resumable cursor
//! - **Cursor stores**: one slot per poller in PostgreSQL, Redis or memory
//! - **Sinks**: idempotent message storage keyed on `(source_digest, sequence)`
//! - **Fanout**: subscriber callbacks fed by a Postgres change stream or directly by inserts
//! - **Generator**: synthetic traffic on a Poisson schedule through the same sink
//! - **Telemetry**: structured logging, OpenTelemetry tracing and Prometheus metrics

pub mod config;
pub mod cursor;
pub mod db;
pub mod dedup;
pub mod error;
pub mod fanout;
pub mod generator;
pub mod message;
pub mod poller;
pub mod shutdown;
pub mod sink;
pub mod source;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use error::{ErrorCode, ErrorContext, ErrorSeverity, IngestError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, ConfigIssue, ConfigLoadError};
    pub use crate::cursor::{Cursor, CursorRecord, CursorStore, InMemoryCursorStore, PgCursorStore, RedisCursorStore};
    pub use crate::dedup::ProcessedKeySet;
    pub use crate::error::{ErrorCode, ErrorContext, ErrorSeverity, IngestError, Result};
    pub use crate::fanout::{FanoutStats, PgChangeFeed, RealtimeFanout, SubscriptionId};
    pub use crate::generator::{PoissonSchedule, SyntheticLoadGenerator};
    pub use crate::message::{ChatMessage, LedgerEvent, MessageKey};
    pub use crate::poller::{EventPoller, PollerState, TickReport};
    pub use crate::sink::{InMemoryMessageSink, InsertOutcome, MessageSink, NotifyingSink, PgMessageSink};
    pub use crate::source::{EventBatch, EventSource, InMemoryEventSource, JsonRpcEventSource};
}
