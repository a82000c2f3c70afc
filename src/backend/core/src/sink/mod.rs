//! Message sinks: durable, idempotent storage for chat messages.
//!
//! Inserting a message whose `(source_digest, sequence)` is already stored is
//! a success ([`InsertOutcome::AlreadyPresent`]), never an error and never a
//! second record. That guarantee lives in the storage layer; the poller's
//! in-process key set only saves round trips.

mod memory;
mod notifying;
mod postgres;

pub use memory::InMemoryMessageSink;
pub use notifying::NotifyingSink;
pub use postgres::PgMessageSink;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::message::ChatMessage;

/// What an insert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    /// A new record was created
    Inserted,
    /// A record with the same identity already existed
    AlreadyPresent,
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted)
    }
}

/// Contract for message storage.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Persist one message, idempotently on its identity.
    ///
    /// Errors are classified by [`crate::error::IngestError::is_retryable`]:
    /// transient I/O is retryable, malformed input is not.
    async fn insert(&self, message: &ChatMessage) -> Result<InsertOutcome>;

    /// Read side: the most recent `limit` messages, oldest first.
    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>>;

    /// Get the sink name.
    fn name(&self) -> &'static str;
}
