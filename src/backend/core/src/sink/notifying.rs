//! Sink decorator that feeds the fanout directly.

use async_trait::async_trait;
use std::sync::Arc;

use super::{InsertOutcome, MessageSink};
use crate::error::Result;
use crate::fanout::RealtimeFanout;
use crate::message::ChatMessage;

/// Wraps a sink and notifies subscribers after each fresh insert.
///
/// Used when no database change stream is feeding the fanout. Redelivered
/// messages ([`InsertOutcome::AlreadyPresent`]) are not announced again.
pub struct NotifyingSink {
    inner: Arc<dyn MessageSink>,
    fanout: Arc<RealtimeFanout>,
}

impl NotifyingSink {
    pub fn new(inner: Arc<dyn MessageSink>, fanout: Arc<RealtimeFanout>) -> Self {
        Self { inner, fanout }
    }
}

#[async_trait]
impl MessageSink for NotifyingSink {
    async fn insert(&self, message: &ChatMessage) -> Result<InsertOutcome> {
        let outcome = self.inner.insert(message).await?;
        if outcome.is_inserted() {
            self.fanout.notify(message);
        }
        Ok(outcome)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>> {
        self.inner.recent(limit).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
