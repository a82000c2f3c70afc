//! In-memory message sink.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{InsertOutcome, MessageSink};
use crate::error::Result;
use crate::message::{ChatMessage, MessageKey};

#[derive(Debug, Default)]
struct Inner {
    keys: HashSet<MessageKey>,
    messages: Vec<ChatMessage>,
}

/// Process-local sink with the same identity semantics as the database.
#[derive(Debug, Default)]
pub struct InMemoryMessageSink {
    inner: RwLock<Inner>,
    insert_calls: AtomicU64,
}

impl InMemoryMessageSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored message in insertion order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.read().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().messages.is_empty()
    }

    /// Number of times `insert` has been called, whatever the outcome.
    pub fn insert_calls(&self) -> u64 {
        self.insert_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageSink for InMemoryMessageSink {
    async fn insert(&self, message: &ChatMessage) -> Result<InsertOutcome> {
        self.insert_calls.fetch_add(1, Ordering::Relaxed);
        message.validate()?;

        let mut inner = self.inner.write();
        if !inner.keys.insert(message.key()) {
            return Ok(InsertOutcome::AlreadyPresent);
        }
        inner.messages.push(message.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ChatMessage>> {
        let inner = self.inner.read();
        let start = inner.messages.len().saturating_sub(limit);
        Ok(inner.messages[start..].to_vec())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
