//! An append-only ledger held in memory.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{EventBatch, EventSource};
use crate::cursor::Cursor;
use crate::error::{IngestError, Result};
use crate::message::LedgerEvent;

/// Serves events in append order, paging like a real ledger: the cursor is the
/// key of the last event returned, and an empty page carries no cursor.
#[derive(Debug)]
pub struct InMemoryEventSource {
    log: RwLock<Vec<LedgerEvent>>,
    page_limit: usize,
}

impl InMemoryEventSource {
    pub fn new(page_limit: usize) -> Self {
        Self {
            log: RwLock::new(Vec::new()),
            page_limit: page_limit.max(1),
        }
    }

    /// Append an event to the ledger.
    pub fn push(&self, event: LedgerEvent) {
        self.log.write().push(event);
    }

    pub fn len(&self) -> usize {
        self.log.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.read().is_empty()
    }
}

fn cursor_of(event: &LedgerEvent) -> Cursor {
    Cursor::new(event.key.source_digest.clone(), event.key.sequence)
}

#[async_trait]
impl EventSource for InMemoryEventSource {
    async fn fetch(&self, cursor: Option<&Cursor>) -> Result<EventBatch> {
        let log = self.log.read();

        let start = match cursor {
            None => 0,
            Some(cursor) => {
                let pos = log
                    .iter()
                    .position(|e| cursor_of(e) == *cursor)
                    .ok_or_else(|| {
                        IngestError::malformed_response(format!("unknown cursor {}", cursor))
                    })?;
                pos + 1
            }
        };

        let end = (start + self.page_limit).min(log.len());
        let events: Vec<LedgerEvent> = log[start..end].to_vec();
        let next_cursor = events.last().map(cursor_of);

        Ok(EventBatch {
            events,
            next_cursor,
            has_next_page: end < log.len(),
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKey;
    use chrono::Utc;

    fn event(digest: &str, seq: u64) -> LedgerEvent {
        LedgerEvent {
            key: MessageKey::new(digest, seq),
            timestamp: Utc::now(),
            sender: "0x1".to_string(),
            text: format!("{}-{}", digest, seq),
        }
    }

    #[tokio::test]
    async fn test_pages_in_order() {
        let source = InMemoryEventSource::new(2);
        for i in 0..5 {
            source.push(event("tx", i));
        }

        let first = source.fetch(None).await.unwrap();
        assert_eq!(first.events.len(), 2);
        assert!(first.has_next_page);
        assert_eq!(first.next_cursor, Some(Cursor::new("tx", 1)));

        let second = source.fetch(first.next_cursor.as_ref()).await.unwrap();
        assert_eq!(second.events[0].key, MessageKey::new("tx", 2));

        let last = source.fetch(Some(&Cursor::new("tx", 4))).await.unwrap();
        assert!(last.events.is_empty());
        assert!(last.next_cursor.is_none());
        assert!(!last.has_next_page);
    }

    #[tokio::test]
    async fn test_unknown_cursor_is_an_error() {
        let source = InMemoryEventSource::new(10);
        source.push(event("tx", 0));
        assert!(source.fetch(Some(&Cursor::new("other", 0))).await.is_err());
    }
}
