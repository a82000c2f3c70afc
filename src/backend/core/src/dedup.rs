//! Process-local record of event keys already handed to the sink.

use std::collections::HashSet;

use crate::message::{LedgerEvent, MessageKey};

/// Keys successfully persisted during this process lifetime.
///
/// Grows monotonically and is lost on restart. It only spares the sink
/// redundant calls; the sink's own idempotency is what prevents duplicates.
#[derive(Debug, Default, Clone)]
pub struct ProcessedKeySet {
    keys: HashSet<MessageKey>,
}

impl ProcessedKeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &MessageKey) -> bool {
        self.keys.contains(key)
    }

    /// Record a key. Returns `false` if it was already present.
    pub fn insert(&mut self, key: MessageKey) -> bool {
        self.keys.insert(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Events not yet processed, in their original order.
    pub fn filter_new(&self, events: Vec<LedgerEvent>) -> Vec<LedgerEvent> {
        events
            .into_iter()
            .filter(|event| !self.contains(&event.key))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(digest: &str, seq: u64) -> LedgerEvent {
        LedgerEvent {
            key: MessageKey::new(digest, seq),
            timestamp: Utc::now(),
            sender: "0x1".to_string(),
            text: "t".to_string(),
        }
    }

    #[test]
    fn test_filter_new_keeps_order() {
        let mut seen = ProcessedKeySet::new();
        seen.insert(MessageKey::new("B", 0));

        let fresh = seen.filter_new(vec![event("A", 0), event("B", 0), event("C", 1), event("A", 1)]);
        let keys: Vec<String> = fresh.iter().map(|e| e.key.to_string()).collect();
        assert_eq!(keys, vec!["A:0", "C:1", "A:1"]);
    }

    #[test]
    fn test_insert_reports_repeats() {
        let mut seen = ProcessedKeySet::new();
        assert!(seen.insert(MessageKey::new("A", 0)));
        assert!(!seen.insert(MessageKey::new("A", 0)));
        // Same digest, different sequence is a different event
        assert!(seen.insert(MessageKey::new("A", 1)));
        assert_eq!(seen.len(), 2);
    }
}
