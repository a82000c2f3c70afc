//! Real-time delivery of newly inserted messages to in-process subscribers.
//!
//! Provides:
//! - Callback registration keyed by [`SubscriptionId`]
//! - Snapshot-then-deliver notify passes
//! - Per-callback panic isolation
//! - Statistics and metrics
//!
//! Delivery is best effort. Subscribers that were not registered when a
//! message was inserted never see it.

mod change_feed;

pub use change_feed::PgChangeFeed;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::error::IngestError;
use crate::message::ChatMessage;

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A subscriber callback. Fire-and-forget from the fanout's point of view.
pub type Callback = Arc<dyn Fn(&ChatMessage) + Send + Sync>;

/// Outcome of one notify pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: usize,
    pub panicked: usize,
}

/// Statistics about the fanout.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FanoutStats {
    pub subscribers: usize,
    pub total_notifications: u64,
    pub total_delivered: u64,
    pub total_panicked: u64,
}

/// Registry of subscriber callbacks.
pub struct RealtimeFanout {
    /// Registration order is delivery order within a pass
    subscribers: RwLock<Vec<(SubscriptionId, Callback)>>,
    total_notifications: AtomicU64,
    total_delivered: AtomicU64,
    total_panicked: AtomicU64,
}

impl Default for RealtimeFanout {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeFanout {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            total_notifications: AtomicU64::new(0),
            total_delivered: AtomicU64::new(0),
            total_panicked: AtomicU64::new(0),
        }
    }

    /// Register a callback and return its fresh id.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        let count = {
            let mut subscribers = self.subscribers.write();
            subscribers.push((id, Arc::new(callback)));
            subscribers.len()
        };
        metrics::gauge!("chainchat_fanout_subscribers").set(count as f64);
        debug!(subscription = %id, subscribers = count, "Subscriber registered");
        id
    }

    /// Remove a registration. Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers.write();
            let before = subscribers.len();
            subscribers.retain(|(sid, _)| *sid != id);
            (subscribers.len() != before, subscribers.len())
        };
        if removed {
            metrics::gauge!("chainchat_fanout_subscribers").set(count as f64);
            debug!(subscription = %id, subscribers = count, "Subscriber removed");
        }
        removed
    }

    /// Deliver `message` to every subscriber registered when the pass starts.
    ///
    /// The registry lock is released before any callback runs, so callbacks
    /// may subscribe or unsubscribe freely.
    pub fn notify(&self, message: &ChatMessage) -> NotifyReport {
        let snapshot: Vec<(SubscriptionId, Callback)> = self.subscribers.read().clone();

        let mut report = NotifyReport::default();
        for (id, callback) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| callback(message))) {
                Ok(()) => report.delivered += 1,
                Err(payload) => {
                    report.panicked += 1;
                    let detail = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    IngestError::subscriber_panicked(
                        id,
                        format!("{} while delivering {}", detail, message.key()),
                    )
                    .log();
                }
            }
        }

        self.total_notifications.fetch_add(1, Ordering::Relaxed);
        self.total_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.total_panicked
            .fetch_add(report.panicked as u64, Ordering::Relaxed);
        metrics::counter!("chainchat_fanout_deliveries_total").increment(report.delivered as u64);
        if report.panicked > 0 {
            metrics::counter!("chainchat_fanout_callback_panics_total")
                .increment(report.panicked as u64);
        }

        report
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn stats(&self) -> FanoutStats {
        FanoutStats {
            subscribers: self.subscriber_count(),
            total_notifications: self.total_notifications.load(Ordering::Relaxed),
            total_delivered: self.total_delivered.load(Ordering::Relaxed),
            total_panicked: self.total_panicked.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::testing::CapturingRecorder;
    use parking_lot::Mutex;

    fn message(seq: u64) -> ChatMessage {
        ChatMessage {
            source_digest: "digest".to_string(),
            sequence: seq,
            created_at: Utc::now(),
            sender_address: "0x1".to_string(),
            text: format!("msg {}", seq),
        }
    }

    #[test]
    fn test_subscribe_returns_unique_ids() {
        let fanout = RealtimeFanout::new();
        let a = fanout.subscribe(|_| {});
        let b = fanout.subscribe(|_| {});
        assert_ne!(a, b);
        assert_eq!(fanout.subscriber_count(), 2);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let fanout = RealtimeFanout::new();
        let id = fanout.subscribe(|_| {});
        assert!(fanout.unsubscribe(id));
        assert!(!fanout.unsubscribe(id));
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let fanout = RealtimeFanout::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        fanout.subscribe(move |m| s.lock().push(("before", m.sequence)));
        fanout.subscribe(|_| panic!("subscriber bug"));
        let s = seen.clone();
        fanout.subscribe(move |m| s.lock().push(("after", m.sequence)));

        let report = fanout.notify(&message(1));

        assert_eq!(report, NotifyReport { delivered: 2, panicked: 1 });
        assert_eq!(*seen.lock(), vec![("before", 1), ("after", 1)]);
        assert_eq!(fanout.stats().total_panicked, 1);
    }

    #[test]
    fn test_callback_panic_is_counted_as_error() {
        let fanout = RealtimeFanout::new();
        fanout.subscribe(|_| panic!("subscriber bug"));

        let recorder = CapturingRecorder::default();
        metrics::with_local_recorder(&recorder, || fanout.notify(&message(1)));

        assert_eq!(recorder.error_codes(), vec!["SubscriberPanicked".to_string()]);
    }

    #[test]
    fn test_per_subscriber_order_matches_notify_order() {
        let fanout = RealtimeFanout::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        fanout.subscribe(move |m| s.lock().push(m.sequence));

        for seq in 0..5 {
            fanout.notify(&message(seq));
        }
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_unsubscribe_during_notify_keeps_snapshot() {
        let fanout = Arc::new(RealtimeFanout::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let victim: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        // First subscriber removes the second one mid-pass
        let f = fanout.clone();
        let v = victim.clone();
        let s = seen.clone();
        fanout.subscribe(move |_| {
            s.lock().push("remover");
            if let Some(id) = *v.lock() {
                f.unsubscribe(id);
            }
        });
        let s = seen.clone();
        let id = fanout.subscribe(move |_| s.lock().push("victim"));
        *victim.lock() = Some(id);

        fanout.notify(&message(1));
        assert_eq!(*seen.lock(), vec!["remover", "victim"]);

        // The next pass no longer sees the removed subscriber
        fanout.notify(&message(2));
        assert_eq!(*seen.lock(), vec!["remover", "victim", "remover"]);
        assert_eq!(fanout.subscriber_count(), 1);
    }
}
