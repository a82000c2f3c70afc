//! The ingestion loop: fetch, filter, persist, advance.
//!
//! ```text
//! INIT -> LOADING_CURSOR -> POLLING <-> PROCESSING
//!                 \
//!                  -> FAILED (cursor store unreadable at startup)
//! ```
//!
//! One tick drains up to `max_pages_per_tick` pages. For each page every
//! fresh event is offered to the sink in source order, then the cursor is
//! advanced. An insert failure is logged and the key is left out of the
//! processed set so a refetch retries it; it never blocks its siblings.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PollerConfig;
use crate::cursor::{Cursor, CursorStore};
use crate::dedup::ProcessedKeySet;
use crate::error::Result;
use crate::sink::{InsertOutcome, MessageSink};
use crate::source::EventSource;

const ORIGIN: &str = "poller";

/// Lifecycle of an [`EventPoller`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    Init,
    LoadingCursor,
    Polling,
    Processing,
    Failed,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub pages: u32,
    pub fetched: usize,
    /// Dropped by the processed key set without touching the sink
    pub deduplicated: usize,
    pub inserted: usize,
    pub already_present: usize,
    pub failed: usize,
    pub cursor_advanced: bool,
    pub cursor_persist_failed: bool,
    /// A later page could not be fetched; earlier pages were kept
    pub fetch_failed: bool,
}

/// Lifetime counters for the poller.
#[derive(Debug, Clone, Default)]
pub struct PollerStats {
    pub ticks: Arc<AtomicU64>,
    pub fetch_failures: Arc<AtomicU64>,
    pub inserted: Arc<AtomicU64>,
    pub insert_failures: Arc<AtomicU64>,
    pub cursor_persist_failures: Arc<AtomicU64>,
}

impl PollerStats {
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    pub fn inserted(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    pub fn insert_failures(&self) -> u64 {
        self.insert_failures.load(Ordering::Relaxed)
    }

    pub fn cursor_persist_failures(&self) -> u64 {
        self.cursor_persist_failures.load(Ordering::Relaxed)
    }
}

/// Drives ingestion from one event source into one sink.
pub struct EventPoller {
    source: Arc<dyn EventSource>,
    sink: Arc<dyn MessageSink>,
    cursor_store: Arc<dyn CursorStore>,
    config: PollerConfig,
    processed: ProcessedKeySet,
    current_cursor: Option<Cursor>,
    state: PollerState,
    stats: PollerStats,
}

impl EventPoller {
    pub fn new(
        source: Arc<dyn EventSource>,
        sink: Arc<dyn MessageSink>,
        cursor_store: Arc<dyn CursorStore>,
        config: PollerConfig,
    ) -> Self {
        Self {
            source,
            sink,
            cursor_store,
            config,
            processed: ProcessedKeySet::new(),
            current_cursor: None,
            state: PollerState::Init,
            stats: PollerStats::default(),
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn current_cursor(&self) -> Option<&Cursor> {
        self.current_cursor.as_ref()
    }

    pub fn processed(&self) -> &ProcessedKeySet {
        &self.processed
    }

    /// Shared handle to the counters; stays valid after `run` consumes the poller.
    pub fn stats(&self) -> PollerStats {
        self.stats.clone()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Startup
    // ─────────────────────────────────────────────────────────────────────────

    /// Read the stored cursor.
    ///
    /// A missing cursor starts from the beginning. Any other failure is fatal:
    /// starting from zero against an unknown error could re-ingest an
    /// unbounded history.
    pub async fn load_cursor(&mut self) -> Result<Option<Cursor>> {
        self.state = PollerState::LoadingCursor;

        match self.cursor_store.get().await {
            Ok(Some(cursor)) => {
                info!(
                    poller = %self.config.poller_id,
                    store = self.cursor_store.name(),
                    cursor = %cursor,
                    "Resuming from stored cursor"
                );
                self.current_cursor = Some(cursor);
            }
            Ok(None) => {
                info!(
                    poller = %self.config.poller_id,
                    store = self.cursor_store.name(),
                    "No stored cursor, starting from the beginning"
                );
                self.current_cursor = None;
            }
            Err(e) => {
                self.state = PollerState::Failed;
                e.log();
                return Err(e);
            }
        }

        self.state = PollerState::Polling;
        Ok(self.current_cursor.clone())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tick
    // ─────────────────────────────────────────────────────────────────────────

    /// Run one tick. Fails only when the first page cannot be fetched. A
    /// fetch failure on a later page ends the tick with `fetch_failed` set;
    /// the pages completed before it stay persisted and counted.
    pub async fn tick(&mut self) -> Result<TickReport> {
        let mut report = TickReport::default();
        let max_pages = self.config.max_pages_per_tick.max(1);

        loop {
            let batch = match self.source.fetch(self.current_cursor.as_ref()).await {
                Ok(batch) => batch,
                Err(e) => {
                    self.stats.fetch_failures.fetch_add(1, Ordering::Relaxed);
                    if report.pages == 0 {
                        return Err(e);
                    }
                    e.log();
                    report.fetch_failed = true;
                    break;
                }
            };
            report.pages += 1;
            report.fetched += batch.events.len();

            let fetched = batch.events.len();
            let fresh = self.processed.filter_new(batch.events);
            report.deduplicated += fetched - fresh.len();

            for event in fresh {
                let message = event.to_message();
                match self.sink.insert(&message).await {
                    Ok(outcome) => {
                        self.processed.insert(event.key);
                        match outcome {
                            InsertOutcome::Inserted => report.inserted += 1,
                            InsertOutcome::AlreadyPresent => report.already_present += 1,
                        }
                    }
                    Err(e) => {
                        report.failed += 1;
                        self.stats.insert_failures.fetch_add(1, Ordering::Relaxed);
                        metrics::counter!(
                            "chainchat_insert_failures_total",
                            "origin" => ORIGIN,
                            "retryable" => e.is_retryable().to_string()
                        )
                        .increment(1);

                        if e.is_retryable() {
                            warn!(key = %event.key, error = %e, "Insert failed, will retry if refetched");
                        } else {
                            error!(key = %event.key, error = %e, "Rejected malformed event");
                        }
                    }
                }
            }

            let advanced = self.advance_cursor(batch.next_cursor, &mut report).await;

            if !batch.has_next_page || !advanced || report.pages >= max_pages {
                break;
            }
        }

        self.stats.inserted.fetch_add(report.inserted as u64, Ordering::Relaxed);
        metrics::counter!("chainchat_events_fetched_total").increment(report.fetched as u64);
        metrics::counter!("chainchat_events_deduplicated_total")
            .increment(report.deduplicated as u64);
        metrics::counter!("chainchat_messages_inserted_total", "origin" => ORIGIN)
            .increment(report.inserted as u64);
        metrics::counter!("chainchat_messages_duplicate_total", "origin" => ORIGIN)
            .increment(report.already_present as u64);

        Ok(report)
    }

    /// Move to `next` if it is a new position. Returns whether it moved.
    ///
    /// A failed write is logged and the in-memory cursor moves anyway; the
    /// processed key set absorbs any refetch after a restart.
    async fn advance_cursor(&mut self, next: Option<Cursor>, report: &mut TickReport) -> bool {
        let next = match next {
            Some(next) if self.current_cursor.as_ref() != Some(&next) => next,
            _ => return false,
        };

        if let Err(e) = self.cursor_store.set(&next).await {
            report.cursor_persist_failed = true;
            self.stats.cursor_persist_failures.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("chainchat_cursor_persist_failures_total").increment(1);
            warn!(
                cursor = %next,
                store = self.cursor_store.name(),
                error = %e,
                "Failed to persist cursor, keeping in-memory position"
            );
        }

        debug!(cursor = %next, "Cursor advanced");
        self.current_cursor = Some(next);
        report.cursor_advanced = true;
        true
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Loop
    // ─────────────────────────────────────────────────────────────────────────

    /// Load the cursor (unless already loaded) and tick until `shutdown`.
    ///
    /// Ticks never overlap: a tick runs to completion before the timer is
    /// consulted again, and timer firings missed meanwhile are skipped.
    /// Cancellation is only observed between ticks.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        if self.state != PollerState::Polling {
            self.load_cursor().await?;
        }

        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            poller = %self.config.poller_id,
            source = self.source.name(),
            sink = self.sink.name(),
            interval_ms = self.config.interval_ms,
            "Event poller started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.run_tick().await;
        }

        info!(
            poller = %self.config.poller_id,
            ticks = self.stats.ticks(),
            inserted = self.stats.inserted(),
            "Event poller stopped"
        );
        Ok(())
    }

    async fn run_tick(&mut self) {
        self.state = PollerState::Processing;
        let started = Instant::now();

        let outcome = match self.tick().await {
            Ok(report) => {
                if report.inserted > 0 || report.failed > 0 || report.fetch_failed {
                    info!(
                        pages = report.pages,
                        inserted = report.inserted,
                        failed = report.failed,
                        deduplicated = report.deduplicated,
                        fetch_failed = report.fetch_failed,
                        "Poll tick processed events"
                    );
                }
                if report.failed > 0 || report.fetch_failed {
                    "partial"
                } else {
                    "ok"
                }
            }
            Err(e) => {
                e.log();
                "fetch_failed"
            }
        };

        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("chainchat_poll_ticks_total", "outcome" => outcome).increment(1);
        metrics::histogram!("chainchat_poll_tick_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        self.state = PollerState::Polling;
    }
}
