//! Synthetic chat traffic on a Poisson schedule.
//!
//! Inter-arrival times are drawn as `-mean_wait_ms * ln(U)`, `U ~ Uniform(0, 1)`,
//! with `mean_wait_ms = 60_000 / messages_per_minute`. The loop ticks at a
//! fixed short granularity and emits when the time since the last emission
//! reaches the current draw. Messages go through the regular [`MessageSink`].

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::GeneratorConfig;
use crate::error::{ErrorCode, IngestError, Result};
use crate::message::ChatMessage;
use crate::sink::{InMemoryMessageSink, InsertOutcome, MessageSink};

const ORIGIN: &str = "generator";

/// Used when the configured corpus is empty.
pub const FALLBACK_TEXT: &str = "gm";

/// Built-in message texts.
pub const DEFAULT_CORPUS: &[&str] = &[
    "gm",
    "gn",
    "wagmi",
    "anyone around?",
    "just bridged over, hello everyone",
    "what's the gas like today",
    "ser, this is a chat",
    "checkpoint finality feels instant",
    "who's building this weekend?",
    "lfg",
];

// ═══════════════════════════════════════════════════════════════════════════════
// Schedule
// ═══════════════════════════════════════════════════════════════════════════════

/// Exponential inter-arrival sampler.
#[derive(Debug)]
pub struct PoissonSchedule {
    mean_wait_ms: f64,
    rng: StdRng,
}

impl PoissonSchedule {
    pub fn new(mean_wait_ms: f64, rng: StdRng) -> Self {
        Self { mean_wait_ms, rng }
    }

    /// Build from a target rate. The rate must be finite and positive.
    pub fn from_rate(messages_per_minute: f64, seed: Option<u64>) -> Result<Self> {
        if !messages_per_minute.is_finite() || messages_per_minute <= 0.0 {
            return Err(IngestError::new(
                ErrorCode::InvalidConfiguration,
                format!("messages_per_minute must be positive, got {}", messages_per_minute),
            ));
        }

        Ok(Self::new(60_000.0 / messages_per_minute, seeded_rng(seed)))
    }

    pub fn mean_wait_ms(&self) -> f64 {
        self.mean_wait_ms
    }

    /// Draw the next wait in milliseconds. Uncapped.
    pub fn sample(&mut self) -> f64 {
        loop {
            // gen::<f64>() is in [0, 1); zero would give an infinite wait
            let u: f64 = self.rng.gen();
            if u > 0.0 {
                return -self.mean_wait_ms * u.ln();
            }
        }
    }
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Generator
// ═══════════════════════════════════════════════════════════════════════════════

/// What a generator tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorTick {
    /// Not due yet
    Idle,
    Emitted(InsertOutcome),
    /// Insert failed; the next wait was resampled anyway
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct GeneratorStats {
    pub emitted: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
}

impl GeneratorStats {
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Fabricates messages on a Poisson schedule.
pub struct SyntheticLoadGenerator {
    sink: Arc<dyn MessageSink>,
    schedule: PoissonSchedule,
    /// Drives message content, kept apart from the schedule's stream
    content_rng: StdRng,
    corpus: Vec<String>,
    tick: Duration,
    last_emission: Instant,
    next_wait_ms: f64,
    stats: GeneratorStats,
}

impl SyntheticLoadGenerator {
    pub fn new(sink: Arc<dyn MessageSink>, config: &GeneratorConfig) -> Result<Self> {
        if config.tick_ms == 0 {
            return Err(IngestError::new(
                ErrorCode::InvalidConfiguration,
                "generator.tick_ms must be a positive integer",
            ));
        }

        let mut schedule = PoissonSchedule::from_rate(config.messages_per_minute, config.seed)?;
        let next_wait_ms = schedule.sample();
        let corpus = match &config.corpus {
            Some(corpus) => corpus.clone(),
            None => DEFAULT_CORPUS.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            sink,
            schedule,
            content_rng: seeded_rng(config.seed.map(|s| s.wrapping_add(1))),
            corpus,
            tick: Duration::from_millis(config.tick_ms),
            last_emission: Instant::now(),
            next_wait_ms,
            stats: GeneratorStats::default(),
        })
    }

    /// Measure the first wait from `start` instead of construction time.
    pub fn starting_at(mut self, start: Instant) -> Self {
        self.last_emission = start;
        self
    }

    pub fn stats(&self) -> GeneratorStats {
        self.stats.clone()
    }

    pub fn next_wait_ms(&self) -> f64 {
        self.next_wait_ms
    }

    /// Run one tick as of `now`.
    pub async fn tick_at(&mut self, now: Instant) -> GeneratorTick {
        let elapsed_ms = now.saturating_duration_since(self.last_emission).as_secs_f64() * 1000.0;
        if elapsed_ms < self.next_wait_ms {
            return GeneratorTick::Idle;
        }

        let message = self.synthesize();
        let result = self.sink.insert(&message).await;

        // Resample whatever the insert did
        self.last_emission = now;
        self.next_wait_ms = self.schedule.sample();

        match result {
            Ok(outcome) => {
                self.stats.emitted.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("chainchat_messages_inserted_total", "origin" => ORIGIN)
                    .increment(1);
                debug!(key = %message.key(), next_wait_ms = self.next_wait_ms, "Synthetic message emitted");
                GeneratorTick::Emitted(outcome)
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(
                    "chainchat_insert_failures_total",
                    "origin" => ORIGIN,
                    "retryable" => e.is_retryable().to_string()
                )
                .increment(1);
                warn!(error = %e, "Synthetic insert failed");
                GeneratorTick::Failed
            }
        }
    }

    fn synthesize(&mut self) -> ChatMessage {
        let sender: [u8; 32] = self.content_rng.gen();
        let digest: [u8; 32] = self.content_rng.gen();
        let text = if self.corpus.is_empty() {
            FALLBACK_TEXT.to_string()
        } else {
            let idx = self.content_rng.gen_range(0..self.corpus.len());
            self.corpus[idx].clone()
        };

        ChatMessage {
            source_digest: format!("synthetic-{}", hex::encode(digest)),
            sequence: 0,
            created_at: chrono::Utc::now(),
            sender_address: format!("0x{}", hex::encode(sender)),
            text,
        }
    }

    /// Tick at the configured granularity until `shutdown`.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.last_emission = Instant::now();

        info!(
            tick_ms = self.tick.as_millis() as u64,
            mean_wait_ms = self.schedule.mean_wait_ms(),
            sink = self.sink.name(),
            "Synthetic load generator started"
        );

        loop {
            let now = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                now = ticker.tick() => now,
            };
            self.tick_at(now).await;
        }

        info!(
            emitted = self.stats.emitted(),
            failed = self.stats.failed(),
            "Synthetic load generator stopped"
        );
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Simulation
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of a simulated generator run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub duration_ms: u64,
    pub tick_ms: u64,
    pub ticks: u64,
    pub emitted: u64,
    /// `duration / mean_wait`
    pub expected: f64,
}

/// Drive a generator over `duration_ms` of simulated time against an
/// in-memory sink, without sleeping.
pub async fn simulate(config: &GeneratorConfig, duration_ms: u64) -> Result<SimulationReport> {
    let sink = Arc::new(InMemoryMessageSink::new());
    let start = Instant::now();
    let mut generator = SyntheticLoadGenerator::new(sink.clone(), config)?.starting_at(start);
    let expected = duration_ms as f64 / generator.schedule.mean_wait_ms();

    let mut ticks = 0;
    let mut t = config.tick_ms;
    while t <= duration_ms {
        generator.tick_at(start + Duration::from_millis(t)).await;
        ticks += 1;
        t += config.tick_ms;
    }

    Ok(SimulationReport {
        duration_ms,
        tick_ms: config.tick_ms,
        ticks,
        emitted: sink.len() as u64,
        expected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AlwaysFailingSink;

    #[async_trait]
    impl MessageSink for AlwaysFailingSink {
        async fn insert(&self, _message: &ChatMessage) -> Result<InsertOutcome> {
            Err(IngestError::insert_failed("pool exhausted"))
        }

        async fn recent(&self, _limit: usize) -> Result<Vec<ChatMessage>> {
            Ok(Vec::new())
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_sample_mean_converges() {
        let mut schedule = PoissonSchedule::from_rate(30.0, Some(7)).unwrap();
        assert_eq!(schedule.mean_wait_ms(), 2000.0);

        let n = 100_000;
        let samples: Vec<f64> = (0..n).map(|_| schedule.sample()).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;

        assert!((mean - 2000.0).abs() < 2000.0 * 0.02, "mean was {}", mean);
        assert!(samples.iter().all(|s| *s >= 0.0 && s.is_finite()));
    }

    #[test]
    fn test_sample_density_decreases() {
        let mut schedule = PoissonSchedule::from_rate(60.0, Some(11)).unwrap();
        let mut buckets = [0u32; 4];
        for _ in 0..100_000 {
            let s = schedule.sample();
            let b = (s / 500.0) as usize;
            if b < buckets.len() {
                buckets[b] += 1;
            }
        }
        assert!(buckets.windows(2).all(|w| w[0] > w[1]), "buckets: {:?}", buckets);
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let err = PoissonSchedule::from_rate(rate, None).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
        }
    }

    #[tokio::test]
    async fn test_simulated_ten_minutes_at_thirty_per_minute() {
        let config = GeneratorConfig::new(100, 30.0).with_seed(42);
        let report = simulate(&config, 600_000).await.unwrap();

        assert_eq!(report.ticks, 6_000);
        assert_eq!(report.expected, 300.0);
        assert!(
            (240..=360).contains(&report.emitted),
            "emitted {} messages",
            report.emitted
        );
    }

    #[tokio::test]
    async fn test_insert_failure_still_resamples() {
        let config = GeneratorConfig::new(10, 6_000.0).with_seed(3);
        let start = Instant::now();
        let mut generator = SyntheticLoadGenerator::new(Arc::new(AlwaysFailingSink), &config)
            .unwrap()
            .starting_at(start);

        let first_wait = generator.next_wait_ms();
        let due = start + Duration::from_millis(first_wait.ceil() as u64);
        assert_eq!(generator.tick_at(due).await, GeneratorTick::Failed);
        assert_ne!(generator.next_wait_ms(), first_wait);
        assert_eq!(generator.stats().failed(), 1);

        // The clock restarts from the failed attempt
        let later = due + Duration::from_millis(generator.next_wait_ms().ceil() as u64);
        assert_eq!(generator.tick_at(later).await, GeneratorTick::Failed);
        assert_eq!(generator.stats().failed(), 2);
    }

    #[tokio::test]
    async fn test_empty_corpus_falls_back() {
        let mut config = GeneratorConfig::new(10, 60.0).with_seed(5);
        config.corpus = Some(Vec::new());
        let sink = Arc::new(InMemoryMessageSink::new());
        let start = Instant::now();
        let mut generator = SyntheticLoadGenerator::new(sink.clone(), &config)
            .unwrap()
            .starting_at(start);

        let due = start + Duration::from_millis(generator.next_wait_ms().ceil() as u64);
        assert_eq!(
            generator.tick_at(due).await,
            GeneratorTick::Emitted(InsertOutcome::Inserted)
        );

        let stored = sink.messages();
        assert_eq!(stored[0].text, FALLBACK_TEXT);
        assert!(stored[0].sender_address.starts_with("0x"));
        assert_eq!(stored[0].sender_address.len(), 66);
    }

    #[tokio::test]
    async fn test_idle_before_due() {
        let config = GeneratorConfig::new(10, 1.0).with_seed(9);
        let start = Instant::now();
        let mut generator =
            SyntheticLoadGenerator::new(Arc::new(InMemoryMessageSink::new()), &config)
                .unwrap()
                .starting_at(start);

        let wait = generator.next_wait_ms();
        if wait >= 2.0 {
            let early = start + Duration::from_millis((wait / 2.0) as u64);
            assert_eq!(generator.tick_at(early).await, GeneratorTick::Idle);
        }
    }
}
