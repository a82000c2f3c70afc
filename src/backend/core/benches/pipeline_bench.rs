//! Benchmarks for the hot paths of a poll tick and a fanout pass.
use chainchat_core::cursor::Cursor;
use chainchat_core::dedup::ProcessedKeySet;
use chainchat_core::fanout::RealtimeFanout;
use chainchat_core::message::{ChatMessage, LedgerEvent, MessageKey};
use chainchat_core::sink::{InMemoryMessageSink, MessageSink};
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn event(seq: u64) -> LedgerEvent {
    LedgerEvent {
        key: MessageKey::new(format!("digest-{}", seq / 4), seq),
        timestamp: Utc::now(),
        sender: "0x00000000000000000000000000000000000000000000000000000000000000aa".to_string(),
        text: "gm".to_string(),
    }
}

fn message(seq: u64) -> ChatMessage {
    event(seq).to_message()
}

fn bench_fanout_notify(c: &mut Criterion) {
    let mut group = c.benchmark_group("fanout_notify");
    for subscribers in [1, 10, 100, 1_000] {
        let fanout = RealtimeFanout::new();
        let counter = Arc::new(AtomicU64::new(0));
        for _ in 0..subscribers {
            let counter = counter.clone();
            fanout.subscribe(move |_| {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        let msg = message(1);
        group.throughput(Throughput::Elements(subscribers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(subscribers), &msg, |b, m| {
            b.iter(|| black_box(fanout.notify(m)));
        });
    }
    group.finish();
}

fn bench_dedup_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedup_filter_new");
    for seen in [1_000u64, 100_000] {
        let mut keys = ProcessedKeySet::new();
        for seq in 0..seen {
            keys.insert(MessageKey::new(format!("digest-{}", seq / 4), seq));
        }
        // Half of each page already seen
        let page: Vec<LedgerEvent> = (seen - 25..seen + 25).map(event).collect();
        group.throughput(Throughput::Elements(page.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(seen), &page, |b, p| {
            b.iter(|| black_box(keys.filter_new(p.clone())));
        });
    }
    group.finish();
}

fn bench_cursor_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("cursor_codec");
    let cursor = Cursor::new("9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin", 42);
    let encoded = cursor.encode().unwrap();
    group.bench_function("encode", |b| b.iter(|| black_box(cursor.encode().unwrap())));
    group.bench_function("decode", |b| b.iter(|| black_box(Cursor::decode(&encoded).unwrap())));
    group.finish();
}

fn bench_memory_sink_insert(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("memory_sink_insert");
    group.bench_function("redelivered", |b| {
        let sink = InMemoryMessageSink::new();
        let msg = message(7);
        rt.block_on(sink.insert(&msg)).unwrap();
        b.to_async(&rt).iter(|| async { black_box(sink.insert(&msg).await.unwrap()) });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_fanout_notify,
    bench_dedup_filter,
    bench_cursor_codec,
    bench_memory_sink_insert
);
criterion_main!(benches);
