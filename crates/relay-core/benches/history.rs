//! History benchmarks for relay-core.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use relay_core::{ChatHistory, ChatMessage, HistoryAggregator, MemoryChatHistory};
use std::sync::Arc;

fn message(id: u64, channel: &str) -> ChatMessage {
    ChatMessage::new(id, channel, "u1", "Alice", "hello, world")
}

fn seeded(channels: &[&str], per_channel: u64) -> Arc<MemoryChatHistory> {
    let history = Arc::new(MemoryChatHistory::new());
    let mut id = 0;
    for _ in 0..per_channel {
        for channel in channels {
            id += 1;
            history.append(channel, message(id, channel));
        }
    }
    history
}

fn bench_append(c: &mut Criterion) {
    c.bench_function("append", |b| {
        let history = MemoryChatHistory::new();
        let mut id = 0;
        b.iter(|| {
            id += 1;
            history.append("home", black_box(message(id, "home")));
        })
    });
}

fn bench_recent(c: &mut Criterion) {
    let mut group = c.benchmark_group("recent");

    for size in [1_000u64, 100_000] {
        let history = seeded(&["home"], size);
        group.bench_with_input(BenchmarkId::new("tail_100", size), &size, |b, &size| {
            b.iter(|| history.recent("home", black_box(Some(size / 2)), Some(100)))
        });
    }

    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let channels = ["a", "b", "c", "d"];
    let history = seeded(&channels, 10_000);
    let aggregator = HistoryAggregator::new(history);

    c.bench_function("aggregate_4_channels", |b| {
        b.iter(|| aggregator.query(black_box(&channels), Some(0), Some(100)))
    });
}

criterion_group!(benches, bench_append, bench_recent, bench_aggregate);
criterion_main!(benches);
