//! Performance benchmarks for the sync engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use livesync::{
    fetch_fn, ChannelConnection, DeltaQueue, PublicationOptions, SyncEngine, SyncRecord, User,
};
use serde_json::json;
use tokio::runtime::Builder;

fn record(id: u64, revision: u64) -> SyncRecord {
    SyncRecord::from_value(json!({"id": id, "revision": revision, "type": "fiction"})).unwrap()
}

/// Benchmark merging changes into a queue with a varying number of distinct keys
fn bench_queue_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_merge");

    for keys in [10u64, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("keys", keys), &keys, |b, &keys| {
            let records: Vec<_> = (0..10_000).map(|i| record(i % keys, i)).collect();
            b.iter(|| {
                let mut queue = DeltaQueue::new();
                for record in &records {
                    queue.merge(record.clone());
                }
                black_box(queue.len());
            });
        });
    }

    group.finish();
}

/// Benchmark a full emit cycle: snapshot the queue, then acknowledge it
fn bench_queue_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_round_trip");

    for pending in [10u64, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("pending", pending),
            &pending,
            |b, &pending| {
                let records: Vec<_> = (0..pending).map(|i| record(i, 1)).collect();
                b.iter(|| {
                    let mut queue = DeltaQueue::new();
                    for record in &records {
                        queue.merge(record.clone());
                    }
                    let batch = queue.snapshot();
                    black_box(queue.acknowledge(&batch));
                });
            },
        );
    }

    group.finish();
}

/// Benchmark dispatching one change across many subscriptions
fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    for subscriptions in [10usize, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("subscriptions", subscriptions),
            &subscriptions,
            |b, &count| {
                let runtime = Builder::new_current_thread().enable_all().build().unwrap();
                let _guard = runtime.enter();

                let engine = SyncEngine::default();
                engine
                    .publish(
                        "magazines",
                        fetch_fn(|_, _, _| async { Ok(json!([])) }),
                        ["MAGAZINE"],
                        PublicationOptions::default(),
                    )
                    .unwrap();

                let (connection, mut deliveries) = ChannelConnection::new();
                let user = User::new("bench", "tenant");
                for i in 0..count {
                    let kind = if i % 2 == 0 { "fiction" } else { "business" };
                    let params = json!({ "type": kind }).as_object().cloned().unwrap();
                    engine
                        .subscribe(&user, connection.clone(), None, "magazines", params)
                        .unwrap();
                }

                // Initial batches stay unacknowledged, so changes only queue up
                let pending: Vec<_> = runtime.block_on(async {
                    let mut pending = Vec::with_capacity(count);
                    for _ in 0..count {
                        pending.extend(deliveries.recv().await);
                    }
                    pending
                });

                let mut revision = 0u64;
                b.iter(|| {
                    revision += 1;
                    engine
                        .notify_change(
                            "MAGAZINE",
                            json!({"id": revision % 100, "revision": revision, "type": "fiction"}),
                        )
                        .unwrap();
                });

                drop(pending);
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_merge,
    bench_queue_round_trip,
    bench_dispatch,
);

criterion_main!(benches);
