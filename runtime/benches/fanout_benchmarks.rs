//! Fan-out benchmarks: local delivery cost per event
//!
//! Run with: `cargo bench --bench fanout_benchmarks`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used, clippy::unwrap_used)] // Benchmarks can use expect for setup

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use relay_core::{Event, ProcessId};
use relay_runtime::{Admission, ConnectionRegistry, RegistryConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Benchmark Fixtures
// ============================================================================

fn registry_with(sessions: usize, channel: &str) -> (ConnectionRegistry, Vec<Admission>) {
    let registry = ConnectionRegistry::new(RegistryConfig::default().with_session_buffer(1 << 16));
    let admissions = (0..sessions)
        .map(|_| {
            let session = registry.admit().expect("admit");
            registry.subscribe(session.id, channel);
            session
        })
        .collect();
    (registry, admissions)
}

// ============================================================================
// Benchmarks
// ============================================================================

/// Deliver one event to N subscribers of one channel
fn bench_deliver_local(c: &mut Criterion) {
    let mut group = c.benchmark_group("deliver_local");
    group.measurement_time(Duration::from_secs(5));

    for sessions in [1_usize, 100, 1000] {
        let (registry, mut admissions) = registry_with(sessions, "room");
        let event = Arc::new(Event::new(ProcessId::new(), "room", json!({ "n": 1 })));

        group.bench_with_input(BenchmarkId::from_parameter(sessions), &sessions, |b, _| {
            b.iter(|| {
                let report = registry.deliver_local(black_box(&event));
                // Keep queues from filling so every iteration measures delivery
                for admission in &mut admissions {
                    while admission.outbound.try_recv().is_ok() {}
                }
                report
            });
        });
    }

    group.finish();
}

/// Deliver to a channel nobody listens on (the common case for busy buses)
fn bench_deliver_unsubscribed(c: &mut Criterion) {
    let (registry, _admissions) = registry_with(1000, "room");
    let event = Arc::new(Event::new(ProcessId::new(), "elsewhere", json!(null)));

    c.bench_function("deliver_unsubscribed_channel", |b| {
        b.iter(|| registry.deliver_local(black_box(&event)));
    });
}

/// Encode and decode the bus envelope
fn bench_envelope_codec(c: &mut Criterion) {
    let event = Event::new(ProcessId::new(), "room", json!({ "text": "hello", "n": 42 }));

    c.bench_function("envelope_encode_decode", |b| {
        b.iter(|| {
            let bytes = black_box(&event).encode().unwrap();
            Event::decode(&bytes).unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_deliver_local,
    bench_deliver_unsubscribed,
    bench_envelope_codec,
);
criterion_main!(benches);
