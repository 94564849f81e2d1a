//! Throughput benchmarks for Relay.
//!
//! Measures the synchronous hot paths: registry operations, presence fan-out,
//! and addressed routing. Connections are bare handles whose outboxes are
//! drained between iterations.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relay_protocol::{Envelope, PresenceStatus};
use serde_json::json;
use std::sync::Arc;
use tenvis_relay_core::{ChannelScheme, ConnectionTable, MessageRouter, Presence, Registry};
use tenvis_relay_transport::{ConnectionHandle, Outbox};

struct Bench {
    registry: Arc<Registry>,
    connections: Arc<ConnectionTable>,
    presence: Arc<Presence>,
    outboxes: Vec<Outbox>,
}

fn setup(users: usize) -> Bench {
    let registry = Arc::new(Registry::new());
    let connections = Arc::new(ConnectionTable::new());
    let presence = Arc::new(Presence::new(registry.clone(), connections.clone()));

    let mut outboxes = Vec::with_capacity(users);
    for i in 0..users {
        let (handle, outbox) = ConnectionHandle::new(format!("conn-{i}").into());
        connections.insert(handle.clone());
        registry.register(&format!("user-{i}"), &handle).unwrap();
        outboxes.push(outbox);
    }

    Bench {
        registry,
        connections,
        presence,
        outboxes,
    }
}

fn drain(outboxes: &mut [Outbox]) {
    for outbox in outboxes {
        while outbox.try_recv().is_some() {}
    }
}

/// Benchmark registry operations.
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry");

    group.bench_function("register_new", |b| {
        let registry = Registry::new();
        let mut i = 0u64;
        b.iter(|| {
            let (handle, _outbox) = ConnectionHandle::new(format!("conn-{i}").into());
            i += 1;
            registry.register(black_box(&format!("user-{i}")), &handle).unwrap()
        });
    });

    group.bench_function("reregister_same_identity", |b| {
        let registry = Registry::new();
        let (handle, _outbox) = ConnectionHandle::new("conn-1".into());
        b.iter(|| registry.register(black_box("alice"), &handle).unwrap());
    });

    let bench = setup(10_000);
    group.bench_function("lookup_10k", |b| {
        b.iter(|| bench.registry.lookup(black_box("user-5000")))
    });
    group.bench_function("snapshot_10k", |b| b.iter(|| bench.registry.snapshot()));

    group.finish();
}

/// Benchmark presence broadcast fan-out.
fn bench_presence(c: &mut Criterion) {
    let mut group = c.benchmark_group("presence_announce");

    for users in [10, 100, 1000] {
        let mut bench = setup(users);
        group.throughput(Throughput::Elements(users as u64));
        group.bench_with_input(BenchmarkId::from_parameter(users), &users, |b, _| {
            b.iter(|| {
                let sent = bench.presence.announce(black_box("user-0"), PresenceStatus::Online);
                drain(&mut bench.outboxes);
                sent
            });
        });
        assert_eq!(bench.connections.len(), users);
    }

    group.finish();
}

/// Benchmark addressed routing.
fn bench_router(c: &mut Criterion) {
    let mut group = c.benchmark_group("router");
    let scheme = ChannelScheme::default();

    for users in [2, 1000] {
        let mut bench = setup(users);
        let router = MessageRouter::new(bench.registry.clone(), bench.presence.clone(), scheme.clone());
        let origin = bench.registry.lookup("user-0").unwrap().handle.id().clone();
        let data = json!({"user": "user-0", "messageId": 1, "text": "hello"});
        let envelope = Envelope::new(
            "chat.message",
            scheme.channel_for("user-1"),
            data.as_object().cloned().unwrap_or_default(),
        );

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("route_delivered", users), &users, |b, _| {
            b.iter(|| {
                let delivery = router.route_envelope(&origin, black_box(envelope.clone()));
                drain(&mut bench.outboxes[..2]);
                delivery
            });
        });
    }

    let bench = setup(2);
    let router = MessageRouter::new(bench.registry.clone(), bench.presence.clone(), scheme.clone());
    let origin = bench.registry.lookup("user-0").unwrap().handle.id().clone();
    let invalid = Envelope::new("chat.message", "nowhere", serde_json::Map::new());
    group.bench_function("route_invalid_channel", |b| {
        b.iter(|| router.route_envelope(&origin, black_box(invalid.clone())))
    });

    group.finish();
}

criterion_group!(benches, bench_registry, bench_presence, bench_router);
criterion_main!(benches);
