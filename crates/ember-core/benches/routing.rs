//! Routing benchmarks for ember-core.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ember_core::{
    ChannelKey, ConnectionHandle, MemoryStore, MessageRouter, NewMessage, RouterConfig,
};
use std::sync::Arc;

fn bench_presence_lookup(c: &mut Criterion) {
    let router = MessageRouter::new(Arc::new(MemoryStore::new()), RouterConfig::default());
    let mut receivers = Vec::new();
    for i in 0..1_000 {
        // Left out of the connection table so registration does not fan out.
        let (handle, rx) = ConnectionHandle::new(format!("conn-{i}").as_str().into());
        router.presence().register(&format!("user-{i}"), handle);
        receivers.push(rx);
    }

    c.bench_function("presence_lookup_1000", |b| {
        b.iter(|| router.presence().lookup(black_box("user-500")))
    });
}

fn bench_channel_key(c: &mut Criterion) {
    c.bench_function("channel_key_between", |b| {
        b.iter(|| ChannelKey::between(black_box("6650b1f0a3"), black_box("6650b1e9c2")))
    });
}

fn bench_send(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let router = MessageRouter::new(Arc::new(MemoryStore::new()), RouterConfig::default());
    let (alice, mut alice_rx) = ConnectionHandle::new("alice-conn".into());
    let (bob, mut bob_rx) = ConnectionHandle::new("bob-conn".into());
    router.connections().insert(alice.clone());
    router.connections().insert(bob.clone());
    router.presence().register("alice", alice.clone());
    router.presence().register("bob", bob);

    c.bench_function("send_direct", |b| {
        b.iter(|| {
            runtime
                .block_on(router.send(alice.id(), NewMessage::new("alice", "bob", "x".repeat(64))))
                .unwrap();
            let _ = alice_rx.try_recv();
            let _ = bob_rx.try_recv();
        })
    });
}

criterion_group!(benches, bench_presence_lookup, bench_channel_key, bench_send);
criterion_main!(benches);
