//! Dispatch throughput benchmarks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use rotor_core::dispatch::{RingBufferDispatcher, WaitStrategy};
use rotor_core::{event_fn, typed_fn, Dispatcher, Event, Reactor, Selector};

fn bench_inline_notify(c: &mut Criterion) {
    let reactor = Reactor::new();
    let count = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&count);
    reactor.on(
        Selector::exact("bench"),
        event_fn(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        }),
    );

    c.bench_function("notify_inline", |b| {
        b.iter(|| reactor.notify("bench", Event::wrap(1u64)).unwrap());
    });
}

fn bench_inline_notify_fanout(c: &mut Criterion) {
    let reactor = Reactor::new();
    for _ in 0..8 {
        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&count);
        reactor.on(
            Selector::exact("bench"),
            event_fn(move |_| {
                seen.fetch_add(1, Ordering::Relaxed);
            }),
        );
    }

    c.bench_function("notify_inline_fanout_8", |b| {
        b.iter(|| reactor.notify("bench", Event::wrap(1u64)).unwrap());
    });
}

fn bench_typed_invocation(c: &mut Criterion) {
    let reactor = Reactor::new();
    let count = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&count);
    reactor.on(
        Selector::exact("bench"),
        typed_fn::<u64, _>(move |n| {
            seen.fetch_add(*n, Ordering::Relaxed);
        }),
    );

    c.bench_function("notify_typed_payload", |b| {
        b.iter(|| reactor.notify("bench", Event::wrap(1u64)).unwrap());
    });
}

fn bench_prepared_notify(c: &mut Criterion) {
    let reactor = Reactor::new();
    let count = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&count);
    reactor.on(
        Selector::exact("bench"),
        event_fn(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        }),
    );
    let prepared = reactor.prepare("bench");

    c.bench_function("notify_prepared", |b| {
        b.iter(|| prepared.notify(Event::wrap(1u64)).unwrap());
    });
}

fn bench_ring_dispatch(c: &mut Criterion) {
    let dispatcher = Arc::new(RingBufferDispatcher::new(8192, WaitStrategy::Yield));
    let reactor = Reactor::with_dispatcher(Arc::clone(&dispatcher));
    let count = Arc::new(AtomicU64::new(0));
    let seen = Arc::clone(&count);
    reactor.on(
        Selector::exact("bench"),
        event_fn(move |_| {
            seen.fetch_add(1, Ordering::Relaxed);
        }),
    );

    c.bench_function("notify_ring_yield", |b| {
        b.iter(|| reactor.notify("bench", Event::wrap(1u64)).unwrap());
    });

    dispatcher.shutdown();
}

criterion_group!(
    benches,
    bench_inline_notify,
    bench_inline_notify_fanout,
    bench_typed_invocation,
    bench_prepared_notify,
    bench_ring_dispatch
);
criterion_main!(benches);
