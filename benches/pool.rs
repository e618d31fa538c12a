use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use repool::{AcquireRequest, PoolConfig, PoolCoordinator, ResourceKind, ShapeHint};

/// Benchmark pooled acquire/release against unpooled construction.
fn bench_acquire_release(c: &mut Criterion) {
    let engine = PoolCoordinator::new(PoolConfig {
        warm_on_init: true,
        ..Default::default()
    })
    .unwrap();

    let mut group = c.benchmark_group("acquire_release");
    group.throughput(Throughput::Elements(1));

    group.bench_function("pooled_buffer", |b| {
        b.iter(|| {
            let lease = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());
            black_box(&*lease);
            engine.release(lease);
        })
    });

    group.bench_function("pooled_message", |b| {
        b.iter(|| {
            let lease = engine.acquire(ResourceKind::Message, ShapeHint::message(8, 512));
            black_box(&*lease);
            engine.release(lease);
        })
    });

    group.bench_function("unpooled_buffer", |b| {
        b.iter(|| {
            let buf = bytes::BytesMut::with_capacity(8192);
            black_box(&buf);
        })
    });

    group.finish();
}

/// Benchmark the overflow chain when the pool is pinned at its ceiling.
fn bench_overflow_fallback(c: &mut Criterion) {
    let engine = PoolCoordinator::new(PoolConfig {
        max_pool_size: 1,
        ..Default::default()
    })
    .unwrap();

    // Pin the pool at its ceiling so every further checkout overflows.
    let _held = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());

    let mut group = c.benchmark_group("overflow");
    group.throughput(Throughput::Elements(1));

    group.bench_function("fallback_construction", |b| {
        b.iter(|| {
            let lease = engine.acquire(ResourceKind::Buffer, ShapeHint::empty());
            black_box(&*lease);
            engine.release(lease);
        })
    });

    group.finish();
}

/// Benchmark header-name interning through the bounded cache.
fn bench_header_interning(c: &mut Criterion) {
    let engine = PoolCoordinator::new(PoolConfig {
        warm_on_init: true,
        ..Default::default()
    })
    .unwrap();

    let mut group = c.benchmark_group("header_cache");
    group.throughput(Throughput::Elements(1));

    group.bench_function("intern_hot_name", |b| {
        b.iter(|| {
            let name = engine.intern_header(black_box(b"Content-Type"));
            black_box(name);
        })
    });

    group.finish();
}

fn bench_stats_snapshot(c: &mut Criterion) {
    let engine = PoolCoordinator::new(PoolConfig::default()).unwrap();
    for _ in 0..100 {
        let lease = engine.acquire(ResourceKind::Message, ShapeHint::message(4, 256));
        engine.release(lease);
    }

    c.bench_function("stats_snapshot", |b| {
        b.iter(|| {
            let stats = engine.stats();
            black_box(stats);
        })
    });
}

fn bench_acquire_with_priority(c: &mut Criterion) {
    let engine = PoolCoordinator::new(PoolConfig::default()).unwrap();

    c.bench_function("acquire_with_options", |b| {
        b.iter(|| {
            let checkout = engine.acquire_with(
                ResourceKind::Stream,
                AcquireRequest::new(ShapeHint::buffer(1024)),
            );
            match checkout {
                repool::Checkout::Ready(lease) => engine.release(lease),
                repool::Checkout::Queued(_) => {}
            }
        })
    });
}

criterion_group!(
    benches,
    bench_acquire_release,
    bench_overflow_fallback,
    bench_header_interning,
    bench_stats_snapshot,
    bench_acquire_with_priority
);
criterion_main!(benches);
