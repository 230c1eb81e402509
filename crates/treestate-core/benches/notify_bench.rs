//! Benchmarks for notification fan-out and path canonicalization.
//!
//! Run with: cargo bench -p treestate-core -- notify

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::rc::Rc;

use treestate_core::path::{PathCache, PathKey, Segment, canonicalize};
use treestate_core::registry::{Registry, WorkingSet};
use treestate_core::{Listener, NotificationBatch};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A registry with `entries` top-level keys, each with a three-level subtree
/// of subscribed fields.
fn populated_registry(entries: u64) -> Registry {
    let mut registry = Registry::new();
    for i in 0..entries {
        let listener = Listener::new(|| {});
        for identity in [
            format!("entry{i}"),
            format!("entry{i}.profile"),
            format!("entry{i}.profile.name"),
            format!("entry{i}.profile.age"),
            format!("entry{i}.roles.0"),
        ] {
            let identity: Rc<str> = Rc::from(identity);
            registry.subscribe(&identity, &listener);
            // A second listener per identity so sets are not trivially small.
            registry.subscribe(&identity, &Listener::new(|| {}));
        }
    }
    registry
}

// ---------------------------------------------------------------------------
// 1. Fan-out resolution for a leaf write
// ---------------------------------------------------------------------------

fn bench_resolve_leaf(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify/resolve_leaf");

    for count in [100u64, 1_000, 10_000] {
        group.throughput(Throughput::Elements(1));
        let registry = populated_registry(count);
        let target: Rc<str> = Rc::from(format!("entry{}.profile.name", count / 2));

        group.bench_with_input(BenchmarkId::from_parameter(count), &(), |b, _| {
            b.iter(|| {
                let batch = NotificationBatch::new().with_path(Rc::clone(&target));
                black_box(batch.resolve(&registry).len())
            })
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 2. Fan-out resolution for a top-level write (descendant range scan)
// ---------------------------------------------------------------------------

fn bench_resolve_root(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify/resolve_root");

    for count in [100u64, 1_000, 10_000] {
        let registry = populated_registry(count);
        let target = format!("entry{}", count / 2);

        group.bench_with_input(BenchmarkId::from_parameter(count), &(), |b, _| {
            b.iter(|| {
                let mut out = WorkingSet::new();
                registry.collect_path(&target, &mut out);
                black_box(out.len())
            })
        });
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// 3. Canonicalization: cached vs uncached
// ---------------------------------------------------------------------------

fn bench_canonicalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("notify/canonicalize");
    let key = PathKey::Sequence(vec![
        Segment::from("user"),
        Segment::from("profile"),
        Segment::from("addresses"),
        Segment::Index(3),
        Segment::from("street"),
    ]);

    group.bench_function("uncached", |b| {
        b.iter(|| black_box(canonicalize(black_box(&key))))
    });

    let mut cache = PathCache::new();
    group.bench_function("cached", |b| {
        b.iter(|| black_box(cache.resolve(black_box(&key))))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_resolve_leaf,
    bench_resolve_root,
    bench_canonicalize
);
criterion_main!(benches);
