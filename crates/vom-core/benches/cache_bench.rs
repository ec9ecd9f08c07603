//! # Cache Benchmarks
//!
//! Performance benchmarks for vom-core cache and accessor paths.
//!
//! Run with: `cargo bench -p vom-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use vom_core::store::{RawState, store_state};
use vom_core::{
    Cache, CapData, InstanceKit, MemoryStore, Representative, State, VirtualObjectManager,
    VomConfig,
};

/// A store holding `count` one-property states `o+1/0 .. o+1/count`.
fn seeded_store(count: usize) -> MemoryStore {
    let mut store = MemoryStore::new();
    for i in 0..count {
        let mut raw = RawState::new();
        raw.insert(
            "n".to_string(),
            CapData {
                body: i.to_string(),
                slots: vec![],
            },
        );
        store_state(&mut store, &format!("o+1/{i}"), &raw).expect("seed");
    }
    store
}

/// `count` counter objects behind a cache of `cache_size`.
fn counters(cache_size: usize, count: usize) -> (VirtualObjectManager, Vec<Representative>) {
    let vom = VirtualObjectManager::new(MemoryStore::new(), VomConfig::with_cache_size(cache_size))
        .expect("manager");
    let kind = vom.make_kind(|state: State| {
        InstanceKit::new().with_init(move |_| state.set("n", 0))
    });
    let reps = (0..count).map(|_| kind.make(&[]).expect("make")).collect();
    (vom, reps)
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_lookup_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_hit");

    for size in [3, 32, 256].iter() {
        let mut store = seeded_store(*size);
        let mut cache = Cache::new(*size);
        let ids: Vec<String> = (0..*size).map(|i| format!("o+1/{i}")).collect();
        for id in &ids {
            cache.lookup(id, true, &mut store).expect("warm");
        }

        group.bench_with_input(BenchmarkId::from_parameter(size), &ids, |b, ids| {
            b.iter(|| {
                for id in ids {
                    black_box(cache.lookup(id, true, &mut store).expect("hit").is_resident());
                }
            });
        });
    }

    group.finish();
}

fn bench_lookup_thrash(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_thrash");

    for size in [3, 32, 256].iter() {
        let mut store = seeded_store(size * 2);
        let mut cache = Cache::new(*size);
        let ids: Vec<String> = (0..size * 2).map(|i| format!("o+1/{i}")).collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &ids, |b, ids| {
            b.iter(|| {
                for id in ids {
                    black_box(cache.lookup(id, true, &mut store).expect("miss").is_resident());
                }
            });
        });
    }

    group.finish();
}

fn bench_property_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("property_access");

    for (cache_size, count) in [(16, 8), (3, 8)].iter() {
        let (_vom, reps) = counters(*cache_size, *count);

        group.bench_with_input(
            BenchmarkId::new("get_set", format!("cache{cache_size}_objects{count}")),
            &reps,
            |b, reps| {
                b.iter(|| {
                    for rep in reps {
                        let n = rep.get("n").expect("get").as_int().unwrap_or(0);
                        rep.set("n", n.wrapping_add(1)).expect("set");
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction");

    for size in [10, 100].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| black_box(counters(3, size)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_lookup_hit,
    bench_lookup_thrash,
    bench_property_access,
    bench_construction,
);
criterion_main!(benches);
