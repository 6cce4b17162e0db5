//! Benchmarks for the bounded LRU cache
//!
//! Hits take the read lock only; misses that insert take the write lock and
//! may evict.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use std::thread;
use taskforge::BoundedCache;

fn filled_cache(capacity: usize) -> BoundedCache<u64> {
    let cache = BoundedCache::new(capacity).unwrap();
    for i in 0..capacity as u64 {
        cache.set(format!("key-{}", i), i);
    }
    cache
}

fn bench_cache_hit(c: &mut Criterion) {
    let cache = filled_cache(1024);

    c.bench_function("cache_get_hit", |b| {
        b.iter(|| cache.get(black_box("key-512")))
    });
}

fn bench_cache_set_evicting(c: &mut Criterion) {
    let cache = filled_cache(1024);
    let keys: Vec<String> = (0..4096).map(|i| format!("fresh-{}", i)).collect();
    let mut next = 0usize;

    // Every insert is a new key, so every insert evicts
    c.bench_function("cache_set_evicting", |b| {
        b.iter(|| {
            let key = keys[next % keys.len()].clone();
            next += 1;
            cache.set(black_box(key), black_box(next as u64))
        })
    });
}

fn bench_cache_contended_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_contended_get");

    for readers in [1usize, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(readers), &readers, |b, &readers| {
            let cache = Arc::new(filled_cache(1024));
            b.iter(|| {
                let handles: Vec<_> = (0..readers)
                    .map(|r| {
                        let cache = Arc::clone(&cache);
                        thread::spawn(move || {
                            for i in 0..1000u64 {
                                black_box(cache.get(&format!("key-{}", (i * 7 + r as u64) % 1024)));
                            }
                        })
                    })
                    .collect();
                for h in handles {
                    h.join().unwrap();
                }
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cache_hit,
    bench_cache_set_evicting,
    bench_cache_contended_reads
);
criterion_main!(benches);
