//! Hash index hot-path benchmarks: insert throughput, lookup throughput on
//! a populated table, and probe-chain cost as load factor climbs.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use parking_lot::Mutex;
use samehada::common::Value;
use samehada::index::hash::HashIndex;
use samehada::storage::{DiskManager, DiskStore};
use samehada::BufferPoolManager;
use std::sync::Arc;
use tempfile::TempDir;

fn create_index(num_buckets: u32) -> (HashIndex, TempDir) {
    let dir = TempDir::new().unwrap();
    let dm = DiskManager::create(dir.path().join("bench.db"), dir.path().join("bench.log")).unwrap();
    let disk: Arc<Mutex<Box<dyn DiskStore>>> = Arc::new(Mutex::new(Box::new(dm)));
    let bpm = Arc::new(BufferPoolManager::new(256, disk));
    (HashIndex::create(bpm, num_buckets).unwrap(), dir)
}

fn bench_insert(c: &mut Criterion) {
    c.bench_function("hash_index_insert", |b| {
        b.iter_batched(
            || create_index(64),
            |(index, _dir)| {
                for i in 0..400i32 {
                    index.insert(&Value::integer(black_box(i)), i as u32).unwrap();
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

fn bench_lookup(c: &mut Criterion) {
    let (index, _dir) = create_index(64);
    for i in 0..400i32 {
        index.insert(&Value::integer(i), i as u32).unwrap();
    }

    c.bench_function("hash_index_lookup_hit", |b| {
        b.iter(|| {
            for i in (0..400i32).step_by(7) {
                black_box(index.lookup(&Value::integer(black_box(i))).unwrap());
            }
        });
    });
}

fn bench_load_factor(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_index_load_factor");

    for fill in [50usize, 200, 450] {
        group.bench_with_input(BenchmarkId::from_parameter(fill), &fill, |b, &fill| {
            let (index, _dir) = create_index(16);
            for i in 0..fill as i32 {
                index.insert(&Value::integer(i), i as u32).unwrap();
            }
            b.iter(|| {
                black_box(index.lookup(&Value::integer(black_box(fill as i32 / 2))).unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup, bench_load_factor);
criterion_main!(benches);
