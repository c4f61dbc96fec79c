//! Buffer pool hot-path benchmarks: pin/unpin under clock replacement and
//! eviction churn once the pool is oversubscribed.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use parking_lot::Mutex;
use samehada::buffer::BufferPoolManager;
use samehada::storage::{DiskManager, DiskStore};
use std::sync::Arc;
use tempfile::TempDir;

fn create_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, TempDir) {
    let dir = TempDir::new().unwrap();
    let dm = DiskManager::create(dir.path().join("bench.db"), dir.path().join("bench.log")).unwrap();
    let disk: Arc<Mutex<Box<dyn DiskStore>>> = Arc::new(Mutex::new(Box::new(dm)));
    (Arc::new(BufferPoolManager::new(pool_size, disk)), dir)
}

fn bench_new_page_fetch_roundtrip(c: &mut Criterion) {
    let (bpm, _dir) = create_bpm(64);
    c.bench_function("new_page_then_fetch", |b| {
        b.iter(|| {
            let page_id = {
                let guard = bpm.new_page().unwrap();
                guard.page_id()
            };
            let guard = bpm.fetch_page_read(black_box(page_id)).unwrap();
            black_box(guard.page_id());
        });
    });
}

fn bench_clock_eviction(c: &mut Criterion) {
    let mut group = c.benchmark_group("clock_eviction");

    for pool_size in [8usize, 32, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(pool_size), &pool_size, |b, &pool_size| {
            let (bpm, _dir) = create_bpm(pool_size);
            let page_ids: Vec<_> = (0..pool_size)
                .map(|_| bpm.new_page().unwrap().page_id())
                .collect();

            b.iter(|| {
                // Touch more distinct pages than frames to force eviction
                // on every pass.
                for _ in 0..4 {
                    let guard = bpm.new_page().unwrap();
                    black_box(guard.page_id());
                }
                for &pid in &page_ids {
                    if let Ok(guard) = bpm.fetch_page_read(pid) {
                        black_box(guard.page_id());
                    }
                }
            });
        });
    }

    group.finish();
}

fn bench_flush_all(c: &mut Criterion) {
    let (bpm, _dir) = create_bpm(256);
    for _ in 0..200 {
        let mut guard = bpm.new_page().unwrap();
        guard.as_mut_slice()[0] = 1;
    }

    c.bench_function("flush_all_pages", |b| {
        b.iter(|| {
            bpm.flush_all_pages().unwrap();
        });
    });
}

criterion_group!(benches, bench_new_page_fetch_roundtrip, bench_clock_eviction, bench_flush_all);
criterion_main!(benches);
