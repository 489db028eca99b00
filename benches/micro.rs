//! Microbenchmarks: write path, point reads, scans.

use criterion::{Criterion, criterion_group, criterion_main};
use stratadb::{Engine, IterOptions, Options, SyncMode};
use tempfile::TempDir;

fn write_options() -> Options {
    Options {
        // Benchmarks measure the pipeline, not the disk.
        wal_sync: SyncMode::None,
        ..Options::default()
    }
}

fn bench_sequential_writes(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), write_options()).unwrap();
    let mut i = 0u64;
    c.bench_function("set_sequential", |b| {
        b.iter(|| {
            let key = format!("key-{i:012}");
            engine.set(key.as_bytes(), b"value-payload-64-bytes").unwrap();
            i += 1;
        })
    });
    engine.close().unwrap();
}

fn bench_batched_writes(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), write_options()).unwrap();
    let mut i = 0u64;
    c.bench_function("apply_batch_100", |b| {
        b.iter(|| {
            let mut batch = engine.new_batch();
            for _ in 0..100 {
                let key = format!("key-{i:012}");
                batch.set(key.as_bytes(), b"value");
                i += 1;
            }
            engine.apply(&mut batch, None).unwrap();
        })
    });
    engine.close().unwrap();
}

fn bench_point_reads(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), write_options()).unwrap();
    for i in 0..10_000u64 {
        engine
            .set(format!("key-{i:08}").as_bytes(), b"value")
            .unwrap();
    }
    engine.flush().unwrap();

    let mut i = 0u64;
    c.bench_function("get_hit", |b| {
        b.iter(|| {
            let key = format!("key-{:08}", i % 10_000);
            assert!(engine.get(key.as_bytes()).unwrap().is_some());
            i += 1;
        })
    });
    c.bench_function("get_miss", |b| {
        b.iter(|| {
            assert!(engine.get(b"absent-key").unwrap().is_none());
        })
    });
    engine.close().unwrap();
}

fn bench_scans(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let engine = Engine::open(tmp.path(), write_options()).unwrap();
    for i in 0..10_000u64 {
        engine
            .set(format!("key-{i:08}").as_bytes(), b"value")
            .unwrap();
    }
    engine.flush().unwrap();

    c.bench_function("scan_1k", |b| {
        b.iter(|| {
            let mut it = engine.new_iter(IterOptions::default()).unwrap();
            it.first();
            let mut n = 0;
            while it.valid() && n < 1000 {
                n += 1;
                it.next();
            }
            assert_eq!(n, 1000);
        })
    });
    engine.close().unwrap();
}

criterion_group!(
    benches,
    bench_sequential_writes,
    bench_batched_writes,
    bench_point_reads,
    bench_scans
);
criterion_main!(benches);
