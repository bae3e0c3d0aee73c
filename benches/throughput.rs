//! Throughput benchmarks for ShardKV
//!
//! Covers the raw store, the collection types, the expiry sweep, and the
//! cost the journal adds to each write.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use shardkv::commands::CommandHandler;
use shardkv::persistence::{AppendLog, FsyncPolicy};
use shardkv::storage::{sweep_once, ListEnd, StorageEngine};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Benchmark SET operations
fn bench_set(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    let mut group = c.benchmark_group("set");
    group.throughput(Throughput::Elements(1));

    group.bench_function("set_small", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.set(key, Bytes::from_static(b"small_value"));
            i += 1;
        });
    });

    group.bench_function("set_1kb", |b| {
        let mut i = 0u64;
        let value = Bytes::from("x".repeat(1024));
        b.iter(|| {
            let key = Bytes::from(format!("key:{}", i));
            engine.set(key, value.clone());
            i += 1;
        });
    });

    group.bench_function("set_with_ttl", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = Bytes::from(format!("ttl:{}", i));
            engine.set_with_ttl(key, Bytes::from_static(b"value"), Duration::from_secs(3600));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark GET operations
fn bench_get(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());
    for i in 0..100_000 {
        engine.set(
            Bytes::from(format!("key:{}", i)),
            Bytes::from(format!("value:{}", i)),
        );
    }

    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("key:{}", i % 100_000);
            black_box(engine.get(key.as_bytes()));
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let key = format!("missing:{}", i);
            black_box(engine.get(key.as_bytes()));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark list, set and hash operations
fn bench_collections(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());

    let mut group = c.benchmark_group("collections");
    group.throughput(Throughput::Elements(1));

    group.bench_function("rpush_lpop", |b| {
        let key = Bytes::from_static(b"queue");
        b.iter(|| {
            engine.push(key.clone(), vec![Bytes::from_static(b"job")], ListEnd::Right);
            black_box(engine.pop(&key, ListEnd::Left));
        });
    });

    group.bench_function("sadd", |b| {
        let key = Bytes::from_static(b"members");
        let mut i = 0u64;
        b.iter(|| {
            let member = Bytes::from(format!("m:{}", i % 10_000));
            black_box(engine.sadd(key.clone(), vec![member]));
            i += 1;
        });
    });

    group.bench_function("hset_hget", |b| {
        let key = Bytes::from_static(b"profile");
        let mut i = 0u64;
        b.iter(|| {
            let field = Bytes::from(format!("f:{}", i % 1_000));
            engine.hset(key.clone(), field.clone(), Bytes::from_static(b"v"));
            black_box(engine.hget(&key, &field));
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark concurrent access across shards
fn bench_concurrent(c: &mut Criterion) {
    use std::thread;

    let mut group = c.benchmark_group("concurrent");
    group.measurement_time(Duration::from_secs(10));

    group.bench_function("4_threads_mixed", |b| {
        b.iter(|| {
            let engine = Arc::new(StorageEngine::new());
            let handles: Vec<_> = (0..4)
                .map(|t| {
                    let engine = Arc::clone(&engine);
                    thread::spawn(move || {
                        for i in 0..10_000 {
                            let key = Bytes::from(format!("key:{}:{}", t, i));
                            engine.set(key.clone(), Bytes::from_static(b"value"));
                            engine.get(&key);
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            black_box(engine.len());
        });
    });

    group.finish();
}

/// Benchmark one active expiry pass over a mostly live keyspace
fn bench_sweep(c: &mut Criterion) {
    let engine = Arc::new(StorageEngine::new());
    for i in 0..50_000 {
        engine.set_with_ttl(
            Bytes::from(format!("live:{}", i)),
            Bytes::from_static(b"value"),
            Duration::from_secs(3600),
        );
    }

    c.bench_function("sweep_50k_live", |b| {
        b.iter(|| black_box(sweep_once(&engine)));
    });
}

/// Benchmark the overhead of journaling a write
fn bench_journal(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();

    let mut group = c.benchmark_group("journal");
    group.throughput(Throughput::Elements(1));

    for policy in [FsyncPolicy::No, FsyncPolicy::EverySec] {
        let path = dir.path().join(format!("bench-{}.aof", policy));
        let log = Arc::new(AppendLog::open(&path, policy).unwrap());
        let handler = CommandHandler::with_journal(Arc::new(StorageEngine::new()), log);

        group.bench_function(format!("set_{}", policy), |b| {
            let mut i = 0u64;
            b.iter(|| {
                let args = vec![
                    Bytes::from(format!("key:{}", i % 10_000)),
                    Bytes::from_static(b"value"),
                ];
                black_box(handler.dispatch("SET", args));
                i += 1;
            });
        });
    }

    let unjournaled = CommandHandler::new(Arc::new(StorageEngine::new()));
    group.bench_function("set_unjournaled", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let args = vec![
                Bytes::from(format!("key:{}", i % 10_000)),
                Bytes::from_static(b"value"),
            ];
            black_box(unjournaled.dispatch("SET", args));
            i += 1;
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_set,
    bench_get,
    bench_collections,
    bench_concurrent,
    bench_sweep,
    bench_journal,
);

criterion_main!(benches);
