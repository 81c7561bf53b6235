//! Benchmark: kovan-table performance
//!
//! Single writer insert/remove cost and reader throughput with and without a
//! concurrent writer.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use kovan_table::{CompositeKey, Table};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

const SMALL_OPS: u64 = 1_000;
const MEDIUM_OPS: u64 = 10_000;
const LARGE_OPS: u64 = 100_000;

const READER_COUNTS: &[usize] = &[1, 2, 4, 8];

fn key(i: u64) -> CompositeKey {
    CompositeKey::from_u160(i, i ^ 0x5555, (i & 0xffff) as u32)
}

/// Benchmark: add into a sized table
fn bench_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("add");

    for &size in &[SMALL_OPS, MEDIUM_OPS, LARGE_OPS] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("kovan-table", size), &size, |b, &size| {
            b.iter(|| {
                let mut table = Table::new(size as u32).unwrap();
                for i in 0..size {
                    table.add(black_box(key(i)), black_box(i)).unwrap();
                }
                table
            });
        });
    }

    group.finish();
}

/// Benchmark: lookup hits
fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");

    for &size in &[SMALL_OPS, MEDIUM_OPS, LARGE_OPS] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("kovan-table", size), &size, |b, &size| {
            let mut table = Table::new(size as u32).unwrap();
            for i in 0..size {
                table.add(key(i), i).unwrap();
            }
            b.iter(|| {
                let mut sum = 0;
                for i in 0..size {
                    if let Ok(v) = table.lookup(&black_box(key(i))) {
                        sum += v;
                    }
                }
                sum
            });
        });
    }

    group.finish();
}

/// Benchmark: add followed by remove of the same key
fn bench_add_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_remove");
    group.throughput(Throughput::Elements(MEDIUM_OPS));

    group.bench_function("kovan-table", |b| {
        let mut table = Table::new(MEDIUM_OPS as u32).unwrap();
        b.iter(|| {
            for i in 0..MEDIUM_OPS {
                table.add(key(i), i).unwrap();
                black_box(table.remove(&key(i)).unwrap());
            }
        });
    });

    group.finish();
}

/// Benchmark: concurrent readers while one writer churns unrelated keys
fn bench_readers_with_writer(c: &mut Criterion) {
    let mut group = c.benchmark_group("readers_with_writer");
    group.sample_size(20);

    for &readers in READER_COUNTS {
        let ops_per_reader = MEDIUM_OPS;
        group.throughput(Throughput::Elements(ops_per_reader * readers as u64));

        group.bench_with_input(BenchmarkId::new("kovan-table", readers), &readers, |b, &readers| {
            let mut table = Table::new(MEDIUM_OPS as u32).unwrap();
            for i in 0..MEDIUM_OPS {
                table.add(key(i), i).unwrap();
            }
            let reader = table.reader();
            let stop = Arc::new(AtomicBool::new(false));

            let writer = {
                let stop = stop.clone();
                thread::spawn(move || {
                    let mut i = 0u64;
                    while !stop.load(Ordering::Relaxed) {
                        let k = key(LARGE_OPS + (i % 1024));
                        let _ = table.add(k, i);
                        let _ = table.remove(&k);
                        i += 1;
                    }
                })
            };

            b.iter(|| {
                let handles: Vec<_> = (0..readers)
                    .map(|_| {
                        let reader = reader.clone();
                        thread::spawn(move || {
                            let mut sum = 0;
                            for i in 0..ops_per_reader {
                                if let Ok(v) = reader.lookup(&key(i)) {
                                    sum += v;
                                }
                            }
                            sum
                        })
                    })
                    .collect();

                for h in handles {
                    black_box(h.join().unwrap());
                }
            });

            stop.store(true, Ordering::Relaxed);
            writer.join().unwrap();
        });
    }

    group.finish();
}

/// Benchmark: stats over large bucket arrays
fn bench_stats(c: &mut Criterion) {
    let mut group = c.benchmark_group("stats");

    for &capacity in &[1u32 << 10, 1 << 16, 1 << 20] {
        group.throughput(Throughput::Elements(capacity as u64));
        group.bench_with_input(BenchmarkId::new("kovan-table", capacity), &capacity, |b, &capacity| {
            let mut table = Table::new(capacity).unwrap();
            for i in 0..capacity as u64 {
                table.add(key(i), ()).unwrap();
            }
            b.iter(|| black_box(table.stats().unwrap()));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_add,
    bench_lookup,
    bench_add_remove,
    bench_readers_with_writer,
    bench_stats
);
criterion_main!(benches);
