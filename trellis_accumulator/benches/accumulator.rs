//! Benchmarks for the rolling accumulator under contention.

use std::{sync::Arc, thread, time::Duration};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use trellis_accumulator::RollingAccumulator;

fn record(c: &mut Criterion) {
    let acc = RollingAccumulator::with_window_size(50);
    c.bench_function("record", |b| {
        b.iter(|| acc.record(std::hint::black_box(1.25)));
    });
}

fn snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    for window_size in &[1_i64, 50, 2048] {
        let acc = RollingAccumulator::with_window_size(*window_size);
        for i in 0..*window_size {
            acc.record(i as f64);
        }
        group.bench_with_input(BenchmarkId::from_parameter(window_size), &acc, |b, acc| {
            b.iter(|| std::hint::black_box(acc.snapshot()));
        });
    }
    group.finish();
}

fn contended_record(c: &mut Criterion) {
    const RECORDS: u64 = 10_000;

    let mut group = c.benchmark_group("contended_record");
    for writers in &[1_u64, 2, 4, 8] {
        group.throughput(Throughput::Elements(writers * RECORDS));
        group.bench_with_input(BenchmarkId::from_parameter(writers), writers, |b, &writers| {
            b.iter(|| {
                let acc = Arc::new(RollingAccumulator::with_window_size(50));
                let handles: Vec<_> = (0..writers)
                    .map(|_| {
                        let acc = Arc::clone(&acc);
                        thread::spawn(move || {
                            for i in 0..RECORDS {
                                acc.record(i as f64);
                            }
                        })
                    })
                    .collect();
                for handle in handles {
                    handle.join().expect("writer panicked");
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default().measurement_time(Duration::from_secs(10));
    targets = record, snapshot, contended_record
);
criterion_main!(benches);
