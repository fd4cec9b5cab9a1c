//! Task pool benchmarks
//!
//! Submission and drain throughput for no-op and small compute tasks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lumen::config::TasksConfig;
use lumen::TaskPool;

fn pool(workers: usize) -> TaskPool {
    TaskPool::new(&TasksConfig {
        workers,
        thread_name: "bench".to_string(),
    })
    .unwrap()
}

fn bench_submit_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_drain");

    for count in [100, 1_000, 10_000] {
        let pool = pool(4);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                for _ in 0..count {
                    pool.submit(|| ());
                }
                pool.wait_for_tasks().unwrap();
            });
        });
    }

    group.finish();
}

fn bench_handle_roundtrip(c: &mut Criterion) {
    let pool = pool(2);

    c.bench_function("handle_wait", |b| {
        b.iter(|| {
            let handle = pool.submit(|| black_box(21u64) * 2);
            black_box(handle.wait().unwrap())
        })
    });
}

fn bench_compute(c: &mut Criterion) {
    let pool = pool(4);

    c.bench_function("sum_chunks", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..64u64)
                .map(|chunk| pool.submit(move || (chunk * 1_000..(chunk + 1) * 1_000).sum::<u64>()))
                .collect();
            let total: u64 = handles.into_iter().map(|h| h.wait().unwrap()).sum();
            black_box(total)
        })
    });
}

criterion_group!(benches, bench_submit_drain, bench_handle_roundtrip, bench_compute);
criterion_main!(benches);
