use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::time::Duration;
use stopping_pipeline::workload::{GetResult, GetToken};
use stopping_pipeline::{Pipeline, PipelineConfig, StoppingQueue};

/// Benchmarks for queue and pipeline overhead.
///
/// This measures:
/// 1. Queue overhead: put + drain of N items on a single thread
/// 2. Pipeline overhead: the token/result pipeline with zero simulated
///    latency, across worker counts
///
/// To run these, use:
/// ```bash
/// cargo bench -p stopping_pipeline
/// ```

const SIZES: [u64; 3] = [1_000, 10_000, 100_000];
const WORKERS: [usize; 3] = [1, 4, 16];

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("Queue Put+Drain");

    for &size in &SIZES {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::new("unbounded", size), &size, |b, &size| {
            b.iter(|| {
                let queue = StoppingQueue::unbounded("bench");
                for i in 0..size {
                    queue.put(i).ok();
                }
                queue.close().ok();
                let total: u64 = queue.drain().map(|d| d.sum()).unwrap_or_default();
                black_box(total)
            })
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("Token Pipeline");
    let instant = Duration::ZERO;
    let size = 10_000;
    group.throughput(Throughput::Elements(size));

    for &workers in &WORKERS {
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &w| {
            b.iter(|| {
                let output = Pipeline::builder(PipelineConfig::default())
                    .stage("token", w, GetToken { max_latency: instant })
                    .stage("result", w, GetResult { max_latency: instant })
                    .start()
                    .and_then(|pipeline| pipeline.run(0..size));
                black_box(output.map(|o| o.results.len()).unwrap_or_default())
            })
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_secs(2))
        .measurement_time(Duration::from_secs(5))
        .sample_size(20);
    targets = bench_queue, bench_pipeline
);
criterion_main!(benches);
