//! Completion queue throughput.
//!
//! Measures the round trip of submitting reads against an in-memory stream
//! and draining their outcomes, plus the raw cost of polling an empty queue.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use embeddenator_aio::{AsyncIo, AsyncIoQueue, Engine, EngineConfig, Stream};

fn engine(workers: usize) -> Engine {
    Engine::new(EngineConfig {
        worker_threads: workers,
        thread_name_prefix: "bench".into(),
        stack_size: None,
    })
    .expect("engine")
}

fn bench_submit_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_and_drain");
    let data: Arc<[u8]> = vec![7u8; 64 * 1024].into();

    for &workers in &[1usize, 4] {
        let engine = engine(workers);
        let file = AsyncIo::with_engine(Stream::from_const_memory(Arc::clone(&data)), &engine);
        let batch = 256u64;
        group.throughput(Throughput::Elements(batch));
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, _| {
            let queue = AsyncIoQueue::new();
            b.iter(|| {
                for i in 0..batch {
                    file.read((i * 64) % 60_000, vec![0u8; 64], &queue, i)
                        .expect("submit");
                }
                let mut drained = 0;
                while drained < batch {
                    if let Some(outcome) =
                        queue.try_wait_for_outcome(Some(Duration::from_millis(10)))
                    {
                        black_box(outcome.bytes_transferred());
                        drained += 1;
                    }
                }
            });
        });
    }
    group.finish();
}

fn bench_poll_empty(c: &mut Criterion) {
    let queue = AsyncIoQueue::new();
    c.bench_function("poll_empty", |b| b.iter(|| black_box(queue.try_get_outcome())));
}

criterion_group!(benches, bench_submit_and_drain, bench_poll_empty);
criterion_main!(benches);
