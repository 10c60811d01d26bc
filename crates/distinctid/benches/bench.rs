use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use distinctid::{IdService, MemoryCounter, TimeSource};
use std::time::Instant;
use tokio::runtime::Builder;

struct FixedMockTime {
    millis: i64,
}

impl TimeSource for FixedMockTime {
    fn current_millis(&self) -> i64 {
        self.millis
    }
}

// Number of IDs generated per benchmark iteration.
const TOTAL_IDS: usize = 4096;

fn service(buffer_size: Option<u64>) -> IdService<MemoryCounter, FixedMockTime> {
    let service = IdService::with_clock(
        MemoryCounter::new(),
        FixedMockTime {
            millis: 1_735_689_600_000,
        },
    );
    if let Some(size) = buffer_size {
        service.enable_buffering(size).unwrap();
    }
    service
}

fn bench_generate_one(c: &mut Criterion, group_name: &str, buffer_size: Option<u64>) {
    let mut group = c.benchmark_group(group_name);
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                let service = service(buffer_size);
                for _ in 0..TOTAL_IDS {
                    black_box(service.generate_one(1, "bench").unwrap());
                }
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_generate_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    let service = service(None);
    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.iter(|| black_box(service.generate_batch(TOTAL_IDS as i64, 1, "bench").unwrap()));
    });

    group.finish();
}

fn bench_generate_one_async(c: &mut Criterion) {
    let runtime = Builder::new_multi_thread().enable_all().build().unwrap();
    let mut group = c.benchmark_group("async/buffered/64");
    group.throughput(Throughput::Elements(TOTAL_IDS as u64));

    group.bench_function(format!("elems/{TOTAL_IDS}"), |b| {
        b.to_async(&runtime).iter(|| async {
            let service = service(Some(64));
            for _ in 0..TOTAL_IDS {
                black_box(service.generate_one_async(1, "bench").await.unwrap());
            }
        });
    });

    group.finish();
}

fn benchmarks(c: &mut Criterion) {
    bench_generate_one(c, "direct", None);
    bench_generate_one(c, "buffered/64", Some(64));
    bench_generate_one(c, "buffered/10000", Some(10_000));
    bench_generate_batch(c);
    bench_generate_one_async(c);
}

criterion_group!(benches, benchmarks);
criterion_main!(benches);
