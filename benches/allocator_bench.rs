use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use shmmap::{
    allocators::{BumpArena, SizeClassPool},
    layout::pool_header_len,
    InitMode, LogSink, Offset, OffsetSpace,
};

const CLASSES: usize = 1024;

fn space(memory: &mut [u8]) -> OffsetSpace {
    unsafe { OffsetSpace::from_raw(memory.as_mut_ptr(), memory.len()).unwrap() }
}

fn benchmark_bump_arena(c: &mut Criterion) {
    let mut group = c.benchmark_group("BumpArena");

    for size in [24, 64, 256, 1024].iter() {
        group.bench_with_input(BenchmarkId::new("carve", size), size, |b, &size| {
            let mut memory = vec![0u8; 1024 * 1024]; // 1MB
            let space = space(&mut memory);
            space.write(Offset::new(0), 8i32).unwrap();
            let arena = BumpArena::new(space, Offset::new(0), 8);

            b.iter(|| {
                arena.reset().unwrap();
                for _ in 0..100 {
                    let _ = arena.carve(size);
                }
            });
        });
    }

    group.finish();
}

fn benchmark_size_class_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("SizeClassPool");

    for size in [8, 64, 256, 4096].iter() {
        group.bench_with_input(
            BenchmarkId::new("allocate_deallocate", size),
            size,
            |b, &size| {
                let mut memory = vec![0u8; pool_header_len(CLASSES) + 4 * 1024 * 1024];
                let mut pool =
                    SizeClassPool::init(space(&mut memory), CLASSES, InitMode::Bootstrap, LogSink::Facade)
                        .unwrap();

                b.iter(|| {
                    let mut payloads = Vec::with_capacity(50);
                    for _ in 0..50 {
                        match pool.allocate(size) {
                            Ok(payload) => payloads.push(payload),
                            Err(_) => break,
                        }
                    }
                    for payload in payloads {
                        pool.deallocate(payload).unwrap();
                    }
                });
            },
        );
    }

    group.finish();
}

fn benchmark_mixed_sizes(c: &mut Criterion) {
    let mut memory = vec![0u8; pool_header_len(CLASSES) + 4 * 1024 * 1024];
    let mut pool =
        SizeClassPool::init(space(&mut memory), CLASSES, InitMode::Bootstrap, LogSink::Facade)
            .unwrap();

    c.bench_function("mixed_size_churn", |b| {
        b.iter(|| {
            let mut payloads = Vec::with_capacity(64);
            for i in 0..64usize {
                if let Ok(payload) = pool.allocate(8 + (i * 37) % 2000) {
                    payloads.push(payload);
                }
            }
            for payload in payloads.into_iter().rev() {
                pool.deallocate(payload).unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    benchmark_bump_arena,
    benchmark_size_class_pool,
    benchmark_mixed_sizes
);
criterion_main!(benches);
