use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tessera::SegregatedAllocator;

fn bench_small_alloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("Small Allocation 1000");
    const BATCH_SIZE: usize = 1000;

    group.bench_function("Box::new(u64)", |b| {
        b.iter(|| {
            let mut v = Vec::with_capacity(BATCH_SIZE);
            for i in 0..BATCH_SIZE {
                v.push(Box::new(i as u64));
            }
            black_box(v);
        })
    });

    group.bench_function("SegregatedAllocator", |b| {
        b.iter_batched(
            || {
                let mut allocator = SegregatedAllocator::new();
                allocator.init();
                allocator
            },
            |mut allocator| {
                let mut ptrs = Vec::with_capacity(BATCH_SIZE);
                for _ in 0..BATCH_SIZE {
                    ptrs.push(allocator.alloc(8));
                }
                for p in ptrs {
                    allocator.free(p);
                }
                allocator.destroy();
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

fn bench_mixed_alloc(c: &mut Criterion) {
    let mut group = c.benchmark_group("Mixed Allocation 1000");
    const BATCH_SIZE: usize = 1000;
    const SIZES: [usize; 5] = [8, 24, 100, 400, 2000];

    group.bench_function("SegregatedAllocator Mixed", |b| {
        b.iter_batched(
            || {
                let mut allocator = SegregatedAllocator::new();
                allocator.init();
                allocator
            },
            |mut allocator| {
                let mut ptrs = Vec::with_capacity(BATCH_SIZE);
                for i in 0..BATCH_SIZE {
                    ptrs.push(allocator.alloc(SIZES[i % SIZES.len()]));
                }
                // Free in reverse to exercise the coalescing paths.
                for p in ptrs.into_iter().rev() {
                    allocator.free(p);
                }
                allocator.destroy();
            },
            BatchSize::SmallInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_small_alloc, bench_mixed_alloc);
criterion_main!(benches);
