//! Criterion micro-benchmarks for scratch pool checkout.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dush_arena::{with_scratch, ScratchPool};
use dush_bench::command_line_sizes;
use dush_test_utils::fixtures::test_scratch_config;

fn bench_pool_begin_end(c: &mut Criterion) {
    let pool = ScratchPool::new(test_scratch_config());
    let first = pool.arena_ids()[0];
    c.bench_function("pool_begin_end", |b| {
        b.iter(|| pool.begin(&[]).unwrap().end());
    });
    c.bench_function("pool_begin_with_conflict", |b| {
        b.iter(|| pool.begin(&[first]).unwrap().end());
    });
}

fn bench_thread_scratch(c: &mut Criterion) {
    let sizes = command_line_sizes(64);
    c.bench_function("with_scratch_64_pushes", |b| {
        b.iter(|| {
            with_scratch(&[], |scratch| {
                for &size in &sizes {
                    black_box(scratch.push_nozero(size, 8).unwrap());
                }
            })
            .unwrap()
        });
    });
    c.bench_function("with_scratch_nested", |b| {
        b.iter(|| {
            with_scratch(&[], |outer| {
                let id = outer.id();
                with_scratch(&[id], |inner| black_box(inner.id())).unwrap()
            })
            .unwrap()
        });
    });
}

criterion_group!(benches, bench_pool_begin_end, bench_thread_scratch);
criterion_main!(benches);
