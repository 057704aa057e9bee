//! Benchmark: checked region access, raw views and allocation paths.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use refmem::{FreeList, Heap, Region};

fn bench_checked_reads(c: &mut Criterion) {
    let region = Region::allocate(4096).unwrap();
    c.bench_function("checked_read_u32_x1024", |b| {
        b.iter(|| {
            let mut sum = 0u32;
            for i in 0..1024 {
                sum = sum.wrapping_add(region.read_u32_at(0, i).unwrap());
            }
            black_box(sum)
        });
    });
    region.free();
}

fn bench_raw_reads(c: &mut Criterion) {
    let region = Region::allocate(4096).unwrap();
    c.bench_function("raw_read_u32_x1024", |b| {
        let raw = region.raw_view();
        b.iter(|| {
            let mut sum = 0u32;
            for i in 0..1024 {
                // SAFETY: 1024 u32s fit in the live 4096-byte region.
                sum = sum.wrapping_add(unsafe { raw.read_at::<u32>(0, i) });
            }
            black_box(sum)
        });
    });
    region.free();
}

fn bench_child_reads(c: &mut Criterion) {
    let parent = Region::allocate(4096).unwrap();
    let child = parent.make_child(1024, 1024).unwrap();
    c.bench_function("child_read_u64_x128", |b| {
        b.iter(|| {
            let mut sum = 0u64;
            for i in 0..128 {
                sum = sum.wrapping_add(child.read_u64_at(0, i).unwrap());
            }
            black_box(sum)
        });
    });
    child.free();
    parent.free();
}

fn bench_heap_allocate_free(c: &mut Criterion) {
    let heap = Heap::new().unwrap();
    c.bench_function("heap_allocate_free_256", |b| {
        b.iter(|| {
            let region = Region::allocate_in(&heap, 256).unwrap();
            region.free();
        });
    });
}

fn bench_free_list_allocate_free(c: &mut Criterion) {
    let heap = Heap::new().unwrap();
    let list = FreeList::new(Arc::clone(&heap), 256, 64).unwrap();
    c.bench_function("free_list_allocate_free_256", |b| {
        b.iter(|| {
            let region = list.allocate().unwrap();
            region.free();
        });
    });
}

fn bench_reference_dereference(c: &mut Criterion) {
    let region = Region::allocate(8).unwrap();
    c.bench_function("reference_dereference", |b| {
        b.iter(|| {
            region.reference().unwrap();
            black_box(region.dereference());
        });
    });
    region.free();
}

criterion_group!(
    benches,
    bench_checked_reads,
    bench_raw_reads,
    bench_child_reads,
    bench_heap_allocate_free,
    bench_free_list_allocate_free,
    bench_reference_dereference
);
criterion_main!(benches);
