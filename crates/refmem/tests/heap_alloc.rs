//! Heap-backed allocation: outstanding counts, memory pressure, resizing
//! and concurrent use of one unserialized heap.

use std::sync::Arc;
use std::thread;

use refmem::{memory_pressure, Error, Heap, HeapOptions, Region};

#[test]
fn test_allocate_free_leaves_outstanding_unchanged() {
    let heap = Heap::new().unwrap();
    let before = heap.outstanding();
    let region = Region::allocate_in(&heap, 100).unwrap();
    assert_eq!(heap.outstanding(), before + 1);
    region.free();
    assert_eq!(heap.outstanding(), before);
    assert_eq!(heap.live_blocks(), 0);
}

#[test]
fn test_dropping_last_handle_frees() {
    let heap = Heap::new().unwrap();
    let region = Region::allocate_in(&heap, 100).unwrap();
    drop(region);
    assert_eq!(heap.outstanding(), 0);
}

#[test]
fn test_heap_metrics() {
    let heap = Heap::new().unwrap();
    let a = Region::allocate_in(&heap, 100).unwrap();
    let b = Region::allocate_in(&heap, 300).unwrap();
    assert_eq!(heap.metrics().allocated_bytes(), 400);
    a.free();
    assert_eq!(heap.metrics().allocated_bytes(), 300);
    assert_eq!(heap.metrics().peak_bytes(), 400);
    b.resize(50).unwrap();
    assert_eq!(heap.metrics().allocated_bytes(), 50);
    b.free();
    assert_eq!(heap.metrics().outstanding(), 0);
    assert_eq!(heap.metrics().failures(), 0);
}

#[test]
fn test_memory_pressure_tracks_live_bytes() {
    // Pressure is process-wide; other tests move it concurrently, so only a
    // lower bound can be checked while the region is alive.
    let heap = Heap::new().unwrap();
    let region = Region::allocate_in(&heap, 1 << 20).unwrap();
    assert!(memory_pressure() >= 1 << 20);
    region.free();
}

#[test]
fn test_resize_keeps_contents() {
    let heap = Heap::new().unwrap();
    let region = Region::allocate_in(&heap, 16).unwrap();
    region.write_bytes(0, b"0123456789abcdef").unwrap();
    region.resize(8).unwrap();
    assert_eq!(region.size(), 8);
    assert_eq!(region.read_bytes(0, 8).unwrap(), b"01234567");
    assert!(region.read_u8(8).is_err());

    region.resize(64).unwrap();
    assert_eq!(region.read_bytes(0, 8).unwrap(), b"01234567");
    assert_eq!(region.read_bytes(8, 56).unwrap(), vec![0; 56]);
    region.free();
    assert_eq!(heap.outstanding(), 0);
}

#[test]
fn test_out_of_memory_leaves_heap_and_region_unchanged() {
    let heap = Heap::new().unwrap();
    assert!(matches!(
        Region::allocate_in(&heap, usize::MAX),
        Err(Error::OutOfMemory { size: usize::MAX })
    ));
    assert_eq!(heap.metrics().failures(), 1);
    assert_eq!(heap.outstanding(), 0);

    let region = Region::allocate_in(&heap, 16).unwrap();
    region.write_u64(0, 42).unwrap();
    region.write_u64(8, 43).unwrap();

    assert!(matches!(
        region.resize(usize::MAX),
        Err(Error::OutOfMemory { size: usize::MAX })
    ));
    assert!(matches!(
        region.resize_new(usize::MAX),
        Err(Error::OutOfMemory { size: usize::MAX })
    ));

    assert_eq!(region.size(), 16);
    assert_eq!(region.read_u64(0).unwrap(), 42);
    assert_eq!(region.read_u64(8).unwrap(), 43);
    assert_eq!(heap.metrics().failures(), 3);
    assert_eq!(heap.metrics().allocated_bytes(), 16);
    assert_eq!(heap.outstanding(), 1);

    region.free();
    assert_eq!(heap.outstanding(), 0);
    assert_eq!(heap.live_blocks(), 0);
}

#[test]
fn test_resize_to_zero() {
    let heap = Heap::new().unwrap();
    let region = Region::allocate_in(&heap, 16).unwrap();
    region.resize(0).unwrap();
    assert_eq!(region.size(), 0);
    assert!(region.read_u8(0).is_err());
    region.free();
    assert_eq!(heap.live_blocks(), 0);
}

#[test]
fn test_resize_non_heap_region_rejected() {
    let pages = Region::allocate_pages(1).unwrap();
    assert!(matches!(pages.resize_new(8), Err(Error::NotResizable)));
    let parent = Region::allocate(16).unwrap();
    let child = parent.make_child(0, 8).unwrap();
    assert!(matches!(child.resize(4), Err(Error::NotResizable)));
    child.free();
    parent.free();
    pages.free();
}

#[test]
fn test_heap_outlives_its_handle() {
    let heap = Heap::new().unwrap();
    let region = Region::allocate_in(&heap, 32).unwrap();
    let weak = Arc::downgrade(&heap);
    drop(heap);
    assert!(weak.upgrade().is_some());
    region.write_u32(0, 1).unwrap();
    region.free();
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_heap_options() {
    let heap = Heap::with_options(&HeapOptions::new().initial_size(1 << 16)).unwrap();
    let region = Region::allocate_in(&heap, 128).unwrap();
    assert_eq!(region.read_bytes(0, 128).unwrap(), vec![0; 128]);
    region.free();
}

#[test]
fn test_concurrent_allocation_from_one_heap() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 200;

    let heap = Heap::new().unwrap();
    let workers: Vec<_> = (0..THREADS)
        .map(|t| {
            let heap = Arc::clone(&heap);
            thread::spawn(move || {
                for i in 0..ROUNDS {
                    let region = Region::allocate_in(&heap, 16 + i).unwrap();
                    region.write_usize(0, t).unwrap();
                    region.resize(32 + i).unwrap();
                    assert_eq!(region.read_usize(0).unwrap(), t);
                    region.free();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(heap.outstanding(), 0);
    assert_eq!(heap.live_blocks(), 0);
}

#[test]
fn test_process_heap_allocations() {
    let heap = Heap::process().unwrap();
    let region = Region::allocate(24).unwrap();
    assert!(heap.outstanding() >= 1);
    region.free();
}
