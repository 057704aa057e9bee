//! Lifecycle tests for `BaseObject`: explicit references, collector
//! ownership and the single cleanup guarantee under contention.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use refmem::{object_metrics, BaseObject, Cleanup, Error};

#[derive(Default)]
struct Counter {
    disposing: AtomicUsize,
    finalizing: AtomicUsize,
}

impl Counter {
    fn calls(&self) -> usize {
        self.disposing.load(Ordering::SeqCst) + self.finalizing.load(Ordering::SeqCst)
    }
}

struct Tracked(Arc<Counter>);

impl Cleanup for Tracked {
    fn cleanup(&self, disposing: bool) {
        let slot = if disposing {
            &self.0.disposing
        } else {
            &self.0.finalizing
        };
        slot.fetch_add(1, Ordering::SeqCst);
    }

    fn kind(&self) -> &'static str {
        "tracked"
    }
}

fn tracked() -> (Arc<Counter>, BaseObject<Tracked>) {
    let counter = Arc::new(Counter::default());
    let obj = BaseObject::new(Tracked(Arc::clone(&counter)));
    (counter, obj)
}

#[test]
fn test_new_object_is_owned_with_one_reference() {
    let (_c, obj) = tracked();
    assert!(obj.is_owned());
    assert!(obj.is_collector_owned());
    assert!(!obj.is_disposed());
    assert_eq!(obj.ref_count(), 1);
}

#[test]
fn test_reference_then_dispose_then_dereference() {
    let (c, obj) = tracked();
    assert_eq!(obj.reference().unwrap(), 2);
    obj.dispose();
    assert_eq!(c.calls(), 0);
    assert_eq!(obj.ref_count(), 1);

    assert_eq!(obj.dereference(), 0);
    assert_eq!(c.disposing.load(Ordering::SeqCst), 1);
    assert_eq!(c.finalizing.load(Ordering::SeqCst), 0);
    assert!(obj.is_disposed());
}

#[test]
fn test_reference_n_and_dereference_n() {
    let (c, obj) = tracked();
    assert_eq!(obj.reference_n(4).unwrap(), 5);
    assert_eq!(obj.dereference_n(3, true), 2);
    assert_eq!(obj.dereference_n(2, false), 0);
    assert_eq!(c.finalizing.load(Ordering::SeqCst), 1);
    assert!(obj.is_disposed());
    // The collector reference was consumed by the explicit release.
    obj.dispose();
    drop(obj);
    assert_eq!(c.calls(), 1);
}

#[test]
fn test_dispose_twice_is_noop() {
    let (c, obj) = tracked();
    obj.dispose();
    obj.dispose();
    drop(obj);
    assert_eq!(c.calls(), 1);
}

#[test]
fn test_last_handle_drop_finalizes_with_false() {
    let (c, obj) = tracked();
    let handles: Vec<_> = (0..8).map(|_| obj.clone()).collect();
    drop(obj);
    assert_eq!(c.calls(), 0);
    drop(handles);
    assert_eq!(c.finalizing.load(Ordering::SeqCst), 1);
    assert_eq!(c.disposing.load(Ordering::SeqCst), 0);
}

#[test]
fn test_leaked_reference_suppresses_finalizer_cleanup() {
    let (c, obj) = tracked();
    obj.reference().unwrap();
    drop(obj);
    // One explicit reference was never released, so the resource stays.
    assert_eq!(c.calls(), 0);
}

#[test]
fn test_reference_on_disposed_object_fails() {
    let (_c, obj) = tracked();
    obj.dispose();
    assert!(matches!(obj.reference(), Err(Error::ObjectDisposed)));
    assert!(matches!(obj.reference_n(3), Err(Error::ObjectDisposed)));
}

#[test]
fn test_zero_count_operations_are_noops() {
    let (c, obj) = tracked();
    assert_eq!(obj.reference_n(0).unwrap(), 1);
    assert_eq!(obj.dereference_n(0, true), 1);
    assert_eq!(c.calls(), 0);
}

#[test]
fn test_disable_ownership_stops_counting() {
    let (c, obj) = tracked();
    obj.disable_ownership(false);
    assert!(!obj.is_owned());
    assert_eq!(obj.reference_n(10).unwrap(), 0);
    assert_eq!(obj.dereference_n(10, true), 0);
    drop(obj);
    assert_eq!(c.calls(), 0);
}

#[test]
fn test_metrics_observe_lifecycle() {
    let before = object_metrics().total_cleanups();
    let created = object_metrics().total_created();
    let (_c, obj) = tracked();
    obj.dispose();
    assert!(object_metrics().total_created() > created);
    assert!(object_metrics().total_cleanups() > before);
}

#[test]
fn test_concurrent_reference_dereference() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 1_000;

    let (c, obj) = tracked();
    let barrier = Arc::new(Barrier::new(THREADS));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let obj = obj.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    obj.reference().unwrap();
                    obj.dereference();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(obj.ref_count(), 1);
    assert_eq!(c.calls(), 0);
    obj.dispose();
    assert_eq!(c.calls(), 1);
}

#[test]
fn test_concurrent_dispose_runs_cleanup_once() {
    const THREADS: usize = 8;

    for _ in 0..50 {
        let (c, obj) = tracked();
        obj.reference_n(THREADS).unwrap();
        let barrier = Arc::new(Barrier::new(THREADS + 1));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let obj = obj.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    obj.dereference();
                })
            })
            .collect();
        barrier.wait();
        obj.dispose();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(c.calls(), 1);
        assert!(obj.is_disposed());
    }
}

#[test]
fn test_concurrent_drop_of_handles_finalizes_once() {
    let (c, obj) = tracked();
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let obj = obj.clone();
            thread::spawn(move || drop(obj))
        })
        .collect();
    drop(obj);
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(c.finalizing.load(Ordering::SeqCst), 1);
}
