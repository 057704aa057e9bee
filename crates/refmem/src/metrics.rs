//! Object, heap and memory-pressure statistics.
//!
//! Counters are instrumentation only; nothing in the crate reads them to
//! make decisions.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Process-level cumulative object lifecycle counters.
///
/// # Example
///
/// ```
/// use refmem::object_metrics;
///
/// let metrics = object_metrics();
/// println!("live objects: {}", metrics.live_objects());
/// ```
#[derive(Debug)]
pub struct ObjectMetrics {
    created: AtomicUsize,
    disposed: AtomicUsize,
    finalized: AtomicUsize,
    cleanups: AtomicUsize,
    referenced: AtomicUsize,
    dereferenced: AtomicUsize,
}

impl Default for ObjectMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectMetrics {
    /// Create a new `ObjectMetrics` with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            disposed: AtomicUsize::new(0),
            finalized: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
            referenced: AtomicUsize::new(0),
            dereferenced: AtomicUsize::new(0),
        }
    }

    /// Owned objects created.
    #[inline]
    #[must_use]
    pub fn total_created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Explicit `dispose` calls that released the collector's reference.
    #[inline]
    #[must_use]
    pub fn total_disposed(&self) -> usize {
        self.disposed.load(Ordering::Relaxed)
    }

    /// Objects whose collector reference was released by dropping the last handle.
    #[inline]
    #[must_use]
    pub fn total_finalized(&self) -> usize {
        self.finalized.load(Ordering::Relaxed)
    }

    /// Cleanup hooks run.
    #[inline]
    #[must_use]
    pub fn total_cleanups(&self) -> usize {
        self.cleanups.load(Ordering::Relaxed)
    }

    /// References added, summed over all `reference` calls.
    #[inline]
    #[must_use]
    pub fn total_referenced(&self) -> usize {
        self.referenced.load(Ordering::Relaxed)
    }

    /// References dropped, summed over all `dereference` calls.
    #[inline]
    #[must_use]
    pub fn total_dereferenced(&self) -> usize {
        self.dereferenced.load(Ordering::Relaxed)
    }

    /// Owned objects created whose cleanup has not run yet.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.total_created().saturating_sub(self.total_cleanups())
    }

    pub(crate) fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_disposed(&self) {
        self.disposed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_finalized(&self) {
        self.finalized.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_referenced(&self, n: usize) {
        self.referenced.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn record_dereferenced(&self, n: usize) {
        self.dereferenced.fetch_add(n, Ordering::Relaxed);
    }
}

static OBJECT_METRICS: ObjectMetrics = ObjectMetrics::new();

/// Get the process-wide object lifecycle counters.
#[must_use]
pub fn object_metrics() -> &'static ObjectMetrics {
    &OBJECT_METRICS
}

/// Per-heap allocation counters.
#[derive(Debug, Default)]
pub struct HeapMetrics {
    outstanding: AtomicUsize,
    allocated_bytes: AtomicUsize,
    peak_bytes: AtomicUsize,
    failures: AtomicUsize,
}

impl HeapMetrics {
    /// Create a new `HeapMetrics` with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            allocated_bytes: AtomicUsize::new(0),
            peak_bytes: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Allocations handed out and not yet freed.
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    /// Bytes currently allocated.
    #[inline]
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes.load(Ordering::Relaxed)
    }

    /// Highest value `allocated_bytes` has reached.
    #[inline]
    #[must_use]
    pub fn peak_bytes(&self) -> usize {
        self.peak_bytes.load(Ordering::Relaxed)
    }

    /// Allocations and resizes the heap refused.
    #[inline]
    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }

    pub(crate) fn record_alloc(&self, size: usize) {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
        self.grow(size);
    }

    pub(crate) fn record_free(&self, size: usize) {
        self.outstanding.fetch_sub(1, Ordering::Relaxed);
        self.allocated_bytes.fetch_sub(size, Ordering::Relaxed);
    }

    pub(crate) fn record_resize(&self, old_size: usize, new_size: usize) {
        if new_size >= old_size {
            self.grow(new_size - old_size);
        } else {
            self.allocated_bytes
                .fetch_sub(old_size - new_size, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    fn grow(&self, by: usize) {
        let now = self.allocated_bytes.fetch_add(by, Ordering::Relaxed) + by;
        self.peak_bytes.fetch_max(now, Ordering::Relaxed);
    }
}

static MEMORY_PRESSURE: AtomicUsize = AtomicUsize::new(0);

/// Bytes of unmanaged memory currently held by regions.
///
/// Heap and page allocations add to this on allocate / grow and remove from
/// it on shrink / free.
#[must_use]
pub fn memory_pressure() -> usize {
    MEMORY_PRESSURE.load(Ordering::Relaxed)
}

/// Report `bytes` of newly held unmanaged memory.
pub fn add_memory_pressure(bytes: usize) {
    MEMORY_PRESSURE.fetch_add(bytes, Ordering::Relaxed);
}

/// Report `bytes` of unmanaged memory released. Saturates at zero.
pub fn remove_memory_pressure(bytes: usize) {
    let _ = MEMORY_PRESSURE.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |p| {
        Some(p.saturating_sub(bytes))
    });
}
