//! Heap-backed regions.
//!
//! A [`Heap`] owns a private native heap created without OS-level
//! serialization (`HEAP_NO_SERIALIZE | HEAP_GROWABLE` on Windows). The
//! native heap therefore must never be entered from two threads at once;
//! `Heap` provides that guarantee with a mutex around every call.
//!
//! Every region allocated from a heap holds an `Arc` to it, so a heap is
//! only destroyed once its last allocation is gone.

use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use sys_alloc::{HeapOptions, RawHeap};

use crate::error::{Error, Result};
use crate::metrics::{add_memory_pressure, remove_memory_pressure, HeapMetrics};
use crate::object::BaseObject;
use crate::region::{Backing, MemoryRegion};
use crate::tracing::internal as log;

/// A private native heap.
pub struct Heap {
    raw: Mutex<RawHeap>,
    metrics: HeapMetrics,
}

static PROCESS_HEAP: OnceLock<Arc<Heap>> = OnceLock::new();

impl Heap {
    /// Creates a growable, unserialized heap.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the heap could not be created.
    pub fn new() -> Result<Arc<Self>> {
        Self::with_options(&HeapOptions::new())
    }

    /// Creates a heap with explicit options.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the heap could not be created.
    pub fn with_options(options: &HeapOptions) -> Result<Arc<Self>> {
        let raw = options.create()?;
        log::log_heap_created(options.is_growable());
        Ok(Arc::new(Self {
            raw: Mutex::new(raw),
            metrics: HeapMetrics::new(),
        }))
    }

    /// The process-wide heap used by [`Region::allocate`](crate::Region::allocate).
    ///
    /// Created on first use and never destroyed.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the heap could not be created on first use.
    pub fn process() -> Result<Arc<Self>> {
        if let Some(heap) = PROCESS_HEAP.get() {
            return Ok(Arc::clone(heap));
        }
        let heap = Self::new()?;
        // A racing thread may have won; its heap is kept and ours is dropped unused.
        Ok(Arc::clone(PROCESS_HEAP.get_or_init(|| heap)))
    }

    /// Allocation counters for this heap.
    pub const fn metrics(&self) -> &HeapMetrics {
        &self.metrics
    }

    /// Allocations handed out and not yet freed.
    pub fn outstanding(&self) -> usize {
        self.metrics.outstanding()
    }

    /// Blocks the native heap considers live, free-list caches included.
    pub fn live_blocks(&self) -> usize {
        self.raw.lock().live_blocks()
    }

    /// Allocates `size` zero-filled bytes.
    pub(crate) fn alloc(&self, size: usize) -> Result<NonNull<u8>> {
        let ptr = self.raw.lock().alloc_zeroed(size);
        ptr.map_or_else(
            || Err(self.failed(size)),
            |ptr| {
                self.metrics.record_alloc(size);
                add_memory_pressure(size);
                Ok(ptr)
            },
        )
    }

    /// Resizes a block, zero-filling any growth.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block of `old_size` bytes from this heap. On
    /// success it is invalid and the returned pointer replaces it; on failure
    /// it is untouched.
    pub(crate) unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
    ) -> Result<NonNull<u8>> {
        // SAFETY: forwarded from the caller.
        let new = unsafe { self.raw.lock().realloc(ptr, new_size) };
        let Some(new) = new else {
            return Err(self.failed(new_size));
        };

        if new_size > old_size {
            // SAFETY: the block now holds `new_size` bytes.
            unsafe { new.as_ptr().add(old_size).write_bytes(0, new_size - old_size) };
            add_memory_pressure(new_size - old_size);
        } else {
            remove_memory_pressure(old_size - new_size);
        }
        self.metrics.record_resize(old_size, new_size);
        log::log_resize(old_size, new_size, new != ptr);
        Ok(new)
    }

    /// Returns a block to the heap.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block of `size` bytes from this heap.
    pub(crate) unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded from the caller.
        unsafe { self.raw.lock().free(ptr) };
        self.metrics.record_free(size);
        remove_memory_pressure(size);
    }

    fn failed(&self, size: usize) -> Error {
        self.metrics.record_failure();
        log::log_allocation_failure(size);
        Error::OutOfMemory { size }
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("outstanding", &self.metrics.outstanding())
            .field("allocated_bytes", &self.metrics.allocated_bytes())
            .finish_non_exhaustive()
    }
}

impl BaseObject<MemoryRegion> {
    /// Allocates `size` zero-filled bytes from the process heap.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the heap cannot satisfy the request.
    pub fn allocate(size: usize) -> Result<Self> {
        Self::allocate_in(&Heap::process()?, size)
    }

    /// Allocates `size` zero-filled bytes from `heap`.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfMemory`] if the heap cannot satisfy the request.
    pub fn allocate_in(heap: &Arc<Heap>, size: usize) -> Result<Self> {
        let ptr = heap.alloc(size)?;
        Ok(Self::new(MemoryRegion::new(
            ptr.as_ptr(),
            size,
            Backing::Heap(Arc::clone(heap)),
            "heap",
        )))
    }

    /// Resizes the allocation in place when the heap can, moving it otherwise.
    /// Contents up to the smaller size are kept; growth is zero-filled.
    ///
    /// Children created before a resize see the new memory; accesses past
    /// the parent's new size fail.
    ///
    /// # Errors
    ///
    /// `NotResizable` for regions that are not heap allocations,
    /// `ObjectDisposed` after cleanup, `OutOfMemory` if the heap refuses.
    /// On error the region is unchanged.
    pub fn resize(&self, new_size: usize) -> Result<()> {
        let mut span = self.span.write();
        let heap = match &span.backing {
            Backing::Heap(heap) => Arc::clone(heap),
            Backing::Released => return Err(Error::ObjectDisposed),
            _ => return Err(Error::NotResizable),
        };
        let base = NonNull::new(span.base).ok_or(Error::ObjectDisposed)?;

        // SAFETY: `base` is this region's live block of `span.size` bytes, and
        // the write lock keeps every other accessor out.
        let new = unsafe { heap.realloc(base, span.size, new_size)? };
        span.base = new.as_ptr();
        span.size = new_size;
        Ok(())
    }

    /// Replaces the allocation with a fresh zero-filled one of `new_size`
    /// bytes. Old contents are discarded.
    ///
    /// The new block is obtained before the old one is freed, so on error the
    /// region still holds its old memory.
    ///
    /// # Errors
    ///
    /// As [`resize`](Self::resize).
    pub fn resize_new(&self, new_size: usize) -> Result<()> {
        let mut span = self.span.write();
        let heap = match &span.backing {
            Backing::Heap(heap) => Arc::clone(heap),
            Backing::Released => return Err(Error::ObjectDisposed),
            _ => return Err(Error::NotResizable),
        };
        let old = NonNull::new(span.base).ok_or(Error::ObjectDisposed)?;

        let new = heap.alloc(new_size)?;
        // SAFETY: `old` is this region's live block and nothing else refers to it.
        unsafe { heap.free(old, span.size) };
        log::log_resize(span.size, new_size, true);
        span.base = new.as_ptr();
        span.size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Region;

    #[test]
    fn test_allocate_is_zeroed() {
        let heap = Heap::new().unwrap();
        let region = Region::allocate_in(&heap, 32).unwrap();
        assert_eq!(region.read_bytes(0, 32).unwrap(), vec![0u8; 32]);
        region.free();
    }

    #[test]
    fn test_resize_grows_with_zero_tail() {
        let heap = Heap::new().unwrap();
        let region = Region::allocate_in(&heap, 4).unwrap();
        region.fill(0, 4, 0xaa).unwrap();
        region.resize(4096).unwrap();
        assert_eq!(region.size(), 4096);
        assert_eq!(region.read_u32(0).unwrap(), 0xaaaa_aaaa);
        assert_eq!(region.read_u32(4).unwrap(), 0);
        assert_eq!(heap.metrics().allocated_bytes(), 4096);
        assert_eq!(heap.outstanding(), 1);
        region.free();
        assert_eq!(heap.outstanding(), 0);
        assert_eq!(heap.metrics().allocated_bytes(), 0);
    }

    #[test]
    fn test_resize_new_discards_contents() {
        let heap = Heap::new().unwrap();
        let region = Region::allocate_in(&heap, 8).unwrap();
        region.write_u64(0, u64::MAX).unwrap();
        region.resize_new(16).unwrap();
        assert_eq!(region.size(), 16);
        assert_eq!(region.read_u64(0).unwrap(), 0);
        assert_eq!(heap.outstanding(), 1);
        region.free();
        assert_eq!(heap.live_blocks(), 0);
    }

    #[test]
    fn test_resize_rejects_foreign_memory() {
        let mut buf = [0u8; 8];
        let region = unsafe { Region::from_raw_parts(buf.as_mut_ptr(), buf.len()) };
        assert!(matches!(region.resize(16), Err(Error::NotResizable)));
        assert!(matches!(region.resize_new(16), Err(Error::NotResizable)));
    }

    #[test]
    fn test_resize_after_free_rejected() {
        let heap = Heap::new().unwrap();
        let region = Region::allocate_in(&heap, 8).unwrap();
        region.free();
        assert!(matches!(region.resize(16), Err(Error::ObjectDisposed)));
    }

    #[test]
    fn test_process_heap_is_shared() {
        let a = Heap::process().unwrap();
        let b = Heap::process().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
