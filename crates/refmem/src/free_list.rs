//! Fixed-size block cache in front of a [`Heap`].
//!
//! Released blocks are parked in a lock-free queue instead of going back to
//! the heap, up to a maximum count; past that they are freed normally.

use std::ptr::NonNull;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

use crate::error::{Error, Result};
use crate::heap::Heap;
use crate::object::BaseObject;
use crate::region::{Backing, MemoryRegion, Region};

struct Block(NonNull<u8>);

// Blocks are plain heap memory with no thread affinity.
unsafe impl Send for Block {}

pub(crate) struct FreeListInner {
    heap: Arc<Heap>,
    block_size: usize,
    cache: ArrayQueue<Block>,
}

impl FreeListInner {
    /// Takes back a block handed out by [`FreeList::allocate`].
    pub(crate) fn release(&self, ptr: NonNull<u8>) {
        if let Err(Block(ptr)) = self.cache.push(Block(ptr)) {
            // SAFETY: every block of this list is `block_size` bytes from `heap`.
            unsafe { self.heap.free(ptr, self.block_size) };
        }
    }
}

impl Drop for FreeListInner {
    fn drop(&mut self) {
        while let Some(Block(ptr)) = self.cache.pop() {
            // SAFETY: cached blocks are owned by the list alone.
            unsafe { self.heap.free(ptr, self.block_size) };
        }
    }
}

/// A cache of `block_size`-byte heap blocks.
///
/// Cloning shares the cache. Regions handed out keep the cache alive.
#[derive(Clone)]
pub struct FreeList {
    inner: Arc<FreeListInner>,
}

impl FreeList {
    /// Creates a list that keeps up to `maximum_count` released blocks.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if `block_size` or `maximum_count` is zero.
    pub fn new(heap: Arc<Heap>, block_size: usize, maximum_count: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::InvalidArgument("free list block size must be non-zero"));
        }
        if maximum_count == 0 {
            return Err(Error::InvalidArgument("free list maximum count must be non-zero"));
        }
        Ok(Self {
            inner: Arc::new(FreeListInner {
                heap,
                block_size,
                cache: ArrayQueue::new(maximum_count),
            }),
        })
    }

    /// Hands out a zero-filled block, reusing a cached one when available.
    ///
    /// Disposing the returned region gives the block back to this list.
    ///
    /// # Errors
    ///
    /// `OutOfMemory` if the cache is empty and the heap refuses.
    pub fn allocate(&self) -> Result<Region> {
        let size = self.inner.block_size;
        let ptr = match self.inner.cache.pop() {
            Some(Block(ptr)) => {
                // SAFETY: the block is `size` bytes and owned by us alone.
                unsafe { ptr.as_ptr().write_bytes(0, size) };
                ptr
            }
            None => self.inner.heap.alloc(size)?,
        };
        Ok(BaseObject::new(MemoryRegion::new(
            ptr.as_ptr(),
            size,
            Backing::Block(Arc::clone(&self.inner)),
            "block",
        )))
    }

    /// Blocks currently parked in the cache.
    pub fn cached(&self) -> usize {
        self.inner.cache.len()
    }

    /// Size of every block.
    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    /// Most blocks the cache will hold.
    pub fn maximum_count(&self) -> usize {
        self.inner.cache.capacity()
    }
}

impl std::fmt::Debug for FreeList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreeList")
            .field("block_size", &self.block_size())
            .field("cached", &self.cached())
            .field("maximum_count", &self.maximum_count())
            .finish()
    }
}
