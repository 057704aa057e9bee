//! OS allocation primitives.
//!
//! Two kinds of native memory are exposed here:
//!
//! - [`Mmap`]: committed, read-write anonymous pages straight from the
//!   virtual memory manager (`mmap` / `VirtualAlloc`).
//! - [`RawHeap`]: a private native heap (`HeapCreate` on Windows, the C
//!   allocator with per-heap block accounting elsewhere).
//!
//! Neither type does any locking of its own. A [`RawHeap`] is `Send` but not
//! `Sync`, and every allocating method takes `&mut self`, so callers that
//! share a heap must put it behind a lock.

use std::io;
use std::ptr::NonNull;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Returns the system allocation granularity.
///
/// On Windows, this is typically 64KB. On Unix, this is the page size.
pub fn allocation_granularity() -> usize {
    #[cfg(windows)]
    {
        os::allocation_granularity()
    }
    #[cfg(unix)]
    {
        os::page_size()
    }
}

/// Rounds `len` up to the next multiple of the page size.
///
/// Returns `None` on overflow.
pub fn round_to_pages(len: usize) -> Option<usize> {
    let page = page_size();
    len.checked_add(page - 1).map(|n| n & !(page - 1))
}

// ============================================================================
// Page mappings
// ============================================================================

/// A committed anonymous page mapping.
///
/// The pages are released when this handle is dropped.
pub struct Mmap {
    inner: os::MmapInner,
}

impl Mmap {
    /// Returns a pointer to the first byte of the mapping.
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Returns the length of the mapping in bytes (always a whole number of pages).
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the mapping is empty. Live mappings never are.
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }
}

unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

/// Configuration for an anonymous page mapping.
#[derive(Debug, Clone, Default)]
pub struct MmapOptions {
    len: usize,
    populate: bool,
}

impl MmapOptions {
    /// Creates options with a length of 0. A length must be set before mapping.
    pub const fn new() -> Self {
        Self {
            len: 0,
            populate: false,
        }
    }

    /// Sets the requested length. It is rounded up to whole pages when mapped.
    pub const fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Pre-fault the page tables (`MAP_POPULATE` on Linux, ignored elsewhere).
    pub const fn populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }

    /// Maps committed read-write pages large enough to hold the requested length.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for a zero or overflowing length, or the OS error
    /// if the mapping could not be created.
    pub fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }
        let len = round_to_pages(self.len).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "length overflows the address space")
        })?;

        // SAFETY: a fresh anonymous mapping with no address hint aliases nothing.
        let inner = unsafe { os::MmapInner::map_anon(len, self.populate)? };
        Ok(Mmap { inner })
    }
}

// ============================================================================
// Private heaps
// ============================================================================

/// Configuration for a private native heap.
#[derive(Debug, Clone)]
pub struct HeapOptions {
    initial_size: usize,
    maximum_size: usize,
    serialize: bool,
    zero_memory: bool,
}

impl HeapOptions {
    /// Growable, unserialized heap with no initial commit.
    pub const fn new() -> Self {
        Self {
            initial_size: 0,
            maximum_size: 0,
            serialize: false,
            zero_memory: false,
        }
    }

    /// Bytes committed up front.
    pub const fn initial_size(mut self, size: usize) -> Self {
        self.initial_size = size;
        self
    }

    /// Upper bound on the heap size. 0 means the heap is growable.
    ///
    /// Only honored on Windows.
    pub const fn maximum_size(mut self, size: usize) -> Self {
        self.maximum_size = size;
        self
    }

    /// Ask the OS heap to serialize its own calls.
    ///
    /// Off by default: the owner of a [`RawHeap`] is expected to serialize
    /// access, which `&mut self` already enforces.
    pub const fn serialize(mut self, serialize: bool) -> Self {
        self.serialize = serialize;
        self
    }

    /// Zero every block handed out by [`RawHeap::alloc`].
    pub const fn zero_memory(mut self, zero: bool) -> Self {
        self.zero_memory = zero;
        self
    }

    /// Returns `true` when the heap has no maximum size.
    pub const fn is_growable(&self) -> bool {
        self.maximum_size == 0
    }

    /// Creates the heap.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the heap could not be created.
    pub fn create(&self) -> io::Result<RawHeap> {
        let inner = os::HeapInner::create(self.initial_size, self.maximum_size, self.serialize)?;
        Ok(RawHeap {
            inner,
            zero_memory: self.zero_memory,
            live_blocks: 0,
        })
    }
}

impl Default for HeapOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A private native heap.
///
/// Blocks are handed out as raw pointers. The heap counts its live blocks;
/// freeing a pointer that did not come from this heap is undefined behavior.
pub struct RawHeap {
    inner: os::HeapInner,
    zero_memory: bool,
    live_blocks: usize,
}

// The heap handle may move between threads; it is never used from two at once.
unsafe impl Send for RawHeap {}

impl RawHeap {
    /// Allocates `size` bytes. Zero-sized requests get a one byte block.
    pub fn alloc(&mut self, size: usize) -> Option<NonNull<u8>> {
        let zero = self.zero_memory;
        self.alloc_with(size, zero)
    }

    /// Allocates `size` zeroed bytes.
    pub fn alloc_zeroed(&mut self, size: usize) -> Option<NonNull<u8>> {
        self.alloc_with(size, true)
    }

    fn alloc_with(&mut self, size: usize, zero: bool) -> Option<NonNull<u8>> {
        let ptr = NonNull::new(self.inner.alloc(size.max(1), zero))?;
        self.live_blocks += 1;
        Some(ptr)
    }

    /// Resizes a block, moving it if needed. Contents up to the smaller of the
    /// old and new sizes are preserved.
    ///
    /// On failure the original block is left untouched and still owned by the caller.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block returned by this heap.
    pub unsafe fn realloc(&mut self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        // SAFETY: forwarded from the caller.
        NonNull::new(unsafe { self.inner.realloc(ptr.as_ptr(), new_size.max(1)) })
    }

    /// Returns a block to the heap.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live block returned by this heap; it is invalid afterwards.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        // SAFETY: forwarded from the caller.
        unsafe { self.inner.free(ptr.as_ptr()) };
        self.live_blocks -= 1;
    }

    /// Number of blocks allocated and not yet freed.
    pub const fn live_blocks(&self) -> usize {
        self.live_blocks
    }
}
