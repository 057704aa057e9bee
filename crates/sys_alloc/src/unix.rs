use std::io::{self, Error};
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(any(target_os = "linux", target_os = "android"))]
const MAP_POPULATE: libc::c_int = libc::MAP_POPULATE;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MAP_POPULATE: libc::c_int = 0;

/// Returns the system page size, cached atomically.
pub fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            #[allow(clippy::cast_sign_loss)]
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize };
            PAGE_SIZE.store(page_size, Ordering::Relaxed);
            page_size
        }
        page_size => page_size,
    }
}

pub struct MmapInner {
    ptr: *mut libc::c_void,
    len: usize,
}

impl MmapInner {
    /// Maps `len` bytes of private anonymous read-write memory.
    ///
    /// # Safety
    ///
    /// Calls `mmap`. `len` must be a non-zero multiple of the page size.
    pub unsafe fn map_anon(len: usize, populate: bool) -> io::Result<Self> {
        let populate = if populate { MAP_POPULATE } else { 0 };
        let flags = libc::MAP_PRIVATE | libc::MAP_ANON | populate;
        let prot = libc::PROT_READ | libc::PROT_WRITE;

        let ptr = unsafe { libc::mmap(ptr::null_mut(), len, prot, flags, -1, 0) };
        if ptr == libc::MAP_FAILED {
            return Err(Error::last_os_error());
        }

        Ok(Self { ptr, len })
    }

    pub const fn ptr(&self) -> *mut u8 {
        self.ptr.cast::<u8>()
    }

    pub const fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MmapInner {
    fn drop(&mut self) {
        if self.len > 0 {
            unsafe {
                libc::munmap(self.ptr, self.len);
            }
        }
    }
}

/// There is no private heap API on Unix; blocks come from the C allocator.
/// Per-heap bookkeeping lives in `RawHeap`.
pub struct HeapInner;

impl HeapInner {
    #[allow(clippy::unnecessary_wraps)]
    pub const fn create(
        _initial_size: usize,
        _maximum_size: usize,
        _serialize: bool,
    ) -> io::Result<Self> {
        Ok(Self)
    }

    pub fn alloc(&mut self, size: usize, zero: bool) -> *mut u8 {
        unsafe {
            if zero {
                libc::calloc(1, size).cast::<u8>()
            } else {
                libc::malloc(size).cast::<u8>()
            }
        }
    }

    pub unsafe fn realloc(&mut self, ptr: *mut u8, size: usize) -> *mut u8 {
        unsafe { libc::realloc(ptr.cast::<libc::c_void>(), size).cast::<u8>() }
    }

    pub unsafe fn free(&mut self, ptr: *mut u8) {
        unsafe { libc::free(ptr.cast::<libc::c_void>()) };
    }
}
