use std::ffi::c_void;
use std::io::{self, Error};
use std::mem;
use std::ptr;

use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::System::Memory::{
    HeapAlloc, HeapCreate, HeapDestroy, HeapFree, HeapReAlloc, VirtualAlloc, VirtualFree,
    HEAP_FLAGS, MEM_COMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_READWRITE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

const HEAP_NO_SERIALIZE: HEAP_FLAGS = 0x0000_0001;
const HEAP_GROWABLE: HEAP_FLAGS = 0x0000_0002;
const HEAP_ZERO_MEMORY: HEAP_FLAGS = 0x0000_0008;

fn system_info() -> SYSTEM_INFO {
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        info
    }
}

/// Returns the system allocation granularity.
///
/// `VirtualAlloc` addresses are aligned to this value (typically 64KB).
pub fn allocation_granularity() -> usize {
    match system_info().dwAllocationGranularity as usize {
        0 => 65536,
        gran => gran,
    }
}

pub fn page_size() -> usize {
    match system_info().dwPageSize as usize {
        0 => 4096,
        size => size,
    }
}

pub struct MmapInner {
    ptr: *mut c_void,
    len: usize,
}

impl MmapInner {
    /// Reserves and commits `len` bytes of read-write memory.
    pub unsafe fn map_anon(len: usize, _populate: bool) -> io::Result<Self> {
        let ptr = unsafe {
            VirtualAlloc(
                ptr::null(),
                len,
                MEM_COMMIT | MEM_RESERVE,
                PAGE_READWRITE,
            )
        };
        if ptr.is_null() {
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
            // MEM_RELEASE requires dwSize to be 0
            unsafe {
                VirtualFree(self.ptr, 0, MEM_RELEASE);
            }
        }
    }
}

pub struct HeapInner {
    handle: HANDLE,
    flags: HEAP_FLAGS,
}

impl HeapInner {
    pub fn create(initial_size: usize, maximum_size: usize, serialize: bool) -> io::Result<Self> {
        let mut flags = if serialize { 0 } else { HEAP_NO_SERIALIZE };
        if maximum_size == 0 {
            flags |= HEAP_GROWABLE;
        }

        let handle = unsafe { HeapCreate(flags, initial_size, maximum_size) };
        if handle.is_null() {
            return Err(Error::last_os_error());
        }

        Ok(Self {
            handle,
            flags: flags & HEAP_NO_SERIALIZE,
        })
    }

    pub fn alloc(&mut self, size: usize, zero: bool) -> *mut u8 {
        let flags = if zero { self.flags | HEAP_ZERO_MEMORY } else { self.flags };
        unsafe { HeapAlloc(self.handle, flags, size).cast::<u8>() }
    }

    pub unsafe fn realloc(&mut self, ptr: *mut u8, size: usize) -> *mut u8 {
        unsafe { HeapReAlloc(self.handle, self.flags, ptr.cast::<c_void>(), size).cast::<u8>() }
    }

    pub unsafe fn free(&mut self, ptr: *mut u8) {
        unsafe {
            HeapFree(self.handle, self.flags, ptr.cast::<c_void>());
        }
    }
}

impl Drop for HeapInner {
    fn drop(&mut self) {
        unsafe {
            HeapDestroy(self.handle);
        }
    }
}
