//! Unchecked access to region memory.
//!
//! [`RawView`] is plain pointer arithmetic on a snapshot of a region's base
//! address. Nothing is bounds checked, nothing is locked and nothing stops
//! the region from being resized or disposed underneath the view. Use it
//! where the checked accessors on [`MemoryRegion`] are too slow or too
//! strict, and uphold the safety contract by hand.

use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr;

use crate::pod::Pod;
use crate::region::MemoryRegion;

/// Byte offset of the `index`th `T` after `offset`, wrapping like pointer arithmetic.
const fn element_offset<T>(offset: usize, index: usize) -> usize {
    offset.wrapping_add(index.wrapping_mul(size_of::<T>()))
}

/// Unchecked view of a region's bytes.
#[derive(Clone, Copy, Debug)]
pub struct RawView<'a> {
    base: *mut u8,
    size: usize,
    _region: PhantomData<&'a MemoryRegion>,
}

impl RawView<'_> {
    pub(crate) const fn new(base: *mut u8, size: usize) -> Self {
        Self {
            base,
            size,
            _region: PhantomData,
        }
    }

    /// Base address captured when the view was created.
    pub const fn base(&self) -> *mut u8 {
        self.base
    }

    /// Size captured when the view was created. Informational only.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Reads a `T` at `offset`.
    ///
    /// # Safety
    ///
    /// `base + offset .. + size_of::<T>()` must lie inside live, initialized
    /// memory of the region, with no concurrent writer.
    pub unsafe fn read<T: Pod>(&self, offset: usize) -> T {
        unsafe { self.base.add(offset).cast::<T>().read_unaligned() }
    }

    /// Reads the `index`th `T` of an array at `offset`.
    ///
    /// # Safety
    ///
    /// As [`read`](Self::read), for the element's byte range.
    pub unsafe fn read_at<T: Pod>(&self, offset: usize, index: usize) -> T {
        unsafe { self.read(element_offset::<T>(offset, index)) }
    }

    /// Writes a `T` at `offset`.
    ///
    /// # Safety
    ///
    /// `base + offset .. + size_of::<T>()` must lie inside live memory of the
    /// region, with no concurrent reader or writer.
    pub unsafe fn write<T: Pod>(&self, offset: usize, value: T) {
        unsafe { self.base.add(offset).cast::<T>().write_unaligned(value) }
    }

    /// Writes the `index`th `T` of an array at `offset`.
    ///
    /// # Safety
    ///
    /// As [`write`](Self::write), for the element's byte range.
    pub unsafe fn write_at<T: Pod>(&self, offset: usize, index: usize, value: T) {
        unsafe { self.write(element_offset::<T>(offset, index), value) }
    }

    /// Reads a pointer at `offset`.
    ///
    /// # Safety
    ///
    /// As [`read`](Self::read).
    pub unsafe fn read_ptr(&self, offset: usize) -> *mut u8 {
        unsafe { self.base.add(offset).cast::<*mut u8>().read_unaligned() }
    }

    /// Writes a pointer at `offset`.
    ///
    /// # Safety
    ///
    /// As [`write`](Self::write).
    pub unsafe fn write_ptr(&self, offset: usize, value: *const u8) {
        unsafe { self.base.add(offset).cast::<*const u8>().write_unaligned(value) }
    }

    /// Copies `len` bytes at `offset` out.
    ///
    /// # Safety
    ///
    /// As [`read`](Self::read), for `len` bytes.
    pub unsafe fn read_bytes(&self, offset: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        unsafe { ptr::copy_nonoverlapping(self.base.add(offset), out.as_mut_ptr(), len) };
        out
    }

    /// Copies `data` in at `offset`.
    ///
    /// # Safety
    ///
    /// As [`write`](Self::write), for `data.len()` bytes.
    pub unsafe fn write_bytes(&self, offset: usize, data: &[u8]) {
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), self.base.add(offset), data.len()) };
    }

    /// Reads `len` UTF-16 code units at `offset`.
    ///
    /// # Safety
    ///
    /// As [`read`](Self::read), for `2 * len` bytes.
    pub unsafe fn read_unicode_string(&self, offset: usize, len: usize) -> String {
        let bytes = unsafe { self.read_bytes(offset, len * 2) };
        crate::region::decode_utf16(&bytes)
    }
}
