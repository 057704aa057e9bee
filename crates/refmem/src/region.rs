//! Memory regions: typed, offset-addressed access to unmanaged memory.
//!
//! A [`Region`] is a [`BaseObject`] wrapping a [`MemoryRegion`]. What the
//! region's cleanup does depends on where its bytes came from:
//!
//! | backing   | created by                         | cleanup                       |
//! |-----------|------------------------------------|-------------------------------|
//! | foreign   | [`Region::from_raw_parts`]         | forgets the pointer           |
//! | heap      | [`Region::allocate`]               | frees to the owning [`Heap`]  |
//! | pages     | [`Region::allocate_pages`]         | unmaps the pages              |
//! | block     | [`FreeList::allocate`]             | returns the block to the list |
//! | child     | [`Region::make_child`]             | dereferences the parent       |
//!
//! # Bounds
//!
//! Every accessor on [`MemoryRegion`] is bounds checked against the current
//! size and fails with [`Error::OutOfBounds`] or, after cleanup,
//! [`Error::ObjectDisposed`]. Unchecked pointer arithmetic is available only
//! through the `unsafe` methods of [`RawView`](crate::RawView).
//!
//! # Locking
//!
//! Each region carries a `RwLock` over its base, size and backing. Reads
//! share it; writes, resizes and cleanup take it exclusively. A child holds
//! its own lock shared and then goes through its parent, so all access to a
//! block of memory is serialized by the lock of the region that owns it.
//!
//! [`Heap`]: crate::Heap
//! [`FreeList::allocate`]: crate::FreeList::allocate
//! [`Region::allocate`]: crate::Region::allocate
//! [`Region::allocate_pages`]: crate::Region::allocate_pages

use std::mem::{self, size_of};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use parking_lot::RwLock;
use sys_alloc::Mmap;

use crate::error::{Error, Result};
use crate::free_list::FreeListInner;
use crate::heap::Heap;
use crate::metrics::remove_memory_pressure;
use crate::object::{BaseObject, Cleanup};
use crate::pod::Pod;
use crate::raw::RawView;

/// A reference-counted memory region.
pub type Region = BaseObject<MemoryRegion>;

pub(crate) enum Backing {
    Foreign,
    Heap(Arc<Heap>),
    Pages(Mmap),
    Block(Arc<FreeListInner>),
    Child { parent: Region, offset: usize },
    Released,
}

pub(crate) struct Span {
    /// Null for children; their bytes are found through the parent.
    pub(crate) base: *mut u8,
    pub(crate) size: usize,
    pub(crate) backing: Backing,
}

/// How far an access extends.
#[derive(Clone, Copy)]
enum Extent {
    Exact(usize),
    ToEnd,
}

impl Extent {
    fn resolve(self, offset: usize, size: usize) -> Result<usize> {
        let len = match self {
            Self::Exact(len) => len,
            Self::ToEnd => size.checked_sub(offset).ok_or(Error::out_of_bounds(offset, 0, size))?,
        };
        match offset.checked_add(len) {
            Some(end) if end <= size => Ok(len),
            _ => Err(Error::out_of_bounds(offset, len, size)),
        }
    }
}

/// A span of unmanaged memory. Use it through a [`Region`] handle.
pub struct MemoryRegion {
    pub(crate) span: RwLock<Span>,
    kind: &'static str,
}

// The raw base pointer is only dereferenced under `span`'s lock.
unsafe impl Send for MemoryRegion {}
unsafe impl Sync for MemoryRegion {}

impl MemoryRegion {
    pub(crate) fn new(base: *mut u8, size: usize, backing: Backing, kind: &'static str) -> Self {
        Self {
            span: RwLock::new(Span { base, size, backing }),
            kind,
        }
    }

    /// Current base address. Null after cleanup.
    pub fn address(&self) -> *mut u8 {
        let span = self.span.read();
        match &span.backing {
            Backing::Released => ptr::null_mut(),
            Backing::Child { parent, offset } => {
                let base = parent.address();
                if base.is_null() {
                    base
                } else {
                    base.wrapping_add(*offset)
                }
            }
            _ => span.base,
        }
    }

    /// Current size in bytes. Zero after cleanup.
    pub fn size(&self) -> usize {
        self.span.read().size
    }

    /// Returns `true` for regions created by [`Region::make_child`].
    pub fn is_child(&self) -> bool {
        matches!(self.span.read().backing, Backing::Child { .. })
    }

    /// Returns `true` once the region's memory has been released.
    pub fn is_released(&self) -> bool {
        matches!(self.span.read().backing, Backing::Released)
    }

    /// Unchecked view of the current base address.
    pub fn raw_view(&self) -> RawView<'_> {
        RawView::new(self.address(), self.size())
    }

    fn read_span<R>(&self, offset: usize, extent: Extent, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let span = self.span.read();
        let len = match &span.backing {
            Backing::Released => return Err(Error::ObjectDisposed),
            backing => {
                let len = extent.resolve(offset, span.size)?;
                if let Backing::Child { parent, offset: start } = backing {
                    let at = start
                        .checked_add(offset)
                        .ok_or(Error::out_of_bounds(offset, len, span.size))?;
                    return parent.read_span(at, Extent::Exact(len), f);
                }
                len
            }
        };
        if len == 0 {
            return Ok(f(&[]));
        }
        // SAFETY: `offset + len <= size` and region memory is always initialized;
        // the shared lock excludes writers for the lifetime of the slice.
        let bytes = unsafe { std::slice::from_raw_parts(span.base.add(offset), len) };
        Ok(f(bytes))
    }

    fn write_span<R>(
        &self,
        offset: usize,
        extent: Extent,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        {
            let span = self.span.read();
            match &span.backing {
                Backing::Released => return Err(Error::ObjectDisposed),
                Backing::Child { parent, offset: start } => {
                    let len = extent.resolve(offset, span.size)?;
                    let at = start
                        .checked_add(offset)
                        .ok_or(Error::out_of_bounds(offset, len, span.size))?;
                    return parent.write_span(at, Extent::Exact(len), f);
                }
                _ => {}
            }
        }

        let span = self.span.write();
        if matches!(span.backing, Backing::Released) {
            return Err(Error::ObjectDisposed);
        }
        let len = extent.resolve(offset, span.size)?;
        if len == 0 {
            return Ok(f(&mut []));
        }
        // SAFETY: bounds checked above; the exclusive lock makes this the only
        // live view of the region's bytes.
        let bytes = unsafe { std::slice::from_raw_parts_mut(span.base.add(offset), len) };
        Ok(f(bytes))
    }

    // ------------------------------------------------------------------
    // Bytes
    // ------------------------------------------------------------------

    /// Copies `buf.len()` bytes starting at `offset` into `buf`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the range leaves the region, `ObjectDisposed` after cleanup.
    pub fn read_into(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.read_span(offset, Extent::Exact(buf.len()), |src| buf.copy_from_slice(src))
    }

    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the range leaves the region, `ObjectDisposed` after cleanup.
    pub fn read_bytes(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        self.read_span(offset, Extent::Exact(len), <[u8]>::to_vec)
    }

    /// Writes `data` starting at `offset`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the range leaves the region, `ObjectDisposed` after cleanup.
    pub fn write_bytes(&self, offset: usize, data: &[u8]) -> Result<()> {
        self.write_span(offset, Extent::Exact(data.len()), |dst| dst.copy_from_slice(data))
    }

    /// Sets `len` bytes starting at `offset` to `value`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the range leaves the region, `ObjectDisposed` after cleanup.
    pub fn fill(&self, offset: usize, len: usize, value: u8) -> Result<()> {
        self.write_span(offset, Extent::Exact(len), |dst| dst.fill(value))
    }

    /// Zeroes the whole region.
    ///
    /// # Errors
    ///
    /// `ObjectDisposed` after cleanup.
    pub fn zero(&self) -> Result<()> {
        self.write_span(0, Extent::ToEnd, |dst| dst.fill(0))
    }

    // ------------------------------------------------------------------
    // Fixed-layout values
    // ------------------------------------------------------------------

    /// Reads a `T` at `offset`. No alignment is required.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the value leaves the region, `ObjectDisposed` after cleanup.
    pub fn read<T: Pod>(&self, offset: usize) -> Result<T> {
        self.read_span(offset, Extent::Exact(size_of::<T>()), |src| {
            // SAFETY: `src` holds exactly `size_of::<T>()` bytes and `T: Pod`.
            unsafe { src.as_ptr().cast::<T>().read_unaligned() }
        })
    }

    /// Writes a `T` at `offset`. No alignment is required.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the value leaves the region, `ObjectDisposed` after cleanup.
    pub fn write<T: Pod>(&self, offset: usize, value: T) -> Result<()> {
        self.write_span(offset, Extent::Exact(size_of::<T>()), |dst| {
            // SAFETY: `dst` holds exactly `size_of::<T>()` bytes and `T: Pod`.
            unsafe { dst.as_mut_ptr().cast::<T>().write_unaligned(value) }
        })
    }

    /// Reads the `index`th `T` of an array starting at `offset`.
    ///
    /// # Errors
    ///
    /// As [`read`](Self::read); an index whose byte offset overflows is out of bounds.
    pub fn read_at<T: Pod>(&self, offset: usize, index: usize) -> Result<T> {
        self.read(self.element_offset::<T>(offset, index)?)
    }

    /// Writes the `index`th `T` of an array starting at `offset`.
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write); an index whose byte offset overflows is out of bounds.
    pub fn write_at<T: Pod>(&self, offset: usize, index: usize, value: T) -> Result<()> {
        self.write(self.element_offset::<T>(offset, index)?, value)
    }

    /// Reads a `#[repr(C)]` struct; the `index`th element of an array of them
    /// starting at `offset`.
    ///
    /// # Errors
    ///
    /// As [`read_at`](Self::read_at).
    pub fn read_struct<T: Pod>(&self, offset: usize, index: usize) -> Result<T> {
        self.read_at(offset, index)
    }

    /// Writes a `#[repr(C)]` struct as the `index`th element of an array of
    /// them starting at `offset`.
    ///
    /// # Errors
    ///
    /// As [`write_at`](Self::write_at).
    pub fn write_struct<T: Pod>(&self, offset: usize, index: usize, value: T) -> Result<()> {
        self.write_at(offset, index, value)
    }

    fn element_offset<T: Pod>(&self, offset: usize, index: usize) -> Result<usize> {
        index
            .checked_mul(size_of::<T>())
            .and_then(|delta| offset.checked_add(delta))
            .ok_or_else(|| Error::out_of_bounds(offset, size_of::<T>(), self.size()))
    }

    /// Reads a pointer-sized address at `offset`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the value leaves the region, `ObjectDisposed` after cleanup.
    pub fn read_ptr(&self, offset: usize) -> Result<*mut u8> {
        self.read_span(offset, Extent::Exact(size_of::<*mut u8>()), |src| {
            // SAFETY: `src` holds exactly one pointer's worth of bytes.
            unsafe { src.as_ptr().cast::<*mut u8>().read_unaligned() }
        })
    }

    /// Reads the `index`th pointer of an array starting at `offset`.
    ///
    /// # Errors
    ///
    /// As [`read_ptr`](Self::read_ptr).
    pub fn read_ptr_at(&self, offset: usize, index: usize) -> Result<*mut u8> {
        self.read_ptr(self.element_offset::<usize>(offset, index)?)
    }

    /// Writes a pointer-sized address at `offset`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the value leaves the region, `ObjectDisposed` after cleanup.
    pub fn write_ptr(&self, offset: usize, value: *const u8) -> Result<()> {
        self.write_span(offset, Extent::Exact(size_of::<*const u8>()), |dst| {
            // SAFETY: `dst` holds exactly one pointer's worth of bytes.
            unsafe { dst.as_mut_ptr().cast::<*const u8>().write_unaligned(value) }
        })
    }

    /// Writes the `index`th pointer of an array starting at `offset`.
    ///
    /// # Errors
    ///
    /// As [`write_ptr`](Self::write_ptr).
    pub fn write_ptr_at(&self, offset: usize, index: usize, value: *const u8) -> Result<()> {
        self.write_ptr(self.element_offset::<usize>(offset, index)?, value)
    }

    // ------------------------------------------------------------------
    // ANSI strings: one byte per character, Latin-1
    // ------------------------------------------------------------------

    /// Reads `len` single-byte characters at `offset`.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the range leaves the region, `ObjectDisposed` after cleanup.
    pub fn read_ansi_string(&self, offset: usize, len: usize) -> Result<String> {
        self.read_span(offset, Extent::Exact(len), decode_ansi)
    }

    /// Reads single-byte characters at `offset` up to a NUL or the end of the region.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if `offset` is past the end, `ObjectDisposed` after cleanup.
    pub fn read_ansi_string_nul(&self, offset: usize) -> Result<String> {
        self.read_span(offset, Extent::ToEnd, |src| {
            let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
            decode_ansi(&src[..end])
        })
    }

    /// Writes `s` at `offset` as single-byte characters, no terminator.
    /// Characters above U+00FF are written as `?`. Returns the bytes written.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the string does not fit, `ObjectDisposed` after cleanup.
    pub fn write_ansi_string(&self, offset: usize, s: &str) -> Result<usize> {
        let bytes = encode_ansi(s);
        self.write_bytes(offset, &bytes)?;
        Ok(bytes.len())
    }

    /// As [`write_ansi_string`](Self::write_ansi_string), followed by a NUL.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the string and terminator do not fit.
    pub fn write_ansi_string_nul(&self, offset: usize, s: &str) -> Result<usize> {
        let mut bytes = encode_ansi(s);
        bytes.push(0);
        self.write_bytes(offset, &bytes)?;
        Ok(bytes.len())
    }

    // ------------------------------------------------------------------
    // UTF-16 strings, native byte order
    // ------------------------------------------------------------------

    /// Reads `len` UTF-16 code units at `offset`. Unpaired surrogates become U+FFFD.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the range leaves the region, `ObjectDisposed` after cleanup.
    pub fn read_unicode_string(&self, offset: usize, len: usize) -> Result<String> {
        let bytes = len
            .checked_mul(2)
            .ok_or_else(|| Error::out_of_bounds(offset, usize::MAX, self.size()))?;
        self.read_span(offset, Extent::Exact(bytes), decode_utf16)
    }

    /// Reads UTF-16 code units at `offset` up to a NUL unit or the end of the region.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if `offset` is past the end, `ObjectDisposed` after cleanup.
    pub fn read_unicode_string_nul(&self, offset: usize) -> Result<String> {
        self.read_span(offset, Extent::ToEnd, |src| {
            let units = src.len() / 2;
            let end = (0..units)
                .find(|&i| src[2 * i] == 0 && src[2 * i + 1] == 0)
                .unwrap_or(units);
            decode_utf16(&src[..2 * end])
        })
    }

    /// Reads a string stored as a `u16` byte count followed by that many
    /// bytes of UTF-16.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the prefix or the data leaves the region,
    /// `InvalidArgument` if the prefix is not a whole number of code units.
    pub fn read_prefixed_unicode_string(&self, offset: usize) -> Result<String> {
        let size = self.size();
        self.read_span(offset, Extent::ToEnd, |src| {
            if src.len() < 2 {
                return Err(Error::out_of_bounds(offset, 2, size));
            }
            let len = usize::from(u16::from_ne_bytes([src[0], src[1]]));
            if len % 2 != 0 {
                return Err(Error::InvalidArgument("odd byte count in UTF-16 length prefix"));
            }
            let data = src
                .get(2..2 + len)
                .ok_or_else(|| Error::out_of_bounds(offset, 2 + len, size))?;
            Ok(decode_utf16(data))
        })?
    }

    /// Writes `s` at `offset` as UTF-16, no terminator. Returns the bytes written.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the string does not fit, `ObjectDisposed` after cleanup.
    pub fn write_unicode_string(&self, offset: usize, s: &str) -> Result<usize> {
        let bytes = encode_utf16(s, false);
        self.write_bytes(offset, &bytes)?;
        Ok(bytes.len())
    }

    /// As [`write_unicode_string`](Self::write_unicode_string), followed by a NUL unit.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the string and terminator do not fit.
    pub fn write_unicode_string_nul(&self, offset: usize, s: &str) -> Result<usize> {
        let bytes = encode_utf16(s, true);
        self.write_bytes(offset, &bytes)?;
        Ok(bytes.len())
    }

    /// Writes `s` as a `u16` byte count followed by its UTF-16 code units.
    /// Returns the bytes written, prefix included.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` if the encoded string is longer than `u16::MAX`
    /// bytes, `OutOfBounds` if it does not fit.
    pub fn write_prefixed_unicode_string(&self, offset: usize, s: &str) -> Result<usize> {
        let data = encode_utf16(s, false);
        let len = u16::try_from(data.len())
            .map_err(|_| Error::InvalidArgument("string too long for a 16-bit length prefix"))?;
        let mut bytes = Vec::with_capacity(data.len() + 2);
        bytes.extend_from_slice(&len.to_ne_bytes());
        bytes.extend_from_slice(&data);
        self.write_bytes(offset, &bytes)?;
        Ok(bytes.len())
    }
}

macro_rules! typed_accessors {
    ($($t:ty => $read:ident, $read_at:ident, $write:ident, $write_at:ident;)*) => {
        impl MemoryRegion {
            $(
                #[doc = concat!("Reads a `", stringify!($t), "` at `offset`.")]
                ///
                /// # Errors
                ///
                /// `OutOfBounds` if the value leaves the region, `ObjectDisposed` after cleanup.
                pub fn $read(&self, offset: usize) -> Result<$t> {
                    self.read::<$t>(offset)
                }

                #[doc = concat!("Reads the `index`th `", stringify!($t), "` of an array at `offset`.")]
                ///
                /// # Errors
                ///
                /// `OutOfBounds` if the value leaves the region, `ObjectDisposed` after cleanup.
                pub fn $read_at(&self, offset: usize, index: usize) -> Result<$t> {
                    self.read_at::<$t>(offset, index)
                }

                #[doc = concat!("Writes a `", stringify!($t), "` at `offset`.")]
                ///
                /// # Errors
                ///
                /// `OutOfBounds` if the value leaves the region, `ObjectDisposed` after cleanup.
                pub fn $write(&self, offset: usize, value: $t) -> Result<()> {
                    self.write::<$t>(offset, value)
                }

                #[doc = concat!("Writes the `index`th `", stringify!($t), "` of an array at `offset`.")]
                ///
                /// # Errors
                ///
                /// `OutOfBounds` if the value leaves the region, `ObjectDisposed` after cleanup.
                pub fn $write_at(&self, offset: usize, index: usize, value: $t) -> Result<()> {
                    self.write_at::<$t>(offset, index, value)
                }
            )*
        }
    };
}

typed_accessors! {
    u8 => read_u8, read_u8_at, write_u8, write_u8_at;
    i16 => read_i16, read_i16_at, write_i16, write_i16_at;
    u16 => read_u16, read_u16_at, write_u16, write_u16_at;
    i32 => read_i32, read_i32_at, write_i32, write_i32_at;
    u32 => read_u32, read_u32_at, write_u32, write_u32_at;
    i64 => read_i64, read_i64_at, write_i64, write_i64_at;
    u64 => read_u64, read_u64_at, write_u64, write_u64_at;
    usize => read_usize, read_usize_at, write_usize, write_usize_at;
}

fn decode_ansi(bytes: &[u8]) -> String {
    bytes.iter().copied().map(char::from).collect()
}

fn encode_ansi(s: &str) -> Vec<u8> {
    s.chars().map(|c| u8::try_from(c).unwrap_or(b'?')).collect()
}

pub(crate) fn decode_utf16(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn encode_utf16(s: &str, terminate: bool) -> Vec<u8> {
    s.encode_utf16()
        .chain(terminate.then_some(0))
        .flat_map(u16::to_ne_bytes)
        .collect()
}

impl Cleanup for MemoryRegion {
    fn cleanup(&self, disposing: bool) {
        let (base, size, backing) = {
            let mut span = self.span.write();
            (
                mem::replace(&mut span.base, ptr::null_mut()),
                mem::take(&mut span.size),
                mem::replace(&mut span.backing, Backing::Released),
            )
        };

        match backing {
            Backing::Foreign | Backing::Released => {}
            Backing::Heap(heap) => {
                if let Some(base) = NonNull::new(base) {
                    // SAFETY: `base` was allocated from `heap` with `size` bytes
                    // and the span no longer refers to it.
                    unsafe { heap.free(base, size) };
                }
            }
            Backing::Pages(mmap) => {
                remove_memory_pressure(mmap.len());
                drop(mmap);
            }
            Backing::Block(list) => {
                if let Some(base) = NonNull::new(base) {
                    list.release(base);
                }
            }
            Backing::Child { parent, .. } => {
                parent.dereference_n(1, disposing);
            }
        }
    }

    fn kind(&self) -> &'static str {
        self.kind
    }
}

impl BaseObject<MemoryRegion> {
    /// Wraps memory owned by someone else.
    ///
    /// Disposing the region forgets the pointer; the memory itself is never
    /// freed by this crate.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `size` initialized bytes
    /// for as long as the region (or any child of it) is alive and not
    /// disposed, and must not be accessed through other paths meanwhile.
    pub unsafe fn from_raw_parts(ptr: *mut u8, size: usize) -> Self {
        Self::new(MemoryRegion::new(ptr, size, Backing::Foreign, "foreign"))
    }

    /// Creates a region over `size` bytes at `offset` in this one.
    ///
    /// The child takes a reference on this region, which is dropped when the
    /// child is cleaned up; until then this region's cleanup cannot run.
    ///
    /// # Errors
    ///
    /// `OutOfBounds` if the range leaves this region, `ObjectDisposed` if this
    /// region has been cleaned up.
    pub fn make_child(&self, offset: usize, size: usize) -> Result<Self> {
        {
            let span = self.span.read();
            if matches!(span.backing, Backing::Released) {
                return Err(Error::ObjectDisposed);
            }
            Extent::Exact(size).resolve(offset, span.size)?;
        }
        self.reference()?;
        let parent = self.clone();
        Ok(Self::new(MemoryRegion::new(
            ptr::null_mut(),
            size,
            Backing::Child { parent, offset },
            "child",
        )))
    }

    /// Releases the region's memory. Same as [`dispose`](BaseObject::dispose).
    pub fn free(&self) {
        self.dispose();
    }
}
