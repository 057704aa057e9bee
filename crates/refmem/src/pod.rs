//! Plain-old-data marker for typed region access.

/// A fixed-layout value that may be copied to and from raw bytes.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` or `#[repr(transparent)]` (or a
/// primitive), contain no padding bytes, no pointers that carry ownership,
/// no references, and be valid for every bit pattern.
///
/// ```
/// use refmem::Pod;
///
/// #[derive(Clone, Copy)]
/// #[repr(C)]
/// struct Header {
///     magic: u32,
///     len: u32,
/// }
///
/// unsafe impl Pod for Header {}
/// ```
pub unsafe trait Pod: Copy + 'static {}

macro_rules! impl_pod {
    ($($t:ty),* $(,)?) => {
        $(unsafe impl Pod for $t {})*
    };
}

impl_pod!(u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, usize, isize, f32, f64);

unsafe impl<T: Pod, const N: usize> Pod for [T; N] {}

