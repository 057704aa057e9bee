//! Error type shared by every fallible operation in the crate.

use std::io;

/// Result alias using [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors returned by object, region and heap operations.
///
/// Broken internal invariants (a reference count driven below zero) are not
/// represented here; they panic.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The heap could not satisfy an allocation or resize.
    #[error("out of memory allocating {size} bytes")]
    OutOfMemory {
        /// Requested size in bytes.
        size: usize,
    },

    /// An access fell outside the region.
    #[error("access of {len} bytes at offset {offset} is outside a region of {size} bytes")]
    OutOfBounds {
        /// Byte offset of the access.
        offset: usize,
        /// Length of the access in bytes.
        len: usize,
        /// Current size of the region.
        size: usize,
    },

    /// The object has already been disposed.
    #[error("object has been disposed")]
    ObjectDisposed,

    /// Taking the reference would overflow the packed reference count.
    #[error("reference count overflow")]
    RefCountOverflow,

    /// The region's backing store cannot be resized.
    #[error("region is not heap-backed and cannot be resized")]
    NotResizable,

    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An OS call failed.
    #[error(transparent)]
    Os(#[from] io::Error),
}

impl Error {
    pub(crate) const fn out_of_bounds(offset: usize, len: usize, size: usize) -> Self {
        Self::OutOfBounds { offset, len, size }
    }
}
