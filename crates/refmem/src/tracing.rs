//! Structured logging hooks.
//!
//! With the `tracing` feature enabled these emit `tracing` events; without it
//! they are empty inline functions.

#[cfg(feature = "tracing")]
pub mod internal {
    use tracing::Level;

    /// The cleanup hook of an object ran.
    pub fn log_cleanup(kind: &'static str, disposing: bool) {
        tracing::event!(Level::DEBUG, kind, disposing, "object_cleanup");
    }

    /// The last handle was dropped while explicit references were still held.
    pub fn log_leaked_references(kind: &'static str, remaining: usize) {
        tracing::warn!(kind, remaining, "references_leaked");
    }

    /// A private heap was created.
    pub fn log_heap_created(growable: bool) {
        tracing::debug!(growable, "heap_created");
    }

    /// A heap refused an allocation or resize.
    pub fn log_allocation_failure(size: usize) {
        tracing::warn!(size, "allocation_failed");
    }

    /// A region was resized.
    pub fn log_resize(old_size: usize, new_size: usize, moved: bool) {
        tracing::trace!(old_size, new_size, moved, "region_resized");
    }
}

#[cfg(not(feature = "tracing"))]
pub mod internal {
    /// Stub function when tracing is disabled.
    #[inline]
    pub const fn log_cleanup(_kind: &'static str, _disposing: bool) {}

    /// Stub function when tracing is disabled.
    #[inline]
    pub const fn log_leaked_references(_kind: &'static str, _remaining: usize) {}

    /// Stub function when tracing is disabled.
    #[inline]
    pub const fn log_heap_created(_growable: bool) {}

    /// Stub function when tracing is disabled.
    #[inline]
    pub const fn log_allocation_failure(_size: usize) {}

    /// Stub function when tracing is disabled.
    #[inline]
    pub const fn log_resize(_old_size: usize, _new_size: usize, _moved: bool) {}
}
