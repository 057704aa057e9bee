//! Page-backed regions.

use sys_alloc::MmapOptions;

use crate::error::{Error, Result};
use crate::metrics::add_memory_pressure;
use crate::object::BaseObject;
use crate::region::{Backing, MemoryRegion};
use crate::tracing::internal as log;

impl BaseObject<MemoryRegion> {
    /// Maps committed, zero-filled read-write pages straight from the OS.
    ///
    /// The region's size is `size` rounded up to whole pages. Disposing it
    /// unmaps the pages.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a zero size, `OutOfMemory` if the OS refuses.
    pub fn allocate_pages(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidArgument("page allocation size must be non-zero"));
        }
        let mmap = MmapOptions::new().len(size).map_anon().map_err(|_| {
            log::log_allocation_failure(size);
            Error::OutOfMemory { size }
        })?;

        let (base, len) = (mmap.ptr(), mmap.len());
        add_memory_pressure(len);
        Ok(Self::new(MemoryRegion::new(
            base,
            len,
            Backing::Pages(mmap),
            "pages",
        )))
    }
}
