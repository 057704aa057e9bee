//! Reference-counted disposable objects and typed access to unmanaged memory.
//!
//! `refmem` provides two layers:
//!
//! - [`BaseObject<T>`]: a handle to a resource whose lifetime is governed by
//!   a single packed atomic word (owned / collector-owned / disposed flags
//!   plus a reference count). The resource's [`Cleanup`] hook runs exactly
//!   once, when the count reaches zero.
//! - [`Region`]: a `BaseObject` over a span of raw memory, with bounds
//!   checked typed reads and writes at byte offsets. Regions come from a
//!   private native [`Heap`], from OS pages, from a [`FreeList`], from
//!   foreign memory, or from a sub-range of another region.
//!
//! # Quick Start
//!
//! ```
//! use refmem::Region;
//!
//! let region = Region::allocate(64)?;
//! region.write_i32(0, -7)?;
//! region.write_i16(4, 300)?;
//! assert_eq!(region.read_i32(0)?, -7);
//! assert_eq!(region.read_i16(4)?, 300);
//!
//! // A child keeps its parent's memory alive.
//! let header = region.make_child(0, 8)?;
//! region.free();
//! assert_eq!(header.read_i32(0)?, -7);
//! header.free();
//! # Ok::<(), refmem::Error>(())
//! ```
//!
//! # Ownership
//!
//! A new object holds one reference on behalf of its handles. Calling
//! [`BaseObject::dispose`] gives that reference up explicitly; dropping the
//! last handle gives it up implicitly. Explicit [`BaseObject::reference`] /
//! [`BaseObject::dereference`] pairs keep the resource alive past either.
//!
//! # Thread Safety
//!
//! `BaseObject<T>` and `Region` are `Send + Sync`. Lifecycle transitions are
//! lock-free compare-exchange loops; region memory is guarded by a
//! reader-writer lock per region; native heaps are serialized by a mutex.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod error;
mod free_list;
mod heap;
mod metrics;
mod object;
mod page;
mod pod;
mod raw;
mod region;
mod tracing;

pub mod state;

pub use error::{Error, Result};
pub use free_list::FreeList;
pub use heap::Heap;
pub use metrics::{
    add_memory_pressure, memory_pressure, object_metrics, remove_memory_pressure, HeapMetrics,
    ObjectMetrics,
};
pub use object::{BaseObject, Cleanup};
pub use pod::Pod;
pub use raw::RawView;
pub use region::{MemoryRegion, Region};
pub use sys_alloc::HeapOptions;
