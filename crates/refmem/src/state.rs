//! The packed lifecycle word behind every [`BaseObject`](crate::BaseObject).
//!
//! One `usize` carries three flags and the reference count:
//!
//! | bits  | field               |
//! |-------|---------------------|
//! | 0     | [`OWNED`]           |
//! | 1     | [`COLLECTOR_OWNED`] |
//! | 2     | [`DISPOSED`]        |
//! | 3..   | reference count     |
//!
//! Every transition is a compare-exchange retry loop on that single word, so
//! it is the only point of serialization between threads.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{Error, Result};

/// The object participates in reference counting at all.
pub const OWNED: usize = 0x1;
/// The collector (last-handle drop) still holds one reference.
pub const COLLECTOR_OWNED: usize = 0x2;
/// The cleanup hook has run.
pub const DISPOSED: usize = 0x4;
/// All flag bits.
pub const FLAGS_MASK: usize = OWNED | COLLECTOR_OWNED | DISPOSED;
/// Shift of the reference count field.
pub const REF_COUNT_SHIFT: u32 = 3;
/// One reference, in word units.
pub const REF_COUNT_ONE: usize = 1 << REF_COUNT_SHIFT;
/// Largest representable reference count.
pub const MAX_REF_COUNT: usize = usize::MAX >> REF_COUNT_SHIFT;

/// Outcome of [`PackedState::dereference`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The object is not owned; nothing changed.
    Unowned,
    /// The count dropped but references remain.
    Live(usize),
    /// This call took the count to zero. The caller runs cleanup, then
    /// [`PackedState::mark_disposed`].
    Zero,
}

#[cold]
#[inline(never)]
#[track_caller]
fn count_underflow(count: usize, n: usize) -> ! {
    panic!("reference count underflow: dereferencing {n} with only {count} held (object state corrupted)")
}

/// Atomic packed state word.
#[derive(Debug)]
pub struct PackedState {
    word: AtomicUsize,
}

impl PackedState {
    /// Owned, collector-owned, one reference.
    #[must_use]
    pub const fn owned() -> Self {
        Self {
            word: AtomicUsize::new(OWNED | COLLECTOR_OWNED | REF_COUNT_ONE),
        }
    }

    /// Not owned: reference counting is a no-op and cleanup never runs.
    #[must_use]
    pub const fn unowned() -> Self {
        Self {
            word: AtomicUsize::new(0),
        }
    }

    /// Raw word, for diagnostics.
    #[inline]
    pub fn load(&self) -> usize {
        self.word.load(Ordering::Acquire)
    }

    /// Returns `true` while the object participates in reference counting.
    #[inline]
    pub fn is_owned(&self) -> bool {
        self.load() & OWNED != 0
    }

    /// Returns `true` while the collector still holds its reference.
    #[inline]
    pub fn is_collector_owned(&self) -> bool {
        self.load() & COLLECTOR_OWNED != 0
    }

    /// Returns `true` once cleanup has completed.
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.load() & DISPOSED != 0
    }

    /// Current reference count.
    #[inline]
    pub fn ref_count(&self) -> usize {
        self.load() >> REF_COUNT_SHIFT
    }

    /// Adds `n` references and returns the new count.
    ///
    /// Returns `Ok(0)` without touching the word when the object is not owned.
    ///
    /// # Errors
    ///
    /// [`Error::ObjectDisposed`] once the count has reached zero, and
    /// [`Error::RefCountOverflow`] if the count field would overflow.
    pub fn reference(&self, n: usize) -> Result<usize> {
        let mut current = self.word.load(Ordering::Relaxed);
        loop {
            if current & OWNED == 0 {
                return Ok(0);
            }
            let count = current >> REF_COUNT_SHIFT;
            if count == 0 {
                return Err(Error::ObjectDisposed);
            }
            if n == 0 {
                return Ok(count);
            }
            let new_count = count
                .checked_add(n)
                .filter(|&c| c <= MAX_REF_COUNT)
                .ok_or(Error::RefCountOverflow)?;
            let new = (current & FLAGS_MASK) | (new_count << REF_COUNT_SHIFT);
            match self.word.compare_exchange_weak(
                current,
                new,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Ok(new_count),
                Err(actual) => current = actual,
            }
        }
    }

    /// Drops `n` references.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `n` references are held. The word is left
    /// unchanged; this is a corrupted-state invariant check, not an error path.
    #[track_caller]
    pub fn dereference(&self, n: usize) -> Release {
        let mut current = self.word.load(Ordering::Relaxed);
        loop {
            if current & OWNED == 0 {
                return Release::Unowned;
            }
            let count = current >> REF_COUNT_SHIFT;
            if count < n {
                count_underflow(count, n);
            }
            if n == 0 {
                return Release::Live(count);
            }
            let new = current - (n << REF_COUNT_SHIFT);
            match self.word.compare_exchange_weak(
                current,
                new,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) if count == n => return Release::Zero,
                Ok(_) => return Release::Live(count - n),
                Err(actual) => current = actual,
            }
        }
    }

    /// Clears [`COLLECTOR_OWNED`].
    ///
    /// Returns `true` if this call cleared the bit while the collector's
    /// reference was still counted; the caller must then drop that reference.
    /// Returns `false` if the bit was already clear, the object is not owned,
    /// or the count has already reached zero.
    pub fn release_collector(&self) -> bool {
        let mut current = self.word.load(Ordering::Relaxed);
        loop {
            if current & OWNED == 0 || current & COLLECTOR_OWNED == 0 {
                return false;
            }
            let live = current >> REF_COUNT_SHIFT != 0;
            match self.word.compare_exchange_weak(
                current,
                current & !COLLECTOR_OWNED,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return live,
                Err(actual) => current = actual,
            }
        }
    }

    /// Clears [`OWNED`] and [`COLLECTOR_OWNED`]. One way.
    ///
    /// Returns `true` if the object was owned before the call.
    pub fn disable_ownership(&self) -> bool {
        let previous = self
            .word
            .fetch_and(!(OWNED | COLLECTOR_OWNED), Ordering::AcqRel);
        previous & OWNED != 0
    }

    /// Sets [`DISPOSED`]. Called once, after cleanup.
    pub fn mark_disposed(&self) {
        self.word.fetch_or(DISPOSED, Ordering::Release);
    }
}
