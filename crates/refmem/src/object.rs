//! Reference-counted disposable objects.
//!
//! A [`BaseObject`] pairs a resource with a [packed state word](crate::state).
//! There are two independent ways to hold the resource alive:
//!
//! - **Explicit references**, taken with [`BaseObject::reference`] and
//!   dropped with [`BaseObject::dereference`].
//! - **Collector ownership**: a fresh object starts with one reference that
//!   belongs to its handles as a group. [`BaseObject::dispose`] gives that
//!   reference up explicitly; otherwise dropping the last handle gives it up
//!   (the finalizing path, `disposing == false`).
//!
//! The cleanup hook runs exactly once, on the transition of the count to
//! zero, whichever path gets there.
//!
//! Cloning a handle does not take a reference.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::Result;
use crate::metrics::object_metrics;
use crate::state::{PackedState, Release};
use crate::tracing::internal as log;

/// Resource release hook.
pub trait Cleanup: Send + Sync {
    /// Releases the underlying resource.
    ///
    /// `disposing` is `true` when the final reference was dropped by explicit
    /// code and `false` when it was dropped by the last handle going away.
    /// Called at most once per object.
    fn cleanup(&self, disposing: bool);

    /// Short label for log events.
    fn kind(&self) -> &'static str {
        "object"
    }
}

struct ObjectInner<T: Cleanup> {
    state: PackedState,
    value: T,
}

impl<T: Cleanup> ObjectInner<T> {
    #[track_caller]
    fn release(&self, n: usize, disposing: bool) -> usize {
        match self.state.dereference(n) {
            Release::Unowned => 0,
            Release::Live(count) => {
                object_metrics().record_dereferenced(n);
                count
            }
            Release::Zero => {
                object_metrics().record_dereferenced(n);
                self.value.cleanup(disposing);
                object_metrics().record_cleanup();
                log::log_cleanup(self.value.kind(), disposing);
                self.state.mark_disposed();
                0
            }
        }
    }
}

impl<T: Cleanup> Drop for ObjectInner<T> {
    fn drop(&mut self) {
        if self.state.release_collector() {
            object_metrics().record_finalized();
            let remaining = self.release(1, false);
            if remaining != 0 {
                log::log_leaked_references(self.value.kind(), remaining);
            }
        }
    }
}

/// Shared handle to a reference-counted disposable resource.
pub struct BaseObject<T: Cleanup> {
    inner: Arc<ObjectInner<T>>,
}

impl<T: Cleanup> BaseObject<T> {
    /// Wraps `value` as an owned object: collector-owned with one reference.
    pub fn new(value: T) -> Self {
        object_metrics().record_created();
        Self {
            inner: Arc::new(ObjectInner {
                state: PackedState::owned(),
                value,
            }),
        }
    }

    /// Wraps `value` without ownership. Reference counting is a no-op and
    /// the cleanup hook never runs.
    pub fn unowned(value: T) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                state: PackedState::unowned(),
                value,
            }),
        }
    }

    /// Takes one reference. See [`reference_n`](Self::reference_n).
    ///
    /// # Errors
    ///
    /// Same as [`reference_n`](Self::reference_n).
    pub fn reference(&self) -> Result<usize> {
        self.reference_n(1)
    }

    /// Takes `n` references and returns the new count, or 0 if the object is
    /// not owned.
    ///
    /// # Errors
    ///
    /// [`Error::ObjectDisposed`](crate::Error::ObjectDisposed) once the count
    /// has reached zero, [`Error::RefCountOverflow`](crate::Error::RefCountOverflow)
    /// if the count field is full.
    pub fn reference_n(&self, n: usize) -> Result<usize> {
        let count = self.inner.state.reference(n)?;
        if count != 0 {
            object_metrics().record_referenced(n);
        }
        Ok(count)
    }

    /// Drops one reference, running cleanup if it was the last.
    ///
    /// # Panics
    ///
    /// Panics if no reference is held.
    #[track_caller]
    pub fn dereference(&self) -> usize {
        self.dereference_n(1, true)
    }

    /// Drops `n` references and returns the remaining count. When the count
    /// reaches zero the cleanup hook runs with `disposing`, then the object
    /// is marked disposed.
    ///
    /// Returns 0 without effect if the object is not owned.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `n` references are held: the state is corrupt.
    #[track_caller]
    pub fn dereference_n(&self, n: usize, disposing: bool) -> usize {
        self.inner.release(n, disposing)
    }

    /// Gives up the collector's reference.
    ///
    /// Only the first call has an effect; it runs cleanup if no explicit
    /// references remain.
    pub fn dispose(&self) {
        if self.inner.state.release_collector() {
            object_metrics().record_disposed();
            self.inner.release(1, true);
        }
    }

    /// Removes the object from reference counting for good, disposing it
    /// first if `dispose` is set.
    ///
    /// Without `dispose` the resource is never cleaned up by this object; the
    /// caller takes responsibility for it.
    pub fn disable_ownership(&self, dispose: bool) {
        if dispose {
            self.dispose();
        }
        self.inner.state.disable_ownership();
    }

    /// Returns `true` while the object participates in reference counting.
    pub fn is_owned(&self) -> bool {
        self.inner.state.is_owned()
    }

    /// Returns `true` until the collector's reference is given up.
    pub fn is_collector_owned(&self) -> bool {
        self.inner.state.is_collector_owned()
    }

    /// Returns `true` once the cleanup hook has run.
    pub fn is_disposed(&self) -> bool {
        self.inner.state.is_disposed()
    }

    /// Current reference count.
    pub fn ref_count(&self) -> usize {
        self.inner.state.ref_count()
    }

    /// Returns `true` if both handles point to the same object.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.inner, &other.inner)
    }

    /// Number of live handles (not references).
    pub fn handle_count(this: &Self) -> usize {
        Arc::strong_count(&this.inner)
    }

    #[cfg(test)]
    fn raw_state(&self) -> usize {
        self.inner.state.load()
    }
}

impl<T: Cleanup> Clone for BaseObject<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Cleanup> Deref for BaseObject<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner.value
    }
}

impl<T: Cleanup> fmt::Debug for BaseObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseObject")
            .field("kind", &self.inner.value.kind())
            .field("owned", &self.is_owned())
            .field("collector_owned", &self.is_collector_owned())
            .field("disposed", &self.is_disposed())
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Probe {
        explicit: AtomicUsize,
        finalized: AtomicUsize,
    }

    impl Probe {
        fn total(&self) -> usize {
            self.explicit.load(Ordering::SeqCst) + self.finalized.load(Ordering::SeqCst)
        }
    }

    impl Cleanup for Arc<Probe> {
        fn cleanup(&self, disposing: bool) {
            if disposing {
                self.explicit.fetch_add(1, Ordering::SeqCst);
            } else {
                self.finalized.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn probe() -> (Arc<Probe>, BaseObject<Arc<Probe>>) {
        let p = Arc::new(Probe::default());
        (Arc::clone(&p), BaseObject::new(p))
    }

    #[test]
    fn test_dispose_runs_cleanup_once() {
        let (p, obj) = probe();
        obj.dispose();
        obj.dispose();
        assert_eq!(p.explicit.load(Ordering::SeqCst), 1);
        assert!(obj.is_disposed());
        assert!(!obj.is_collector_owned());
        drop(obj);
        assert_eq!(p.total(), 1);
    }

    #[test]
    fn test_drop_last_handle_finalizes() {
        let (p, obj) = probe();
        let second = obj.clone();
        drop(obj);
        assert_eq!(p.total(), 0);
        drop(second);
        assert_eq!(p.finalized.load(Ordering::SeqCst), 1);
        assert_eq!(p.explicit.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_explicit_reference_outlives_dispose() {
        let (p, obj) = probe();
        assert_eq!(obj.reference().unwrap(), 2);
        obj.dispose();
        assert_eq!(p.total(), 0);
        assert!(!obj.is_disposed());
        assert_eq!(obj.dereference(), 0);
        assert_eq!(p.explicit.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dereference_to_zero_then_drop_does_not_finalize_again() {
        let (p, obj) = probe();
        assert_eq!(obj.dereference(), 0);
        assert!(obj.is_disposed());
        drop(obj);
        assert_eq!(p.total(), 1);
    }

    #[test]
    fn test_reference_after_disposal_rejected() {
        let (_p, obj) = probe();
        obj.dispose();
        assert!(matches!(obj.reference(), Err(Error::ObjectDisposed)));
    }

    #[test]
    #[should_panic(expected = "reference count underflow")]
    fn test_dereference_disposed_object_panics() {
        let (_p, obj) = probe();
        obj.dispose();
        obj.dereference();
    }

    #[test]
    fn test_disable_ownership_without_dispose() {
        let (p, obj) = probe();
        obj.disable_ownership(false);
        assert!(!obj.is_owned());
        assert_eq!(obj.reference().unwrap(), 0);
        assert_eq!(obj.dereference(), 0);
        obj.dispose();
        drop(obj);
        assert_eq!(p.total(), 0);
    }

    #[test]
    fn test_disable_ownership_with_dispose() {
        let (p, obj) = probe();
        obj.disable_ownership(true);
        assert_eq!(p.explicit.load(Ordering::SeqCst), 1);
        assert!(!obj.is_owned());
        drop(obj);
        assert_eq!(p.total(), 1);
    }

    #[test]
    fn test_unowned_never_cleans_up() {
        let p = Arc::new(Probe::default());
        let obj = BaseObject::unowned(Arc::clone(&p));
        assert_eq!(obj.ref_count(), 0);
        obj.dispose();
        drop(obj);
        assert_eq!(p.total(), 0);
    }

    #[test]
    fn test_new_object_state_word() {
        use crate::state::{COLLECTOR_OWNED, DISPOSED, OWNED, REF_COUNT_SHIFT};

        let (_p, obj) = probe();
        let word = obj.raw_state();
        assert_eq!(word & (OWNED | COLLECTOR_OWNED | DISPOSED), OWNED | COLLECTOR_OWNED);
        assert_eq!(word >> REF_COUNT_SHIFT, 1);
        obj.dispose();
        assert_eq!(obj.raw_state(), OWNED | DISPOSED);
    }

    #[test]
    fn test_handle_count_is_not_ref_count() {
        let (_p, obj) = probe();
        let other = obj.clone();
        assert_eq!(BaseObject::handle_count(&obj), 2);
        assert_eq!(obj.ref_count(), 1);
        assert!(BaseObject::ptr_eq(&obj, &other));
    }
}
