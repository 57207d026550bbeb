//! Atomic reference counting with two-phase teardown.
//!
//! A plain [`UseCount`] is a single atomic counter with `use`/`release`
//! operations. [`Refcount`] combines two of them, `external` and `internal`,
//! so that an object (typically a [`crate::ubuf`] payload owner, but also
//! pipes in the layer above) can distinguish "no one outside still points at
//! me" from "I am truly unreachable and can free my storage".
//!
//! The split matters for subpipes: a super pipe's subpipe can have zero
//! external references (the application released its handle) while the
//! super pipe still holds an internal reference to run teardown logic (throw
//! `SOURCE-END`, detach from the super's list) before the final free. See
//! `upipe-pipe::helpers::subpipe` for the pipe-level consumer of this.
//!
//! Operations are infallible, as the spec requires: misuse (releasing past
//! zero) is only checked in debug builds, via `debug_assert!`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Weak};

/// A single atomic use-count.
///
/// `new()` starts at 1 (the initial owner's implicit reference), matching
/// the allocation-time `urefcount_init` convention in the original C.
pub struct UseCount(AtomicUsize);

impl UseCount {
    /// Create a new count starting at 1.
    pub fn new() -> Self {
        Self(AtomicUsize::new(1))
    }

    /// Increment the count.
    pub fn increment(&self) {
        let prev = self.0.fetch_add(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "use() on a refcount that already reached zero");
    }

    /// Decrement the count, returning the count *after* the decrement.
    ///
    /// A caller sees `0` exactly once, at the transition that should trigger
    /// cleanup.
    pub fn decrement(&self) -> usize {
        let prev = self.0.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "release() on a refcount that already reached zero");
        prev - 1
    }

    /// Current value. Racy by nature (another thread may concurrently
    /// use/release) unless the caller holds external synchronization; used
    /// to answer the "am I the sole owner" query right before a map-write.
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// True when this is the only outstanding reference, i.e. the only safe
    /// time to mutate the pointee in place.
    pub fn is_single(&self) -> bool {
        self.get() == 1
    }
}

impl Default for UseCount {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for UseCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("UseCount").field(&self.get()).finish()
    }
}

/// Two-phase refcount: `external` uses model handles held by other pipes or
/// the application; `internal` ("real") uses model the object's own
/// self-references (e.g. a pipe holding itself alive while urefs are
/// in-flight, or a super pipe holding its subpipes alive during teardown).
///
/// External reaching zero should trigger a "going away" notification
/// (no-input / detach); internal reaching zero is the actual free point.
/// Both start at 1, and the owner that calls `Refcount::new()` is expected
/// to release both exactly once over the object's lifetime, in addition to
/// whatever `use_external`/`use_internal` calls it makes.
#[derive(Debug, Default)]
pub struct Refcount {
    external: UseCount,
    internal: UseCount,
}

impl Refcount {
    /// Create a fresh refcount with one external and one internal use.
    pub fn new() -> Self {
        Self {
            external: UseCount::new(),
            internal: UseCount::new(),
        }
    }

    /// Take an external reference.
    pub fn use_external(&self) {
        self.external.increment();
    }

    /// Release an external reference. Returns `true` exactly once: when the
    /// external count reaches zero. The caller should treat this as "no
    /// external party can reach me anymore" and run detach/no-input logic,
    /// then drop its own internal reference.
    pub fn release_external(&self) -> bool {
        self.external.decrement() == 0
    }

    /// Take an internal ("real") reference.
    pub fn use_internal(&self) {
        self.internal.increment();
    }

    /// Release an internal reference. Returns `true` exactly once: when the
    /// internal count reaches zero. This is the final-free signal.
    pub fn release_internal(&self) -> bool {
        self.internal.decrement() == 0
    }

    /// True when there is exactly one external reference outstanding - the
    /// only time a shared payload may be mutated in place.
    pub fn is_single(&self) -> bool {
        self.external.is_single()
    }

    /// Current external use count, for diagnostics/tests only.
    pub fn external_count(&self) -> usize {
        self.external.get()
    }

    /// Current internal use count, for diagnostics/tests only.
    pub fn internal_count(&self) -> usize {
        self.internal.get()
    }
}

/// A back-reference that does not keep its target alive, and can be
/// explicitly severed.
///
/// Used for the super/sub and output/input back-pointers described in
/// spec §4.1: "when pipe A points to pipe B as its output and B must hold a
/// back-reference for callbacks, B holds a weak handle... cleared by A on
/// teardown before A drops B." A plain [`std::sync::Weak`] upgrade would
/// work too, but an explicit `clear()` makes the teardown ordering visible
/// at the call site instead of relying on the pointee's drop glue.
pub struct WeakRef<T>(Mutex<Option<Weak<T>>>);

impl<T> WeakRef<T> {
    /// An empty weak reference.
    pub fn empty() -> Self {
        Self(Mutex::new(None))
    }

    /// Point this weak reference at `target`.
    pub fn set(&self, target: &std::sync::Arc<T>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = Some(std::sync::Arc::downgrade(target));
    }

    /// Attempt to upgrade to a strong reference.
    pub fn upgrade(&self) -> Option<std::sync::Arc<T>> {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Explicitly sever the link, independent of the pointee's lifetime.
    pub fn clear(&self) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

impl<T> Default for WeakRef<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> fmt::Debug for WeakRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present = self
            .0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some();
        f.debug_struct("WeakRef").field("present", &present).finish()
    }
}
