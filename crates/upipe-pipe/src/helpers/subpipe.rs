//! Subpipe helper (spec §4.6): the super/sub relationship.
//!
//! A super pipe owns a list of subpipes; each subpipe holds a
//! [`upipe_core::refcount::WeakRef`] back to its super so the pair cannot
//! form a reference cycle, and so the super can be torn down before its
//! subpipes even though the subpipes point back at it (spec §4.1's note on
//! "the two-level refcount exists to support subpipes that outlive their
//! super's external visibility").

use std::sync::Arc;

use parking_lot::Mutex;
use upipe_core::refcount::WeakRef;

use crate::pipe::Pipe;

/// Held by a super pipe: the list of subpipes it owns.
pub struct SubpipeHelper {
    subs: Mutex<Vec<Arc<dyn Pipe>>>,
}

impl SubpipeHelper {
    pub fn new() -> Self {
        Self { subs: Mutex::new(Vec::new()) }
    }

    /// Register a newly allocated subpipe.
    pub fn add(&self, sub: Arc<dyn Pipe>) {
        self.subs.lock().push(sub);
    }

    /// Drop a subpipe from the list (its external refcount is released by
    /// the caller separately; this only stops the super from walking it).
    pub fn remove(&self, sub: &Arc<dyn Pipe>) {
        self.subs.lock().retain(|s| !Arc::ptr_eq(s, sub));
    }

    /// Number of live subpipes.
    pub fn len(&self) -> usize {
        self.subs.lock().len()
    }

    /// True if there are no subpipes left.
    pub fn is_empty(&self) -> bool {
        self.subs.lock().is_empty()
    }

    /// Implements `ITERATE-SUB`: `None` starts iteration; `Some(prev)` asks
    /// for the subpipe that follows `prev` in the list. Returns `None` once
    /// every subpipe has been visited, guaranteeing each is visited exactly
    /// once for a list that is not concurrently mutated mid-iteration
    /// (spec §8 invariant 8, applied to subpipes instead of split-flows).
    pub fn iterate(&self, prev: Option<&Arc<dyn Pipe>>) -> Option<Arc<dyn Pipe>> {
        let subs = self.subs.lock();
        match prev {
            None => subs.first().cloned(),
            Some(prev) => {
                let idx = subs.iter().position(|s| Arc::ptr_eq(s, prev))?;
                subs.get(idx + 1).cloned()
            }
        }
    }

    /// Snapshot of every currently live subpipe, for callers (like a bin's
    /// teardown) that need to walk the whole set without juggling the
    /// cursor protocol.
    pub fn all(&self) -> Vec<Arc<dyn Pipe>> {
        self.subs.lock().clone()
    }
}

impl Default for SubpipeHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SubpipeHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubpipeHelper").field("len", &self.len()).finish()
    }
}

/// Held by a subpipe: the back-reference to its super, severed explicitly
/// on teardown rather than relying on the super's drop glue (spec §4.1).
pub type SuperRef<T> = WeakRef<T>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlAnswer, ControlCommand, PipeResult};
    use crate::error::PipeError;
    use upipe_core::refcount::Refcount;
    use upipe_core::uref::Uref;

    #[derive(Debug)]
    struct Leaf(Refcount);
    impl Pipe for Leaf {
        fn refcount(&self) -> &Refcount {
            &self.0
        }
        fn input(&self, _uref: Uref, _pump_source: Option<crate::pipe::PumpSource>) {}
        fn control(&self, _command: ControlCommand) -> PipeResult {
            Err(PipeError::Unhandled)
        }
    }

    fn leaf() -> Arc<dyn Pipe> {
        Arc::new(Leaf(Refcount::new()))
    }

    #[test]
    fn iterate_visits_every_sub_exactly_once() {
        let helper = SubpipeHelper::new();
        let (a, b, c) = (leaf(), leaf(), leaf());
        helper.add(a.clone());
        helper.add(b.clone());
        helper.add(c.clone());

        let mut seen = Vec::new();
        let mut cursor = helper.iterate(None);
        while let Some(sub) = cursor {
            seen.push(Arc::as_ptr(&sub));
            cursor = helper.iterate(Some(&sub));
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(seen, vec![Arc::as_ptr(&a), Arc::as_ptr(&b), Arc::as_ptr(&c)]);
    }

    #[test]
    fn remove_drops_from_future_iteration() {
        let helper = SubpipeHelper::new();
        let (a, b) = (leaf(), leaf());
        helper.add(a.clone());
        helper.add(b.clone());
        helper.remove(&a);
        assert_eq!(helper.len(), 1);
        assert!(Arc::ptr_eq(&helper.iterate(None).unwrap(), &b));
    }

    #[test]
    fn weak_super_ref_does_not_prevent_super_teardown() {
        let super_pipe = Arc::new(Leaf(Refcount::new()));
        let back_ref: SuperRef<Leaf> = SuperRef::empty();
        back_ref.set(&super_pipe);
        assert!(back_ref.upgrade().is_some());
        drop(super_pipe);
        assert!(back_ref.upgrade().is_none());
    }
}
