//! Flow-def helper (spec §4.6): caches the input flow-def and an
//! attribute-only flow-def separately, recomputing the output flow-def
//! whenever either changes.
//!
//! Splitting "structural" (input) from "attribute-only" changes mirrors
//! `upipe_helper_flow.h`'s `upipe_*_store_flow_def`/`_require_flow_format`
//! split in `original_source/`: a pipe renegotiating only e.g. the
//! language tag shouldn't have to re-derive the whole output format from
//! scratch the way a genuine structural change (new sample rate, new
//! resolution) does.

use upipe_core::uref::Uref;
use parking_lot::Mutex;

/// Caches input/attribute flow-defs and the output flow-def derived from
/// them. The actual derivation is supplied by the pipe (it is the only
/// party that knows its own transform), so this helper holds state, not
/// policy.
pub struct FlowDefHelper {
    input_flow_def: Mutex<Option<Uref>>,
    attr_flow_def: Mutex<Option<Uref>>,
    output_flow_def: Mutex<Option<Uref>>,
}

impl FlowDefHelper {
    pub fn new() -> Self {
        Self {
            input_flow_def: Mutex::new(None),
            attr_flow_def: Mutex::new(None),
            output_flow_def: Mutex::new(None),
        }
    }

    /// The last input flow-def stored via [`Self::set_input_flow_def`].
    pub fn input_flow_def(&self) -> Option<Uref> {
        self.input_flow_def.lock().clone()
    }

    /// The last attribute-only flow-def stored via
    /// [`Self::set_attr_flow_def`].
    pub fn attr_flow_def(&self) -> Option<Uref> {
        self.attr_flow_def.lock().clone()
    }

    /// The most recently computed output flow-def.
    pub fn output_flow_def(&self) -> Option<Uref> {
        self.output_flow_def.lock().clone()
    }

    /// Record a new (structural) input flow-def and recompute the output
    /// flow-def via `compute`. Always returns the freshly computed value,
    /// so the caller (typically through [`super::output::OutputHelper`])
    /// re-emits it downstream - the cache is invalidated unconditionally
    /// on a structural change, per spec.
    pub fn set_input_flow_def(&self, def: Uref, compute: impl FnOnce(&Uref, Option<&Uref>) -> Uref) -> Uref {
        let attr = self.attr_flow_def.lock().clone();
        let out = compute(&def, attr.as_ref());
        *self.input_flow_def.lock() = Some(def);
        *self.output_flow_def.lock() = Some(out.clone());
        out
    }

    /// Record a new attribute-only flow-def (e.g. a language tag change)
    /// and recompute the output flow-def against the cached input
    /// flow-def. Returns `None` if no input flow-def has been set yet (the
    /// attribute change has nothing to combine with).
    pub fn set_attr_flow_def(&self, attrs: Uref, compute: impl FnOnce(&Uref, &Uref) -> Uref) -> Option<Uref> {
        let input = self.input_flow_def.lock().clone()?;
        let out = compute(&input, &attrs);
        *self.attr_flow_def.lock() = Some(attrs);
        *self.output_flow_def.lock() = Some(out.clone());
        Some(out)
    }
}

impl Default for FlowDefHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FlowDefHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowDefHelper")
            .field("has_input", &self.input_flow_def.lock().is_some())
            .field("has_attr", &self.attr_flow_def.lock().is_some())
            .field("has_output", &self.output_flow_def.lock().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_change_recomputes_output() {
        let helper = FlowDefHelper::new();
        let out = helper.set_input_flow_def(Uref::flow_def("block.a."), |input, _attr| {
            Uref::flow_def(format!("{}transformed.", input.flow_def_attr().unwrap()))
        });
        assert_eq!(out.flow_def_attr().as_deref(), Some("block.a.transformed."));
        assert_eq!(helper.output_flow_def().unwrap().flow_def_attr().as_deref(), Some("block.a.transformed."));
    }

    #[test]
    fn attr_change_without_input_is_noop() {
        let helper = FlowDefHelper::new();
        assert!(helper.set_attr_flow_def(Uref::new(), |_, _| Uref::new()).is_none());
    }

    #[test]
    fn attr_change_recombines_with_cached_input() {
        let helper = FlowDefHelper::new();
        helper.set_input_flow_def(Uref::flow_def("block.a."), |input, _| input.dup());
        let out = helper
            .set_attr_flow_def(Uref::flow_def("lang.eng."), |input, attr| {
                Uref::flow_def(format!(
                    "{}{}",
                    input.flow_def_attr().unwrap(),
                    attr.flow_def_attr().unwrap()
                ))
            })
            .unwrap();
        assert_eq!(out.flow_def_attr().as_deref(), Some("block.a.lang.eng."));
    }
}
