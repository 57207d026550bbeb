//! Output helper (spec §4.6): caches the current downstream pipe and the
//! last flow-def sent to it, and replays both onto a new downstream when
//! `set_output` swaps it.
//!
//! Grounded on `upipe_helper_output.h`'s `upipe_*_store_flow_def` /
//! `upipe_*_set_output` pair from `original_source/`: storing a flow-def
//! both caches it and - if an output is already attached - forwards it
//! immediately, so the next data uref is never the first thing the new
//! output sees (S3 in spec §8).

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;
use upipe_core::uref::Uref;

use crate::pipe::{Pipe, PumpSource};
use crate::request::PendingRequest;

/// Cached output routing state for a linear (single-output) pipe.
pub struct OutputHelper {
    output: Mutex<Option<Arc<dyn Pipe>>>,
    flow_def: Mutex<Option<Uref>>,
    pending_requests: Mutex<Vec<PendingRequest>>,
}

impl OutputHelper {
    /// An output helper with no downstream attached yet.
    pub fn new() -> Self {
        Self {
            output: Mutex::new(None),
            flow_def: Mutex::new(None),
            pending_requests: Mutex::new(Vec::new()),
        }
    }

    /// The currently attached downstream pipe, if any.
    pub fn output(&self) -> Option<Arc<dyn Pipe>> {
        self.output.lock().clone()
    }

    /// Attach (or detach, with `None`) the downstream pipe. Re-sends the
    /// cached flow-def and replays every pending request onto the new
    /// output, ahead of any data uref that follows (spec: "re-sends current
    /// flow-def", "pending requests... re-registered on the new output").
    pub fn set_output(&self, new_output: Option<Arc<dyn Pipe>>) {
        *self.output.lock() = new_output.clone();
        let Some(new_output) = new_output else { return };

        if let Some(def) = self.flow_def.lock().clone() {
            trace!("output helper replaying cached flow-def onto new output");
            new_output.input(def, None);
        }
        for pending in self.pending_requests.lock().iter() {
            let _ = new_output.control(crate::control::ControlCommand::RegisterRequest(pending.to_request()));
        }
    }

    /// Cache a (possibly new) output flow-def and, if a downstream is
    /// attached, forward it immediately - before the next data uref passes
    /// through [`Self::forward`]. Per the open question in spec §9, a
    /// `set_flow_def` that happens reentrantly from inside `input`
    /// resolves for the *next* input call only, not the uref currently
    /// in flight; see DESIGN.md.
    pub fn store_flow_def(&self, def: Uref) {
        *self.flow_def.lock() = Some(def.clone());
        if let Some(output) = self.output.lock().clone() {
            output.input(def, None);
        }
    }

    /// The most recently stored output flow-def, if any.
    pub fn flow_def(&self) -> Option<Uref> {
        self.flow_def.lock().clone()
    }

    /// Forward a data uref to the current output. Drops it (the caller is
    /// expected to log) if no output is attached.
    pub fn forward(&self, uref: Uref, pump_source: Option<PumpSource>) -> bool {
        match self.output.lock().clone() {
            Some(output) => {
                output.input(uref, pump_source);
                true
            }
            None => false,
        }
    }

    /// Register a request upstream-of-here-bound-downstream: store it for
    /// replay on future `set_output` calls, and forward it to the current
    /// output if one is attached.
    pub fn register_request(&self, pending: PendingRequest) {
        if let Some(output) = self.output.lock().clone() {
            let _ = output.control(crate::control::ControlCommand::RegisterRequest(pending.to_request()));
        }
        self.pending_requests.lock().push(pending);
    }

    /// Drop a previously registered request by kind, forwarding the
    /// unregister to the current output.
    pub fn unregister_request(&self, kind: &crate::request::RequestKind) {
        self.pending_requests.lock().retain(|p| p.kind() != kind);
        if let Some(output) = self.output.lock().clone() {
            let _ = output.control(crate::control::ControlCommand::UnregisterRequest(kind.clone()));
        }
    }
}

impl Default for OutputHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OutputHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputHelper")
            .field("has_output", &self.output.lock().is_some())
            .field("has_flow_def", &self.flow_def.lock().is_some())
            .field("pending_requests", &self.pending_requests.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlAnswer, ControlCommand, PipeResult};
    use crate::error::PipeError;
    use crate::request::{ProvideAnswer, RequestKind};
    use std::sync::Mutex as StdMutex;
    use upipe_core::refcount::Refcount;

    #[derive(Debug, Default)]
    struct RecordingPipe {
        refcount: Refcount,
        inputs: StdMutex<Vec<Uref>>,
        registered: StdMutex<Vec<RequestKind>>,
    }

    impl Pipe for RecordingPipe {
        fn refcount(&self) -> &Refcount {
            &self.refcount
        }
        fn input(&self, uref: Uref, _pump_source: Option<PumpSource>) {
            self.inputs.lock().unwrap().push(uref);
        }
        fn control(&self, command: ControlCommand) -> PipeResult {
            match command {
                ControlCommand::RegisterRequest(req) => {
                    self.registered.lock().unwrap().push(req.kind().clone());
                    Ok(ControlAnswer::None)
                }
                _ => Err(PipeError::Unhandled),
            }
        }
    }

    #[test]
    fn set_output_replays_cached_flow_def_before_data() {
        let helper = OutputHelper::new();
        helper.store_flow_def(Uref::flow_def("block.a."));

        let sink = Arc::new(RecordingPipe::default());
        helper.set_output(Some(sink.clone()));

        // The flow-def must have reached the new output already.
        let inputs = sink.inputs.lock().unwrap();
        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].is_flow_def());
    }

    #[test]
    fn set_output_swap_resends_flow_def_to_new_downstream_first() {
        // S3: linear pipe transforms block.a. -> block.b., then set-output
        // swaps downstream; the new downstream must see block.b. before data.
        let helper = OutputHelper::new();
        let first = Arc::new(RecordingPipe::default());
        helper.set_output(Some(first.clone()));
        helper.store_flow_def(Uref::flow_def("block.b."));

        let second = Arc::new(RecordingPipe::default());
        helper.set_output(Some(second.clone()));
        helper.forward(Uref::new(), None);

        let inputs = second.inputs.lock().unwrap();
        assert_eq!(inputs.len(), 2);
        assert!(inputs[0].is_flow_def());
        assert!(!inputs[1].is_flow_def());
    }

    #[test]
    fn pending_requests_replay_on_new_output() {
        let helper = OutputHelper::new();
        helper.register_request(PendingRequest::new(RequestKind::Uclock, |_: ProvideAnswer| {}));

        let output = Arc::new(RecordingPipe::default());
        helper.set_output(Some(output.clone()));

        assert_eq!(output.registered.lock().unwrap().as_slice(), &[RequestKind::Uclock]);
    }

    #[test]
    fn forward_without_output_reports_dropped() {
        let helper = OutputHelper::new();
        assert!(!helper.forward(Uref::new(), None));
    }
}
