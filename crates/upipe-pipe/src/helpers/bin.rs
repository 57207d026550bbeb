//! Bin helper (spec §4.6): a composite pipe that wraps an internal
//! sub-graph but exposes a single input/output pair.
//!
//! `SET-FLOW-DEF` forwards to the first inner pipe, output operations
//! forward to the last inner pipe, and request registration proxies into
//! the sub-graph. `BIN-GET-FIRST-INNER`/`BIN-GET-LAST-INNER` are only
//! answered while the bin is frozen (spec: "allowed only when frozen"),
//! mirroring the xfer freeze/thaw discipline a remote-thread bin needs
//! before it is safe to hand an inner pointer to the outside world.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::control::{ControlAnswer, ControlCommand, PipeResult};
use crate::error::PipeError;
use crate::pipe::{Pipe, PumpSource};
use crate::request::PendingRequest;

/// Composite-pipe bookkeeping: which inner pipe is first (receives
/// `SET-FLOW-DEF` and data) and which is last (owns the external output).
pub struct BinHelper {
    first_inner: Mutex<Option<Arc<dyn Pipe>>>,
    last_inner: Mutex<Option<Arc<dyn Pipe>>>,
    frozen: AtomicBool,
}

impl BinHelper {
    pub fn new() -> Self {
        Self {
            first_inner: Mutex::new(None),
            last_inner: Mutex::new(None),
            frozen: AtomicBool::new(false),
        }
    }

    /// Record which inner pipes terminate the sub-graph. Called once after
    /// the bin finishes building its internal pipeline.
    pub fn set_inner_pipes(&self, first: Arc<dyn Pipe>, last: Arc<dyn Pipe>) {
        *self.first_inner.lock() = Some(first);
        *self.last_inner.lock() = Some(last);
    }

    /// Forward a data uref to the first inner pipe.
    pub fn input(&self, uref: upipe_core::uref::Uref, pump_source: Option<PumpSource>) {
        if let Some(first) = self.first_inner.lock().clone() {
            first.input(uref, pump_source);
        }
    }

    /// Forward `SET-FLOW-DEF` to the first inner pipe.
    pub fn set_flow_def(&self, def: upipe_core::uref::Uref) -> PipeResult {
        match self.first_inner.lock().clone() {
            Some(first) => first.control(ControlCommand::SetFlowDef(def)),
            None => Err(PipeError::Invalid("bin has no first inner pipe yet".into())),
        }
    }

    /// Forward `SET-OUTPUT`/`GET-OUTPUT` to the last inner pipe.
    pub fn set_output(&self, output: Option<Arc<dyn Pipe>>) -> PipeResult {
        match self.last_inner.lock().clone() {
            Some(last) => last.control(match output {
                Some(o) => ControlCommand::SetOutput(o),
                None => ControlCommand::GetOutput,
            }),
            None => Err(PipeError::Invalid("bin has no last inner pipe yet".into())),
        }
    }

    /// Proxy a request registration into the sub-graph via the last inner
    /// pipe, so it propagates up through the inner chain and out through
    /// whichever probe (or, across a thread boundary, transfer probe)
    /// eventually answers it.
    pub fn register_request(&self, pending: &PendingRequest) -> PipeResult {
        match self.last_inner.lock().clone() {
            Some(last) => last.control(ControlCommand::RegisterRequest(pending.to_request())),
            None => Err(PipeError::Invalid("bin has no last inner pipe yet".into())),
        }
    }

    /// Suspend the bin: introspection (`BIN-GET-FIRST-INNER`/`...LAST...`)
    /// becomes legal after this, until [`Self::thaw`].
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Resume the bin; inner pointers obtained while frozen must be
    /// treated by the caller as invalid from this point on.
    pub fn thaw(&self) {
        self.frozen.store(false, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// `BIN-GET-FIRST-INNER`: only answered while frozen.
    pub fn first_inner(&self) -> PipeResult {
        if !self.is_frozen() {
            return Err(PipeError::Invalid("bin must be frozen to inspect inner pipes".into()));
        }
        Ok(ControlAnswer::Pipe(self.first_inner.lock().clone()))
    }

    /// `BIN-GET-LAST-INNER`: only answered while frozen.
    pub fn last_inner(&self) -> PipeResult {
        if !self.is_frozen() {
            return Err(PipeError::Invalid("bin must be frozen to inspect inner pipes".into()));
        }
        Ok(ControlAnswer::Pipe(self.last_inner.lock().clone()))
    }
}

impl Default for BinHelper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BinHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinHelper")
            .field("has_first", &self.first_inner.lock().is_some())
            .field("has_last", &self.last_inner.lock().is_some())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upipe_core::refcount::Refcount;
    use upipe_core::uref::Uref;

    #[derive(Debug, Default)]
    struct RecordingPipe {
        refcount: Refcount,
        inputs: Mutex<Vec<Uref>>,
    }

    impl Pipe for RecordingPipe {
        fn refcount(&self) -> &Refcount {
            &self.refcount
        }
        fn input(&self, uref: Uref, _pump_source: Option<PumpSource>) {
            self.inputs.lock().push(uref);
        }
        fn control(&self, _command: ControlCommand) -> PipeResult {
            Ok(ControlAnswer::None)
        }
    }

    #[test]
    fn first_last_inner_only_answered_while_frozen() {
        let bin = BinHelper::new();
        let first = Arc::new(RecordingPipe::default());
        let last = Arc::new(RecordingPipe::default());
        bin.set_inner_pipes(first, last);

        assert!(bin.first_inner().is_err());
        bin.freeze();
        assert!(matches!(bin.first_inner(), Ok(ControlAnswer::Pipe(Some(_)))));
        bin.thaw();
        assert!(bin.last_inner().is_err());
    }

    #[test]
    fn input_and_flow_def_go_to_first_inner() {
        let bin = BinHelper::new();
        let first = Arc::new(RecordingPipe::default());
        let last = Arc::new(RecordingPipe::default());
        bin.set_inner_pipes(first.clone(), last);

        bin.input(Uref::new(), None);
        bin.set_flow_def(Uref::flow_def("block.a.")).unwrap();
        assert_eq!(first.inputs.lock().len(), 2);
    }
}
