//! The `Pipe` object model: the header every concrete pipe carries, and
//! the trait that lets the rest of this crate (and the application) treat
//! heterogeneous pipe types uniformly.

use std::fmt;
use std::sync::Arc;

use upipe_core::refcount::Refcount;
use upipe_core::uref::Uref;
use upipe_runtime::Pump;

use crate::control::{ControlCommand, PipeResult};
use crate::probe::ProbeChain;

/// Identifies which pump (if any) sourced the input call, so a pipe with
/// several upstream pumps (e.g. a bin fed by more than one source) can
/// tell them apart without storing per-input state itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PumpSource(pub Pump);

/// Every object in the pipe graph: a thing with a lifetime governed by
/// [`Refcount`], a way to accept data, and a uniform control-command
/// protocol for everything else.
pub trait Pipe: Send + Sync + fmt::Debug {
    /// The two-phase refcount governing this pipe's lifetime.
    fn refcount(&self) -> &Refcount;

    /// Accept a uref of input. `pump_source` identifies which upstream
    /// pump delivered it, if any.
    fn input(&self, uref: Uref, pump_source: Option<PumpSource>);

    /// Handle a generic or pipe-type-specific control command.
    fn control(&self, command: ControlCommand) -> PipeResult;
}

/// The fixed-shape header every concrete pipe embeds: a refcount, a
/// signature identifying the pipe's type (for [`ControlCommand::Custom`]
/// / [`crate::Event::Custom`] guards), and the probe chain events are
/// thrown up. Composition helpers (output, input, sink, ...) are
/// additional fields a concrete pipe embeds alongside this header; they
/// are not themselves `Pipe` impls.
pub struct PipeHeader {
    signature: u32,
    refcount: Refcount,
    probe: Arc<ProbeChain>,
}

impl PipeHeader {
    pub fn new(signature: u32, probe: Arc<ProbeChain>) -> Self {
        Self { signature, refcount: Refcount::new(), probe }
    }

    pub fn signature(&self) -> u32 {
        self.signature
    }

    pub fn refcount(&self) -> &Refcount {
        &self.refcount
    }

    pub fn probe(&self) -> &Arc<ProbeChain> {
        &self.probe
    }

    /// Throw `event` up this pipe's probe chain. `pipe` is the concrete
    /// pipe throwing it, passed through so probes can inspect it.
    pub fn throw(&self, pipe: &dyn Pipe, event: crate::Event) -> crate::CatchResult {
        self.probe.throw(pipe, event)
    }
}

impl fmt::Debug for PipeHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeHeader")
            .field("signature", &self.signature)
            .field("refcount", &self.refcount)
            .finish_non_exhaustive()
    }
}

/// A manager allocates and supervises pipes of one signature. Concrete
/// managers expose their own typed `alloc` constructor (allocation
/// arguments are inherently pipe-type-specific); this trait covers only
/// the uniform part of the contract - identity and manager-wide control
/// commands.
pub trait PipeManager: Send + Sync + fmt::Debug {
    /// The signature of pipes this manager allocates.
    fn signature(&self) -> u32;

    /// Handle a control command addressed to the manager itself, as
    /// opposed to one of its pipes (e.g. setting a shared default flow
    /// format for pipes allocated from now on).
    fn manager_control(&self, command: ControlCommand) -> PipeResult;
}
