//! The generic control-command protocol every pipe answers, and the
//! typed answers it can return.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use upipe_core::uref::Uref;
use upipe_core::uref::UrefManager;
use upipe_core::umem::UMemManager;

use crate::pipe::Pipe;
use crate::request::{Request, RequestKind, Uclock};

/// A control command sent to a pipe or a pipe manager. Variants without a
/// concrete Rust type in this crate (pipe-type-specific commands) go
/// through [`ControlCommand::Custom`], guarded by the receiving pipe's
/// signature the same way [`crate::Event::Custom`] is.
pub enum ControlCommand {
    SetFlowDef(Uref),
    GetFlowDef,
    SetOutput(Arc<dyn Pipe>),
    GetOutput,
    SetUri(String),
    GetUri,
    RegisterRequest(Request),
    UnregisterRequest(RequestKind),
    AttachUpumpMgr(Arc<dyn upipe_runtime::PumpManager>),
    AttachUclock(Arc<dyn Uclock>),
    AttachUrefMgr(Arc<dyn UrefManager>),
    AttachUbufMgr(Arc<dyn UMemManager>),
    /// Ask a subpipe for its superpipe.
    SubGetSuper,
    /// Iterate a super's subpipes; `None` starts iteration, `Some(prev)`
    /// asks for the subpipe after `prev`. Ends when the answer is `None`.
    IterateSub(Option<Arc<dyn Pipe>>),
    /// Iterate a split pipe's sub-outputs the same way, keyed by uref
    /// flow-def markers instead of pipes.
    SplitIterate(Option<Uref>),
    BinGetFirstInner,
    BinGetLastInner,
    BinFreeze,
    BinThaw,
    /// A pipe-type-specific command, opaque to this crate.
    Custom { signature: u32, name: &'static str, payload: Box<dyn Any + Send> },
}

impl fmt::Debug for ControlCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlCommand::SetFlowDef(_) => write!(f, "SetFlowDef"),
            ControlCommand::GetFlowDef => write!(f, "GetFlowDef"),
            ControlCommand::SetOutput(_) => write!(f, "SetOutput"),
            ControlCommand::GetOutput => write!(f, "GetOutput"),
            ControlCommand::SetUri(uri) => write!(f, "SetUri({uri})"),
            ControlCommand::GetUri => write!(f, "GetUri"),
            ControlCommand::RegisterRequest(_) => write!(f, "RegisterRequest"),
            ControlCommand::UnregisterRequest(kind) => write!(f, "UnregisterRequest({kind:?})"),
            ControlCommand::AttachUpumpMgr(_) => write!(f, "AttachUpumpMgr"),
            ControlCommand::AttachUclock(_) => write!(f, "AttachUclock"),
            ControlCommand::AttachUrefMgr(_) => write!(f, "AttachUrefMgr"),
            ControlCommand::AttachUbufMgr(_) => write!(f, "AttachUbufMgr"),
            ControlCommand::SubGetSuper => write!(f, "SubGetSuper"),
            ControlCommand::IterateSub(_) => write!(f, "IterateSub"),
            ControlCommand::SplitIterate(_) => write!(f, "SplitIterate"),
            ControlCommand::BinGetFirstInner => write!(f, "BinGetFirstInner"),
            ControlCommand::BinGetLastInner => write!(f, "BinGetLastInner"),
            ControlCommand::BinFreeze => write!(f, "BinFreeze"),
            ControlCommand::BinThaw => write!(f, "BinThaw"),
            ControlCommand::Custom { signature, name, .. } => {
                write!(f, "Custom({signature}, {name})")
            }
        }
    }
}

/// The typed payload a successfully handled [`ControlCommand`] may return.
/// Most commands (the `Set*`/`Attach*`/`Bin{Freeze,Thaw}` family) return
/// [`ControlAnswer::None`].
pub enum ControlAnswer {
    None,
    FlowDef(Uref),
    Pipe(Option<Arc<dyn Pipe>>),
    Uri(String),
    SplitFlow(Option<Uref>),
    Custom(Box<dyn Any + Send>),
}

impl fmt::Debug for ControlAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlAnswer::None => write!(f, "None"),
            ControlAnswer::FlowDef(_) => write!(f, "FlowDef"),
            ControlAnswer::Pipe(p) => write!(f, "Pipe({})", p.is_some()),
            ControlAnswer::Uri(uri) => write!(f, "Uri({uri})"),
            ControlAnswer::SplitFlow(flow) => write!(f, "SplitFlow({})", flow.is_some()),
            ControlAnswer::Custom(_) => write!(f, "Custom"),
        }
    }
}

/// Result of handling a [`ControlCommand`].
pub type PipeResult = crate::error::Result<ControlAnswer>;
