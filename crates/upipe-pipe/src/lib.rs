//! Pipe, probe chain, and composition helpers.
//!
//! This crate is the middle layer of the core (see the workspace root's
//! architecture diagram): it builds the object model ([`pipe`]) and the
//! event channel ([`probe`]) on top of `upipe-core`/`upipe-runtime`, and
//! supplies the composition helpers ([`helpers`]) individual pipe authors
//! reuse instead of re-deriving the same concurrency bookkeeping every
//! time (output routing, bounded input queues, sink back-pressure,
//! super/sub relationships, bins, flow-def caching, uref-stream
//! concatenation).

pub mod control;
pub mod error;
pub mod helpers;
pub mod pipe;
pub mod probe;
pub mod request;

pub use control::{ControlAnswer, ControlCommand, PipeResult};
pub use error::PipeError;
pub use pipe::{Pipe, PipeHeader, PipeManager, PumpSource};
pub use probe::{CatchResult, Event, Probe, ProbeChain};
pub use request::{ProvideAnswer, Request, RequestKind, Uclock};
