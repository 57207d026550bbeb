//! Composition helpers (spec §4.6).
//!
//! These are not pipes; they are the reusable pieces of bookkeeping a
//! concrete pipe embeds as a struct field and delegates to from its
//! [`crate::Pipe`] impl. The original project gets this reuse from
//! `UPIPE_HELPER_*` macros that splice functions into a pipe's vtable; here
//! each helper is a plain struct the pipe holds alongside
//! [`crate::pipe::PipeHeader`] and calls into explicitly - no macro
//! expansion, no implicit trait dispatch the pipe author didn't ask for.

pub mod bin;
pub mod flow_def;
pub mod input;
pub mod output;
pub mod sink;
pub mod subpipe;
pub mod uref_stream;

pub use bin::BinHelper;
pub use flow_def::FlowDefHelper;
pub use input::InputHelper;
pub use output::OutputHelper;
pub use sink::{SinkHelper, SinkWriteOutcome};
pub use subpipe::SubpipeHelper;
pub use uref_stream::UrefStreamHelper;
