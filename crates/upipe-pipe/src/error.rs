//! Errors produced by the pipe/probe/control layer.

use thiserror::Error;

/// Errors from `upipe-pipe`. Together with [`upipe_core::CoreError`] and
/// [`upipe_runtime::RuntimeError`] this covers the spec's closed error-code
/// set: none, unknown, allocation, upump, external, invalid, busy,
/// unhandled.
#[derive(Error, Debug)]
pub enum PipeError {
    /// No handler in the control-command chain recognized this command.
    #[error("control command not handled")]
    Unhandled,

    /// An argument was out of range or incompatible with the pipe's state.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// The pipe cannot currently honour the request (e.g. a queue is full).
    #[error("pipe is busy")]
    Busy,

    /// A resource could not be allocated.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// Wrapped error from the memory substrate.
    #[error(transparent)]
    Core(#[from] upipe_core::CoreError),

    /// Wrapped error from the pump scheduler.
    #[error(transparent)]
    Runtime(#[from] upipe_runtime::RuntimeError),

    /// Wrapped OS-level error.
    #[error("external error: {0}")]
    External(#[from] std::io::Error),

    /// Catch-all for conditions not otherwise classified.
    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Convenience alias for `Result<T, PipeError>`.
pub type Result<T> = std::result::Result<T, PipeError>;
