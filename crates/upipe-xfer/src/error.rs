//! Errors produced by the cross-thread transfer layer.

use thiserror::Error;

/// Errors from `upipe-xfer`, completing the closed error-code set alongside
/// [`upipe_core::CoreError`], [`upipe_runtime::RuntimeError`] and
/// [`upipe_pipe::PipeError`].
#[derive(Error, Debug)]
pub enum XferError {
    /// A worker queue is full and was not configured to block.
    #[error("xfer queue is full")]
    Busy,

    /// The worker thread (or its receiving end of a queue) has gone away.
    #[error("xfer worker is no longer reachable")]
    Closed,

    /// `get_remote` was called while the manager is not frozen.
    #[error("xfer manager must be frozen to access a remote pipe")]
    NotFrozen,

    /// The proxy id does not correspond to a pipe registered on this
    /// manager (already unregistered, or from a different manager).
    #[error("unknown xfer proxy")]
    UnknownProxy,

    /// Wrapped error from a remote pipe's control handler.
    #[error(transparent)]
    Pipe(#[from] upipe_pipe::PipeError),

    /// Wrapped error from the pump manager driving the worker thread.
    #[error(transparent)]
    Runtime(#[from] upipe_runtime::RuntimeError),
}

/// Convenience alias for `Result<T, XferError>`.
pub type Result<T> = std::result::Result<T, XferError>;
