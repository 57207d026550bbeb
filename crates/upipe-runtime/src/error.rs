//! Errors produced by the pump scheduler.

use thiserror::Error;

/// Errors from `upipe-runtime` (maps onto the spec's `upump` error code,
/// plus `invalid`/`external`/`unhandled` where the scheduler itself can
/// produce them).
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The pump id does not refer to a live pump on this manager.
    #[error("unknown pump id")]
    InvalidPump,

    /// This manager does not support the requested pump kind (e.g. a
    /// manual, libc-free manager asked for an fd-watch pump).
    #[error("pump kind not supported by this manager: {0}")]
    Unsupported(String),

    /// A scheduler-internal failure, not otherwise classified.
    #[error("scheduler error: {0}")]
    Upump(String),

    /// Wrapped OS-level error (maps to the `external` error code).
    #[error("external error: {0}")]
    External(#[from] std::io::Error),
}

/// Convenience alias for `Result<T, RuntimeError>`.
pub type Result<T> = std::result::Result<T, RuntimeError>;
