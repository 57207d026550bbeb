//! Error types for the memory substrate and buffer layer.
//!
//! Mirrors the closed error-code set from the core's external-interface
//! contract: `none`, `allocation`, `invalid`, `busy`, `external`. `unhandled`
//! and `upump` live in the pipe and runtime crates respectively, since only
//! those layers can produce them.

use thiserror::Error;

/// Errors produced by `upipe-core` (umem/udict/uref/ubuf).
#[derive(Error, Debug)]
pub enum CoreError {
    /// The manager (or pool) could not satisfy an allocation request.
    #[error("allocation failed (requested {requested} bytes)")]
    Allocation {
        /// Size that was requested, in bytes.
        requested: usize,
    },

    /// An argument was out of range or incompatible with the buffer/dict.
    #[error("invalid argument: {0}")]
    Invalid(String),

    /// `map_write` was attempted on a payload that is shared with another
    /// ubuf; the caller must wait or deep-copy first.
    #[error("buffer is shared, exclusive access required")]
    Busy,

    /// A mapped range was requested that does not exist, or an unmap did not
    /// match an outstanding map.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// The request crosses a boundary that cannot be addressed contiguously
    /// (e.g. a block ubuf split across segments); caller must iterate.
    #[error("range is not contiguous, iterate over segments instead")]
    NotContiguous,

    /// Wrapped OS-level error (maps to the `external` error code).
    #[error("external error: {0}")]
    External(#[from] std::io::Error),
}

/// Convenience alias for `Result<T, CoreError>`.
pub type Result<T> = std::result::Result<T, CoreError>;
