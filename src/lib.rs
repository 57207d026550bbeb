//! # upipe
//!
//! Dataflow core for real-time multimedia pipelines.
//!
//! This crate provides the runtime that individual codec and protocol
//! modules (MPEG-TS demux/mux, RTP/RTCP, framers, resamplers, ...) plug into.
//! It is deliberately silent about media semantics: it only defines how
//! pipes exchange typed, reference-counted buffers; how they suspend and
//! resume on I/O through a pluggable event loop; and how they compose into
//! bins, subpipes and cross-thread pipelines.
//!
//! - **[`core`]** - Refcount, umem/udict/uref and the Ubuf buffer substrate
//! - **[`runtime`]** - the pump scheduler (timers, fd-watchers, idlers, signals)
//! - **[`pipe`]** - the Pipe/Probe contract and composition helpers
//! - **[`xfer`]** - cross-thread transfer (proxy pipes, worker source/sink/linear)
//!
//! # Features
//!
//! All four are enabled by default; each can be disabled independently,
//! though `runtime`, `pipe` and `xfer` each pull in the layers below them.
//!
//! ```toml
//! # Just the buffer substrate, no scheduler or pipe graph
//! upipe = { version = "0.1", default-features = false, features = ["core"] }
//! ```
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `core` | Yes | Refcount, umem/udict/uref, Ubuf |
//! | `runtime` | Yes | Pump scheduler |
//! | `pipe` | Yes | Pipe, probe chain, composition helpers |
//! | `xfer` | Yes | Cross-thread transfer |
//! | `full` | No | Alias for all of the above |
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                             upipe                                │
//! ├───────────────┬────────────────────┬──────────────┬─────────────┤
//! │  upipe-core   │   upipe-runtime    │  upipe-pipe   │  upipe-xfer │
//! │               │                    │               │             │
//! │  Refcount     │  Pump / PumpMgr    │  Pipe/Manager │  XferMgr    │
//! │  umem/udict   │  Blocker           │  Probe chain  │  Proxy pipe │
//! │  uref / Ubuf  │                    │  Helpers      │  Worker *   │
//! └───────┬───────┴──────────┬─────────┴───────┬───────┴──────┬──────┘
//!         │                  │                 │              │
//!         ▼                  ▼                 ▼              ▼
//!   shared buffers      event loop       dataflow graph   thread boundary
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// RE-EXPORTS
// =============================================================================

/// Refcount, memory substrate (umem/udict/uref) and the Ubuf buffer types.
///
/// See [`upipe_core`] documentation for details.
#[cfg(feature = "core")]
#[cfg_attr(docsrs, doc(cfg(feature = "core")))]
pub use upipe_core as core;

/// The pump scheduler: a pluggable, single-threaded cooperative event loop.
///
/// See [`upipe_runtime`] documentation for details.
#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub use upipe_runtime as runtime;

/// The pipe/probe contract and the composition helpers pipe authors reuse.
///
/// See [`upipe_pipe`] documentation for details.
#[cfg(feature = "pipe")]
#[cfg_attr(docsrs, doc(cfg(feature = "pipe")))]
pub use upipe_pipe as pipe;

/// Cross-thread transfer: proxy pipes and worker source/sink/linear helpers.
///
/// See [`upipe_xfer`] documentation for details.
#[cfg(feature = "xfer")]
#[cfg_attr(docsrs, doc(cfg(feature = "xfer")))]
pub use upipe_xfer as xfer;

// =============================================================================
// PRELUDE - common types for convenience
// =============================================================================

/// Prelude module with the types most pipe authors need.
///
/// ```rust
/// use upipe::prelude::*;
/// ```
pub mod prelude {
    #[cfg(feature = "core")]
    pub use upipe_core::{
        refcount::Refcount,
        ubuf::{BlockUbuf, PictureUbuf, SoundUbuf, Ubuf},
        udict::UDict,
        umem::{UMem, UMemManager},
        uref::{Uref, UrefManager},
        CoreError,
    };

    #[cfg(feature = "runtime")]
    pub use upipe_runtime::{Blocker, Pump, PumpKind, PumpManager, PumpStatus, RuntimeError};

    #[cfg(feature = "pipe")]
    pub use upipe_pipe::{
        probe::{Event, Probe, ProbeChain},
        ControlCommand, Pipe, PipeError, PipeManager, PipeResult, Request, RequestKind,
    };

    #[cfg(feature = "xfer")]
    pub use upipe_xfer::{XferError, XferManager};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    #[cfg(feature = "core")]
    fn test_core_reexport() {
        let _ = core::uref::Uref::flow_def("block.unknown.".to_string());
    }
}
