//! Cross-thread transfer: moving pipes, and the urefs flowing through
//! them, between the single-threaded pump loops `upipe-runtime` binds to
//! one OS thread each.
//!
//! Two complementary mechanisms, matching the original's xfer/queue
//! split:
//!
//! - [`XferManager`] owns a worker thread and marshals an existing pipe's
//!   `input`/`control` calls onto it through an [`XferProxy`], with
//!   `freeze`/`thaw` for safely reaching into the worker thread's state
//!   from outside (see [`XferManager::get_remote`]).
//! - [`worker_queue`] builds a lock-free FIFO of urefs between two
//!   threads directly, for the common case where only the *data* needs to
//!   cross, not pipe control.
//!
//! [`TransferProbe`]/[`TransferRelay`] relay select events (source-end,
//! clock references, ...) across either boundary.

pub mod config;
pub mod error;
pub mod manager;
pub mod proxy;
pub mod relay;
pub mod worker;

pub use config::{QueueFullPolicy, XferQueueConfig, XferQueueConfigBuilder};
pub use error::{Result, XferError};
pub use manager::XferManager;
pub use proxy::XferProxy;
pub use relay::{RelayedEvent, TransferProbe, TransferRelay};
pub use worker::{worker_queue, WorkerLinear, WorkerQueue, WorkerSink, WorkerSource};
