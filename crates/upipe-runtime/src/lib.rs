//! Pump scheduler: a pluggable, single-threaded cooperative event loop.
//!
//! Binds to exactly one OS thread - the one that calls
//! [`PumpManager::run`]. Cross-thread delivery is the job of `upipe-xfer`,
//! not this crate.

pub mod blocker;
pub mod error;
pub mod manager;
pub mod pump;

pub use blocker::Blocker;
pub use error::RuntimeError;
pub use manager::{ManualPumpManager, MioPumpManager, PumpManager};
pub use pump::{Pump, PumpKind, PumpStatus};
