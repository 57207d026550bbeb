//! Pump: a scheduled callback, and the small set of types shared by every
//! [`crate::manager::PumpManager`] implementation.

use std::time::Duration;

/// An opaque handle to a pump, valid for the manager that allocated it.
/// Backed by a `slab` index internally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Pump(pub(crate) usize);

/// What a pump watches for.
#[derive(Clone, Copy, Debug)]
pub enum PumpKind {
    /// Fires once after `Duration` elapses.
    TimerOnce(Duration),
    /// Fires every `Duration`, rearming itself.
    TimerInterval(Duration),
    /// Fires when the given raw fd becomes readable.
    FdRead(std::os::unix::io::RawFd),
    /// Fires when the given raw fd becomes writable.
    FdWrite(std::os::unix::io::RawFd),
    /// Fires on every loop iteration.
    Idler,
    /// Fires on receipt of the given signal number.
    Signal(i32),
}

/// Whether a pump keeps the event loop alive.
///
/// A manager's `run` terminates once no running pump with
/// [`PumpStatus::Blocking`] remains - the "retained/unretained reference
/// count decides loop termination" rule from spec §4.5.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpStatus {
    /// Keeps the loop running.
    Blocking,
    /// Does not keep the loop running by itself.
    NonBlocking,
}
