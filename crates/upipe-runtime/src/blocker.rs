//! Blocker: back-pressure attachment on a pump.
//!
//! A sink that cannot currently accept more data attaches a `Blocker` to
//! the upstream source pump; while any blocker is attached, the pump's
//! callback does not fire, so the source stops producing. Releasing the
//! blocker (explicitly, or implicitly on drop) lets the pump resume.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::manager::PumpManager;
use crate::pump::Pump;

/// An attachment that suspends a pump until released.
///
/// Unlike the original's explicit free call, release also happens on drop -
/// an idiomatic RAII guard is a better fit than requiring callers to
/// remember a matching free.
pub struct Blocker {
    manager: Arc<dyn PumpManager>,
    pump: Pump,
    released: AtomicBool,
}

impl Blocker {
    pub(crate) fn new(manager: Arc<dyn PumpManager>, pump: Pump) -> Self {
        Self { manager, pump, released: AtomicBool::new(false) }
    }

    /// The pump this blocker is attached to.
    pub fn pump(&self) -> Pump {
        self.pump
    }

    /// Release the blocker, allowing the pump to resume once no other
    /// blocker remains attached. Idempotent.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.manager.release_blocker(self.pump);
        }
    }
}

impl Drop for Blocker {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Blocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blocker")
            .field("pump", &self.pump)
            .field("released", &self.released.load(Ordering::Acquire))
            .finish()
    }
}
