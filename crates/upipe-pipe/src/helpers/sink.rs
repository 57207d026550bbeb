//! Sink helper (spec §4.6): the input helper's queue, plus direct support
//! for a sink that writes to the OS and may see `EAGAIN`.
//!
//! Grounded on `upipe_helper_sink.h` (`original_source/`): a sink write
//! that would block is treated exactly like an input-helper rejection (hold
//! the uref, block upstream) with the addition of arming an fd-write pump
//! so the sink finds out when writing can be retried, instead of polling.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;
use upipe_core::refcount::Refcount;
use upipe_core::uref::Uref;
use upipe_runtime::{Pump, PumpKind, PumpManager};

use crate::helpers::input::InputHelper;
use crate::pipe::PumpSource;

/// What attempting to write a uref to the OS produced.
pub enum SinkWriteOutcome {
    /// The uref was written (or otherwise fully consumed).
    Written,
    /// The write would block (`EAGAIN`); the uref is handed back so the
    /// helper can queue it and arm the write pump.
    WouldBlock(Uref),
}

/// Queue plus direct-write back-pressure for a pipe that writes to the OS.
pub struct SinkHelper {
    queue: InputHelper,
    low_water: AtomicUsize,
    high_water: AtomicUsize,
    write_pump: Mutex<Option<Pump>>,
}

impl SinkHelper {
    /// `low_water`/`high_water` mark the queue lengths at which
    /// [`Self::is_quenched`]/[`Self::may_unblock`] flip, mirroring the
    /// hysteresis a real sink uses to avoid chattering between blocked and
    /// unblocked on every single uref.
    pub fn new(low_water: usize, high_water: usize) -> Self {
        Self {
            queue: InputHelper::new(0),
            low_water: AtomicUsize::new(low_water),
            high_water: AtomicUsize::new(high_water),
            write_pump: Mutex::new(None),
        }
    }

    /// Number of urefs currently held because a write would have blocked.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// True once the queue has grown to the high-water mark: callers
    /// should stop admitting more work onto this sink even if an
    /// individual write might still succeed.
    pub fn is_quenched(&self) -> bool {
        self.high_water.load(Ordering::Acquire) > 0 && self.len() >= self.high_water.load(Ordering::Acquire)
    }

    /// True once the queue has drained back to the low-water mark.
    pub fn may_unblock(&self) -> bool {
        self.len() <= self.low_water.load(Ordering::Acquire)
    }

    /// Offer a uref for writing. Delegates to the embedded [`InputHelper`]
    /// so ordering and the self-reference-while-queued rule are shared
    /// with plain linear pipes.
    pub fn input(
        &self,
        uref: Uref,
        pump_source: Option<PumpSource>,
        refcount: &Refcount,
        pump_mgr: Option<&Arc<dyn PumpManager>>,
        mut try_write: impl FnMut(Uref) -> SinkWriteOutcome,
    ) {
        self.queue.input(uref, pump_source, refcount, pump_mgr, move |u| match try_write(u) {
            SinkWriteOutcome::Written => Ok(()),
            SinkWriteOutcome::WouldBlock(u) => Err(u),
        });
    }

    /// Arm the fd-write pump so we are called back when the OS says the
    /// sink fd is writable again. A no-op if already armed.
    pub fn arm_write_pump(&self, pump_mgr: &Arc<dyn PumpManager>, fd: std::os::unix::io::RawFd, callback: Box<dyn FnMut() + Send>) {
        let mut guard = self.write_pump.lock();
        if guard.is_some() {
            return;
        }
        let pump = pump_mgr.alloc_pump(PumpKind::FdWrite(fd), callback).expect("fd-write pump allocation");
        pump_mgr.start(pump).expect("starting fd-write pump");
        trace!("sink helper armed fd-write pump");
        *guard = Some(pump);
    }

    /// Drain the queue now that the sink is writable, disarming the
    /// fd-write pump once the queue runs dry.
    pub fn on_writable(&self, refcount: &Refcount, pump_mgr: &Arc<dyn PumpManager>, mut try_write: impl FnMut(Uref) -> SinkWriteOutcome) {
        self.queue.drain(refcount, move |u| match try_write(u) {
            SinkWriteOutcome::Written => Ok(()),
            SinkWriteOutcome::WouldBlock(u) => Err(u),
        });
        if self.queue.is_empty() {
            if let Some(pump) = self.write_pump.lock().take() {
                let _ = pump_mgr.stop(pump);
                let _ = pump_mgr.free(pump);
            }
        }
    }
}

impl Default for SinkHelper {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl std::fmt::Debug for SinkHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkHelper")
            .field("len", &self.len())
            .field("low_water", &self.low_water.load(Ordering::Acquire))
            .field("high_water", &self.high_water.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_queues_and_written_does_not() {
        let sink = SinkHelper::new(1, 2);
        let rc = Refcount::new();
        sink.input(Uref::new(), None, &rc, None, |_| SinkWriteOutcome::Written);
        assert_eq!(sink.len(), 0);

        sink.input(Uref::new(), None, &rc, None, |u| SinkWriteOutcome::WouldBlock(u));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn quenched_and_unblock_thresholds() {
        let sink = SinkHelper::new(1, 2);
        let rc = Refcount::new();
        for _ in 0..2 {
            sink.input(Uref::new(), None, &rc, None, |u| SinkWriteOutcome::WouldBlock(u));
        }
        assert!(sink.is_quenched());
        assert!(!sink.may_unblock());

        sink.on_writable(&rc, &(upipe_runtime::ManualPumpManager::new() as Arc<dyn PumpManager>), |_| SinkWriteOutcome::Written);
        assert!(!sink.is_quenched());
        assert!(sink.may_unblock());
    }
}
