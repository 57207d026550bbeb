//! End-to-end check of spec §8 S2: a sink that accepts only its first two
//! urefs, then a source that offers five through an [`InputHelper`]-backed
//! sink pipe driven by a real pump manager.
//!
//! Expected: after the fifth input, the source's pump has one blocker
//! attached, three urefs remain queued, and nothing has been dropped.
//! Signalling the sink writable drains the queue one uref at a time and
//! releases the blocker once it runs dry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use upipe_core::refcount::Refcount;
use upipe_core::uref::Uref;
use upipe_pipe::helpers::input::InputHelper;
use upipe_pipe::{ControlCommand, Pipe, PipeError, PipeResult, PumpSource};
use upipe_runtime::{ManualPumpManager, PumpKind, PumpManager};

/// A sink pipe that accepts only its first `capacity` urefs, used to model
/// "sink accepts up to two urefs then returns busy".
struct QuotaSink {
    refcount: Refcount,
    input_helper: InputHelper,
    pump_mgr: Arc<dyn PumpManager>,
    capacity: AtomicUsize,
    accepted: AtomicUsize,
}

impl std::fmt::Debug for QuotaSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaSink")
            .field("input_helper", &self.input_helper)
            .field("capacity", &self.capacity.load(Ordering::SeqCst))
            .field("accepted", &self.accepted.load(Ordering::SeqCst))
            .finish()
    }
}

impl QuotaSink {
    fn new(pump_mgr: Arc<dyn PumpManager>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            refcount: Refcount::new(),
            input_helper: InputHelper::new(0),
            pump_mgr,
            capacity: AtomicUsize::new(capacity),
            accepted: AtomicUsize::new(0),
        })
    }

    fn try_accept(&self, uref: Uref) -> Result<(), Uref> {
        if self.accepted.load(Ordering::SeqCst) < self.capacity.load(Ordering::SeqCst) {
            self.accepted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        } else {
            Err(uref)
        }
    }

    /// Simulates the sink becoming writable again: raise the quota by one
    /// and drain the queue, which stops at the first renewed rejection.
    fn signal_writable(&self) {
        self.capacity.fetch_add(1, Ordering::SeqCst);
        self.input_helper.drain(&self.refcount, |u| self.try_accept(u));
    }
}

impl Pipe for QuotaSink {
    fn refcount(&self) -> &Refcount {
        &self.refcount
    }

    fn input(&self, uref: Uref, pump_source: Option<PumpSource>) {
        self.input_helper.input(uref, pump_source, &self.refcount, Some(&self.pump_mgr), |u| self.try_accept(u));
    }

    fn control(&self, _command: ControlCommand) -> PipeResult {
        Err(PipeError::Unhandled)
    }
}

#[test]
fn scenario_s2_source_offers_five_sink_accepts_two_then_drains() {
    let mgr: Arc<dyn PumpManager> = ManualPumpManager::new();
    let source_pump = mgr.alloc_pump(PumpKind::Idler, Box::new(|| {})).unwrap();
    mgr.start(source_pump).unwrap();
    let pump_source = PumpSource(source_pump);

    let sink = QuotaSink::new(mgr, 2);

    for _ in 0..5 {
        sink.input(Uref::new(), Some(pump_source));
    }

    assert_eq!(sink.input_helper.blocker_count(), 1, "exactly one blocker on the offering pump");
    assert_eq!(sink.input_helper.len(), 3, "three urefs remain queued, none dropped");

    // Sink signals writable twice: queue drains from three to one.
    sink.signal_writable();
    sink.signal_writable();
    assert_eq!(sink.input_helper.len(), 1);
    assert_eq!(sink.input_helper.blocker_count(), 1, "still blocked with one uref left");

    // A further raise drains the queue fully and releases the blocker.
    sink.signal_writable();
    assert_eq!(sink.input_helper.len(), 0);
    assert_eq!(sink.input_helper.blocker_count(), 0);
}
