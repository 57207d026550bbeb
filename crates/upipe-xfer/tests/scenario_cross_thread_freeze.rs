//! Freezing a transfer manager mid-stream must stop its worker thread
//! from producing any further urefs; thawing resumes exactly where it
//! left off.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as PLMutex;
use upipe_core::refcount::Refcount;
use upipe_core::uref::Uref;
use upipe_pipe::{ControlCommand, Pipe, PipeError, PipeResult, PumpSource};
use upipe_runtime::{ManualPumpManager, PumpKind, PumpManager, PumpStatus};
use upipe_xfer::{worker_queue, XferManager, XferQueueConfig};

#[derive(Debug, Default)]
struct CountingSink {
    refcount: Refcount,
    count: PLMutex<usize>,
}

impl Pipe for CountingSink {
    fn refcount(&self) -> &Refcount {
        &self.refcount
    }
    fn input(&self, _uref: Uref, _pump_source: Option<PumpSource>) {
        *self.count.lock() += 1;
    }
    fn control(&self, _command: ControlCommand) -> PipeResult {
        Err(PipeError::Unhandled)
    }
}

fn wait_for(cond: impl Fn() -> bool, attempts: usize) -> bool {
    for _ in 0..attempts {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn freeze_stops_worker_production_and_thaw_resumes_it() {
    let queue = worker_queue(&XferQueueConfig::default());
    let produced = Arc::new(AtomicUsize::new(0));
    const TOTAL: usize = 5;

    let worker_pumps: Arc<dyn PumpManager> = ManualPumpManager::new();
    let sink = queue.sink.clone();
    let produced_cb = produced.clone();
    let source_pump = worker_pumps
        .alloc_pump(
            PumpKind::Idler,
            Box::new(move || {
                let n = produced_cb.load(Ordering::SeqCst);
                if n < TOTAL {
                    sink.push(Uref::new()).unwrap();
                    produced_cb.fetch_add(1, Ordering::SeqCst);
                }
            }),
        )
        .unwrap();
    worker_pumps.start(source_pump).unwrap();
    worker_pumps.set_status(source_pump, PumpStatus::Blocking).unwrap();

    let manager = XferManager::new(worker_pumps).unwrap();

    assert!(wait_for(|| produced.load(Ordering::SeqCst) >= 2, 200));
    manager.freeze();

    let at_freeze = produced.load(Ordering::SeqCst);
    assert!(at_freeze >= 2);
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(
        produced.load(Ordering::SeqCst),
        at_freeze,
        "worker must not produce further urefs while frozen"
    );

    manager.thaw();
    assert!(wait_for(|| produced.load(Ordering::SeqCst) == TOTAL, 200));

    manager.shutdown();

    // Everything the worker pushed is visible on the main-thread side of
    // the queue once drained.
    let collector = Arc::new(CountingSink::default());
    queue.source.set_output(collector.clone());
    queue.source.drain();
    assert_eq!(*collector.count.lock(), TOTAL);
}
