//! Worker-source/worker-sink/worker-linear helpers: a lock-free FIFO of
//! urefs bridging two threads, independent of [`crate::XferManager`]'s
//! control-command marshalling (spec §4.7).
//!
//! Grounded on the original's `upipe_queue_sink`/`upipe_queue_source`
//! pair: one side pushes urefs into a ring buffer from its own thread,
//! the other drains it on an armed pump on a different thread. A
//! `crossbeam_channel` plays the ring buffer's role here; threads talk to
//! it directly since it is already `Send + Sync`; no xfer proxy is needed
//! just to move data this way; [`crate::XferManager`] is only needed when
//! the *pipe itself* (its control commands) must live on the other
//! thread.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};
use upipe_core::refcount::Refcount;
use upipe_core::uref::Uref;
use upipe_runtime::{Pump, PumpKind, PumpManager, PumpStatus};

use crate::config::{QueueFullPolicy, XferQueueConfig};
use crate::error::{Result, XferError};
use upipe_pipe::{ControlAnswer, ControlCommand, Pipe, PipeError, PipeResult, PumpSource};

fn make_channel(config: &XferQueueConfig) -> (crossbeam_channel::Sender<Uref>, crossbeam_channel::Receiver<Uref>) {
    match config.capacity {
        Some(capacity) => crossbeam_channel::bounded(capacity),
        None => crossbeam_channel::unbounded(),
    }
}

/// The sending half of a cross-thread uref FIFO: a [`Pipe`] a worker
/// thread can use as its output, so whatever it produces ends up on the
/// other thread's receiving [`WorkerSource`].
pub struct WorkerSink {
    tx: crossbeam_channel::Sender<Uref>,
    policy: QueueFullPolicy,
    refcount: Refcount,
}

impl WorkerSink {
    fn new(tx: crossbeam_channel::Sender<Uref>, policy: QueueFullPolicy) -> Arc<Self> {
        Arc::new(Self { tx, policy, refcount: Refcount::new() })
    }

    /// Push a uref onto the queue, honouring the configured full policy.
    pub fn push(&self, uref: Uref) -> Result<()> {
        match self.policy {
            QueueFullPolicy::RejectImmediately => self.tx.try_send(uref).map_err(|e| match e {
                crossbeam_channel::TrySendError::Full(_) => XferError::Busy,
                crossbeam_channel::TrySendError::Disconnected(_) => XferError::Closed,
            }),
            QueueFullPolicy::Block => self.tx.send(uref).map_err(|_| XferError::Closed),
        }
    }
}

impl Pipe for WorkerSink {
    fn refcount(&self) -> &Refcount {
        &self.refcount
    }

    fn input(&self, uref: Uref, _pump_source: Option<PumpSource>) {
        if let Err(err) = self.push(uref) {
            warn!(%err, "worker sink dropped a uref");
        }
    }

    fn control(&self, _command: ControlCommand) -> PipeResult {
        Err(PipeError::Unhandled)
    }
}

impl std::fmt::Debug for WorkerSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSink").field("policy", &self.policy).finish_non_exhaustive()
    }
}

/// The receiving half of a cross-thread uref FIFO: drains urefs a paired
/// [`WorkerSink`] pushed and forwards each one to a configured output,
/// the same push model [`crate::helpers`] output wiring uses everywhere
/// else in this crate family.
pub struct WorkerSource {
    rx: crossbeam_channel::Receiver<Uref>,
    output: Mutex<Option<Arc<dyn Pipe>>>,
    refcount: Refcount,
}

impl WorkerSource {
    fn new(rx: crossbeam_channel::Receiver<Uref>) -> Arc<Self> {
        Arc::new(Self { rx, output: Mutex::new(None), refcount: Refcount::new() })
    }

    /// Set (or replace) the pipe every drained uref is forwarded to.
    pub fn set_output(&self, output: Arc<dyn Pipe>) {
        *self.output.lock() = Some(output);
    }

    /// Number of urefs currently buffered and not yet drained.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Drain everything currently queued, forwarding each uref to the
    /// configured output. Urefs that arrive with no output configured are
    /// dropped with a warning, matching an input helper with nothing
    /// downstream.
    pub fn drain(&self) {
        let output = self.output.lock().clone();
        let Some(output) = output else {
            if !self.rx.is_empty() {
                warn!("worker source drained with no output configured");
            }
            return;
        };
        while let Ok(uref) = self.rx.try_recv() {
            output.input(uref, None);
        }
    }

    /// Register an idler pump on `pump_mgr` that calls [`Self::drain`]
    /// every tick.
    pub fn arm(self: &Arc<Self>, pump_mgr: &Arc<dyn PumpManager>) -> Result<Pump> {
        let source = self.clone();
        let pump = pump_mgr.alloc_pump(PumpKind::Idler, Box::new(move || source.drain()))?;
        pump_mgr.start(pump)?;
        pump_mgr.set_status(pump, PumpStatus::Blocking)?;
        trace!("worker source armed drain pump");
        Ok(pump)
    }
}

impl std::fmt::Debug for WorkerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSource")
            .field("queued", &self.len())
            .field("has_output", &self.output.lock().is_some())
            .finish()
    }
}

/// A matched [`WorkerSink`]/[`WorkerSource`] pair, as returned by
/// [`worker_queue`].
pub struct WorkerQueue {
    pub sink: Arc<WorkerSink>,
    pub source: Arc<WorkerSource>,
}

/// Build a cross-thread uref FIFO: give `sink` to whatever produces data
/// on one thread (as its output pipe) and drain `source` on the other.
pub fn worker_queue(config: &XferQueueConfig) -> WorkerQueue {
    let (tx, rx) = make_channel(config);
    WorkerQueue { sink: WorkerSink::new(tx, config.full_policy), source: WorkerSource::new(rx) }
}

/// A pipe-shaped wrapper presenting a worker-thread transform as a single
/// linear pipe: `input` pushes upstream urefs across to the worker thread
/// (a [`WorkerSink`] the worker thread's real pipe must be wired to
/// consume), and drained results come back out through a [`WorkerSource`]
/// the caller wires to its own downstream output.
pub struct WorkerLinear {
    upstream: Arc<WorkerSink>,
    downstream: Arc<WorkerSource>,
    refcount: Refcount,
}

impl WorkerLinear {
    /// `upstream` carries data from the caller's thread to the worker
    /// thread; `downstream` carries results back. Both queues are
    /// typically created with [`worker_queue`], one per direction.
    pub fn new(upstream: Arc<WorkerSink>, downstream: Arc<WorkerSource>) -> Arc<Self> {
        Arc::new(Self { upstream, downstream, refcount: Refcount::new() })
    }

    /// The downstream-facing queue, so the caller can wire its own output
    /// pipe onto it.
    pub fn downstream(&self) -> &Arc<WorkerSource> {
        &self.downstream
    }
}

impl Pipe for WorkerLinear {
    fn refcount(&self) -> &Refcount {
        &self.refcount
    }

    fn input(&self, uref: Uref, _pump_source: Option<PumpSource>) {
        if let Err(err) = self.upstream.push(uref) {
            warn!(%err, "worker linear dropped a uref crossing to the worker thread");
        }
    }

    fn control(&self, command: ControlCommand) -> PipeResult {
        match command {
            ControlCommand::SetOutput(output) => {
                self.downstream.set_output(output);
                Ok(ControlAnswer::None)
            }
            _ => Err(PipeError::Unhandled),
        }
    }
}

impl std::fmt::Debug for WorkerLinear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLinear").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upipe_runtime::ManualPumpManager;

    #[derive(Debug)]
    struct CollectingPipe {
        refcount: Refcount,
        seen: Mutex<usize>,
    }

    impl Pipe for CollectingPipe {
        fn refcount(&self) -> &Refcount {
            &self.refcount
        }
        fn input(&self, _uref: Uref, _pump_source: Option<PumpSource>) {
            *self.seen.lock() += 1;
        }
        fn control(&self, _command: ControlCommand) -> PipeResult {
            Err(PipeError::Unhandled)
        }
    }

    #[test]
    fn sink_push_is_visible_on_source_after_drain() {
        let queue = worker_queue(&XferQueueConfig::default());
        queue.sink.push(Uref::new()).unwrap();
        queue.sink.push(Uref::new()).unwrap();
        assert_eq!(queue.source.len(), 2);

        let collector = Arc::new(CollectingPipe { refcount: Refcount::new(), seen: Mutex::new(0) });
        queue.source.set_output(collector.clone());
        queue.source.drain();

        assert_eq!(queue.source.len(), 0);
        assert_eq!(*collector.seen.lock(), 2);
    }

    #[test]
    fn bounded_reject_immediately_reports_busy() {
        let config = XferQueueConfig::builder().capacity(1).full_policy(QueueFullPolicy::RejectImmediately).build();
        let queue = worker_queue(&config);
        queue.sink.push(Uref::new()).unwrap();
        assert!(matches!(queue.sink.push(Uref::new()), Err(XferError::Busy)));
    }

    #[test]
    fn arming_registers_a_blocking_idler_pump() {
        let pump_mgr: Arc<dyn PumpManager> = ManualPumpManager::new();
        let queue = worker_queue(&XferQueueConfig::default());
        let pump = queue.source.arm(&pump_mgr).unwrap();
        assert_eq!(pump_mgr.status(pump).unwrap(), upipe_runtime::PumpStatus::Blocking);
    }

    #[test]
    fn worker_linear_forwards_both_directions() {
        let up = worker_queue(&XferQueueConfig::default());
        let down = worker_queue(&XferQueueConfig::default());
        let linear = WorkerLinear::new(up.sink.clone(), down.source.clone());

        let collector = Arc::new(CollectingPipe { refcount: Refcount::new(), seen: Mutex::new(0) });
        linear.control(ControlCommand::SetOutput(collector.clone())).unwrap();

        linear.input(Uref::new(), None);
        assert_eq!(up.source.len(), 1);

        // Simulate the worker thread's transform forwarding straight
        // through to the downstream queue.
        up.source.set_output(down.sink.clone());
        up.source.drain();
        down.source.drain();

        assert_eq!(*collector.seen.lock(), 1);
    }
}
