//! Relaying select events across a thread boundary (spec §4.7: "a
//! transfer probe relays select events, e.g. source-end, across the
//! boundary").
//!
//! [`Event`] itself is not `Send`-friendly to replay verbatim (some
//! variants carry a [`Request`](upipe_pipe::Request) whose callback may
//! not be meant to run on another thread); [`RelayedEvent`] is the subset
//! that is safe and useful to forward, copied out of the event at catch
//! time.

use std::sync::Arc;

use tracing::trace;
use upipe_pipe::{CatchResult, Event, Pipe, Probe, ProbeChain};
use upipe_runtime::{PumpKind, PumpManager, PumpStatus};

/// The events a [`TransferProbe`] forwards to the other side of an xfer
/// boundary. A strict subset of [`Event`]: only variants with `'static`,
/// `Send` payloads that make sense to observe from a different thread.
#[derive(Debug, Clone)]
pub enum RelayedEvent {
    Fatal(String),
    Error(String),
    Ready,
    Dead,
    SourceEnd,
    SyncAcquired,
    SyncLost,
    ClockRef { pts: u64, cr: u64 },
    ClockTs(u64),
    SplitUpdate,
}

impl RelayedEvent {
    fn from_event(event: &Event) -> Option<Self> {
        match event {
            Event::Fatal(msg) => Some(Self::Fatal(msg.clone())),
            Event::Error(msg) => Some(Self::Error(msg.clone())),
            Event::Ready => Some(Self::Ready),
            Event::Dead => Some(Self::Dead),
            Event::SourceEnd => Some(Self::SourceEnd),
            Event::SyncAcquired => Some(Self::SyncAcquired),
            Event::SyncLost => Some(Self::SyncLost),
            Event::ClockRef { pts, cr } => Some(Self::ClockRef { pts: *pts, cr: *cr }),
            Event::ClockTs(ts) => Some(Self::ClockTs(*ts)),
            Event::SplitUpdate => Some(Self::SplitUpdate),
            _ => None,
        }
    }

    /// Rebuild an [`Event`] on the receiving side of the boundary.
    pub fn into_event(self) -> Event {
        match self {
            Self::Fatal(msg) => Event::Fatal(msg),
            Self::Error(msg) => Event::Error(msg),
            Self::Ready => Event::Ready,
            Self::Dead => Event::Dead,
            Self::SourceEnd => Event::SourceEnd,
            Self::SyncAcquired => Event::SyncAcquired,
            Self::SyncLost => Event::SyncLost,
            Self::ClockRef { pts, cr } => Event::ClockRef { pts, cr },
            Self::ClockTs(ts) => Event::ClockTs(ts),
            Self::SplitUpdate => Event::SplitUpdate,
        }
    }
}

/// A probe that sits on the worker-thread side of an xfer boundary,
/// forwards relayable events to a [`crossbeam_channel::Sender`], and lets
/// every event continue up its own local chain unchanged.
#[derive(Debug)]
pub struct TransferProbe {
    tx: crossbeam_channel::Sender<RelayedEvent>,
}

impl TransferProbe {
    pub fn new(tx: crossbeam_channel::Sender<RelayedEvent>) -> Self {
        Self { tx }
    }
}

impl Probe for TransferProbe {
    fn catch(&self, _pipe: &dyn Pipe, event: &Event) -> CatchResult {
        if let Some(relayed) = RelayedEvent::from_event(event) {
            let _ = self.tx.send(relayed);
        }
        CatchResult::Unhandled
    }
}

/// The caller-thread side of an xfer boundary: drains events a
/// [`TransferProbe`] sent and re-throws them into a local chain, so an
/// application probe never has to know its events actually originated on
/// another thread.
pub struct TransferRelay {
    rx: crossbeam_channel::Receiver<RelayedEvent>,
    chain: Arc<ProbeChain>,
}

impl TransferRelay {
    pub fn new(rx: crossbeam_channel::Receiver<RelayedEvent>, chain: Arc<ProbeChain>) -> Self {
        Self { rx, chain }
    }

    /// Drain every event currently queued and re-throw each one at
    /// `pipe` (the local proxy standing in for the remote pipe that
    /// originally threw it).
    pub fn drain(&self, pipe: &dyn Pipe) {
        while let Ok(relayed) = self.rx.try_recv() {
            trace!(?relayed, "relaying event across xfer boundary");
            let _ = self.chain.throw(pipe, relayed.into_event());
        }
    }

    /// Register an idler pump on `pump_mgr` that calls [`Self::drain`]
    /// every tick. `pipe` must outlive the returned pump.
    pub fn arm(self: Arc<Self>, pump_mgr: &dyn PumpManager, pipe: Arc<dyn Pipe>) -> crate::error::Result<upipe_runtime::Pump> {
        let relay = self.clone();
        let pump = pump_mgr.alloc_pump(PumpKind::Idler, Box::new(move || relay.drain(pipe.as_ref())))?;
        pump_mgr.start(pump)?;
        pump_mgr.set_status(pump, PumpStatus::Blocking)?;
        Ok(pump)
    }
}

impl std::fmt::Debug for TransferRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferRelay").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use upipe_core::refcount::Refcount;
    use upipe_core::uref::Uref;
    use upipe_pipe::{ControlCommand, PipeError, PipeResult, PumpSource};

    #[derive(Debug)]
    struct NullPipe {
        refcount: Refcount,
    }

    impl Pipe for NullPipe {
        fn refcount(&self) -> &Refcount {
            &self.refcount
        }
        fn input(&self, _uref: Uref, _pump_source: Option<PumpSource>) {}
        fn control(&self, _command: ControlCommand) -> PipeResult {
            Err(PipeError::Unhandled)
        }
    }

    #[derive(Debug)]
    struct CountingProbe {
        count: Arc<AtomicUsize>,
    }

    impl Probe for CountingProbe {
        fn catch(&self, _pipe: &dyn Pipe, _event: &Event) -> CatchResult {
            self.count.fetch_add(1, Ordering::SeqCst);
            CatchResult::Unhandled
        }
    }

    #[test]
    fn source_end_survives_the_round_trip() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let probe = TransferProbe::new(tx);
        let remote_pipe = NullPipe { refcount: Refcount::new() };

        probe.catch(&remote_pipe, &Event::SourceEnd);
        probe.catch(&remote_pipe, &Event::Ready);
        probe.catch(&remote_pipe, &Event::ProvideRequest(upipe_pipe::Request::new(
            upipe_pipe::RequestKind::Uclock,
            |_| {},
        )));

        let count = Arc::new(AtomicUsize::new(0));
        let chain = ProbeChain::new(Arc::new(CountingProbe { count: count.clone() }));
        let relay = TransferRelay::new(rx, chain);

        let local_pipe = NullPipe { refcount: Refcount::new() };
        relay.drain(&local_pipe);

        // SourceEnd and Ready relay; the request does not.
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn irrelevant_events_are_not_forwarded() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let probe = TransferProbe::new(tx);
        let remote_pipe = NullPipe { refcount: Refcount::new() };
        probe.catch(&remote_pipe, &Event::NeedUpumpMgr);
        assert!(rx.try_recv().is_err());
    }
}
