//! Events and the probe chain that catches them.
//!
//! A pipe never talks to its application directly; it throws an [`Event`]
//! up a [`ProbeChain`] and each [`Probe`] along the way decides whether to
//! handle it, forward it, or fail loudly. This mirrors the original's
//! `uprobe` stack: every probe wraps (and owns a strong reference to) the
//! probe beneath it, so a chain is really a singly linked list read from
//! the leaf outward.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::request::{ProvideAnswer, Request, RequestKind, Uclock};
use crate::Pipe;
use upipe_core::umem::UMemManager;
use upipe_core::uref::{Uref, UrefManager};
use upipe_runtime::PumpManager;

/// Something a pipe wants its application to know about, or a resource it
/// needs the application to supply. Variants without payload are plain
/// notifications; others carry the data relevant to the event.
#[derive(Debug)]
pub enum Event {
    /// Unrecoverable error; the pipe is about to die.
    Fatal(String),
    /// Recoverable error; the pipe keeps running.
    Error(String),
    /// The pipe has finished initializing and is ready for input.
    Ready,
    /// The pipe has released all its resources and will process no more
    /// input.
    Dead,
    /// A source pipe has reached the end of its input (e.g. EOF).
    SourceEnd,
    /// The pipe needs a pump manager attached before it can proceed.
    NeedUpumpMgr,
    /// The pipe needs a clock attached.
    NeedUclock,
    /// The pipe needs a uref manager attached.
    NeedUrefMgr,
    /// The pipe needs a ubuf manager attached.
    NeedUbufMgr,
    /// A pipe is asking the chain to resolve a [`Request`].
    ProvideRequest(Request),
    /// The pipe has negotiated (or renegotiated) its output flow
    /// definition.
    NewFlowDef(Uref),
    /// A sync pipe has locked onto its input.
    SyncAcquired,
    /// A sync pipe has lost lock on its input.
    SyncLost,
    /// A new clock reference has become available.
    ClockRef { pts: u64, cr: u64 },
    /// A clock timestamp has been resolved for the current uref.
    ClockTs(u64),
    /// A split pipe's sub-output set has changed.
    SplitUpdate,
    /// Ask upstream pump sources to stop delivering input.
    FreezeUpumpMgr,
    /// Ask upstream pump sources to resume delivering input.
    ThawUpumpMgr,
    /// A pipe-type-specific event, guarded by the throwing pipe's
    /// signature so probes never misinterpret another module's event.
    Custom { signature: u32, name: &'static str },
}

/// What a [`Probe`] decided to do with an [`Event`].
#[derive(Debug)]
pub enum CatchResult {
    /// The probe fully handled the event; stop walking the chain.
    Consumed,
    /// The probe has no opinion; try the next probe up the chain.
    Unhandled,
    /// The probe failed while handling the event.
    Err(crate::error::PipeError),
}

/// A single link in a probe chain. Implementors react to events thrown by
/// pipes below them.
pub trait Probe: Send + Sync + fmt::Debug {
    fn catch(&self, pipe: &dyn Pipe, event: &Event) -> CatchResult;
}

/// A chain of probes, each optionally backed by a parent to forward to.
/// `throw` is the entry point a pipe calls; `catch` handlers call
/// `throw_next` explicitly when they want to delegate after doing their
/// own work (logging, then forwarding, for instance).
pub struct ProbeChain {
    probe: Arc<dyn Probe>,
    parent: Option<Arc<ProbeChain>>,
}

impl ProbeChain {
    pub fn new(probe: Arc<dyn Probe>) -> Arc<Self> {
        Arc::new(Self { probe, parent: None })
    }

    pub fn chained(probe: Arc<dyn Probe>, parent: Arc<ProbeChain>) -> Arc<Self> {
        Arc::new(Self { probe, parent: Some(parent) })
    }

    /// Throw `event` at this link; if unhandled, it is forwarded to the
    /// parent automatically.
    pub fn throw(&self, pipe: &dyn Pipe, event: Event) -> CatchResult {
        match self.probe.catch(pipe, &event) {
            CatchResult::Unhandled => self.throw_next(pipe, event),
            other => other,
        }
    }

    /// Forward `event` directly to the parent, skipping this link. Used by
    /// a `catch` implementation that has already done its own work (e.g.
    /// logging) and wants the rest of the chain to still see the event.
    pub fn throw_next(&self, pipe: &dyn Pipe, event: Event) -> CatchResult {
        match &self.parent {
            Some(parent) => parent.throw(pipe, event),
            None => CatchResult::Unhandled,
        }
    }
}

impl fmt::Debug for ProbeChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProbeChain")
            .field("probe", &self.probe)
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

/// Logs every event at a severity matching its kind, then forwards it
/// unconditionally. The most common leaf of a real probe chain.
#[derive(Debug, Default)]
pub struct LogProbe {
    label: Option<String>,
}

impl LogProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labelled(label: impl Into<String>) -> Self {
        Self { label: Some(label.into()) }
    }
}

impl Probe for LogProbe {
    fn catch(&self, _pipe: &dyn Pipe, event: &Event) -> CatchResult {
        let label = self.label.as_deref().unwrap_or("pipe");
        match event {
            Event::Fatal(msg) => error!(%label, %msg, "fatal"),
            Event::Error(msg) => error!(%label, %msg, "error"),
            Event::SourceEnd => debug!(%label, "source end"),
            Event::Dead => debug!(%label, "dead"),
            _ => debug!(%label, ?event, "event"),
        }
        CatchResult::Unhandled
    }
}

/// Prefixes every log line a wrapped probe (or the default formatter)
/// would otherwise emit with a fixed tag, then forwards. Useful for
/// disambiguating which branch of a fan-out threw an event.
#[derive(Debug)]
pub struct PrefixProbe {
    prefix: String,
}

impl PrefixProbe {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }
}

impl Probe for PrefixProbe {
    fn catch(&self, _pipe: &dyn Pipe, event: &Event) -> CatchResult {
        debug!(prefix = %self.prefix, ?event, "event");
        CatchResult::Unhandled
    }
}

/// Answers [`RequestKind::UrefManager`] requests with a fixed manager.
#[derive(Debug)]
pub struct UrefMgrProbe {
    mgr: Arc<dyn UrefManager>,
}

impl UrefMgrProbe {
    pub fn new(mgr: Arc<dyn UrefManager>) -> Self {
        Self { mgr }
    }
}

impl Probe for UrefMgrProbe {
    fn catch(&self, _pipe: &dyn Pipe, event: &Event) -> CatchResult {
        if let Event::ProvideRequest(req) = event {
            if *req.kind() == RequestKind::UrefManager {
                req.provide(ProvideAnswer::UrefManager(self.mgr.clone()));
                return CatchResult::Consumed;
            }
        }
        CatchResult::Unhandled
    }
}

/// Answers [`RequestKind::UbufManager`] requests with a fixed manager.
#[derive(Debug)]
pub struct UbufMgrProbe {
    mgr: Arc<dyn UMemManager>,
}

impl UbufMgrProbe {
    pub fn new(mgr: Arc<dyn UMemManager>) -> Self {
        Self { mgr }
    }
}

impl Probe for UbufMgrProbe {
    fn catch(&self, _pipe: &dyn Pipe, event: &Event) -> CatchResult {
        if let Event::ProvideRequest(req) = event {
            if *req.kind() == RequestKind::UbufManager {
                req.provide(ProvideAnswer::UbufManager(self.mgr.clone()));
                return CatchResult::Consumed;
            }
        }
        CatchResult::Unhandled
    }
}

/// Answers [`Event::NeedUpumpMgr`] and attach-style requests with a fixed
/// pump manager. Unlike the uref/ubuf adapters this is not a [`Request`]
/// answer: pump managers are attached via [`crate::ControlCommand`], so
/// this probe instead warns and forwards, leaving the actual attach to the
/// control-command layer; it exists so a chain can at least log the need.
#[derive(Debug)]
pub struct UpumpMgrProbe {
    mgr: Arc<dyn PumpManager>,
}

impl UpumpMgrProbe {
    pub fn new(mgr: Arc<dyn PumpManager>) -> Self {
        Self { mgr }
    }

    pub fn manager(&self) -> Arc<dyn PumpManager> {
        self.mgr.clone()
    }
}

impl Probe for UpumpMgrProbe {
    fn catch(&self, _pipe: &dyn Pipe, event: &Event) -> CatchResult {
        if matches!(event, Event::NeedUpumpMgr) {
            warn!("pipe needs a pump manager attached via a control command");
        }
        CatchResult::Unhandled
    }
}

/// Answers [`RequestKind::Uclock`] requests with a fixed clock.
#[derive(Debug)]
pub struct UclockProbe {
    clock: Arc<dyn Uclock>,
}

impl UclockProbe {
    pub fn new(clock: Arc<dyn Uclock>) -> Self {
        Self { clock }
    }
}

impl Probe for UclockProbe {
    fn catch(&self, _pipe: &dyn Pipe, event: &Event) -> CatchResult {
        if let Event::ProvideRequest(req) = event {
            if *req.kind() == RequestKind::Uclock {
                req.provide(ProvideAnswer::Uclock(self.clock.clone()));
                return CatchResult::Consumed;
            }
        }
        CatchResult::Unhandled
    }
}

/// A clock that smooths `ClockRef` announcements into a running offset
/// instead of trusting each one outright, absorbing network jitter on a
/// live source. Implements [`Uclock`] itself so it can sit directly behind
/// a [`UclockProbe`].
#[derive(Debug)]
pub struct DejitterClock {
    offset: AtomicI64,
    smoothing_shift: u32,
}

impl DejitterClock {
    /// `smoothing_shift` controls the exponential moving average's decay;
    /// higher values react to new references more slowly. 4 matches the
    /// original's default divisor of 16.
    pub fn new(smoothing_shift: u32) -> Arc<Self> {
        Arc::new(Self { offset: AtomicI64::new(0), smoothing_shift })
    }

    /// Feed a fresh `(pts, cr)` reference pair into the moving average.
    pub fn observe(&self, pts: u64, cr: u64) {
        let sample = cr as i64 - pts as i64;
        let prev = self.offset.load(Ordering::Relaxed);
        let updated = prev + ((sample - prev) >> self.smoothing_shift);
        self.offset.store(updated, Ordering::Relaxed);
    }
}

impl Uclock for DejitterClock {
    fn now(&self) -> u64 {
        self.offset.load(Ordering::Relaxed).max(0) as u64
    }
}

/// Wraps a [`DejitterClock`], feeding it every [`Event::ClockRef`] it sees
/// and answering uclock requests with it, then forwarding everything.
#[derive(Debug)]
pub struct DejitterProbe {
    clock: Arc<DejitterClock>,
}

impl DejitterProbe {
    pub fn new(clock: Arc<DejitterClock>) -> Self {
        Self { clock }
    }
}

impl Probe for DejitterProbe {
    fn catch(&self, _pipe: &dyn Pipe, event: &Event) -> CatchResult {
        match event {
            Event::ClockRef { pts, cr } => {
                self.clock.observe(*pts, *cr);
                CatchResult::Unhandled
            }
            Event::ProvideRequest(req) if *req.kind() == RequestKind::Uclock => {
                req.provide(ProvideAnswer::Uclock(self.clock.clone()));
                CatchResult::Consumed
            }
            _ => CatchResult::Unhandled,
        }
    }
}

/// What kind of elementary flow a [`SelflowProbe`] lets through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowFilter {
    Audio,
    Video,
    Void,
    /// Accept the first sub-flow seen and ignore the rest.
    Auto,
}

/// Watches [`Event::SplitUpdate`] on a split pipe and decides which
/// sub-output to keep feeding, matching flow defs by their dotted type
/// prefix (`"block."`, `"pic."`, `"sound."`, `"void."`).
#[derive(Debug)]
pub struct SelflowProbe {
    filter: FlowFilter,
    selected: std::sync::Mutex<Option<String>>,
}

impl SelflowProbe {
    pub fn new(filter: FlowFilter) -> Self {
        Self { filter, selected: std::sync::Mutex::new(None) }
    }

    fn prefix(&self) -> Option<&'static str> {
        match self.filter {
            FlowFilter::Audio => Some("sound."),
            FlowFilter::Video => Some("pic."),
            FlowFilter::Void => Some("void."),
            FlowFilter::Auto => None,
        }
    }

    /// Whether a candidate flow def's dotted type matches this filter.
    pub fn accepts(&self, flow_def: &str) -> bool {
        match self.prefix() {
            Some(prefix) => flow_def.starts_with(prefix),
            None => {
                let mut selected = self.selected.lock().unwrap();
                match selected.as_deref() {
                    Some(existing) => existing == flow_def,
                    None => {
                        *selected = Some(flow_def.to_string());
                        true
                    }
                }
            }
        }
    }
}

impl Probe for SelflowProbe {
    fn catch(&self, _pipe: &dyn Pipe, event: &Event) -> CatchResult {
        if matches!(event, Event::SplitUpdate) {
            debug!(filter = ?self.filter, "split update observed");
        }
        CatchResult::Unhandled
    }
}
