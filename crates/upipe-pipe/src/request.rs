//! Requests: the upstream-resolution protocol a pipe uses to ask its
//! probe chain for a resource it cannot synthesize itself.
//!
//! A pipe that needs, say, a uref manager does not go looking for one; it
//! registers a [`Request`] via [`crate::ControlCommand::RegisterRequest`]
//! and waits for a probe further up the chain to answer it with a
//! [`ProvideAnswer`]. This keeps allocation policy out of leaf pipes.

use std::fmt;
use std::sync::Arc;

use upipe_core::uref::Uref;
use upipe_core::umem::UMemManager;
use upipe_core::uref::UrefManager;

/// The kind of resource or piece of information a [`Request`] asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestKind {
    /// Ask whether a proposed flow format is acceptable, and for a
    /// negotiated replacement if not.
    FlowFormat,
    /// Ask for a [`UrefManager`] to allocate urefs with.
    UrefManager,
    /// Ask for a [`UMemManager`] to allocate ubufs with.
    UbufManager,
    /// Ask for a clock.
    Uclock,
    /// Ask a sink for its current latency.
    SinkLatency,
    /// Ask a sink for the maximum delay it can absorb before dropping.
    SinkMaxDelay,
    /// Ask a sink for the maximum oversize it tolerates before blocking.
    SinkMaxOversize,
}

/// The answer a probe hands back when it honours a [`Request`].
pub enum ProvideAnswer {
    FlowFormat(Uref),
    UrefManager(Arc<dyn UrefManager>),
    UbufManager(Arc<dyn UMemManager>),
    Uclock(Arc<dyn Uclock>),
    SinkLatency(u64),
    SinkMaxDelay(u64),
    SinkMaxOversize(u64),
}

impl fmt::Debug for ProvideAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvideAnswer::FlowFormat(_) => write!(f, "ProvideAnswer::FlowFormat"),
            ProvideAnswer::UrefManager(_) => write!(f, "ProvideAnswer::UrefManager"),
            ProvideAnswer::UbufManager(_) => write!(f, "ProvideAnswer::UbufManager"),
            ProvideAnswer::Uclock(_) => write!(f, "ProvideAnswer::Uclock"),
            ProvideAnswer::SinkLatency(v) => write!(f, "ProvideAnswer::SinkLatency({v})"),
            ProvideAnswer::SinkMaxDelay(v) => write!(f, "ProvideAnswer::SinkMaxDelay({v})"),
            ProvideAnswer::SinkMaxOversize(v) => write!(f, "ProvideAnswer::SinkMaxOversize({v})"),
        }
    }
}

/// A clock source, supplying a monotonic-ish timestamp in the unit the
/// pipeline has agreed on (typically 27MHz ticks, matching the original's
/// `UCLOCK_FREQ`). Adapters such as a dejitter probe wrap one of these.
pub trait Uclock: Send + Sync + fmt::Debug {
    fn now(&self) -> u64;
}

/// A pending ask for a resource, plus the callback that delivers the
/// answer once some probe up the chain provides it.
pub struct Request {
    kind: RequestKind,
    provide: Box<dyn Fn(ProvideAnswer) + Send + Sync>,
}

impl Request {
    pub fn new(kind: RequestKind, provide: impl Fn(ProvideAnswer) + Send + Sync + 'static) -> Self {
        Self { kind, provide: Box::new(provide) }
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    /// Deliver an answer to whoever registered this request. Does nothing
    /// structural if the answer variant doesn't match the request kind;
    /// callers are expected to match them up (a probe answering
    /// `UrefManager` sends a `ProvideAnswer::UrefManager`).
    pub fn provide(&self, answer: ProvideAnswer) {
        (self.provide)(answer)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request").field("kind", &self.kind).finish_non_exhaustive()
    }
}

/// A [`Request`] stored for replay: the original closure is kept behind an
/// `Arc` so the same pending ask can be re-registered on a new output
/// (spec §4.6, output helper: "pending requests registered upstream are
/// re-registered on the new output") without requiring [`Request`] itself
/// to be `Clone`.
pub struct PendingRequest {
    kind: RequestKind,
    provide: Arc<dyn Fn(ProvideAnswer) + Send + Sync>,
}

impl PendingRequest {
    pub fn new(kind: RequestKind, provide: impl Fn(ProvideAnswer) + Send + Sync + 'static) -> Self {
        Self { kind, provide: Arc::new(provide) }
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    /// Build a fresh [`Request`] that delivers to the same callback as the
    /// original. Each re-registration gets its own `Request` value, but
    /// they all resolve to the same stored closure.
    pub fn to_request(&self) -> Request {
        let provide = self.provide.clone();
        Request::new(self.kind.clone(), move |answer| provide(answer))
    }
}

impl fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRequest").field("kind", &self.kind).finish_non_exhaustive()
    }
}
