//! uref: the packet envelope passed between pipes.
//!
//! A [`Uref`] owns at most one [`Ubuf`] plus a [`UDict`] of attributes.
//! Standard attributes (flow id, flow definition, clock timestamps,
//! discontinuity/random-access markers, duration, language, event type) are
//! exposed as typed accessors layered over plain udict gets/sets, the way
//! the original's `UREF_ATTR_*` macros expand into typed wrapper functions
//! around a shared `udict` backend.
//!
//! Invariant (spec §3): if a uref carries a ubuf, that ubuf must be
//! compatible with the flow definition carried in the same uref. A
//! flow-definition uref - one produced by [`Uref::flow_def`] - carries no
//! ubuf; [`Uref::set_ubuf`] on such a uref is a programmer error and panics,
//! the same way attaching a payload to a flow-def uref would be a logic
//! error in the original.

use std::sync::Arc;

use crate::error::Result;
use crate::udict::{UDict, UDictValue, UDictValueTag};
use crate::ubuf::Ubuf;
use crate::umem::UMemManager;

const FLOW_ID: &str = "flow.id";
const FLOW_DEF: &str = "flow.def";
const DISCONTINUITY: &str = "block.discontinuity";
const RANDOM_ACCESS: &str = "block.rap";
const DURATION: &str = "block.duration";
const LANGUAGE: &str = "lang";
const EVENT: &str = "event";

/// The clock domain a timestamp belongs to, per spec §3 ("system, programme,
/// original").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClockDomain {
    /// Wall-clock time of the local system.
    System,
    /// Programme clock reference domain (e.g. an MPEG-TS PCR).
    Programme,
    /// Timestamps as originally authored, before any rebasing.
    Original,
}

impl ClockDomain {
    fn prefix(self) -> &'static str {
        match self {
            ClockDomain::System => "clock.sys",
            ClockDomain::Programme => "clock.prog",
            ClockDomain::Original => "clock.orig",
        }
    }
}

/// A timestamp in one clock domain: optional PTS, optional DTS, optional
/// rate (numerator, denominator).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClockTimestamp {
    /// Presentation timestamp, in ticks.
    pub pts: Option<u64>,
    /// Decoding timestamp, in ticks.
    pub dts: Option<u64>,
    /// Clock rate as a rational, ticks per second.
    pub rate: Option<(i64, i64)>,
}

/// The universal envelope passed between pipes.
#[derive(Clone, Debug)]
pub struct Uref {
    ubuf: Option<Arc<Ubuf>>,
    attrs: UDict,
}

impl Uref {
    /// A uref with no payload and no attributes.
    pub fn new() -> Self {
        Self { ubuf: None, attrs: UDict::new() }
    }

    /// A uref wrapping a payload.
    pub fn with_ubuf(ubuf: Ubuf) -> Self {
        Self { ubuf: Some(Arc::new(ubuf)), attrs: UDict::new() }
    }

    /// A flow-definition uref: carries the flow definition string and no
    /// payload. `def` is the dotted type string (`"block.mpegts."`,
    /// `"pic."`, `"sound.f32."`, ...).
    pub fn flow_def(def: impl Into<String>) -> Self {
        let mut uref = Self::new();
        uref.attrs.set(FLOW_DEF, UDictValue::SharedString(Arc::from(def.into())));
        uref
    }

    /// True if this is a flow-definition uref (no payload, carries a flow
    /// definition string).
    pub fn is_flow_def(&self) -> bool {
        self.ubuf.is_none() && self.flow_def_attr().is_some()
    }

    /// Borrow the payload, if any.
    pub fn ubuf(&self) -> Option<&Ubuf> {
        self.ubuf.as_deref()
    }

    /// Attach a payload. Panics if this uref was constructed via
    /// [`Self::flow_def`] - see the invariant in the module docs.
    pub fn set_ubuf(&mut self, ubuf: Ubuf) {
        assert!(
            self.flow_def_attr().is_none(),
            "a flow-definition uref must not carry a payload"
        );
        self.ubuf = Some(Arc::new(ubuf));
    }

    /// Detach and return the payload, if any.
    pub fn take_ubuf(&mut self) -> Option<Ubuf> {
        self.ubuf.take().map(|arc| Arc::try_unwrap(arc).unwrap_or_else(|arc| (*arc).dup()))
    }

    /// Duplicate: a new uref header sharing the payload (ubuf refcount
    /// increment, not a copy) and the attribute dictionary (copy-on-write).
    pub fn dup(&self) -> Self {
        self.clone()
    }

    /// Flow id, if set.
    pub fn flow_id(&self) -> Option<u64> {
        match self.attrs.get(FLOW_ID, UDictValueTag::SmallInt) {
            Some(UDictValue::SmallInt(v)) => Some(*v as u64),
            _ => None,
        }
    }

    /// Set the flow id.
    pub fn set_flow_id(&mut self, id: u64) {
        self.attrs.set(FLOW_ID, UDictValue::SmallInt(id as i64));
    }

    /// The flow definition string, if set.
    pub fn flow_def_attr(&self) -> Option<Arc<str>> {
        match self.attrs.get(FLOW_DEF, UDictValueTag::SharedString) {
            Some(UDictValue::SharedString(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Set (or replace) the flow definition string on a data uref. Distinct
    /// from [`Self::flow_def`] the constructor, which also clears `ubuf`.
    pub fn set_flow_def_attr(&mut self, def: impl Into<String>) {
        self.attrs.set(FLOW_DEF, UDictValue::SharedString(Arc::from(def.into())));
    }

    /// Read the timestamp for a clock domain.
    pub fn clock(&self, domain: ClockDomain) -> ClockTimestamp {
        let prefix = domain.prefix();
        let pts = match self.attrs.get(&format!("{prefix}.pts"), UDictValueTag::SmallInt) {
            Some(UDictValue::SmallInt(v)) => Some(*v as u64),
            _ => None,
        };
        let dts = match self.attrs.get(&format!("{prefix}.dts"), UDictValueTag::SmallInt) {
            Some(UDictValue::SmallInt(v)) => Some(*v as u64),
            _ => None,
        };
        let rate = match self.attrs.get(&format!("{prefix}.rate"), UDictValueTag::Rational) {
            Some(UDictValue::Rational(n, d)) => Some((*n, *d)),
            _ => None,
        };
        ClockTimestamp { pts, dts, rate }
    }

    /// Set the timestamp for a clock domain.
    pub fn set_clock(&mut self, domain: ClockDomain, ts: ClockTimestamp) {
        let prefix = domain.prefix();
        if let Some(pts) = ts.pts {
            self.attrs.set(format!("{prefix}.pts"), UDictValue::SmallInt(pts as i64));
        }
        if let Some(dts) = ts.dts {
            self.attrs.set(format!("{prefix}.dts"), UDictValue::SmallInt(dts as i64));
        }
        if let Some((n, d)) = ts.rate {
            self.attrs.set(format!("{prefix}.rate"), UDictValue::Rational(n, d));
        }
    }

    /// True if the discontinuity marker is set.
    pub fn is_discontinuity(&self) -> bool {
        matches!(self.attrs.get(DISCONTINUITY, UDictValueTag::Bool), Some(UDictValue::Bool(true)))
    }

    /// Set or clear the discontinuity marker.
    pub fn set_discontinuity(&mut self, value: bool) {
        self.attrs.set(DISCONTINUITY, UDictValue::Bool(value));
    }

    /// True if the random-access marker is set.
    pub fn is_random_access(&self) -> bool {
        matches!(self.attrs.get(RANDOM_ACCESS, UDictValueTag::Bool), Some(UDictValue::Bool(true)))
    }

    /// Set or clear the random-access marker.
    pub fn set_random_access(&mut self, value: bool) {
        self.attrs.set(RANDOM_ACCESS, UDictValue::Bool(value));
    }

    /// Duration in ticks, if set.
    pub fn duration(&self) -> Option<u64> {
        match self.attrs.get(DURATION, UDictValueTag::SmallInt) {
            Some(UDictValue::SmallInt(v)) => Some(*v as u64),
            _ => None,
        }
    }

    /// Set the duration in ticks.
    pub fn set_duration(&mut self, ticks: u64) {
        self.attrs.set(DURATION, UDictValue::SmallInt(ticks as i64));
    }

    /// Language tag (e.g. `"eng"`), if set.
    pub fn language(&self) -> Option<String> {
        match self.attrs.get(LANGUAGE, UDictValueTag::SmallString) {
            Some(UDictValue::SmallString(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Set the language tag.
    pub fn set_language(&mut self, lang: impl Into<String>) {
        self.attrs.set(LANGUAGE, UDictValue::SmallString(lang.into()));
    }

    /// Event type name, if this uref carries event metadata rather than (or
    /// in addition to) stream data.
    pub fn event(&self) -> Option<String> {
        match self.attrs.get(EVENT, UDictValueTag::SmallString) {
            Some(UDictValue::SmallString(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Mark this uref as carrying event metadata of the given type.
    pub fn set_event(&mut self, kind: impl Into<String>) {
        self.attrs.set(EVENT, UDictValue::SmallString(kind.into()));
    }

    /// Borrow the full attribute dictionary, for pipe-specific attributes
    /// not covered by the typed accessors above.
    pub fn attrs(&self) -> &UDict {
        &self.attrs
    }

    /// Mutably borrow the full attribute dictionary.
    pub fn attrs_mut(&mut self) -> &mut UDict {
        &mut self.attrs
    }
}

impl Default for Uref {
    fn default() -> Self {
        Self::new()
    }
}

/// Allocates urefs backed by a configured umem manager, the way a pipe's
/// `uref_mgr` field does in the original: pipes hold an `Arc<dyn
/// UrefManager>`, never construct storage directly.
pub trait UrefManager: Send + Sync + std::fmt::Debug {
    /// The umem manager new ubufs are allocated from.
    fn umem_manager(&self) -> Arc<dyn UMemManager>;

    /// Allocate a block uref of `size` bytes.
    fn alloc_block(&self, size: usize) -> Result<Uref> {
        let block = crate::ubuf::BlockUbuf::alloc(self.umem_manager(), size)?;
        Ok(Uref::with_ubuf(Ubuf::Block(block)))
    }
}

/// The default [`UrefManager`]: no pooling of uref headers themselves (they
/// are cheap stack/heap values), just a umem manager for payloads.
#[derive(Debug)]
pub struct StdUrefManager {
    umem: Arc<dyn UMemManager>,
}

impl StdUrefManager {
    /// Create a manager backed by `umem`.
    pub fn new(umem: Arc<dyn UMemManager>) -> Arc<Self> {
        Arc::new(Self { umem })
    }
}

impl UrefManager for StdUrefManager {
    fn umem_manager(&self) -> Arc<dyn UMemManager> {
        self.umem.clone()
    }
}
