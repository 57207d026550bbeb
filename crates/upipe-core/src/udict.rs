//! udict: an ordered attribute multimap, keyed by `(type, name)`.
//!
//! Values are stored inline; there is no separate "shadow region" spill in
//! this port because `Arc<Vec<_>>` already gives us cheap duplication and
//! `Arc::make_mut` gives us copy-on-write for free - duplicating a udict
//! (as happens whenever a uref is duplicated) is one atomic increment, and
//! the first mutation after a dup pays for a single clone of the entry
//! vector, not the individual values.
//!
//! A name plus value kind forms the key: `set("lang", SmallString("en"))`
//! and `set("lang", Payload(..))` do not collide, matching the spec's
//! description of `(type, name)` keys.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// The kind of value stored under a udict key. Doubles as half of the
/// `(type, name)` key used for lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UDictValueTag {
    /// Opaque byte string, caller-interpreted.
    Opaque,
    /// Signed 64-bit integer.
    SmallInt,
    /// Signed 128-bit integer, for values that overflow `i64`.
    BigInt,
    /// IEEE-754 double.
    Float,
    /// Boolean flag.
    Bool,
    /// Rational number (numerator, denominator).
    Rational,
    /// Short inline string.
    SmallString,
    /// Reference-counted string, cheap to duplicate.
    SharedString,
    /// Arbitrary binary payload (larger than `Opaque` is expected to be).
    Payload,
}

/// A typed udict value.
#[derive(Clone, Debug, PartialEq)]
pub enum UDictValue {
    /// See [`UDictValueTag::Opaque`].
    Opaque(Bytes),
    /// See [`UDictValueTag::SmallInt`].
    SmallInt(i64),
    /// See [`UDictValueTag::BigInt`].
    BigInt(i128),
    /// See [`UDictValueTag::Float`].
    Float(f64),
    /// See [`UDictValueTag::Bool`].
    Bool(bool),
    /// See [`UDictValueTag::Rational`]: `(numerator, denominator)`.
    Rational(i64, i64),
    /// See [`UDictValueTag::SmallString`].
    SmallString(String),
    /// See [`UDictValueTag::SharedString`].
    SharedString(Arc<str>),
    /// See [`UDictValueTag::Payload`].
    Payload(Bytes),
}

impl UDictValue {
    /// The tag half of this value's `(type, name)` key.
    pub fn tag(&self) -> UDictValueTag {
        match self {
            UDictValue::Opaque(_) => UDictValueTag::Opaque,
            UDictValue::SmallInt(_) => UDictValueTag::SmallInt,
            UDictValue::BigInt(_) => UDictValueTag::BigInt,
            UDictValue::Float(_) => UDictValueTag::Float,
            UDictValue::Bool(_) => UDictValueTag::Bool,
            UDictValue::Rational(_, _) => UDictValueTag::Rational,
            UDictValue::SmallString(_) => UDictValueTag::SmallString,
            UDictValue::SharedString(_) => UDictValueTag::SharedString,
            UDictValue::Payload(_) => UDictValueTag::Payload,
        }
    }
}

type Entry = (String, UDictValue);

/// An ordered multimap from `(type, name)` to [`UDictValue`].
///
/// Cloning a `UDict` is an `Arc` clone (cheap, as required when a uref is
/// duplicated); the first mutation after a clone copies the entry list
/// once (copy-on-write via [`Arc::make_mut`]).
#[derive(Clone, Default)]
pub struct UDict {
    entries: Arc<Vec<Entry>>,
}

impl UDict {
    /// An empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attributes stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no attributes are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a value by name and tag.
    pub fn get(&self, name: &str, tag: UDictValueTag) -> Option<&UDictValue> {
        self.entries
            .iter()
            .find(|(n, v)| n == name && v.tag() == tag)
            .map(|(_, v)| v)
    }

    /// Set (insert or replace) a value under `name`. Replaces only an
    /// existing entry with the same name *and* tag, preserving entries of
    /// the same name but a different value kind.
    pub fn set(&mut self, name: impl Into<String>, value: UDictValue) {
        let name = name.into();
        let tag = value.tag();
        let entries = Arc::make_mut(&mut self.entries);
        if let Some(slot) = entries.iter_mut().find(|(n, v)| *n == name && v.tag() == tag) {
            slot.1 = value;
        } else {
            entries.push((name, value));
        }
    }

    /// Remove a value by name and tag. Returns the removed value, if any.
    pub fn delete(&mut self, name: &str, tag: UDictValueTag) -> Option<UDictValue> {
        let entries = Arc::make_mut(&mut self.entries);
        let pos = entries.iter().position(|(n, v)| n == name && v.tag() == tag)?;
        Some(entries.remove(pos).1)
    }

    /// Iterate over all attributes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &UDictValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// True when this handle is the only owner of the underlying storage -
    /// the condition under which `set`/`delete` avoid a clone.
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.entries) == 1
    }
}

impl fmt::Debug for UDict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter().map(|(n, v)| (n, v))).finish()
    }
}
