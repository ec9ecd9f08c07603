//! # Core Type Definitions
//!
//! This module contains the shared types of the virtual object manager:
//! - The passable data model (`Value`, `Reference`)
//! - Reference kinds (`Presence`, `Remotable`, `Local`)
//! - The marshaled form (`CapData`)
//! - Persisted reference counters (`RefCounts`)
//! - Error types (`VomError`)
//!
//! ## Identity
//!
//! Every reference kind is an `Rc` handle. Two references denote the same
//! object exactly when they share an allocation, so equality on `Reference`
//! is identity, never structure.

use crate::kind::Representative;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

// =============================================================================
// VALUE
// =============================================================================

/// A passable value: plain data plus references to objects.
///
/// Values are what virtual object state properties, weak store entries and
/// message arguments hold. Plain data is copied by value when serialized;
/// references are recorded as slots.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    List(Vec<Value>),
    Record(BTreeMap<String, Value>),
    Ref(Reference),
}

impl Value {
    /// Create a text value.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Create a record value from `(name, value)` pairs.
    #[must_use]
    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Self::Ref(r) => Some(r),
            _ => None,
        }
    }

    /// The virtual object representative this value refers to, if any.
    #[must_use]
    pub fn as_representative(&self) -> Option<&Representative> {
        match self {
            Self::Ref(Reference::Virtual(rep)) => Some(rep),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<Reference> for Value {
    fn from(r: Reference) -> Self {
        Self::Ref(r)
    }
}

impl From<Representative> for Value {
    fn from(rep: Representative) -> Self {
        Self::Ref(Reference::Virtual(rep))
    }
}

impl From<Presence> for Value {
    fn from(p: Presence) -> Self {
        Self::Ref(Reference::Presence(p))
    }
}

impl From<Remotable> for Value {
    fn from(r: Remotable) -> Self {
        Self::Ref(Reference::Remotable(r))
    }
}

impl From<Local> for Value {
    fn from(l: Local) -> Self {
        Self::Ref(Reference::Local(l))
    }
}

// =============================================================================
// REFERENCES
// =============================================================================

/// An object passed by reference.
#[derive(Debug, Clone)]
pub enum Reference {
    /// An object imported from another vat (`o-N`).
    Presence(Presence),
    /// An exported object of this vat that is not virtual (`o+N`).
    Remotable(Remotable),
    /// A virtual object of this vat (`o+K/I`).
    Virtual(Representative),
    /// A purely local object. It has identity but no vref and cannot be passed.
    Local(Local),
}

impl Reference {
    /// The vref of this reference, or `None` for local objects.
    #[must_use]
    pub fn slot(&self) -> Option<&str> {
        match self {
            Self::Presence(p) => Some(p.vref()),
            Self::Remotable(r) => Some(r.vref()),
            Self::Virtual(rep) => Some(rep.vobj_id()),
            Self::Local(_) => None,
        }
    }

    /// Address of the underlying allocation, stable while any handle
    /// (strong or weak) to it exists.
    #[must_use]
    pub fn identity(&self) -> usize {
        match self {
            Self::Presence(p) => Rc::as_ptr(&p.0) as *const () as usize,
            Self::Remotable(r) => Rc::as_ptr(&r.0) as *const () as usize,
            Self::Virtual(rep) => rep.identity(),
            Self::Local(l) => Rc::as_ptr(&l.0) as *const () as usize,
        }
    }
}

impl From<Presence> for Reference {
    fn from(p: Presence) -> Self {
        Self::Presence(p)
    }
}

impl From<Remotable> for Reference {
    fn from(r: Remotable) -> Self {
        Self::Remotable(r)
    }
}

impl From<Local> for Reference {
    fn from(l: Local) -> Self {
        Self::Local(l)
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Presence(a), Self::Presence(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Self::Remotable(a), Self::Remotable(b)) => Rc::ptr_eq(&a.0, &b.0),
            (Self::Virtual(a), Self::Virtual(b)) => a.same(b),
            (Self::Local(a), Self::Local(b)) => Rc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }
}

/// Handle to an imported object.
#[derive(Clone)]
pub struct Presence(pub(crate) Rc<PresenceInner>);

pub(crate) struct PresenceInner {
    pub(crate) vref: String,
}

impl Presence {
    pub(crate) fn new(vref: impl Into<String>) -> Self {
        Self(Rc::new(PresenceInner { vref: vref.into() }))
    }

    #[must_use]
    pub fn vref(&self) -> &str {
        &self.0.vref
    }
}

impl fmt::Debug for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Presence").field(&self.0.vref).finish()
    }
}

/// Handle to an exported, non-virtual object of this vat.
///
/// Created through `VirtualObjectManager::make_remotable`, which allocates
/// its export vref.
#[derive(Clone)]
pub struct Remotable(pub(crate) Rc<RemotableInner>);

pub(crate) struct RemotableInner {
    pub(crate) vref: String,
    pub(crate) label: String,
}

impl Remotable {
    pub(crate) fn new(vref: impl Into<String>, label: impl Into<String>) -> Self {
        Self(Rc::new(RemotableInner {
            vref: vref.into(),
            label: label.into(),
        }))
    }

    #[must_use]
    pub fn vref(&self) -> &str {
        &self.0.vref
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.0.label
    }
}

impl fmt::Debug for Remotable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remotable")
            .field("vref", &self.0.vref)
            .field("label", &self.0.label)
            .finish()
    }
}

/// Handle to a local object that has never been exported.
///
/// Locals can key weak containers (held weakly) but cannot be serialized.
#[derive(Clone)]
pub struct Local(pub(crate) Rc<LocalInner>);

pub(crate) struct LocalInner {
    pub(crate) label: String,
}

impl Local {
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self(Rc::new(LocalInner {
            label: label.into(),
        }))
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.0.label
    }
}

impl fmt::Debug for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Local").field(&self.0.label).finish()
    }
}

// =============================================================================
// MARSHALED FORM
// =============================================================================

/// The serialized form of a value: a JSON body plus the slots it refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CapData {
    pub body: String,
    pub slots: Vec<String>,
}

// =============================================================================
// REFERENCE COUNTS
// =============================================================================

/// Persisted liveness counters for one virtual object.
///
/// Both counters saturate at their "ever" meaning: `exported` is 0 or 1 and
/// `ref_count` only ever moves from 0 to 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefCounts {
    pub exported: u8,
    pub ref_count: u32,
}

impl RefCounts {
    #[must_use]
    pub const fn new(exported: u8, ref_count: u32) -> Self {
        Self {
            exported,
            ref_count,
        }
    }

    /// Both counters are zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.exported == 0 && self.ref_count == 0
    }

    /// Parse the `"<exported> <refCount>"` record format.
    pub fn parse(key: &str, raw: &str) -> Result<Self, VomError> {
        let corrupt = |reason: &str| VomError::CorruptRecord {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let mut parts = raw.split(' ');
        let exported = parts
            .next()
            .ok_or_else(|| corrupt("missing exported flag"))?
            .parse::<u8>()
            .map_err(|e| corrupt(&e.to_string()))?;
        let ref_count = parts
            .next()
            .ok_or_else(|| corrupt("missing refCount"))?
            .parse::<u32>()
            .map_err(|e| corrupt(&e.to_string()))?;
        if parts.next().is_some() {
            return Err(corrupt("trailing data"));
        }
        Ok(Self::new(exported, ref_count))
    }

    /// Render in the persisted record format.
    #[must_use]
    pub fn render(&self) -> String {
        format!("{} {}", self.exported, self.ref_count)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the virtual object manager.
///
/// - No silent failures
/// - Use `VomResult<T>` for fallible operations
/// - Usage and invariant violations are errors too; the core never panics
#[derive(Debug, Error)]
pub enum VomError {
    /// A second live representative was requested for one object.
    #[error("{0} already has a representative")]
    AlreadyRepresented(String),

    /// Reanimation of an object whose kind was never registered.
    #[error("unknown kind {0}")]
    UnknownKind(String),

    /// Every entry of a full cache is still under construction.
    #[error("cache overflowed with objects being initialized")]
    CacheOverflow,

    /// The accessor surface was used on an object still being constructed.
    #[error("object {0} is still being initialized")]
    StillInitializing(String),

    /// A state property could not be serialized during construction.
    #[error("state property {property} is not serializable: {reason}")]
    UnserializableProperty { property: String, reason: String },

    /// The marshaler refused a value.
    #[error("not passable: {0}")]
    NotPassable(String),

    /// `init` on a key that is already present.
    #[error("{key_name:?} already registered: {key}")]
    KeyAlreadyRegistered { key_name: String, key: String },

    /// `get`/`set`/`delete` on a key that is not present.
    #[error("{key_name:?} not found: {key}")]
    KeyNotFound { key_name: String, key: String },

    /// A vref that does not parse.
    #[error("invalid vat slot {0:?}")]
    InvalidSlot(String),

    /// A vref of a type this manager cannot resolve (promises, devices).
    #[error("unsupported vat slot {0}")]
    UnsupportedSlot(String),

    /// A vref that does not resolve to any live value.
    #[error("no value for slot {0}")]
    UnknownSlot(String),

    /// A remotable written into durable state is not live.
    #[error("no remotable for {0}")]
    NoRemotable(String),

    /// A property that the kind does not declare, or the record lacks.
    #[error("{vobj_id} has no state property {property:?}")]
    UnknownProperty { vobj_id: String, property: String },

    /// A method that the instance kit does not provide.
    #[error("{vobj_id} has no method {method:?}")]
    UnknownMethod { vobj_id: String, method: String },

    /// The durable state record of an object is missing.
    #[error("no stored state for {0}")]
    StateNotFound(String),

    /// A durable record that cannot be decoded.
    #[error("corrupt record {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    /// Invalid manager configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred in the durable store.
    #[error("I/O error: {0}")]
    IoError(String),
}

/// Result alias for manager operations.
pub type VomResult<T> = Result<T, VomError>;

// =============================================================================
// TESTS
// =============================================================================
