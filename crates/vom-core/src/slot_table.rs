//! # Slot Table
//!
//! Maps vrefs to the in-memory values that currently stand for them.
//!
//! Entries are weak. The table never keeps a value alive; a vref "has a live
//! value" exactly while some strong handle to it exists elsewhere in the vat.
//! Dropping the last `Representative` clone is therefore what lets a virtual
//! object be reanimated later, and what lets `possible_virtual_object_death`
//! delete it.

use crate::kind::{Representative, RepresentativeInner};
use crate::primitives::MIN_PRUNE_THRESHOLD;
use crate::types::{LocalInner, PresenceInner, RemotableInner};
use crate::{Local, Presence, Reference, Remotable};
use std::collections::BTreeMap;
use std::rc::Weak;
use tracing::trace;

/// A non-owning handle to a `Reference`.
#[derive(Clone)]
pub(crate) enum WeakReference {
    Presence(Weak<PresenceInner>),
    Remotable(Weak<RemotableInner>),
    Virtual(Weak<RepresentativeInner>),
    Local(Weak<LocalInner>),
}

impl WeakReference {
    pub(crate) fn new(reference: &Reference) -> Self {
        match reference {
            Reference::Presence(p) => Self::Presence(std::rc::Rc::downgrade(&p.0)),
            Reference::Remotable(r) => Self::Remotable(std::rc::Rc::downgrade(&r.0)),
            Reference::Virtual(rep) => Self::Virtual(rep.downgrade()),
            Reference::Local(l) => Self::Local(std::rc::Rc::downgrade(&l.0)),
        }
    }

    pub(crate) fn upgrade(&self) -> Option<Reference> {
        match self {
            Self::Presence(w) => w.upgrade().map(|rc| Reference::Presence(Presence(rc))),
            Self::Remotable(w) => w.upgrade().map(|rc| Reference::Remotable(Remotable(rc))),
            Self::Virtual(w) => w
                .upgrade()
                .map(|rc| Reference::Virtual(Representative::from_inner(rc))),
            Self::Local(w) => w.upgrade().map(|rc| Reference::Local(Local(rc))),
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        match self {
            Self::Presence(w) => w.strong_count() > 0,
            Self::Remotable(w) => w.strong_count() > 0,
            Self::Virtual(w) => w.strong_count() > 0,
            Self::Local(w) => w.strong_count() > 0,
        }
    }
}

/// vref -> live value table for one vat.
///
/// Dead bindings are swept in batches on `register`, so the table stays
/// proportional to the live values rather than to every vref ever bound.
pub struct SlotTable {
    entries: BTreeMap<String, WeakReference>,
    prune_at: usize,
}

impl Default for SlotTable {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            prune_at: MIN_PRUNE_THRESHOLD,
        }
    }
}

impl std::fmt::Debug for SlotTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl SlotTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `vref` to `value`, replacing any dead binding.
    pub fn register(&mut self, vref: &str, value: &Reference) {
        if self.entries.len() >= self.prune_at {
            let removed = self.prune();
            self.prune_at = (self.entries.len() * 2).max(MIN_PRUNE_THRESHOLD);
            trace!(removed, remaining = self.entries.len(), "slot table pruned");
        }
        self.entries
            .insert(vref.to_string(), WeakReference::new(value));
    }

    /// The live value for `vref`, if any. Dead bindings are dropped.
    pub fn get(&mut self, vref: &str) -> Option<Reference> {
        let value = self.entries.get(vref).and_then(WeakReference::upgrade);
        if value.is_none() {
            self.entries.remove(vref);
        }
        value
    }

    /// Whether `vref` currently resolves to a live value.
    #[must_use]
    pub fn contains_live(&self, vref: &str) -> bool {
        self.entries.get(vref).is_some_and(WeakReference::is_live)
    }

    /// Drop every dead binding. Returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, value| value.is_live());
        before - self.entries.len()
    }

    /// Number of bindings, live or not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================
