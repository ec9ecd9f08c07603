//! # Inner Self Cache
//!
//! A fixed-capacity LRU cache of inner selves, keyed by vobjID.
//!
//! The cache owns the inner-self records. They live in a `SlotMap` arena and
//! are linked into a doubly-linked recency list by generational key, so a key
//! kept past eviction never aliases a recycled slot. Head is most recently
//! used, tail is next to be evicted.
//!
//! ## Eviction
//!
//! - Evicting an entry writes its state back if it is dirty, then drops it.
//! - An entry under construction is never evicted. It is refreshed to the
//!   head instead; if every tracked entry is under construction the cache
//!   reports `CacheOverflow`.
//!
//! ## Capacity
//!
//! Occupancy never exceeds `capacity`: `remember` makes room for the new
//! entry before linking it.

use crate::kind::{Representative, RepresentativeInner};
use crate::store::{RawState, VatStore, fetch_state, store_state};
use crate::{VomError, VomResult};
use slotmap::{SlotMap, new_key_type};
use std::collections::BTreeMap;
use std::rc::Weak;
use tracing::{debug, trace};

new_key_type! {
    /// Arena key of a tracked inner self.
    pub struct InnerKey;
}

// =============================================================================
// INNER SELF
// =============================================================================

/// The in-memory control record of one virtual object.
#[derive(Debug)]
pub struct InnerSelf {
    pub(crate) vobj_id: String,
    /// Marshaled state when resident, `None` when not loaded.
    pub(crate) raw_data: Option<RawState>,
    /// `raw_data` has writes the store has not seen.
    pub(crate) dirty: bool,
    /// The object's first construction has not finished.
    pub(crate) under_construction: bool,
    /// The live representative, if one exists. Non-owning.
    pub(crate) representative: Weak<RepresentativeInner>,
    prev: Option<InnerKey>,
    next: Option<InnerKey>,
}

impl InnerSelf {
    /// A record with no state loaded.
    pub(crate) fn new(vobj_id: &str) -> Self {
        Self {
            vobj_id: vobj_id.to_string(),
            raw_data: None,
            dirty: false,
            under_construction: false,
            representative: Weak::new(),
            prev: None,
            next: None,
        }
    }

    /// A record for an object whose construction is starting now.
    pub(crate) fn under_construction(vobj_id: &str) -> Self {
        Self {
            raw_data: Some(RawState::new()),
            under_construction: true,
            ..Self::new(vobj_id)
        }
    }

    #[must_use]
    pub fn vobj_id(&self) -> &str {
        &self.vobj_id
    }

    #[must_use]
    pub fn is_resident(&self) -> bool {
        self.raw_data.is_some()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn is_under_construction(&self) -> bool {
        self.under_construction
    }

    /// Number of live representatives: 0 or 1.
    #[must_use]
    pub fn rep_count(&self) -> usize {
        self.representative.strong_count()
    }

    pub(crate) fn set_representative(&mut self, rep: &Representative) {
        self.representative = rep.downgrade();
    }
}

/// Occupancy snapshot of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub capacity: usize,
    pub tracked: usize,
    pub resident: usize,
    pub dirty: usize,
}

// =============================================================================
// CACHE
// =============================================================================

/// LRU cache of inner selves.
#[derive(Debug)]
pub struct Cache {
    capacity: usize,
    entries: SlotMap<InnerKey, InnerSelf>,
    live: BTreeMap<String, InnerKey>,
    head: Option<InnerKey>,
    tail: Option<InnerKey>,
}

impl Cache {
    /// Create an empty cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: SlotMap::with_capacity_and_key(capacity),
            live: BTreeMap::new(),
            head: None,
            tail: None,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    #[must_use]
    pub fn contains(&self, vobj_id: &str) -> bool {
        self.live.contains_key(vobj_id)
    }

    /// The tracked record for `vobj_id`, without touching recency.
    #[must_use]
    pub fn get(&self, vobj_id: &str) -> Option<&InnerSelf> {
        self.live
            .get(vobj_id)
            .and_then(|&key| self.entries.get(key))
    }

    pub(crate) fn get_mut(&mut self, vobj_id: &str) -> Option<&mut InnerSelf> {
        let key = *self.live.get(vobj_id)?;
        self.entries.get_mut(key)
    }

    /// Whether `vobj_id` is tracked with its state loaded.
    #[must_use]
    pub fn is_resident(&self, vobj_id: &str) -> bool {
        self.get(vobj_id).is_some_and(InnerSelf::is_resident)
    }

    /// Tracked vobjIDs from most to least recently used.
    #[must_use]
    pub fn recency_order(&self) -> Vec<String> {
        let mut order = Vec::with_capacity(self.live.len());
        let mut cursor = self.head;
        while let Some(entry) = cursor.and_then(|key| self.entries.get(key)) {
            order.push(entry.vobj_id.clone());
            cursor = entry.next;
        }
        order
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let (resident, dirty) = self.entries.values().fold((0, 0), |(r, d), e| {
            (r + usize::from(e.is_resident()), d + usize::from(e.dirty))
        });
        CacheStats {
            capacity: self.capacity,
            tracked: self.live.len(),
            resident,
            dirty,
        }
    }

    /// Find or create the record for `vobj_id` and mark it most recently
    /// used. With `load`, the returned record is guaranteed resident.
    pub fn lookup(
        &mut self,
        vobj_id: &str,
        load: bool,
        store: &mut dyn VatStore,
    ) -> VomResult<&mut InnerSelf> {
        let key = match self.live.get(vobj_id).copied() {
            Some(key) => {
                self.refresh_key(key);
                key
            }
            None => self.remember(InnerSelf::new(vobj_id), store)?,
        };
        let entry = &mut self.entries[key];
        if load && entry.raw_data.is_none() {
            let raw = fetch_state(&*store, vobj_id)?;
            trace!(vobj_id = %vobj_id, "vo state loaded");
            entry.raw_data = Some(raw);
        }
        Ok(entry)
    }

    /// Start tracking `inner` as the most recently used entry, evicting as
    /// needed. An already tracked vobjID is left untouched.
    pub fn remember(&mut self, inner: InnerSelf, store: &mut dyn VatStore) -> VomResult<InnerKey> {
        if let Some(&key) = self.live.get(&inner.vobj_id) {
            return Ok(key);
        }
        self.make_room_to(self.capacity.saturating_sub(1), store)?;

        let vobj_id = inner.vobj_id.clone();
        let key = self.entries.insert(inner);
        self.link_at_head(key);
        debug!(vobj_id = %vobj_id, "vo LRU remember");
        self.live.insert(vobj_id, key);
        Ok(key)
    }

    /// Mark a tracked entry most recently used. Returns false if untracked.
    pub fn refresh(&mut self, vobj_id: &str) -> bool {
        match self.live.get(vobj_id).copied() {
            Some(key) => {
                self.refresh_key(key);
                true
            }
            None => false,
        }
    }

    /// Evict least recently used entries until occupancy is within capacity.
    pub fn make_room(&mut self, store: &mut dyn VatStore) -> VomResult<()> {
        self.make_room_to(self.capacity, store)
    }

    /// Evict every entry that is not under construction, least recently
    /// used first, writing back dirty state.
    pub fn flush(&mut self, store: &mut dyn VatStore) -> VomResult<()> {
        debug!(tracked = self.live.len(), "vo LRU flush");
        let mut evictable = Vec::with_capacity(self.live.len());
        let mut cursor = self.tail;
        while let Some(key) = cursor {
            let entry = &self.entries[key];
            if !entry.under_construction {
                evictable.push(key);
            }
            cursor = entry.prev;
        }
        for key in evictable {
            self.evict(key, store)?;
        }
        Ok(())
    }

    /// Stop tracking `vobj_id` without writing anything back.
    pub(crate) fn forget(&mut self, vobj_id: &str) {
        if let Some(key) = self.live.remove(vobj_id) {
            self.unlink(key);
            self.entries.remove(key);
        }
    }

    fn make_room_to(&mut self, limit: usize, store: &mut dyn VatStore) -> VomResult<()> {
        while self.live.len() > limit {
            let Some(mut tail) = self.tail else {
                break;
            };
            let mut refresh_count = 1;
            while self.entries[tail].under_construction {
                if refresh_count > self.live.len() {
                    return Err(VomError::CacheOverflow);
                }
                self.refresh_key(tail);
                refresh_count += 1;
                match self.tail {
                    Some(t) => tail = t,
                    None => break,
                }
            }
            self.evict(tail, store)?;
        }
        Ok(())
    }

    fn evict(&mut self, key: InnerKey, store: &mut dyn VatStore) -> VomResult<()> {
        let entry = &self.entries[key];
        debug!(vobj_id = %entry.vobj_id, dirty = entry.dirty, "vo LRU evict");
        if entry.dirty
            && let Some(raw) = &entry.raw_data
        {
            store_state(store, &entry.vobj_id, raw)?;
        }
        self.unlink(key);
        if let Some(entry) = self.entries.remove(key) {
            self.live.remove(&entry.vobj_id);
        }
        Ok(())
    }

    fn refresh_key(&mut self, key: InnerKey) {
        if self.head == Some(key) {
            return;
        }
        self.unlink(key);
        self.link_at_head(key);
        trace!(vobj_id = %self.entries[key].vobj_id, "vo LRU refresh");
    }

    fn link_at_head(&mut self, key: InnerKey) {
        self.entries[key].prev = None;
        self.entries[key].next = self.head;
        if let Some(head) = self.head {
            self.entries[head].prev = Some(key);
        }
        self.head = Some(key);
        if self.tail.is_none() {
            self.tail = Some(key);
        }
    }

    fn unlink(&mut self, key: InnerKey) {
        let prev = self.entries[key].prev.take();
        let next = self.entries[key].next.take();
        match prev {
            Some(p) => self.entries[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.entries[n].prev = prev,
            None => self.tail = prev,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
