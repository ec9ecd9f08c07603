//! # Weak Containers
//!
//! Collections keyed by object identity that behave correctly for virtual
//! objects and imports.
//!
//! A virtual object or an import can be represented by different in-memory
//! handles over time, so keying those by handle would lose entries whenever
//! a representative is dropped and later reanimated. Such keys are routed by
//! vref instead. All other keys (remotables, locals) go into a weak table
//! keyed by handle identity that never keeps its keys alive.
//!
//! - `WeakStore`: vref-keyed entries are durable (`vom.ws<id>.<vref>`),
//!   Map-like API with strict existence checks
//! - `VirtualAwareWeakMap` / `VirtualAwareWeakSet`: in-memory only
//!
//! Using an import as a key marks it recognizable.

use crate::manager::VirtualObjectManager;
use crate::primitives::{DEFAULT_KEY_NAME, MIN_PRUNE_THRESHOLD};
use crate::slot_table::WeakReference;
use crate::slots::parse_vat_slot;
use crate::store::{decode_cap_data, encode_cap_data, weak_store_key};
use crate::{Reference, Value, VomError, VomResult, marshal};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// The vref of `key` if it must be keyed by vref.
fn durable_vref(key: &Reference) -> Option<&str> {
    key.slot()
        .filter(|vref| parse_vat_slot(vref).is_ok_and(|slot| slot.is_durably_keyed()))
}

fn describe(key: &Reference) -> String {
    match key.slot() {
        Some(vref) => vref.to_string(),
        None => format!("{:?}", key),
    }
}

// =============================================================================
// WEAK KEY TABLE
// =============================================================================

/// Identity-keyed table holding its keys weakly.
///
/// Each entry keeps a weak handle to its key, which pins the key's address
/// for as long as the entry exists, so addresses are never confused. Entries
/// of dead keys are dropped in batches as the table grows.
struct WeakKeyTable<V> {
    entries: BTreeMap<usize, (WeakReference, V)>,
    prune_at: usize,
}

impl<V> WeakKeyTable<V> {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            prune_at: MIN_PRUNE_THRESHOLD,
        }
    }

    fn contains(&self, key: &Reference) -> bool {
        self.entries
            .get(&key.identity())
            .is_some_and(|(weak, _)| weak.is_live())
    }

    fn get(&self, key: &Reference) -> Option<&V> {
        self.entries
            .get(&key.identity())
            .filter(|(weak, _)| weak.is_live())
            .map(|(_, value)| value)
    }

    fn insert(&mut self, key: &Reference, value: V) {
        if self.entries.len() >= self.prune_at {
            self.entries.retain(|_, (weak, _)| weak.is_live());
            self.prune_at = (self.entries.len() * 2).max(MIN_PRUNE_THRESHOLD);
        }
        self.entries
            .insert(key.identity(), (WeakReference::new(key), value));
    }

    fn remove(&mut self, key: &Reference) -> Option<V> {
        self.entries.remove(&key.identity()).map(|(_, value)| value)
    }

    fn live_len(&self) -> usize {
        self.entries
            .values()
            .filter(|(weak, _)| weak.is_live())
            .count()
    }
}

// =============================================================================
// WEAK STORE
// =============================================================================

/// A weak map with durable entries for virtual and imported keys.
///
/// `init` requires the key to be absent; `get`, `set` and `delete` require
/// it to be present.
pub struct WeakStore {
    store_id: u64,
    key_name: String,
    backing: WeakKeyTable<Value>,
    manager: VirtualObjectManager,
}

impl WeakStore {
    pub(crate) fn new(store_id: u64, key_name: Option<&str>, manager: VirtualObjectManager) -> Self {
        Self {
            store_id,
            key_name: key_name.unwrap_or(DEFAULT_KEY_NAME).to_string(),
            backing: WeakKeyTable::new(),
            manager,
        }
    }

    #[must_use]
    pub fn store_id(&self) -> u64 {
        self.store_id
    }

    #[must_use]
    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn has(&self, key: &Reference) -> VomResult<bool> {
        match self.record_key(key) {
            Some(record) => Ok(self.manager.store_get(&record)?.is_some()),
            None => Ok(self.backing.contains(key)),
        }
    }

    /// Add an entry for a key that is not present yet.
    pub fn init(&mut self, key: &Reference, value: impl Into<Value>) -> VomResult<()> {
        if self.has(key)? {
            return Err(VomError::KeyAlreadyRegistered {
                key_name: self.key_name.clone(),
                key: describe(key),
            });
        }
        self.write(key, value.into())
    }

    pub fn get(&self, key: &Reference) -> VomResult<Value> {
        match self.record_key(key) {
            Some(record) => {
                let raw = self
                    .manager
                    .store_get(&record)?
                    .ok_or_else(|| self.not_found(key))?;
                let data = decode_cap_data(&record, &raw)?;
                self.manager.unserialize(&data)
            }
            None => self
                .backing
                .get(key)
                .cloned()
                .ok_or_else(|| self.not_found(key)),
        }
    }

    /// Replace the value of a present key.
    pub fn set(&mut self, key: &Reference, value: impl Into<Value>) -> VomResult<()> {
        if !self.has(key)? {
            return Err(self.not_found(key));
        }
        self.write(key, value.into())
    }

    pub fn delete(&mut self, key: &Reference) -> VomResult<()> {
        if !self.has(key)? {
            return Err(self.not_found(key));
        }
        match self.record_key(key) {
            Some(record) => self.manager.store_delete(&record),
            None => {
                self.backing.remove(key);
                Ok(())
            }
        }
    }

    fn write(&mut self, key: &Reference, value: Value) -> VomResult<()> {
        match self.record_key(key) {
            Some(record) => {
                let data = marshal::serialize(&value)?;
                let raw = encode_cap_data(&data)?;
                self.manager.add_recognizable(key)?;
                self.manager.store_durable_value(&record, &data, &raw)
            }
            None => {
                self.backing.insert(key, value);
                Ok(())
            }
        }
    }

    fn record_key(&self, key: &Reference) -> Option<String> {
        durable_vref(key).map(|vref| weak_store_key(self.store_id, vref))
    }

    fn not_found(&self, key: &Reference) -> VomError {
        VomError::KeyNotFound {
            key_name: self.key_name.clone(),
            key: describe(key),
        }
    }
}

impl fmt::Debug for WeakStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakStore")
            .field("store_id", &self.store_id)
            .field("key_name", &self.key_name)
            .field("in_memory", &self.backing.live_len())
            .finish()
    }
}

// =============================================================================
// VIRTUAL-AWARE WEAK MAP / SET
// =============================================================================

/// In-memory weak map that keys virtual objects and imports by vref.
///
/// Entries under a vref are held strongly: the map cannot observe when the
/// object itself is gone.
pub struct VirtualAwareWeakMap<V> {
    weak: WeakKeyTable<V>,
    by_vref: BTreeMap<String, V>,
    manager: VirtualObjectManager,
}

impl<V> VirtualAwareWeakMap<V> {
    pub(crate) fn new(manager: VirtualObjectManager) -> Self {
        Self {
            weak: WeakKeyTable::new(),
            by_vref: BTreeMap::new(),
            manager,
        }
    }

    #[must_use]
    pub fn has(&self, key: &Reference) -> bool {
        match durable_vref(key) {
            Some(vref) => self.by_vref.contains_key(vref),
            None => self.weak.contains(key),
        }
    }

    #[must_use]
    pub fn get(&self, key: &Reference) -> Option<&V> {
        match durable_vref(key) {
            Some(vref) => self.by_vref.get(vref),
            None => self.weak.get(key),
        }
    }

    pub fn set(&mut self, key: &Reference, value: V) -> VomResult<()> {
        match durable_vref(key) {
            Some(vref) => {
                self.manager.add_recognizable(key)?;
                self.by_vref.insert(vref.to_string(), value);
            }
            None => self.weak.insert(key, value),
        }
        Ok(())
    }

    /// Remove an entry. Returns whether one was present.
    pub fn delete(&mut self, key: &Reference) -> bool {
        match durable_vref(key) {
            Some(vref) => self.by_vref.remove(vref).is_some(),
            None => self.weak.remove(key).is_some(),
        }
    }
}

impl<V> fmt::Debug for VirtualAwareWeakMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualAwareWeakMap")
            .field("by_vref", &self.by_vref.len())
            .field("weak", &self.weak.live_len())
            .finish()
    }
}

/// In-memory weak set that keys virtual objects and imports by vref.
pub struct VirtualAwareWeakSet {
    weak: WeakKeyTable<()>,
    by_vref: BTreeSet<String>,
    manager: VirtualObjectManager,
}

impl VirtualAwareWeakSet {
    pub(crate) fn new(manager: VirtualObjectManager) -> Self {
        Self {
            weak: WeakKeyTable::new(),
            by_vref: BTreeSet::new(),
            manager,
        }
    }

    #[must_use]
    pub fn has(&self, key: &Reference) -> bool {
        match durable_vref(key) {
            Some(vref) => self.by_vref.contains(vref),
            None => self.weak.contains(key),
        }
    }

    pub fn add(&mut self, key: &Reference) -> VomResult<()> {
        match durable_vref(key) {
            Some(vref) => {
                self.manager.add_recognizable(key)?;
                self.by_vref.insert(vref.to_string());
            }
            None => self.weak.insert(key, ()),
        }
        Ok(())
    }

    pub fn delete(&mut self, key: &Reference) -> bool {
        match durable_vref(key) {
            Some(vref) => self.by_vref.remove(vref),
            None => self.weak.remove(key).is_some(),
        }
    }
}

impl fmt::Debug for VirtualAwareWeakSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualAwareWeakSet")
            .field("by_vref", &self.by_vref.len())
            .field("weak", &self.weak.live_len())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
