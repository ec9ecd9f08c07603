//! # Durable Record Store
//!
//! The key/value surface the manager persists through, and the record
//! layout it uses on top of it.
//!
//! ## Keys
//!
//! - `vom.<vobjID>`: JSON object mapping each state property to its `CapData`
//! - `vom.<vobjID>.refCount`: `"<exported> <refCount>"`
//! - `vom.ws<storeID>.<vref>`: JSON `CapData` of one weak store entry
//!
//! ## Backends
//!
//! - `MemoryStore`: shared in-memory map, used by tests and embedders
//! - `RedbStore`: disk-backed redb database

mod redb_store;

pub use redb_store::RedbStore;

use crate::{CapData, RefCounts, VomError, VomResult};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Prefix shared by every record the manager writes.
pub const RECORD_PREFIX: &str = "vom.";

/// Suffix of reference-count records.
pub const REF_COUNT_SUFFIX: &str = ".refCount";

/// The in-memory form of a virtual object's state: property name to
/// marshaled value.
pub type RawState = BTreeMap<String, CapData>;

// =============================================================================
// VATSTORE TRAIT
// =============================================================================

/// String-keyed durable storage available to one vat.
///
/// Reads and writes are synchronous. Each `set`/`delete` is individually
/// durable; there are no multi-key transactions.
pub trait VatStore {
    /// Read the value stored under `key`.
    fn get(&self, key: &str) -> VomResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&mut self, key: &str, value: &str) -> VomResult<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&mut self, key: &str) -> VomResult<()>;

    /// All `(key, value)` pairs whose key starts with `prefix`, in key order.
    fn entries_with_prefix(&self, prefix: &str) -> VomResult<Vec<(String, String)>>;
}

// =============================================================================
// RECORD LAYOUT
// =============================================================================

/// Key of the state blob of a virtual object.
#[must_use]
pub fn state_key(vobj_id: &str) -> String {
    format!("{RECORD_PREFIX}{vobj_id}")
}

/// Key of the reference-count record of a virtual object.
#[must_use]
pub fn ref_count_key(vobj_id: &str) -> String {
    format!("{RECORD_PREFIX}{vobj_id}{REF_COUNT_SUFFIX}")
}

/// Key of one durable weak store entry.
#[must_use]
pub fn weak_store_key(store_id: u64, vref: &str) -> String {
    format!("{RECORD_PREFIX}ws{store_id}.{vref}")
}

/// Load the state blob of `vobj_id`.
pub fn fetch_state(store: &dyn VatStore, vobj_id: &str) -> VomResult<RawState> {
    let key = state_key(vobj_id);
    let raw = store
        .get(&key)?
        .ok_or_else(|| VomError::StateNotFound(vobj_id.to_string()))?;
    serde_json::from_str(&raw).map_err(|e| VomError::CorruptRecord {
        key,
        reason: e.to_string(),
    })
}

/// Write the state blob of `vobj_id`.
pub fn store_state(store: &mut dyn VatStore, vobj_id: &str, state: &RawState) -> VomResult<()> {
    let json =
        serde_json::to_string(state).map_err(|e| VomError::SerializationError(e.to_string()))?;
    store.set(&state_key(vobj_id), &json)
}

/// Load the reference counts of `vobj_id`; a missing record means `0 0`.
pub fn fetch_ref_counts(store: &dyn VatStore, vobj_id: &str) -> VomResult<RefCounts> {
    let key = ref_count_key(vobj_id);
    match store.get(&key)? {
        Some(raw) => RefCounts::parse(&key, &raw),
        None => Ok(RefCounts::default()),
    }
}

/// Write the reference counts of `vobj_id`.
pub fn store_ref_counts(
    store: &mut dyn VatStore,
    vobj_id: &str,
    counts: RefCounts,
) -> VomResult<()> {
    store.set(&ref_count_key(vobj_id), &counts.render())
}

/// Delete both durable records of `vobj_id`.
pub fn delete_object_records(store: &mut dyn VatStore, vobj_id: &str) -> VomResult<()> {
    store.delete(&state_key(vobj_id))?;
    store.delete(&ref_count_key(vobj_id))
}

/// Decode a `CapData` record (weak store entries).
pub fn decode_cap_data(key: &str, raw: &str) -> VomResult<CapData> {
    serde_json::from_str(raw).map_err(|e| VomError::CorruptRecord {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Encode a `CapData` record.
pub fn encode_cap_data(data: &CapData) -> VomResult<String> {
    serde_json::to_string(data).map_err(|e| VomError::SerializationError(e.to_string()))
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// An in-memory `VatStore`.
///
/// Clones share one backing map, so a test can hand a clone to the manager
/// and keep another to inspect what was persisted. Writes and deletes are
/// counted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Rc<RefCell<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    map: BTreeMap<String, String>,
    writes: u64,
    deletes: u64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set` calls so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.inner.borrow().writes
    }

    /// Number of `delete` calls so far.
    #[must_use]
    pub fn delete_count(&self) -> u64 {
        self.inner.borrow().deletes
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.borrow().map.contains_key(key)
    }

    /// Raw value under `key`.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.inner.borrow().map.get(key).cloned()
    }

    /// All keys in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.borrow().map.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().map.is_empty()
    }
}

impl VatStore for MemoryStore {
    fn get(&self, key: &str) -> VomResult<Option<String>> {
        Ok(self.inner.borrow().map.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> VomResult<()> {
        let mut inner = self.inner.borrow_mut();
        inner.writes = inner.writes.saturating_add(1);
        inner.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> VomResult<()> {
        let mut inner = self.inner.borrow_mut();
        inner.deletes = inner.deletes.saturating_add(1);
        inner.map.remove(key);
        Ok(())
    }

    fn entries_with_prefix(&self, prefix: &str) -> VomResult<Vec<(String, String)>> {
        Ok(self
            .inner
            .borrow()
            .map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// =============================================================================
// TESTS
// =============================================================================
