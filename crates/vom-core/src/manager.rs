//! # Virtual Object Manager
//!
//! The per-vat facade tying the pieces together: the inner-self cache, the
//! liveness tracker, the slot table, the kind registry and the durable store.
//!
//! `VirtualObjectManager` is a cheap clone handle. Kind makers, states and
//! weak containers all keep one, so user code running inside an object can
//! construct further objects or touch containers freely. The shared core is
//! only ever borrowed for the duration of one bookkeeping step and never
//! while user code (makers, initializers, methods) runs.

use crate::cache::{Cache, CacheStats};
use crate::containers::{VirtualAwareWeakMap, VirtualAwareWeakSet, WeakStore};
use crate::kind::{InstanceKit, KindEntry, KindMaker, State};
use crate::liveness::LivenessTracker;
use crate::primitives::FIRST_INSTANCE_ID;
use crate::slot_table::SlotTable;
use crate::slots::{SlotType, make_vat_slot, parse_vat_slot};
use crate::store::{RECORD_PREFIX, VatStore, fetch_ref_counts};
use crate::{
    CapData, Presence, RefCounts, Reference, Remotable, Value, VomConfig, VomError, VomResult,
    marshal,
};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, info};

/// Everything the manager mutates.
pub(crate) struct ManagerCore {
    pub(crate) store: Box<dyn VatStore>,
    pub(crate) cache: Cache,
    pub(crate) tracker: LivenessTracker,
    pub(crate) slots: SlotTable,
    pub(crate) kinds: BTreeMap<u64, Rc<KindEntry>>,
    next_export_id: u64,
    next_weak_store_id: u64,
}

/// Virtual object manager of one vat.
#[derive(Clone)]
pub struct VirtualObjectManager {
    pub(crate) core: Rc<RefCell<ManagerCore>>,
}

impl fmt::Debug for VirtualObjectManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.core.try_borrow() {
            Ok(core) => f
                .debug_struct("VirtualObjectManager")
                .field("cache", &core.cache.stats())
                .field("kinds", &core.kinds.len())
                .field("next_export_id", &core.next_export_id)
                .finish_non_exhaustive(),
            Err(_) => f
                .debug_struct("VirtualObjectManager")
                .finish_non_exhaustive(),
        }
    }
}

impl VirtualObjectManager {
    /// Create a manager persisting through `store`.
    pub fn new(store: impl VatStore + 'static, config: VomConfig) -> VomResult<Self> {
        config.validate()?;
        info!(
            cache_size = config.cache_size,
            first_export_id = config.first_export_id,
            first_weak_store_id = config.first_weak_store_id,
            "virtual object manager created"
        );
        Ok(Self {
            core: Rc::new(RefCell::new(ManagerCore {
                store: Box::new(store),
                cache: Cache::new(config.cache_size),
                tracker: LivenessTracker::new(),
                slots: SlotTable::new(),
                kinds: BTreeMap::new(),
                next_export_id: config.first_export_id,
                next_weak_store_id: config.first_weak_store_id,
            })),
        })
    }

    /// Hand out the next export id. Shared by kinds and remotables.
    pub fn allocate_export_id(&self) -> u64 {
        let mut core = self.core.borrow_mut();
        let id = core.next_export_id;
        core.next_export_id = id.saturating_add(1);
        id
    }

    // =========================================================================
    // KINDS
    // =========================================================================

    /// Register a new kind and return its instance maker.
    ///
    /// `maker` is run once per representative: on construction and on every
    /// reanimation. It must capture `State` for everything an instance
    /// remembers.
    pub fn make_kind(&self, maker: impl Fn(State) -> InstanceKit + 'static) -> KindMaker {
        let kind_id = self.allocate_export_id();
        let entry = Rc::new(KindEntry::new(kind_id, FIRST_INSTANCE_ID, Box::new(maker)));
        self.core
            .borrow_mut()
            .kinds
            .insert(kind_id, Rc::clone(&entry));
        debug!(kind_id, "kind registered");
        KindMaker::new(entry, self.clone())
    }

    // =========================================================================
    // WEAK CONTAINERS
    // =========================================================================

    /// Create a weak store. `key_name` names keys in error messages.
    pub fn make_weak_store(&self, key_name: Option<&str>) -> WeakStore {
        let store_id = {
            let mut core = self.core.borrow_mut();
            let id = core.next_weak_store_id;
            core.next_weak_store_id = id.saturating_add(1);
            id
        };
        WeakStore::new(store_id, key_name, self.clone())
    }

    #[must_use]
    pub fn make_weak_map<V>(&self) -> VirtualAwareWeakMap<V> {
        VirtualAwareWeakMap::new(self.clone())
    }

    #[must_use]
    pub fn make_weak_set(&self) -> VirtualAwareWeakSet {
        VirtualAwareWeakSet::new(self.clone())
    }

    // =========================================================================
    // REFERENCES
    // =========================================================================

    /// Create an exported non-virtual object with a fresh `o+N` vref.
    pub fn make_remotable(&self, label: &str) -> Remotable {
        let vref = make_vat_slot(SlotType::Object, true, self.allocate_export_id());
        let remotable = Remotable::new(vref.as_str(), label);
        self.core
            .borrow_mut()
            .slots
            .register(&vref, &Reference::Remotable(remotable.clone()));
        remotable
    }

    /// The presence of an imported object, creating it on first use.
    pub fn presence_for(&self, vref: &str) -> VomResult<Presence> {
        let slot = parse_vat_slot(vref)?;
        if !slot.is_import() {
            return Err(VomError::UnsupportedSlot(vref.to_string()));
        }
        let mut core = self.core.borrow_mut();
        if let Some(Reference::Presence(presence)) = core.slots.get(vref) {
            return Ok(presence);
        }
        let presence = Presence::new(vref);
        core.slots
            .register(vref, &Reference::Presence(presence.clone()));
        Ok(presence)
    }

    /// Whether `vref` currently has a live in-memory value.
    #[must_use]
    pub fn has_live_value(&self, vref: &str) -> bool {
        self.core.borrow().slots.contains_live(vref)
    }

    /// Resolve a slot of incoming data to a value: the live one if any, a
    /// new presence for imports, a reanimated representative for virtual
    /// objects.
    pub fn convert_slot_to_val(&self, vref: &str) -> VomResult<Reference> {
        let slot = parse_vat_slot(vref)?;
        if slot.slot_type != SlotType::Object {
            return Err(VomError::UnsupportedSlot(vref.to_string()));
        }
        {
            let mut core = self.core.borrow_mut();
            if let Some(value) = core.slots.get(vref) {
                return Ok(value);
            }
            if !slot.allocated_by_vat {
                let presence = Presence::new(vref);
                let value = Reference::Presence(presence);
                core.slots.register(vref, &value);
                return Ok(value);
            }
            if !slot.is_virtual() {
                return Err(VomError::UnknownSlot(vref.to_string()));
            }
        }
        match self.make_virtual_object_representative(vref, false)? {
            Some(rep) => Ok(Reference::Virtual(rep)),
            None => Err(VomError::UnknownSlot(vref.to_string())),
        }
    }

    /// Marshal a value.
    pub fn serialize(&self, value: &Value) -> VomResult<CapData> {
        marshal::serialize(value)
    }

    /// Unmarshal a value, resolving its slots through this manager.
    pub fn unserialize(&self, data: &CapData) -> VomResult<Value> {
        marshal::unserialize(data, &mut |vref: &str| self.convert_slot_to_val(vref))
    }

    // =========================================================================
    // LIVENESS
    // =========================================================================

    #[must_use]
    pub fn is_vref_reachable(&self, vref: &str) -> bool {
        self.core.borrow().tracker.is_vref_reachable(vref)
    }

    #[must_use]
    pub fn is_vref_recognizable(&self, vref: &str) -> bool {
        self.core.borrow().tracker.is_vref_recognizable(vref)
    }

    #[must_use]
    pub fn is_remotable_pinned(&self, vref: &str) -> bool {
        self.core.borrow().tracker.is_remotable_pinned(vref)
    }

    /// Record whether another vat holds `vobj_id`.
    pub fn set_exported(&self, vobj_id: &str, exported: bool) -> VomResult<()> {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        core.tracker.set_exported(
            vobj_id,
            exported,
            core.store.as_mut(),
            &mut core.slots,
            &mut core.cache,
        )
    }

    /// Delete the durable records of `vobj_id` if nothing can reach it.
    /// Returns whether they were deleted.
    pub fn possible_virtual_object_death(&self, vobj_id: &str) -> VomResult<bool> {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        core.tracker.possible_virtual_object_death(
            vobj_id,
            core.store.as_mut(),
            &mut core.slots,
            &mut core.cache,
        )
    }

    /// The persisted counters of `vobj_id`.
    pub fn ref_counts(&self, vobj_id: &str) -> VomResult<RefCounts> {
        let core = self.core.borrow();
        fetch_ref_counts(core.store.as_ref(), vobj_id)
    }

    // =========================================================================
    // CACHE
    // =========================================================================

    /// Write back and evict every cached state not under construction.
    pub fn flush_cache(&self) -> VomResult<()> {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        core.cache.flush(core.store.as_mut())
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.core.borrow().cache.stats()
    }

    /// Cached vobjIDs, most recently used first.
    #[must_use]
    pub fn cache_order(&self) -> Vec<String> {
        self.core.borrow().cache.recency_order()
    }

    /// Whether the state of `vobj_id` is resident in the cache.
    #[must_use]
    pub fn is_resident(&self, vobj_id: &str) -> bool {
        self.core.borrow().cache.is_resident(vobj_id)
    }

    // =========================================================================
    // STORE ACCESS
    // =========================================================================

    /// Durable records under `prefix` (default: every manager record).
    pub fn records(&self, prefix: Option<&str>) -> VomResult<Vec<(String, String)>> {
        let core = self.core.borrow();
        core.store
            .entries_with_prefix(prefix.unwrap_or(RECORD_PREFIX))
    }

    pub(crate) fn store_get(&self, key: &str) -> VomResult<Option<String>> {
        self.core.borrow().store.get(key)
    }

    pub(crate) fn store_delete(&self, key: &str) -> VomResult<()> {
        self.core.borrow_mut().store.delete(key)
    }

    /// Write `data` under `key` and account for the references it holds.
    pub(crate) fn store_durable_value(&self, key: &str, data: &CapData, raw: &str) -> VomResult<()> {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        core.tracker.add_reachable_slots(
            &data.slots,
            core.store.as_mut(),
            &mut core.slots,
            &mut core.cache,
        )?;
        core.store.set(key, raw)
    }

    pub(crate) fn add_recognizable(&self, key: &Reference) -> VomResult<()> {
        self.core
            .borrow_mut()
            .tracker
            .add_recognizable_presence_value(key)
    }
}

// =============================================================================
// TESTS
// =============================================================================
