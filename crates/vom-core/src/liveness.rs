//! # Reference Liveness
//!
//! Bookkeeping that decides when durable records may be deleted and which
//! references the vat must keep alive on behalf of durable data.
//!
//! ## Sets
//!
//! - reachable vrefs: imports (and virtual objects) stored into virtual
//!   object state or weak store values
//! - recognizable vrefs: imports used as keys of weak containers
//! - reachable remotables: strong handles to exported non-virtual objects
//!   stored into durable data. The durable form only records the vref, so
//!   the object itself must be pinned here.
//!
//! All three only grow. Nothing is removed until real reference counting
//! replaces the "ever referenced" counters.
//!
//! ## Counters
//!
//! Each virtual object has a persisted `RefCounts` record. `exported` is
//! flipped by the vat's export protocol; `ref_count` becomes 1 the first time
//! another piece of durable data refers to the object and never decreases.
//! `possible_virtual_object_death` is the only path that deletes a virtual
//! object's durable records.

use crate::cache::Cache;
use crate::slot_table::SlotTable;
use crate::slots::{SlotType, parse_vat_slot};
use crate::store::{VatStore, delete_object_records, fetch_ref_counts, store_ref_counts};
use crate::{RefCounts, Reference, Remotable, VomError, VomResult};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Liveness sets of one vat.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    reachable_vrefs: BTreeSet<String>,
    recognizable_vrefs: BTreeSet<String>,
    reachable_remotables: BTreeMap<String, Remotable>,
}

impl LivenessTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that durable data refers to `vref`. Imports and virtual
    /// objects become reachable; anything else is ignored.
    pub fn add_reachable_presence_ref(&mut self, vref: &str) -> VomResult<()> {
        let slot = parse_vat_slot(vref)?;
        if slot.slot_type == SlotType::Object && (!slot.allocated_by_vat || slot.is_virtual()) {
            self.reachable_vrefs.insert(vref.to_string());
        }
        Ok(())
    }

    /// Record that durable data refers to `vref` if it is one of this vat's
    /// exports: virtual objects get their reference counter bumped,
    /// remotables get pinned.
    pub fn add_reachable_remotable_ref(
        &mut self,
        vref: &str,
        store: &mut dyn VatStore,
        slots: &mut SlotTable,
        cache: &mut Cache,
    ) -> VomResult<()> {
        let slot = parse_vat_slot(vref)?;
        if slot.slot_type != SlotType::Object || !slot.allocated_by_vat {
            return Ok(());
        }
        if slot.is_virtual() {
            return self.inc_ref_count(vref, store, slots, cache);
        }
        match slots.get(vref) {
            Some(Reference::Remotable(remotable)) => {
                self.reachable_remotables
                    .insert(vref.to_string(), remotable);
                Ok(())
            }
            _ => Err(VomError::NoRemotable(vref.to_string())),
        }
    }

    /// Apply both reachability rules to every slot of a value that was just
    /// written into durable data.
    pub fn add_reachable_slots(
        &mut self,
        vrefs: &[String],
        store: &mut dyn VatStore,
        slots: &mut SlotTable,
        cache: &mut Cache,
    ) -> VomResult<()> {
        for vref in vrefs {
            self.add_reachable_presence_ref(vref)?;
            self.add_reachable_remotable_ref(vref, store, slots, cache)?;
        }
        Ok(())
    }

    /// Record that `value` was used as a weak container key. Imports become
    /// recognizable.
    pub fn add_recognizable_presence_value(&mut self, value: &Reference) -> VomResult<()> {
        if let Some(vref) = value.slot() {
            let slot = parse_vat_slot(vref)?;
            if slot.is_import() {
                self.recognizable_vrefs.insert(vref.to_string());
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn is_vref_reachable(&self, vref: &str) -> bool {
        self.reachable_vrefs.contains(vref)
    }

    #[must_use]
    pub fn is_vref_recognizable(&self, vref: &str) -> bool {
        self.recognizable_vrefs.contains(vref)
    }

    /// Whether the remotable exported as `vref` is pinned by durable data.
    #[must_use]
    pub fn is_remotable_pinned(&self, vref: &str) -> bool {
        self.reachable_remotables.contains_key(vref)
    }

    /// Set the `exported` flag of a virtual object.
    pub fn set_exported(
        &self,
        vobj_id: &str,
        exported: bool,
        store: &mut dyn VatStore,
        slots: &mut SlotTable,
        cache: &mut Cache,
    ) -> VomResult<()> {
        let slot = parse_vat_slot(vobj_id)?;
        if !slot.is_virtual() {
            return Err(VomError::InvalidSlot(vobj_id.to_string()));
        }
        let counts = fetch_ref_counts(&*store, vobj_id)?;
        let now_exported = u8::from(exported);
        if counts.exported != now_exported {
            let updated = RefCounts::new(now_exported, counts.ref_count);
            self.set_ref_counts(vobj_id, updated, store, slots, cache)?;
        }
        Ok(())
    }

    /// Delete the durable records of `vobj_id` if nothing can reach it:
    /// not reachable from durable data, no live in-memory value, and both
    /// persisted counters zero. Returns whether the records were deleted.
    pub fn possible_virtual_object_death(
        &self,
        vobj_id: &str,
        store: &mut dyn VatStore,
        slots: &mut SlotTable,
        cache: &mut Cache,
    ) -> VomResult<bool> {
        if self.is_vref_reachable(vobj_id) || slots.get(vobj_id).is_some() {
            return Ok(false);
        }
        let counts = fetch_ref_counts(&*store, vobj_id)?;
        if !counts.is_zero() {
            return Ok(false);
        }
        delete_object_records(store, vobj_id)?;
        // a cached dirty copy must not write the state back later
        cache.forget(vobj_id);
        info!(vobj_id = %vobj_id, "virtual object records deleted");
        Ok(true)
    }

    // The counter only records "ever referenced": it goes 0 -> 1 and stays.
    fn inc_ref_count(
        &self,
        vobj_id: &str,
        store: &mut dyn VatStore,
        slots: &mut SlotTable,
        cache: &mut Cache,
    ) -> VomResult<()> {
        let counts = fetch_ref_counts(&*store, vobj_id)?;
        if counts.ref_count == 0 {
            debug!(vobj_id = %vobj_id, "virtual object first referenced");
            let updated = RefCounts::new(counts.exported, 1);
            self.set_ref_counts(vobj_id, updated, store, slots, cache)?;
        }
        Ok(())
    }

    fn set_ref_counts(
        &self,
        vobj_id: &str,
        counts: RefCounts,
        store: &mut dyn VatStore,
        slots: &mut SlotTable,
        cache: &mut Cache,
    ) -> VomResult<()> {
        store_ref_counts(store, vobj_id, counts)?;
        if counts.is_zero() {
            self.possible_virtual_object_death(vobj_id, store, slots, cache)?;
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
