//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use std::path::Path;
use tracing::info;
use vom_core::store::{RECORD_PREFIX, REF_COUNT_SUFFIX};
use vom_core::{
    InstanceKit, KindMaker, RedbStore, Reference, State, Value, VatStore, VirtualObjectManager,
    VomConfig, VomError, VomResult, parse_vat_slot,
};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Load the manager configuration, applying the command-line override.
pub fn load_config(path: Option<&Path>, cache_size: Option<usize>) -> VomResult<VomConfig> {
    let mut config = match path {
        Some(path) => {
            let source = std::fs::read_to_string(path).map_err(|e| {
                VomError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
            })?;
            VomConfig::from_toml_str(&source)?
        }
        None => VomConfig::default(),
    };
    if let Some(cache_size) = cache_size {
        config.cache_size = cache_size;
    }
    config.validate()?;
    Ok(config)
}

// =============================================================================
// RECORD INSPECTION
// =============================================================================

/// Durable records grouped by what they hold.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecordCounts {
    pub states: usize,
    pub ref_counts: usize,
    pub weak_store_entries: usize,
}

/// Classify manager records by key shape.
pub fn count_records(records: &[(String, String)]) -> RecordCounts {
    let mut counts = RecordCounts::default();
    for (key, _) in records {
        let Some(rest) = key.strip_prefix(RECORD_PREFIX) else {
            continue;
        };
        if rest.starts_with("ws") {
            counts.weak_store_entries += 1;
        } else if rest.ends_with(REF_COUNT_SUFFIX) {
            counts.ref_counts += 1;
        } else {
            counts.states += 1;
        }
    }
    counts
}

/// The vref a manager record belongs to.
fn record_vref(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(RECORD_PREFIX)?;
    if rest.starts_with("ws") {
        return rest.split_once('.').map(|(_, vref)| vref);
    }
    Some(rest.strip_suffix(REF_COUNT_SUFFIX).unwrap_or(rest))
}

/// First export id not used by any persisted record, and at least `floor`.
///
/// Kinds are not persisted, so a new run must allocate past every kind id
/// already present in the store.
pub fn next_free_export_id(records: &[(String, String)], floor: u64) -> u64 {
    records
        .iter()
        .filter_map(|(key, _)| record_vref(key))
        .filter_map(|vref| parse_vat_slot(vref).ok())
        .filter(|slot| slot.allocated_by_vat)
        .map(|slot| slot.id.saturating_add(1))
        .fold(floor, u64::max)
}

/// First weak store id not used by any persisted `vom.ws<N>.` record, and
/// at least `floor`.
pub fn next_free_weak_store_id(records: &[(String, String)], floor: u64) -> u64 {
    records
        .iter()
        .filter_map(|(key, _)| {
            let rest = key.strip_prefix(RECORD_PREFIX)?.strip_prefix("ws")?;
            rest.split_once('.')?.0.parse::<u64>().ok()
        })
        .map(|id| id.saturating_add(1))
        .fold(floor, u64::max)
}

// =============================================================================
// DEMO COMMAND
// =============================================================================

/// A labelled object counting how often it was visited.
fn thing_kind(vom: &VirtualObjectManager) -> KindMaker {
    vom.make_kind(|state: State| {
        let init_state = state.clone();
        let visit_state = state.clone();
        InstanceKit::new()
            .with_init(move |args| {
                init_state.set("label", args.first().cloned().unwrap_or_default())?;
                init_state.set("visits", 0)
            })
            .with_method("visit", move |_| {
                let visits = visit_state
                    .get("visits")?
                    .as_int()
                    .unwrap_or(0)
                    .saturating_add(1);
                visit_state.set("visits", visits)?;
                Ok(Value::Int(visits))
            })
            .with_method("label", move |_| state.get("label"))
    })
}

/// Construct `count` things, cycle them through the cache and reanimate the
/// last one from its vref.
pub fn cmd_demo(
    db_path: &Path,
    mut config: VomConfig,
    count: usize,
    json_mode: bool,
    verbose: bool,
) -> VomResult<()> {
    let store = RedbStore::open(db_path)?;
    let existing = store.entries_with_prefix(RECORD_PREFIX)?;
    config.first_export_id = next_free_export_id(&existing, config.first_export_id);
    config.first_weak_store_id = next_free_weak_store_id(&existing, config.first_weak_store_id);

    let vom = VirtualObjectManager::new(store, config)?;
    let things = thing_kind(&vom);
    let mut registry = vom.make_weak_store(Some("thing"));

    let mut reps = Vec::with_capacity(count);
    for index in 0..count {
        let rep = things.make(&[Value::text(format!("thing-{index}"))])?;
        registry.init(&Reference::from(rep.clone()), Value::text(format!("#{index}")))?;
        if verbose {
            println!("constructed {}", rep.vobj_id());
        }
        reps.push(rep);
    }
    if let Some(first) = reps.first() {
        vom.set_exported(first.vobj_id(), true)?;
    }
    for rep in &reps {
        rep.invoke("visit", &[])?;
    }

    // keep only the exported one alive
    let ids: Vec<String> = reps.iter().map(|rep| rep.vobj_id().to_string()).collect();
    reps.truncate(1);

    let mut reanimated = None;
    if let Some(last) = ids.last().filter(|_| ids.len() > 1)
        && let Reference::Virtual(rep) = vom.convert_slot_to_val(last)?
    {
        let visits = rep.invoke("visit", &[])?;
        let label = rep.invoke("label", &[])?;
        let entry = registry.get(&Reference::Virtual(rep))?;
        if verbose {
            println!("reanimated {}", last);
        }
        reanimated = Some((last.clone(), label, visits, entry));
    }

    vom.flush_cache()?;
    let counts = count_records(&vom.records(None)?);
    info!(objects = ids.len(), kind_id = things.kind_id(), "demo finished");

    if json_mode {
        let output = serde_json::json!({
            "database": db_path.to_string_lossy(),
            "kind_id": things.kind_id(),
            "objects": ids,
            "reanimated": reanimated.as_ref().map(|(id, label, visits, entry)| serde_json::json!({
                "vobj_id": id,
                "label": label.as_text(),
                "visits": visits.as_int(),
                "registry_entry": entry.as_text(),
            })),
            "records": {
                "states": counts.states,
                "ref_counts": counts.ref_counts,
                "weak_store_entries": counts.weak_store_entries,
            }
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Demo");
    println!("====");
    println!("Database: {:?}", db_path);
    println!("Kind:     {}", things.kind_id());
    println!("Objects:  {}", ids.len());
    if let Some((id, label, visits, entry)) = &reanimated {
        println!();
        println!(
            "Reanimated {} ({}): {} visits, registry entry {}",
            id,
            label.as_text().unwrap_or("?"),
            visits.as_int().unwrap_or(0),
            entry.as_text().unwrap_or("?")
        );
    }
    println!();
    print_counts(counts);

    Ok(())
}

// =============================================================================
// DUMP COMMAND
// =============================================================================

/// Print durable records.
pub fn cmd_dump(db_path: &Path, prefix: Option<&str>, json_mode: bool) -> VomResult<()> {
    let store = RedbStore::open(db_path)?;
    let records = store.entries_with_prefix(prefix.unwrap_or(RECORD_PREFIX))?;

    if json_mode {
        let output: Vec<_> = records
            .iter()
            .map(|(key, value)| serde_json::json!({ "key": key, "value": value }))
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    for (key, value) in &records {
        println!("{} = {}", key, value);
    }
    if records.is_empty() {
        println!("(no records)");
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show record counts.
pub fn cmd_status(db_path: &Path, json_mode: bool) -> VomResult<()> {
    let store = RedbStore::open(db_path)?;
    let total = store.len()?;
    let counts = count_records(&store.entries_with_prefix(RECORD_PREFIX)?);

    if json_mode {
        let output = serde_json::json!({
            "database": db_path.to_string_lossy(),
            "records": total,
            "states": counts.states,
            "ref_counts": counts.ref_counts,
            "weak_store_entries": counts.weak_store_entries,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    println!("Vat Store Status");
    println!("================");
    println!("Database: {:?}", db_path);
    println!("Records:  {}", total);
    println!();
    print_counts(counts);

    Ok(())
}

fn print_counts(counts: RecordCounts) {
    println!("States:             {}", counts.states);
    println!("Ref counts:         {}", counts.ref_counts);
    println!("Weak store entries: {}", counts.weak_store_entries);
}

// =============================================================================
// GC COMMAND
// =============================================================================

/// Run the deletion gate on one persisted object.
///
/// A fresh manager has no live values and an empty reachable set, so only
/// the persisted counters decide.
pub fn cmd_gc(db_path: &Path, config: VomConfig, vobj_id: &str, json_mode: bool) -> VomResult<()> {
    let slot = parse_vat_slot(vobj_id)?;
    if !slot.is_virtual() {
        return Err(VomError::InvalidSlot(vobj_id.to_string()));
    }
    let (counts, deleted) = {
        let vom = VirtualObjectManager::new(RedbStore::open(db_path)?, config)?;
        (
            vom.ref_counts(vobj_id)?,
            vom.possible_virtual_object_death(vobj_id)?,
        )
    };
    // the manager has closed the database, so it can be compacted
    let compacted = if deleted {
        RedbStore::open(db_path)?.compact()?
    } else {
        false
    };
    info!(vobj_id = %vobj_id, deleted, compacted, "gc finished");

    if json_mode {
        let output = serde_json::json!({
            "vobj_id": vobj_id,
            "exported": counts.exported,
            "ref_count": counts.ref_count,
            "deleted": deleted,
            "compacted": compacted,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&output).unwrap_or_default()
        );
        return Ok(());
    }

    if deleted {
        println!(
            "{}: records deleted{}",
            vobj_id,
            if compacted { ", database compacted" } else { "" }
        );
    } else {
        println!(
            "{}: kept (exported {}, refCount {})",
            vobj_id, counts.exported, counts.ref_count
        );
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
