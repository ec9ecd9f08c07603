//! # Property-Based Tests
//!
//! Cache and persistence invariants checked over generated operation
//! sequences.

use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeMap;
use vom_core::store::{RawState, store_state};
use vom_core::{
    Cache, CapData, InstanceKit, MemoryStore, State, Value, VirtualObjectManager, VomConfig,
};

fn seeded_store(count: usize) -> MemoryStore {
    let mut store = MemoryStore::new();
    for i in 0..count {
        let mut raw = RawState::new();
        raw.insert(
            "i".to_string(),
            CapData {
                body: i.to_string(),
                slots: vec![],
            },
        );
        store_state(&mut store, &format!("o+1/{i}"), &raw).expect("seed");
    }
    store
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Resident entries never exceed capacity, whatever the access pattern.
    #[test]
    fn residency_is_bounded(
        capacity in 1usize..6,
        accesses in vec((0usize..12, any::<bool>()), 1..80)
    ) {
        let mut store = seeded_store(12);
        let mut cache = Cache::new(capacity);
        for (index, load) in accesses {
            cache.lookup(&format!("o+1/{index}"), load, &mut store).expect("lookup");
            prop_assert!(cache.len() <= capacity);
            prop_assert!(cache.stats().resident <= capacity);
        }
    }

    /// The cache keeps exactly the most recently used distinct ids.
    #[test]
    fn cache_keeps_most_recent(
        capacity in 1usize..6,
        accesses in vec(0usize..12, 1..80)
    ) {
        let mut store = seeded_store(12);
        let mut cache = Cache::new(capacity);
        for index in &accesses {
            cache.lookup(&format!("o+1/{index}"), true, &mut store).expect("lookup");
        }

        let mut expected = Vec::new();
        for index in accesses.iter().rev() {
            let id = format!("o+1/{index}");
            if !expected.contains(&id) {
                expected.push(id);
            }
            if expected.len() == capacity {
                break;
            }
        }
        prop_assert_eq!(cache.recency_order(), expected);
    }

    /// Property reads always observe the latest write, however small the
    /// cache and however the writes interleave.
    #[test]
    fn reads_observe_latest_writes(
        cache_size in 1usize..4,
        writes in vec((0usize..5, -1000i64..1000), 1..60)
    ) {
        let store = MemoryStore::new();
        let vom = VirtualObjectManager::new(store, VomConfig::with_cache_size(cache_size))
            .expect("manager");
        let kind = vom.make_kind(|state: State| {
            InstanceKit::new().with_init(move |_| state.set("n", 0))
        });
        let reps: Vec<_> = (0..5).map(|_| kind.make(&[]).expect("make")).collect();

        let mut model: BTreeMap<usize, i64> = BTreeMap::new();
        for (index, value) in writes {
            reps[index].set("n", value).expect("set");
            model.insert(index, value);
        }
        for (index, rep) in reps.iter().enumerate() {
            let expected = model.get(&index).copied().unwrap_or(0);
            prop_assert_eq!(rep.get("n").expect("get"), Value::Int(expected));
        }
    }

    /// Flushing twice writes nothing the second time.
    #[test]
    fn second_flush_is_free(
        writes in vec((0usize..4, 0i64..100), 0..20)
    ) {
        let store = MemoryStore::new();
        let vom = VirtualObjectManager::new(store.clone(), VomConfig::with_cache_size(4))
            .expect("manager");
        let kind = vom.make_kind(|state: State| {
            InstanceKit::new().with_init(move |_| state.set("n", 0))
        });
        let reps: Vec<_> = (0..4).map(|_| kind.make(&[]).expect("make")).collect();
        for (index, value) in writes {
            reps[index].set("n", value).expect("set");
        }
        vom.flush_cache().expect("flush");
        let writes_after_first = store.write_count();
        vom.flush_cache().expect("flush again");
        prop_assert_eq!(store.write_count(), writes_after_first);
    }
}
