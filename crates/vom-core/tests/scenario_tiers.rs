//! # Scenario Tier Tests (S0-S3)
//!
//! End-to-end behavior of the manager against a shared `MemoryStore`.
//!
//! ## Tiers
//! - S0: Cache residency and write-back
//! - S1: Construction, reanimation and kind isolation
//! - S2: Liveness and deletion gating
//! - S3: Weak containers

use vom_core::store::{ref_count_key, state_key, weak_store_key};
use vom_core::{
    InstanceKit, KindMaker, Local, MemoryStore, Reference, Representative, State, Value,
    VirtualObjectManager, VomConfig, VomError,
};

// =============================================================================
// FIXTURES
// =============================================================================

fn manager(cache_size: usize) -> (VirtualObjectManager, MemoryStore) {
    let store = MemoryStore::new();
    let vom = VirtualObjectManager::new(store.clone(), VomConfig::with_cache_size(cache_size))
        .expect("manager");
    (vom, store)
}

/// A kind whose initializer copies a record argument into state, one
/// property per field.
fn record_kind(vom: &VirtualObjectManager) -> KindMaker {
    vom.make_kind(|state: State| {
        let init_state = state.clone();
        InstanceKit::new()
            .with_init(move |args| {
                if let Some(Value::Record(fields)) = args.first() {
                    for (name, value) in fields {
                        init_state.set(name, value.clone())?;
                    }
                }
                Ok(())
            })
            .with_method("describe", move |_| {
                let names = state.property_names();
                let mut fields = Vec::new();
                for name in names {
                    fields.push((name.clone(), state.get(&name)?));
                }
                Ok(Value::record(fields))
            })
    })
}

fn make_record(kind: &KindMaker, fields: Vec<(&str, Value)>) -> Representative {
    kind.make(&[Value::record(fields)]).expect("make")
}

// =============================================================================
// TIER S0: CACHE RESIDENCY AND WRITE-BACK
// =============================================================================

mod s0_cache {
    use super::*;

    /// S0.1: N+1 objects through a cache of N evicts the first.
    #[test]
    fn least_recently_used_is_evicted() {
        let (vom, _store) = manager(3);
        let kind = record_kind(&vom);
        let reps: Vec<_> = (0..4)
            .map(|i| make_record(&kind, vec![("i", Value::from(i))]))
            .collect();

        assert!(!vom.is_resident(reps[0].vobj_id()));
        for rep in &reps[1..] {
            assert!(vom.is_resident(rep.vobj_id()));
        }
        assert!(vom.cache_stats().resident <= 3);
    }

    /// S0.2: touching the oldest object before the next lookup saves it.
    #[test]
    fn refresh_moves_victim() {
        let (vom, _store) = manager(3);
        let kind = record_kind(&vom);
        let a1 = make_record(&kind, vec![("i", Value::from(1))]);
        let a2 = make_record(&kind, vec![("i", Value::from(2))]);
        let _a3 = make_record(&kind, vec![("i", Value::from(3))]);

        a1.get("i").expect("touch a1");
        let _a4 = make_record(&kind, vec![("i", Value::from(4))]);

        assert!(vom.is_resident(a1.vobj_id()));
        assert!(!vom.is_resident(a2.vobj_id()));
    }

    /// S0.3: two writes then an eviction persist the final value once.
    #[test]
    fn write_back_persists_final_value() {
        let (vom, store) = manager(1);
        let kind = record_kind(&vom);
        let a = make_record(&kind, vec![("n", Value::from(0))]);
        a.set("n", 1).expect("first write");
        a.set("n", 2).expect("second write");
        let writes_before = store.write_count();

        let _b = make_record(&kind, vec![("n", Value::from(9))]);
        assert_eq!(store.write_count(), writes_before + 1);
        let raw = store.raw(&state_key(a.vobj_id())).expect("persisted");
        assert!(raw.contains(r#""body":"2""#), "unexpected record {raw}");
    }

    /// S0.4: evicting a clean entry writes nothing.
    #[test]
    fn clean_entries_are_not_written() {
        let (vom, store) = manager(2);
        let kind = record_kind(&vom);
        let a = make_record(&kind, vec![("n", Value::from(0))]);
        vom.flush_cache().expect("flush");
        let writes = store.write_count();

        assert_eq!(a.get("n").expect("reload"), Value::from(0));
        vom.flush_cache().expect("flush clean");
        assert_eq!(store.write_count(), writes);
    }

    /// S0.5: reads after eviction observe the latest write.
    #[test]
    fn reads_observe_latest_write() {
        let (vom, _store) = manager(1);
        let kind = record_kind(&vom);
        let a = make_record(&kind, vec![("s", Value::text("old"))]);
        a.set("s", "new").expect("set");
        let b = make_record(&kind, vec![("s", Value::text("b"))]);
        assert!(!vom.is_resident(a.vobj_id()));
        assert_eq!(a.get("s").expect("get"), Value::text("new"));
        assert!(!vom.is_resident(b.vobj_id()));
    }
}

// =============================================================================
// TIER S1: CONSTRUCTION, REANIMATION, KIND ISOLATION
// =============================================================================

mod s1_objects {
    use super::*;

    /// S1.1: a state that survives eviction and reanimation unchanged.
    #[test]
    fn round_trip_through_reanimation() {
        let (vom, _store) = manager(3);
        let kind = record_kind(&vom);
        let rep = make_record(&kind, vec![("a", Value::from(1)), ("b", Value::text("x"))]);
        let id = rep.vobj_id().to_string();
        drop(rep);
        vom.flush_cache().expect("flush");

        let again = vom
            .make_virtual_object_representative(&id, false)
            .expect("reanimate")
            .expect("representative");
        assert_eq!(again.get("a").expect("a"), Value::from(1));
        assert_eq!(again.get("b").expect("b"), Value::text("x"));
        assert_eq!(
            again.invoke("describe", &[]).expect("describe"),
            Value::record([("a", Value::from(1)), ("b", Value::text("x"))])
        );
    }

    /// S1.2: one live representative per object.
    #[test]
    fn single_representative() {
        let (vom, _store) = manager(3);
        let kind = record_kind(&vom);
        let rep = make_record(&kind, vec![("a", Value::from(1))]);
        let id = rep.vobj_id().to_string();

        let err = vom
            .make_virtual_object_representative(&id, false)
            .expect_err("second representative");
        assert!(matches!(err, VomError::AlreadyRepresented(_)));

        // clones do not count as a second representative
        let clone = rep.clone();
        drop(rep);
        assert!(vom.make_virtual_object_representative(&id, false).is_err());
        drop(clone);

        let again = vom
            .make_virtual_object_representative(&id, false)
            .expect("reanimate")
            .expect("representative");
        assert_eq!(again.get("a").expect("a"), Value::from(1));
    }

    /// S1.3: colliding instance numbers of different kinds stay apart.
    #[test]
    fn kind_isolation() {
        let (vom, _store) = manager(2);
        let kind_a = record_kind(&vom);
        let kind_b = vom.make_kind(|state: State| {
            let init_state = state.clone();
            InstanceKit::new()
                .with_init(move |_| init_state.set("tag", "b"))
                .with_method("tag", move |_| state.get("tag"))
        });
        assert_ne!(kind_a.kind_id(), kind_b.kind_id());

        let a = make_record(&kind_a, vec![("tag", Value::text("a"))]);
        let b = kind_b.make(&[]).expect("b");
        assert!(a.vobj_id().ends_with("/1"));
        assert!(b.vobj_id().ends_with("/1"));
        assert_ne!(a.vobj_id(), b.vobj_id());

        let data = vom
            .serialize(&Value::List(vec![a.into(), b.into()]))
            .expect("serialize");
        vom.flush_cache().expect("flush");

        let items = match vom.unserialize(&data).expect("unserialize") {
            Value::List(items) => items,
            _ => Vec::new(),
        };
        assert_eq!(items.len(), 2);
        let a = items[0].as_representative().expect("a");
        let b = items[1].as_representative().expect("b");
        assert_eq!(a.get("tag").expect("tag"), Value::text("a"));
        assert_eq!(b.invoke("tag", &[]).expect("tag"), Value::text("b"));
        assert!(a.invoke("tag", &[]).is_err());
    }

    /// S1.4: a property that cannot be marshaled leaves nothing behind.
    #[test]
    fn serialization_failure_aborts_construction() {
        let (vom, store) = manager(3);
        let kind = record_kind(&vom);
        let err = kind
            .make(&[Value::record([
                ("ok", Value::from(1)),
                ("pojo", Value::from(Local::new("pojo"))),
            ])])
            .expect_err("pojo is not passable");
        assert!(matches!(err, VomError::UnserializableProperty { ref property, .. } if property == "pojo"));
        assert_eq!(vom.cache_stats().tracked, 0);
        vom.flush_cache().expect("flush");
        assert!(store.is_empty());

        // the id space moves on
        let next = make_record(&kind, vec![("ok", Value::from(2))]);
        assert!(next.vobj_id().ends_with("/2"));
    }

    /// S1.5: constructing from inside an initializer.
    #[test]
    fn nested_construction() {
        let (vom, _store) = manager(2);
        let leaf = record_kind(&vom);
        let leaf_for_init = leaf.clone();
        let tree = vom.make_kind(move |state: State| {
            let init_state = state.clone();
            let leaf = leaf_for_init.clone();
            InstanceKit::new()
                .with_init(move |_| {
                    let child = leaf.make(&[Value::record([("v", Value::from(5))])])?;
                    init_state.set("child", child)
                })
                .with_method("child_value", move |_| {
                    let child = state.get("child")?;
                    let rep = child
                        .as_representative()
                        .ok_or_else(|| VomError::NotPassable("child".to_string()))?;
                    rep.get("v")
                })
        });
        let root = tree.make(&[]).expect("root");
        assert_eq!(root.invoke("child_value", &[]).expect("child"), Value::from(5));
    }

    /// S1.6: pro forma reanimation returns nothing and retains nothing.
    #[test]
    fn pro_forma_reanimation() {
        let (vom, _store) = manager(3);
        let kind = record_kind(&vom);
        let rep = make_record(&kind, vec![("a", Value::from(1))]);
        let id = rep.vobj_id().to_string();
        drop(rep);
        assert!(vom
            .make_virtual_object_representative(&id, true)
            .expect("pro forma")
            .is_none());
        assert!(!vom.has_live_value(&id));
    }

    /// S1.7: an object cannot be reanimated while its initializer runs.
    #[test]
    fn reanimation_during_init_is_refused() {
        let (vom, _store) = manager(3);
        let vom_for_init = vom.clone();
        let kind = vom.make_kind(move |state: State| {
            let vom = vom_for_init.clone();
            InstanceKit::new().with_init(move |_| {
                state.set("n", 1)?;
                vom.make_virtual_object_representative(state.vobj_id(), false)?;
                Ok(())
            })
        });

        let result = kind.make(&[]);
        assert!(
            matches!(&result, Err(VomError::StillInitializing(id)) if id == "o+1/1"),
            "got {result:?}"
        );
        assert!(!vom.is_resident("o+1/1"));
        assert!(vom.cache_order().is_empty());
    }

    /// S1.8: nested construction that needs more room than the cache has.
    #[test]
    fn nested_construction_overflows_tiny_cache() {
        let (vom, store) = manager(1);
        let leaf = record_kind(&vom);
        let leaf_for_init = leaf.clone();
        let tree = vom.make_kind(move |state: State| {
            let leaf = leaf_for_init.clone();
            InstanceKit::new().with_init(move |_| {
                let child = leaf.make(&[Value::record([("v", Value::from(5))])])?;
                state.set("child", child)
            })
        });

        assert!(matches!(tree.make(&[]), Err(VomError::CacheOverflow)));
        assert!(vom.cache_order().is_empty());
        assert_eq!(store.write_count(), 0);

        // the failed attempt leaves the manager usable
        let plain = make_record(&leaf, vec![("v", Value::from(9))]);
        assert_eq!(plain.get("v").expect("v"), Value::from(9));
    }
}

// =============================================================================
// TIER S2: LIVENESS AND DELETION GATING
// =============================================================================

mod s2_liveness {
    use super::*;

    fn persisted(vom: &VirtualObjectManager, store: &MemoryStore, rep: Representative) -> String {
        let id = rep.vobj_id().to_string();
        drop(rep);
        vom.flush_cache().expect("flush");
        assert!(store.contains_key(&state_key(&id)));
        id
    }

    /// S2.1: an unexported, unreferenced object is deleted.
    #[test]
    fn unreferenced_object_is_deleted() {
        let (vom, store) = manager(3);
        let kind = record_kind(&vom);
        let id = persisted(&vom, &store, make_record(&kind, vec![("a", Value::from(1))]));

        assert!(vom.possible_virtual_object_death(&id).expect("death"));
        assert!(!store.contains_key(&state_key(&id)));
        assert!(!store.contains_key(&ref_count_key(&id)));
    }

    /// S2.2: an exported object is kept.
    #[test]
    fn exported_object_is_kept() {
        let (vom, store) = manager(3);
        let kind = record_kind(&vom);
        let id = persisted(&vom, &store, make_record(&kind, vec![("a", Value::from(1))]));

        vom.set_exported(&id, true).expect("export");
        assert!(!vom.possible_virtual_object_death(&id).expect("death"));
        assert!(store.contains_key(&state_key(&id)));
        assert_eq!(store.raw(&ref_count_key(&id)).as_deref(), Some("1 0"));

        // dropping the export is itself the trigger
        vom.set_exported(&id, false).expect("unexport");
        assert!(!store.contains_key(&state_key(&id)));
    }

    /// S2.3: an object referenced from durable state is kept for good.
    #[test]
    fn referenced_object_is_kept() {
        let (vom, store) = manager(3);
        let kind = record_kind(&vom);
        let target = make_record(&kind, vec![("a", Value::from(1))]);
        let _holder = make_record(&kind, vec![("ref", Value::from(target.clone()))]);
        let counts = vom.ref_counts(target.vobj_id()).expect("counts");
        assert_eq!(counts.ref_count, 1);

        let id = persisted(&vom, &store, target);
        assert!(vom.is_vref_reachable(&id));
        assert!(!vom.possible_virtual_object_death(&id).expect("death"));
    }

    /// S2.4: counters saturate at "ever referenced".
    #[test]
    fn ref_count_saturates() {
        let (vom, _store) = manager(3);
        let kind = record_kind(&vom);
        let target = make_record(&kind, vec![("a", Value::from(1))]);
        let holder = make_record(&kind, vec![("ref", Value::Null)]);
        for _ in 0..3 {
            holder.set("ref", target.clone()).expect("set");
            holder.set("ref", Value::Null).expect("clear");
        }
        assert_eq!(vom.ref_counts(target.vobj_id()).expect("counts").ref_count, 1);
    }

    /// S2.5: imports stored in state become reachable.
    #[test]
    fn stored_imports_are_reachable() {
        let (vom, _store) = manager(3);
        let kind = record_kind(&vom);
        let import = vom.presence_for("o-12").expect("presence");
        assert!(!vom.is_vref_reachable("o-12"));
        let _rep = make_record(&kind, vec![("peer", Value::from(import))]);
        assert!(vom.is_vref_reachable("o-12"));
    }

    /// S2.6: remotables stored in state are pinned.
    #[test]
    fn stored_remotables_are_pinned() {
        let (vom, _store) = manager(3);
        let kind = record_kind(&vom);
        let remotable = vom.make_remotable("purse");
        let vref = remotable.vref().to_string();
        let rep = make_record(&kind, vec![("purse", Value::from(remotable))]);
        assert!(vom.is_remotable_pinned(&vref));
        assert!(vom.has_live_value(&vref));

        vom.flush_cache().expect("flush");
        let purse = rep.get("purse").expect("purse");
        assert_eq!(purse.as_reference().and_then(Reference::slot), Some(vref.as_str()));
    }
}

// =============================================================================
// TIER S3: WEAK CONTAINERS
// =============================================================================

mod s3_containers {
    use super::*;

    /// S3.1: local keys stay in memory, virtual keys go to the store.
    #[test]
    fn weak_store_duality() {
        let (vom, store) = manager(2);
        let kind = record_kind(&vom);
        let mut ws = vom.make_weak_store(None);

        let pojo_key = Reference::from(Local::new("pojo"));
        let vo = make_record(&kind, vec![("a", Value::from(1))]);
        let vo_key = Reference::from(vo.clone());

        ws.init(&pojo_key, "v1").expect("init pojo");
        ws.init(&vo_key, "v2").expect("init vo");

        let durable = weak_store_key(ws.store_id(), vo.vobj_id());
        assert!(store.contains_key(&durable));
        assert_eq!(
            store.keys().iter().filter(|k| k.starts_with("vom.ws")).count(),
            1
        );

        vom.flush_cache().expect("flush");
        assert_eq!(ws.get(&pojo_key).expect("pojo"), Value::text("v1"));
        assert_eq!(ws.get(&vo_key).expect("vo"), Value::text("v2"));
    }

    /// S3.2: existence is enforced with the store's key name.
    #[test]
    fn weak_store_assertions() {
        let (vom, store) = manager(2);
        let mut ws = vom.make_weak_store(Some("brand"));
        let key = Reference::from(vom.presence_for("o-3").expect("presence"));

        let err = ws.get(&key).expect_err("missing");
        assert_eq!(err.to_string(), r#""brand" not found: o-3"#);
        ws.init(&key, 1).expect("init");
        let err = ws.init(&key, 1).expect_err("duplicate");
        assert_eq!(err.to_string(), r#""brand" already registered: o-3"#);

        let writes = store.write_count();
        assert!(ws.init(&key, 2).is_err());
        assert_eq!(store.write_count(), writes);
        assert_eq!(ws.get(&key).expect("get"), Value::from(1));
    }

    /// S3.3: weak map entries keyed by a virtual object survive
    /// reanimation of the key.
    #[test]
    fn weak_map_follows_identity() {
        let (vom, _store) = manager(2);
        let kind = record_kind(&vom);
        let mut map = vom.make_weak_map::<String>();
        let mut set = vom.make_weak_set();

        let vo = make_record(&kind, vec![("a", Value::from(1))]);
        let id = vo.vobj_id().to_string();
        map.set(&Reference::from(vo.clone()), "meta".to_string())
            .expect("set");
        set.add(&Reference::from(vo)).expect("add");

        vom.flush_cache().expect("flush");
        let again = vom
            .make_virtual_object_representative(&id, false)
            .expect("reanimate")
            .expect("representative");
        let key = Reference::from(again);
        assert_eq!(map.get(&key).map(String::as_str), Some("meta"));
        assert!(set.has(&key));
    }
}
