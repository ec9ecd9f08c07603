//! # Marshal
//!
//! Converts `Value`s to and from `CapData`.
//!
//! The body is JSON. Plain data maps onto JSON directly; each reference is
//! replaced by `{"@qclass":"slot","index":N}` where `N` indexes into the
//! deduplicated `slots` list. Records may not use `@qclass` as a field name,
//! since that key is reserved for encoding.
//!
//! Serialization is pure. Unserialization hands every slot to a resolver,
//! which is where the manager finds live values, creates presences or
//! reanimates virtual objects.

use crate::{CapData, Reference, Value, VomError, VomResult};
use serde_json::{Map, Number, Value as Json};
use std::collections::BTreeMap;

/// Reserved field that marks an encoded non-JSON value.
const QCLASS: &str = "@qclass";

/// Serialize a value.
///
/// Fails with `NotPassable` for local objects and for records using the
/// reserved `@qclass` field.
pub fn serialize(value: &Value) -> VomResult<CapData> {
    let mut slots: Vec<String> = Vec::new();
    let json = encode(value, &mut slots)?;
    let body = serde_json::to_string(&json).map_err(|e| VomError::SerializationError(e.to_string()))?;
    Ok(CapData { body, slots })
}

/// Unserialize `data`, resolving each distinct slot exactly once.
pub fn unserialize(
    data: &CapData,
    resolve: &mut dyn FnMut(&str) -> VomResult<Reference>,
) -> VomResult<Value> {
    let json: Json = serde_json::from_str(&data.body)
        .map_err(|e| VomError::SerializationError(format!("malformed body: {}", e)))?;
    let mut resolved: Vec<Option<Reference>> = vec![None; data.slots.len()];
    decode(&json, &data.slots, &mut resolved, resolve)
}

fn encode(value: &Value, slots: &mut Vec<String>) -> VomResult<Json> {
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number(Number::from(*i)),
        Value::Text(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(
            items
                .iter()
                .map(|item| encode(item, slots))
                .collect::<VomResult<Vec<_>>>()?,
        ),
        Value::Record(fields) => {
            let mut map = Map::new();
            for (name, field) in fields {
                if name == QCLASS {
                    return Err(VomError::NotPassable(format!(
                        "records may not use the reserved {:?} field",
                        QCLASS
                    )));
                }
                map.insert(name.clone(), encode(field, slots)?);
            }
            Json::Object(map)
        }
        Value::Ref(reference) => {
            let slot = reference.slot().ok_or_else(|| match reference {
                Reference::Local(local) => {
                    VomError::NotPassable(format!("local object {:?} has no vref", local.label()))
                }
                _ => VomError::NotPassable("reference without a vref".to_string()),
            })?;
            let index = match slots.iter().position(|s| s == slot) {
                Some(i) => i,
                None => {
                    slots.push(slot.to_string());
                    slots.len() - 1
                }
            };
            let mut map = Map::new();
            map.insert(QCLASS.to_string(), Json::String("slot".to_string()));
            map.insert("index".to_string(), Json::Number(Number::from(index)));
            Json::Object(map)
        }
    })
}

fn decode(
    json: &Json,
    slots: &[String],
    resolved: &mut [Option<Reference>],
    resolve: &mut dyn FnMut(&str) -> VomResult<Reference>,
) -> VomResult<Value> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => Value::Int(n.as_i64().ok_or_else(|| {
            VomError::SerializationError(format!("unsupported number {}", n))
        })?),
        Json::String(s) => Value::Text(s.clone()),
        Json::Array(items) => Value::List(
            items
                .iter()
                .map(|item| decode(item, slots, resolved, resolve))
                .collect::<VomResult<Vec<_>>>()?,
        ),
        Json::Object(map) => match map.get(QCLASS) {
            Some(qclass) => decode_qclass(qclass, map, slots, resolved, resolve)?,
            None => {
                let mut fields = BTreeMap::new();
                for (name, field) in map {
                    fields.insert(name.clone(), decode(field, slots, resolved, resolve)?);
                }
                Value::Record(fields)
            }
        },
    })
}

fn decode_qclass(
    qclass: &Json,
    map: &Map<String, Json>,
    slots: &[String],
    resolved: &mut [Option<Reference>],
    resolve: &mut dyn FnMut(&str) -> VomResult<Reference>,
) -> VomResult<Value> {
    if qclass.as_str() != Some("slot") {
        return Err(VomError::SerializationError(format!(
            "unknown {} {}",
            QCLASS, qclass
        )));
    }
    let index = map
        .get("index")
        .and_then(Json::as_u64)
        .map(|i| i as usize)
        .ok_or_else(|| VomError::SerializationError("slot without index".to_string()))?;
    let slot = slots.get(index).ok_or_else(|| {
        VomError::SerializationError(format!("slot index {} out of range", index))
    })?;
    if let Some(Some(reference)) = resolved.get(index) {
        return Ok(Value::Ref(reference.clone()));
    }
    let reference = resolve(slot)?;
    if let Some(cell) = resolved.get_mut(index) {
        *cell = Some(reference.clone());
    }
    Ok(Value::Ref(reference))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::{Local, Presence};

    fn no_slots(slot: &str) -> VomResult<Reference> {
        Err(VomError::UnknownSlot(slot.to_string()))
    }

    #[test]
    fn plain_data_has_no_slots() {
        let value = Value::record([
            ("a", Value::from(1)),
            ("b", Value::text("x")),
            ("c", Value::List(vec![Value::Null, Value::from(false)])),
        ]);
        let data = serialize(&value).expect("serialize");
        assert!(data.slots.is_empty());
        assert_eq!(data.body, r#"{"a":1,"b":"x","c":[null,false]}"#);
        assert_eq!(unserialize(&data, &mut no_slots).expect("unserialize"), value);
    }

    #[test]
    fn references_become_deduplicated_slots() {
        let p = Presence::new("o-4");
        let value = Value::List(vec![p.clone().into(), p.clone().into()]);
        let data = serialize(&value).expect("serialize");
        assert_eq!(data.slots, vec!["o-4".to_string()]);

        let mut calls = 0;
        let back = unserialize(&data, &mut |slot: &str| {
            calls += 1;
            Ok(Reference::Presence(Presence::new(slot)))
        })
        .expect("unserialize");
        assert_eq!(calls, 1);
        let Value::List(items) = back else {
            panic!("expected list")
        };
        assert_eq!(items[0], items[1]);
    }

    #[test]
    fn local_objects_are_not_passable() {
        let value = Value::List(vec![Local::new("pojo").into()]);
        assert!(matches!(serialize(&value), Err(VomError::NotPassable(_))));
    }

    #[test]
    fn reserved_field_is_rejected() {
        let value = Value::record([("@qclass", Value::text("slot"))]);
        assert!(matches!(serialize(&value), Err(VomError::NotPassable(_))));
    }

    #[test]
    fn malformed_bodies_are_errors() {
        let bad_index = CapData {
            body: r#"{"@qclass":"slot","index":3}"#.to_string(),
            slots: vec![],
        };
        assert!(matches!(
            unserialize(&bad_index, &mut no_slots),
            Err(VomError::SerializationError(_))
        ));
        let float = CapData {
            body: "1.5".to_string(),
            slots: vec![],
        };
        assert!(unserialize(&float, &mut no_slots).is_err());
    }

    #[test]
    fn resolver_errors_propagate() {
        let data = CapData {
            body: r#"{"@qclass":"slot","index":0}"#.to_string(),
            slots: vec!["o+9".to_string()],
        };
        assert!(matches!(
            unserialize(&data, &mut no_slots),
            Err(VomError::UnknownSlot(_))
        ));
    }
}
