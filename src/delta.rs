//! Deep-diff producer and applier for state broadcasts.
//!
//! Given a previous and current state value, [`diff`] produces a minimal
//! description of the changes: changed keys with new values plus an
//! explicit set of deleted keys, descending into nested mappings.
//! Atomic values and sequences are replaced wholesale. [`apply`] takes a
//! base state and a delta and returns the new state; [`merge`] composes
//! two deltas into one.
//!
//! The round-trip law holds for all value pairs:
//! `apply(base, diff(base, next)) == next`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One changed entry: either a wholesale replacement or a nested delta
/// to descend into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum DeltaValue {
    /// Replace the key with this value
    Set(Value),
    /// The key holds a mapping; apply this delta inside it
    Nested(StateDelta),
}

/// Minimal description of the difference between two states.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    /// Wholesale replacement of the entire value. Produced when either
    /// side of the diff is not a mapping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace: Option<Value>,
    /// Changed keys, ordered for deterministic serialization
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub changed: BTreeMap<String, DeltaValue>,
    /// Keys present before but absent now
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deleted: Vec<String>,
}

impl StateDelta {
    /// A delta that changes nothing.
    pub fn empty() -> Self {
        Self::default()
    }

    /// True when applying this delta leaves any state unchanged.
    pub fn is_empty(&self) -> bool {
        self.replace.is_none() && self.changed.is_empty() && self.deleted.is_empty()
    }
}

/// Compute the delta that transforms `prev` into `next`.
pub fn diff(prev: &Value, next: &Value) -> StateDelta {
    if prev == next {
        return StateDelta::empty();
    }

    match (prev, next) {
        (Value::Object(prev_map), Value::Object(next_map)) => diff_maps(prev_map, next_map),
        // Atomic values and sequences are replaced wholesale
        _ => StateDelta {
            replace: Some(next.clone()),
            ..StateDelta::default()
        },
    }
}

fn diff_maps(prev: &Map<String, Value>, next: &Map<String, Value>) -> StateDelta {
    let mut delta = StateDelta::empty();

    for (key, next_value) in next {
        match prev.get(key) {
            Some(prev_value) if prev_value == next_value => {}
            Some(Value::Object(prev_inner)) => {
                if let Value::Object(next_inner) = next_value {
                    delta.changed.insert(
                        key.clone(),
                        DeltaValue::Nested(diff_maps(prev_inner, next_inner)),
                    );
                } else {
                    delta
                        .changed
                        .insert(key.clone(), DeltaValue::Set(next_value.clone()));
                }
            }
            _ => {
                delta
                    .changed
                    .insert(key.clone(), DeltaValue::Set(next_value.clone()));
            }
        }
    }

    for key in prev.keys() {
        if !next.contains_key(key) {
            delta.deleted.push(key.clone());
        }
    }
    delta.deleted.sort();

    delta
}

/// Apply `delta` to `base`, returning the new state. The base is not
/// modified.
pub fn apply(base: &Value, delta: &StateDelta) -> Value {
    if let Some(replacement) = &delta.replace {
        return replacement.clone();
    }
    if delta.is_empty() {
        return base.clone();
    }

    let mut map = match base {
        Value::Object(existing) => existing.clone(),
        // A structural delta against a non-mapping base starts from empty
        _ => Map::new(),
    };

    for key in &delta.deleted {
        map.remove(key);
    }

    for (key, change) in &delta.changed {
        match change {
            DeltaValue::Set(value) => {
                map.insert(key.clone(), value.clone());
            }
            DeltaValue::Nested(inner) => {
                let current = map.get(key).cloned().unwrap_or(Value::Null);
                map.insert(key.clone(), apply(&current, inner));
            }
        }
    }

    Value::Object(map)
}

/// Compose two deltas: for any state `s`,
/// `apply(s, merge(first, second)) == apply(apply(s, first), second)`.
pub fn merge(first: &StateDelta, second: &StateDelta) -> StateDelta {
    if second.replace.is_some() {
        return second.clone();
    }
    if let Some(base) = &first.replace {
        return StateDelta {
            replace: Some(apply(base, second)),
            ..StateDelta::default()
        };
    }

    let mut merged = first.clone();

    for key in &second.deleted {
        merged.changed.remove(key);
        if !merged.deleted.contains(key) {
            merged.deleted.push(key.clone());
        }
    }
    merged.deleted.sort();

    for (key, change) in &second.changed {
        let was_deleted = merged.deleted.iter().any(|deleted| deleted == key);
        merged.deleted.retain(|deleted| deleted != key);
        let combined = if was_deleted {
            // The first delta removed the key, so a nested change rebuilds
            // from nothing rather than the original value
            match change {
                DeltaValue::Nested(inner) => DeltaValue::Set(apply(&Value::Null, inner)),
                set => set.clone(),
            }
        } else {
            match (merged.changed.get(key), change) {
                (Some(DeltaValue::Set(value)), DeltaValue::Nested(inner)) => {
                    DeltaValue::Set(apply(value, inner))
                }
                (Some(DeltaValue::Nested(first_inner)), DeltaValue::Nested(second_inner)) => {
                    DeltaValue::Nested(merge(first_inner, second_inner))
                }
                _ => change.clone(),
            }
        };
        merged.changed.insert(key.clone(), combined);
    }

    merged
}
