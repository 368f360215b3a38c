//! Dot-path access into nested entity values.
//!
//! Several places in the engine (group keys, index keys, nested where
//! defaults) must tell "field absent" apart from "field present with null".
//! [`Slot`] is the internal sentinel carrying that distinction; it never
//! crosses the public API boundary.

use serde_json::{Map, Value};

/// The result of resolving a dot-path against a value tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Slot<'a> {
    /// No field exists at the path (or a parent was missing/non-object).
    Absent,
    /// The field exists and holds JSON `null`.
    Null,
    /// The field exists and holds a non-null value.
    Value(&'a Value),
}

impl<'a> Slot<'a> {
    /// The resolved value, treating both `Absent` and `Null` as `None`.
    pub fn as_value(self) -> Option<&'a Value> {
        match self {
            Slot::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns `true` if no field exists at the path.
    pub fn is_absent(self) -> bool {
        matches!(self, Slot::Absent)
    }

    /// Returns `true` for both `Absent` and `Null`.
    pub fn is_missing(self) -> bool {
        !matches!(self, Slot::Value(_))
    }

    /// The value including an explicit null, or `None` when absent.
    pub fn present(self) -> Option<&'a Value> {
        match self {
            Slot::Value(v) => Some(v),
            Slot::Null => Some(&Value::Null),
            Slot::Absent => None,
        }
    }
}

/// Resolves `path` (dot-separated) against an object map.
///
/// Missing or non-object parents resolve to [`Slot::Absent`] without error.
pub fn resolve<'a>(map: &'a Map<String, Value>, path: &str) -> Slot<'a> {
    let mut segments = path.split('.');
    let first = match segments.next() {
        Some(s) if !s.is_empty() => s,
        _ => return Slot::Absent,
    };

    let mut current = match map.get(first) {
        Some(v) => v,
        None => return Slot::Absent,
    };

    for segment in segments {
        match current {
            Value::Object(obj) => match obj.get(segment) {
                Some(v) => current = v,
                None => return Slot::Absent,
            },
            _ => return Slot::Absent,
        }
    }

    if current.is_null() {
        Slot::Null
    } else {
        Slot::Value(current)
    }
}

/// Resolves `path` against an arbitrary value (must be an object to match).
pub fn resolve_value<'a>(value: &'a Value, path: &str) -> Slot<'a> {
    match value {
        Value::Object(map) => resolve(map, path),
        _ => Slot::Absent,
    }
}

/// Sets the value at `path`, creating intermediate objects as needed.
///
/// A non-object intermediate is replaced by an object.
pub fn set(map: &mut Map<String, Value>, path: &str, value: Value) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = match segments.pop() {
        Some(s) => s,
        None => return,
    };

    let mut current = map;
    for segment in segments {
        let entry = current
            .entry(segment.to_owned())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = entry
            .as_object_mut()
            .expect("entry was just made an object");
    }
    current.insert(last.to_owned(), value);
}

/// Removes the value at `path`. Missing parents are a no-op.
pub fn remove(map: &mut Map<String, Value>, path: &str) -> Option<Value> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop()?;

    let mut current = map;
    for segment in segments {
        current = current.get_mut(segment)?.as_object_mut()?;
    }
    current.remove(last)
}

/// Deep-merges `patch` into `target` field by field.
///
/// Objects merge recursively; any other value replaces the target. This is
/// the nested-partial-update rule; `$set` bypasses it by replacing subtrees.
pub fn deep_merge(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, incoming) in patch {
        match (target.get_mut(&key), incoming) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, incoming) => {
                target.insert(key, incoming);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn resolve_top_level() {
        let m = obj(json!({"a": 1, "b": null}));
        assert_eq!(resolve(&m, "a"), Slot::Value(&json!(1)));
        assert_eq!(resolve(&m, "b"), Slot::Null);
        assert_eq!(resolve(&m, "c"), Slot::Absent);
    }

    #[test]
    fn resolve_nested() {
        let m = obj(json!({"meta": {"rating": 5, "tags": {"main": "x"}}}));
        assert_eq!(resolve(&m, "meta.rating"), Slot::Value(&json!(5)));
        assert_eq!(resolve(&m, "meta.tags.main"), Slot::Value(&json!("x")));
        assert_eq!(resolve(&m, "meta.missing"), Slot::Absent);
    }

    #[test]
    fn resolve_skips_non_object_parents() {
        let m = obj(json!({"meta": 3}));
        assert_eq!(resolve(&m, "meta.rating"), Slot::Absent);
    }

    #[test]
    fn null_and_absent_are_distinct() {
        let m = obj(json!({"x": null}));
        assert!(resolve(&m, "x").is_missing());
        assert!(!resolve(&m, "x").is_absent());
        assert!(resolve(&m, "y").is_absent());
    }

    #[test]
    fn set_creates_intermediates() {
        let mut m = obj(json!({}));
        set(&mut m, "meta.rating", json!(5));
        assert_eq!(resolve(&m, "meta.rating"), Slot::Value(&json!(5)));
    }

    #[test]
    fn set_replaces_non_object_intermediate() {
        let mut m = obj(json!({"meta": 1}));
        set(&mut m, "meta.rating", json!(5));
        assert_eq!(resolve(&m, "meta.rating"), Slot::Value(&json!(5)));
    }

    #[test]
    fn remove_nested() {
        let mut m = obj(json!({"meta": {"rating": 5}}));
        assert_eq!(remove(&mut m, "meta.rating"), Some(json!(5)));
        assert_eq!(resolve(&m, "meta.rating"), Slot::Absent);
    }

    #[test]
    fn deep_merge_recurses_objects() {
        let mut target = obj(json!({"meta": {"rating": 5, "genre": "sf"}, "n": 1}));
        deep_merge(&mut target, obj(json!({"meta": {"rating": 4}, "m": 2})));
        assert_eq!(
            Value::Object(target),
            json!({"meta": {"rating": 4, "genre": "sf"}, "n": 1, "m": 2})
        );
    }

    #[test]
    fn deep_merge_scalar_replaces() {
        let mut target = obj(json!({"meta": {"rating": 5}}));
        deep_merge(&mut target, obj(json!({"meta": 7})));
        assert_eq!(Value::Object(target), json!({"meta": 7}));
    }
}
