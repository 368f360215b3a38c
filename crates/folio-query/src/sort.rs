//! Value comparison and multi-key sorting.
//!
//! Comparison rules (shared by sort, range filters, and min/max
//! aggregates): null and absent always order after any value, regardless of
//! direction; numbers compare numerically; strings by case-insensitive
//! collation with a case-sensitive tiebreak; booleans as false < true;
//! RFC 3339 date strings by epoch; anything else by its string coercion.

use std::cmp::Ordering;

use chrono::DateTime;
use serde_json::Value;

use folio_core::entity::Entity;
use folio_core::path::Slot;

use crate::config::SortDirection;

/// Compares two present values.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::String(x), Value::String(y)) => compare_strings(x, y),
        _ => coerce(a).cmp(&coerce(b)),
    }
}

/// Compares two slots, sending null/absent to the end.
///
/// The missing-last rule applies before any direction flip, so missing
/// values end up last under both `asc` and `desc`.
pub fn compare_slots(a: Slot<'_>, b: Slot<'_>, direction: SortDirection) -> Ordering {
    match (a.as_value(), b.as_value()) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            let ordering = compare_values(x, y);
            match direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        }
    }
}

/// String collation: dates by epoch when both sides parse as RFC 3339,
/// otherwise case-insensitive with a case-sensitive tiebreak.
fn compare_strings(a: &str, b: &str) -> Ordering {
    if let (Ok(x), Ok(y)) = (DateTime::parse_from_rfc3339(a), DateTime::parse_from_rfc3339(b)) {
        return x.timestamp_nanos_opt().cmp(&y.timestamp_nanos_opt());
    }
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// String coercion for cross-type and container comparison.
fn coerce(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Multi-key stable sort of entities by the given `(path, direction)` keys.
pub fn sort_entities(entities: &mut [Entity], keys: &[(String, SortDirection)]) {
    if keys.is_empty() {
        return;
    }
    entities.sort_by(|a, b| compare_by_keys(a, b, keys));
}

/// The composite ordering of two entities under multi-key sort.
pub fn compare_by_keys(a: &Entity, b: &Entity, keys: &[(String, SortDirection)]) -> Ordering {
    for (path, direction) in keys {
        let ordering = compare_slots(a.get_path(path), b.get_path(path), *direction);
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
