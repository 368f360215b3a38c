//! Single-pass aggregates over a filtered candidate set.
//!
//! Recognized aggregates: `count`, `sum`, `avg`, `min`, `max`, optionally
//! partitioned by `group_by`. Numeric aggregates skip non-numeric values;
//! `avg` of zero numeric values is null; min/max use the sort comparator.
//! Group keys distinguish null from absent and appear in first-encounter
//! order.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use folio_core::entity::Entity;
use folio_core::path::Slot;

use crate::config::SortDirection;
use crate::sort::compare_slots;

/// What to compute.
#[derive(Debug, Clone, Default)]
pub struct AggregateConfig {
    /// The where document bounding the candidate set (evaluated by the
    /// engine before aggregation).
    pub filter: Option<Value>,
    /// Whether to report the candidate count.
    pub count: bool,
    /// Fields to sum.
    pub sum: Vec<String>,
    /// Fields to average.
    pub avg: Vec<String>,
    /// Fields to minimize.
    pub min: Vec<String>,
    /// Fields to maximize.
    pub max: Vec<String>,
    /// Partition key fields; empty means one global row.
    pub group_by: Vec<String>,
}

impl AggregateConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn count(mut self) -> Self {
        self.count = true;
        self
    }

    pub fn sum(mut self, fields: &[&str]) -> Self {
        self.sum = to_owned_vec(fields);
        self
    }

    pub fn avg(mut self, fields: &[&str]) -> Self {
        self.avg = to_owned_vec(fields);
        self
    }

    pub fn min(mut self, fields: &[&str]) -> Self {
        self.min = to_owned_vec(fields);
        self
    }

    pub fn max(mut self, fields: &[&str]) -> Self {
        self.max = to_owned_vec(fields);
        self
    }

    pub fn group_by(mut self, fields: &[&str]) -> Self {
        self.group_by = to_owned_vec(fields);
        self
    }
}

fn to_owned_vec(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|f| (*f).to_owned()).collect()
}

/// One row of aggregate output.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregateRow {
    /// Candidate count, when requested.
    pub count: Option<u64>,
    /// Per-field sums over numeric values.
    pub sum: BTreeMap<String, f64>,
    /// Per-field averages; `None` when no numeric value was seen.
    pub avg: BTreeMap<String, Option<f64>>,
    /// Per-field minima under the sort comparator.
    pub min: BTreeMap<String, Option<Value>>,
    /// Per-field maxima under the sort comparator.
    pub max: BTreeMap<String, Option<Value>>,
}

/// A grouped aggregate row.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedRow {
    /// The group key: field → value. An absent key field is omitted; an
    /// explicit null stays null.
    pub group: Map<String, Value>,
    /// The group's aggregates.
    pub row: AggregateRow,
}

/// Aggregate output: one global row, or one row per group in
/// first-encounter order.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregateResult {
    Single(AggregateRow),
    Grouped(Vec<GroupedRow>),
}

/// Running accumulator for one row.
#[derive(Default)]
struct Accumulator {
    count: u64,
    sums: BTreeMap<String, (f64, u64)>,
    avgs: BTreeMap<String, (f64, u64)>,
    mins: BTreeMap<String, Option<Value>>,
    maxs: BTreeMap<String, Option<Value>>,
}

impl Accumulator {
    fn feed(&mut self, entity: &Entity, config: &AggregateConfig) {
        self.count += 1;

        for field in &config.sum {
            if let Some(n) = numeric(entity.get_path(field)) {
                let slot = self.sums.entry(field.clone()).or_default();
                slot.0 += n;
                slot.1 += 1;
            }
        }
        for field in &config.avg {
            if let Some(n) = numeric(entity.get_path(field)) {
                let slot = self.avgs.entry(field.clone()).or_default();
                slot.0 += n;
                slot.1 += 1;
            }
        }
        for field in &config.min {
            let current = entity.get_path(field);
            if current.as_value().is_none() {
                continue;
            }
            let best = self.mins.entry(field.clone()).or_insert(None);
            let replace = match best {
                None => true,
                Some(existing) => {
                    compare_slots(current, Slot::Value(existing), SortDirection::Asc).is_lt()
                }
            };
            if replace {
                *best = current.as_value().cloned();
            }
        }
        for field in &config.max {
            let current = entity.get_path(field);
            if current.as_value().is_none() {
                continue;
            }
            let best = self.maxs.entry(field.clone()).or_insert(None);
            let replace = match best {
                None => true,
                Some(existing) => {
                    compare_slots(current, Slot::Value(existing), SortDirection::Asc).is_gt()
                }
            };
            if replace {
                *best = current.as_value().cloned();
            }
        }
    }

    fn finish(self, config: &AggregateConfig) -> AggregateRow {
        let mut row = AggregateRow {
            count: config.count.then_some(self.count),
            ..AggregateRow::default()
        };
        for field in &config.sum {
            let (total, _) = self.sums.get(field).copied().unwrap_or_default();
            row.sum.insert(field.clone(), total);
        }
        for field in &config.avg {
            let (total, n) = self.avgs.get(field).copied().unwrap_or_default();
            row.avg
                .insert(field.clone(), (n > 0).then(|| total / n as f64));
        }
        for field in &config.min {
            row.min
                .insert(field.clone(), self.mins.get(field).cloned().flatten());
        }
        for field in &config.max {
            row.max
                .insert(field.clone(), self.maxs.get(field).cloned().flatten());
        }
        row
    }
}

fn numeric(slot: Slot<'_>) -> Option<f64> {
    slot.as_value().and_then(Value::as_f64)
}

/// The group key for one entity, with the null/absent distinction encoded
/// in the serialized key.
fn group_key(entity: &Entity, fields: &[String]) -> (String, Map<String, Value>) {
    let mut serialized = String::new();
    let mut group = Map::new();
    for field in fields {
        match entity.get_path(field) {
            Slot::Absent => serialized.push('\u{1}'),
            Slot::Null => {
                serialized.push('\u{2}');
                group.insert(field.clone(), Value::Null);
            }
            Slot::Value(v) => {
                serialized.push_str(&v.to_string());
                group.insert(field.clone(), v.clone());
            }
        }
        serialized.push('\u{0}');
    }
    (serialized, group)
}

/// Runs the single-pass reduction over an already-filtered candidate set.
pub fn aggregate<'a>(
    entities: impl Iterator<Item = &'a Entity>,
    config: &AggregateConfig,
) -> AggregateResult {
    if config.group_by.is_empty() {
        let mut acc = Accumulator::default();
        for entity in entities {
            acc.feed(entity, config);
        }
        return AggregateResult::Single(acc.finish(config));
    }

    // First-encounter group order.
    let mut groups: IndexMap<String, (Map<String, Value>, Accumulator)> = IndexMap::new();
    for entity in entities {
        let (key, group) = group_key(entity, &config.group_by);
        let slot = groups
            .entry(key)
            .or_insert_with(|| (group, Accumulator::default()));
        slot.1.feed(entity, config);
    }

    AggregateResult::Grouped(
        groups
            .into_values()
            .map(|(group, acc)| GroupedRow {
                group,
                row: acc.finish(config),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entities(values: &[Value]) -> Vec<Entity> {
        values
            .iter()
            .map(|v| Entity::from_value(v.clone()).unwrap())
            .collect()
    }

    fn single(result: AggregateResult) -> AggregateRow {
        match result {
            AggregateResult::Single(row) => row,
            other => panic!("expected single row, got {other:?}"),
        }
    }

    #[test]
    fn count_matches_cardinality() {
        let items = entities(&[json!({"id": "a"}), json!({"id": "b"})]);
        let row = single(aggregate(items.iter(), &AggregateConfig::new().count()));
        assert_eq!(row.count, Some(2));
    }

    #[test]
    fn sum_and_avg_skip_non_numeric() {
        let items = entities(&[
            json!({"id": "a", "n": 10}),
            json!({"id": "b", "n": "not a number"}),
            json!({"id": "c", "n": 20}),
            json!({"id": "d"}),
        ]);
        let config = AggregateConfig::new().sum(&["n"]).avg(&["n"]);
        let row = single(aggregate(items.iter(), &config));
        assert_eq!(row.sum["n"], 30.0);
        assert_eq!(row.avg["n"], Some(15.0));
    }

    #[test]
    fn avg_of_no_numeric_values_is_null() {
        let items = entities(&[json!({"id": "a", "n": "x"}), json!({"id": "b"})]);
        let row = single(aggregate(items.iter(), &AggregateConfig::new().avg(&["n"])));
        assert_eq!(row.avg["n"], None);
    }

    #[test]
    fn min_max_use_sort_comparator() {
        let items = entities(&[
            json!({"id": "a", "s": "banana", "n": 3}),
            json!({"id": "b", "s": "Apple", "n": 10}),
            json!({"id": "c", "s": "cherry", "n": 7}),
        ]);
        let config = AggregateConfig::new().min(&["s", "n"]).max(&["s", "n"]);
        let row = single(aggregate(items.iter(), &config));
        // Case-insensitive collation puts "Apple" first.
        assert_eq!(row.min["s"], Some(json!("Apple")));
        assert_eq!(row.max["s"], Some(json!("cherry")));
        assert_eq!(row.min["n"], Some(json!(3)));
        assert_eq!(row.max["n"], Some(json!(10)));
    }

    #[test]
    fn grouping_first_encounter_order() {
        let items = entities(&[
            json!({"id": "a", "genre": "sci-fi", "year": 1965}),
            json!({"id": "b", "genre": "fantasy", "year": 1954}),
            json!({"id": "c", "genre": "sci-fi", "year": 1969}),
        ]);
        let config = AggregateConfig::new().count().group_by(&["genre"]);
        let AggregateResult::Grouped(rows) = aggregate(items.iter(), &config) else {
            panic!("expected grouped result");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].group, json!({"genre": "sci-fi"}).as_object().unwrap().clone());
        assert_eq!(rows[0].row.count, Some(2));
        assert_eq!(rows[1].group, json!({"genre": "fantasy"}).as_object().unwrap().clone());
        assert_eq!(rows[1].row.count, Some(1));
    }

    #[test]
    fn group_keys_distinguish_null_from_absent() {
        let items = entities(&[
            json!({"id": "a", "g": null}),
            json!({"id": "b"}),
            json!({"id": "c", "g": null}),
        ]);
        let config = AggregateConfig::new().count().group_by(&["g"]);
        let AggregateResult::Grouped(rows) = aggregate(items.iter(), &config) else {
            panic!("expected grouped result");
        };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].group, json!({"g": null}).as_object().unwrap().clone());
        assert_eq!(rows[0].row.count, Some(2));
        // Absent key field is omitted from the group document.
        assert!(rows[1].group.is_empty());
        assert_eq!(rows[1].row.count, Some(1));
    }

    #[test]
    fn multi_field_group_keys() {
        let items = entities(&[
            json!({"id": "a", "g": "x", "y": 1}),
            json!({"id": "b", "g": "x", "y": 2}),
            json!({"id": "c", "g": "x", "y": 1}),
        ]);
        let config = AggregateConfig::new().count().group_by(&["g", "y"]);
        let AggregateResult::Grouped(rows) = aggregate(items.iter(), &config) else {
            panic!("expected grouped result");
        };
        assert_eq!(rows.len(), 2);
    }
}
