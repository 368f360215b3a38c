//! Secondary, unique, compound, and search indexes.
//!
//! Every index is a pure function of the entity set: rebuilding from
//! scratch yields the same structure. Composite keys are vectors of
//! [`KeyPart`]s, which keeps the per-field separation unambiguous and
//! makes null and absent distinct first-class key values.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use folio_core::config::IndexSpec;
use folio_core::entity::Entity;
use folio_core::path::Slot;
use folio_core::tokenize::tokenize;

use folio_query::plan::Bound;

/// A set of entity ids, ordered for deterministic iteration.
pub type IdSet = BTreeSet<String>;

/// One serialized key component.
///
/// Variant order defines the key ordering used by range scans: absent and
/// null sort before typed values, scalars compare within their own kind.
/// String keys compare strictly (byte-wise); the case-insensitive collation
/// applies to sort only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum KeyPart {
    Absent,
    Null,
    Bool(bool),
    Number(NumKey),
    String(String),
    /// Non-scalar values index by their JSON serialization.
    Complex(String),
}

/// Total-ordered f64 wrapper for numeric key parts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumKey(pub f64);

impl Eq for NumKey {}

impl PartialOrd for NumKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NumKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl KeyPart {
    /// The key part for a resolved field slot.
    pub fn from_slot(slot: Slot<'_>) -> Self {
        match slot {
            Slot::Absent => Self::Absent,
            Slot::Null => Self::Null,
            Slot::Value(v) => Self::from_value(v),
        }
    }

    /// The key part for a present value.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(NumKey(n.as_f64().unwrap_or(f64::NAN))),
            Value::String(s) => Self::String(s.clone()),
            other => Self::Complex(other.to_string()),
        }
    }
}

/// A composite index key: one part per indexed field, in spec order.
pub type IndexKey = Vec<KeyPart>;

/// Builds an entity's key under an index spec.
pub fn key_for(entity: &Entity, fields: &[String]) -> IndexKey {
    fields
        .iter()
        .map(|field| KeyPart::from_slot(entity.get_path(field)))
        .collect()
}

// ---------------------------------------------------------------------------
// Field index (secondary / unique / compound)
// ---------------------------------------------------------------------------

/// A declared index over one or more field paths.
///
/// Uniqueness is enforced by the CRUD pipeline before any entry is
/// inserted, so the structure itself stores plain id sets.
#[derive(Debug, Clone)]
pub struct FieldIndex {
    /// The declaration this index implements.
    pub spec: IndexSpec,
    map: BTreeMap<IndexKey, IdSet>,
}

impl FieldIndex {
    /// An empty index for a spec.
    pub fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            map: BTreeMap::new(),
        }
    }

    /// Indexes one entity.
    pub fn insert(&mut self, id: &str, entity: &Entity) {
        let key = key_for(entity, &self.spec.fields);
        self.map.entry(key).or_default().insert(id.to_owned());
    }

    /// Removes one entity's entry.
    pub fn remove(&mut self, id: &str, entity: &Entity) {
        let key = key_for(entity, &self.spec.fields);
        if let Some(ids) = self.map.get_mut(&key) {
            ids.remove(id);
            if ids.is_empty() {
                self.map.remove(&key);
            }
        }
    }

    /// The ids stored under an exact key.
    pub fn get(&self, key: &IndexKey) -> Option<&IdSet> {
        self.map.get(key)
    }

    /// The id holding `key` in a unique index, excluding `except`.
    pub fn unique_holder(&self, key: &IndexKey, except: Option<&str>) -> Option<&str> {
        self.map
            .get(key)?
            .iter()
            .map(String::as_str)
            .find(|id| Some(*id) != except)
    }

    /// Ids within a single-field range.
    pub fn range(&self, lower: &Bound, upper: &Bound) -> IdSet {
        use std::ops::Bound as B;
        let lo: B<IndexKey> = match lower {
            Bound::Unbounded => B::Unbounded,
            Bound::Included(v) => B::Included(vec![KeyPart::from_value(v)]),
            Bound::Excluded(v) => B::Excluded(vec![KeyPart::from_value(v)]),
        };
        let hi: B<IndexKey> = match upper {
            Bound::Unbounded => B::Unbounded,
            Bound::Included(v) => B::Included(vec![KeyPart::from_value(v)]),
            Bound::Excluded(v) => B::Excluded(vec![KeyPart::from_value(v)]),
        };
        let mut out = IdSet::new();
        for ids in self.map.range((lo, hi)).map(|(_, ids)| ids) {
            out.extend(ids.iter().cloned());
        }
        out
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.map.len()
    }

    /// All `(key, ids)` pairs, for fidelity checks.
    pub fn entries(&self) -> impl Iterator<Item = (&IndexKey, &IdSet)> {
        self.map.iter()
    }
}

// ---------------------------------------------------------------------------
// Search index
// ---------------------------------------------------------------------------

/// Inverted token index over declared string field paths.
#[derive(Debug, Clone)]
pub struct SearchIndex {
    /// The field paths feeding the index.
    pub fields: Vec<String>,
    map: BTreeMap<String, IdSet>,
}

impl SearchIndex {
    /// An empty index over the given fields.
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            map: BTreeMap::new(),
        }
    }

    fn entity_tokens(&self, entity: &Entity) -> Vec<String> {
        self.fields
            .iter()
            .filter_map(|f| entity.get_path(f).as_value().and_then(Value::as_str))
            .flat_map(tokenize)
            .collect()
    }

    /// Indexes one entity's tokens.
    pub fn insert(&mut self, id: &str, entity: &Entity) {
        for token in self.entity_tokens(entity) {
            self.map.entry(token).or_default().insert(id.to_owned());
        }
    }

    /// Removes one entity's tokens.
    pub fn remove(&mut self, id: &str, entity: &Entity) {
        for token in self.entity_tokens(entity) {
            if let Some(ids) = self.map.get_mut(&token) {
                ids.remove(id);
                if ids.is_empty() {
                    self.map.remove(&token);
                }
            }
        }
    }

    /// Ids matching one lookup token: exact matches plus prefix matches.
    pub fn lookup_token(&self, token: &str) -> IdSet {
        let mut out = IdSet::new();
        for (indexed, ids) in self.map.range(token.to_owned()..) {
            if !indexed.starts_with(token) {
                break;
            }
            out.extend(ids.iter().cloned());
        }
        out
    }

    /// AND-intersection over a multi-token query.
    pub fn lookup(&self, tokens: &[String]) -> IdSet {
        let mut result: Option<IdSet> = None;
        for token in tokens {
            let ids = self.lookup_token(token);
            result = Some(match result {
                None => ids,
                Some(acc) => acc.intersection(&ids).cloned().collect(),
            });
            if result.as_ref().is_some_and(IdSet::is_empty) {
                break;
            }
        }
        result.unwrap_or_default()
    }

    /// Number of distinct tokens.
    pub fn token_count(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entity(v: Value) -> Entity {
        Entity::from_value(v).unwrap()
    }

    #[test]
    fn key_parts_distinguish_null_and_absent() {
        let with_null = entity(json!({"x": null}));
        let without = entity(json!({}));
        let fields = vec!["x".to_owned()];
        assert_eq!(key_for(&with_null, &fields), vec![KeyPart::Null]);
        assert_eq!(key_for(&without, &fields), vec![KeyPart::Absent]);
        assert_ne!(key_for(&with_null, &fields), key_for(&without, &fields));
    }

    #[test]
    fn compound_key_order_follows_field_list() {
        let e = entity(json!({"metadata": {"rating": 5}, "genre": "sci-fi"}));
        let key = key_for(&e, &["metadata.rating".to_owned(), "genre".to_owned()]);
        assert_eq!(
            key,
            vec![KeyPart::Number(NumKey(5.0)), KeyPart::String("sci-fi".into())]
        );
    }

    #[test]
    fn insert_get_remove() {
        let mut index = FieldIndex::new(IndexSpec::on(&["genre"]));
        let a = entity(json!({"id": "a", "genre": "sci-fi"}));
        let b = entity(json!({"id": "b", "genre": "sci-fi"}));
        index.insert("a", &a);
        index.insert("b", &b);

        let key = key_for(&a, &index.spec.fields);
        assert_eq!(index.get(&key).unwrap().len(), 2);

        index.remove("a", &a);
        assert_eq!(index.get(&key).unwrap().len(), 1);
        index.remove("b", &b);
        assert!(index.get(&key).is_none());
        assert_eq!(index.key_count(), 0);
    }

    #[test]
    fn unique_holder_excludes_self() {
        let mut index = FieldIndex::new(IndexSpec::unique_on(&["isbn"]));
        let a = entity(json!({"id": "a", "isbn": "123"}));
        index.insert("a", &a);
        let key = key_for(&a, &index.spec.fields);
        assert_eq!(index.unique_holder(&key, None), Some("a"));
        assert_eq!(index.unique_holder(&key, Some("a")), None);
        assert_eq!(index.unique_holder(&key, Some("b")), Some("a"));
    }

    #[test]
    fn range_scan_on_numbers() {
        let mut index = FieldIndex::new(IndexSpec::on(&["year"]));
        for (id, year) in [("a", 1960), ("b", 1965), ("c", 1970), ("d", 1980)] {
            index.insert(id, &entity(json!({"id": id, "year": year})));
        }
        let ids = index.range(
            &Bound::Included(json!(1965)),
            &Bound::Excluded(json!(1980)),
        );
        assert_eq!(ids, IdSet::from(["b".to_owned(), "c".to_owned()]));
    }

    #[test]
    fn range_unbounded_sides() {
        let mut index = FieldIndex::new(IndexSpec::on(&["year"]));
        for (id, year) in [("a", 1960), ("b", 1980)] {
            index.insert(id, &entity(json!({"id": id, "year": year})));
        }
        let ids = index.range(&Bound::Excluded(json!(1960)), &Bound::Unbounded);
        assert_eq!(ids, IdSet::from(["b".to_owned()]));
    }

    #[test]
    fn search_index_exact_and_prefix() {
        let mut index = SearchIndex::new(vec!["title".into()]);
        index.insert("1", &entity(json!({"id": "1", "title": "Dune"})));
        index.insert("2", &entity(json!({"id": "2", "title": "Dark Matters"})));
        index.insert("3", &entity(json!({"id": "3", "title": "The Left Hand of Darkness"})));

        let ids = index.lookup(&tokenize("dark"));
        assert_eq!(ids, IdSet::from(["2".to_owned(), "3".to_owned()]));

        let ids = index.lookup(&tokenize("darkness"));
        assert_eq!(ids, IdSet::from(["3".to_owned()]));
    }

    #[test]
    fn search_multi_token_intersects() {
        let mut index = SearchIndex::new(vec!["title".into()]);
        index.insert("1", &entity(json!({"id": "1", "title": "Dark Tower"})));
        index.insert("2", &entity(json!({"id": "2", "title": "Dark Matters"})));

        let ids = index.lookup(&tokenize("dark tower"));
        assert_eq!(ids, IdSet::from(["1".to_owned()]));
    }

    #[test]
    fn search_remove_clears_tokens() {
        let mut index = SearchIndex::new(vec!["title".into()]);
        let e = entity(json!({"id": "1", "title": "Dune"}));
        index.insert("1", &e);
        index.remove("1", &e);
        assert_eq!(index.token_count(), 0);
        assert!(index.lookup(&tokenize("dune")).is_empty());
    }
}
