//! Per-collection runtime state: the primary map plus every derived index.
//!
//! All indexes are maintained transactionally with the primary map; a
//! state can always be rebuilt from its entity set alone, and
//! [`CollectionState::rebuilt`] is the reference implementation the
//! fidelity tests compare against.

use folio_core::config::CollectionConfig;
use folio_core::entity::{Entity, EntityMap};

use crate::index::{FieldIndex, SearchIndex};

/// The mutable state of one collection.
#[derive(Debug, Clone)]
pub struct CollectionState {
    /// id → entity, in insertion order (the unsorted query order).
    pub entities: EntityMap,
    /// Declared secondary/unique/compound indexes.
    pub indexes: Vec<FieldIndex>,
    /// The inverted search index, when search fields are declared.
    pub search: Option<SearchIndex>,
}

impl CollectionState {
    /// An empty state shaped by a collection config.
    pub fn new(config: &CollectionConfig) -> Self {
        Self {
            entities: EntityMap::new(),
            indexes: config.indexes.iter().cloned().map(FieldIndex::new).collect(),
            search: (!config.search_fields.is_empty())
                .then(|| SearchIndex::new(config.search_fields.clone())),
        }
    }

    /// Builds a fully indexed state from an entity map.
    pub fn from_entities(config: &CollectionConfig, entities: EntityMap) -> Self {
        let mut state = Self::new(config);
        for (id, entity) in entities {
            state.apply_insert(&id, &entity);
            state.entities.insert(id, entity);
        }
        state
    }

    /// Rebuilds this state's indexes from its current entity set.
    pub fn rebuilt(&self, config: &CollectionConfig) -> Self {
        Self::from_entities(config, self.entities.clone())
    }

    // -- Index maintenance ---------------------------------------------------

    /// Adds `entity` to every index (the primary map entry is the
    /// caller's).
    pub fn apply_insert(&mut self, id: &str, entity: &Entity) {
        for index in &mut self.indexes {
            index.insert(id, entity);
        }
        if let Some(search) = &mut self.search {
            search.insert(id, entity);
        }
    }

    /// Removes `entity` from every index.
    pub fn apply_remove(&mut self, id: &str, entity: &Entity) {
        for index in &mut self.indexes {
            index.remove(id, entity);
        }
        if let Some(search) = &mut self.search {
            search.remove(id, entity);
        }
    }

    /// Re-keys the indexes whose fields a mutation touched.
    ///
    /// Conservative dataflow: an index updates when any of its field paths
    /// starts at a changed top-level field.
    pub fn apply_update(&mut self, id: &str, old: &Entity, new: &Entity) {
        let changed = old.changed_fields(new);
        let touches = |paths: &[String]| {
            paths.iter().any(|path| {
                let head = path.split('.').next().unwrap_or(path);
                changed.iter().any(|c| c == head)
            })
        };

        for index in &mut self.indexes {
            if touches(&index.spec.fields) {
                index.remove(id, old);
                index.insert(id, new);
            }
        }
        if let Some(search) = &mut self.search {
            let fields = search.fields.clone();
            if touches(&fields) {
                search.remove(id, old);
                search.insert(id, new);
            }
        }
    }

    // -- Whole-entity operations ---------------------------------------------

    /// Inserts a new entity and indexes it.
    pub fn insert(&mut self, id: String, entity: Entity) {
        self.apply_insert(&id, &entity);
        self.entities.insert(id, entity);
    }

    /// Replaces an existing entity, re-keying touched indexes.
    pub fn replace(&mut self, id: &str, new: Entity) {
        if let Some(old) = self.entities.get(id) {
            let old = old.clone();
            self.apply_update(id, &old, &new);
        } else {
            self.apply_insert(id, &new);
        }
        self.entities.insert(id.to_owned(), new);
    }

    /// Removes an entity and all its index entries, preserving the
    /// insertion order of the remaining entities.
    pub fn remove(&mut self, id: &str) -> Option<Entity> {
        let entity = self.entities.shift_remove(id)?;
        self.apply_remove(id, &entity);
        Some(entity)
    }

    /// Number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` when the collection holds no entities.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Entity count plus per-index key counts, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    pub name: String,
    pub entity_count: usize,
    /// `(index name, distinct key count)` per declared index.
    pub index_keys: Vec<(String, usize)>,
    /// Distinct token count of the search index, when present.
    pub search_tokens: Option<usize>,
}

impl CollectionState {
    /// Snapshot of the collection's index shape.
    pub fn stats(&self, name: &str) -> CollectionStats {
        CollectionStats {
            name: name.to_owned(),
            entity_count: self.entities.len(),
            index_keys: self
                .indexes
                .iter()
                .map(|i| (i.spec.name(), i.key_count()))
                .collect(),
            search_tokens: self.search.as_ref().map(SearchIndex::token_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::config::IndexSpec;
    use folio_core::schema::DocumentSchema;
    use folio_core::tokenize::tokenize;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config() -> CollectionConfig {
        CollectionConfig::new("books", DocumentSchema::new().into_ref())
            .index(IndexSpec::on(&["genre"]))
            .index(IndexSpec::on(&["metadata.rating", "genre"]))
            .search(&["title"])
    }

    fn entity(v: serde_json::Value) -> Entity {
        Entity::from_value(v).unwrap()
    }

    fn sample_state() -> CollectionState {
        let config = config();
        let mut state = CollectionState::new(&config);
        state.insert(
            "1".into(),
            entity(json!({"id": "1", "title": "Dune", "genre": "sci-fi", "metadata": {"rating": 5}})),
        );
        state.insert(
            "2".into(),
            entity(json!({"id": "2", "title": "Dark Matters", "genre": "thriller"})),
        );
        state
    }

    /// Index fidelity: every reachable state equals a from-scratch rebuild.
    fn assert_fidelity(state: &CollectionState, config: &CollectionConfig) {
        let rebuilt = state.rebuilt(config);
        for (a, b) in state.indexes.iter().zip(rebuilt.indexes.iter()) {
            let left: Vec<_> = a.entries().collect();
            let right: Vec<_> = b.entries().collect();
            assert_eq!(left, right, "index {} diverged from rebuild", a.spec.name());
        }
        match (&state.search, &rebuilt.search) {
            (Some(a), Some(b)) => assert_eq!(a.token_count(), b.token_count()),
            (None, None) => {}
            _ => panic!("search index presence diverged"),
        }
    }

    #[test]
    fn insert_maintains_all_indexes() {
        let config = config();
        let state = sample_state();
        assert_eq!(state.len(), 2);
        assert!(!state.search.as_ref().unwrap().lookup(&tokenize("dune")).is_empty());
        assert_fidelity(&state, &config);
    }

    #[test]
    fn update_rekeys_touched_indexes() {
        let config = config();
        let mut state = sample_state();
        state.replace(
            "1",
            entity(json!({"id": "1", "title": "Dune Messiah", "genre": "space-opera", "metadata": {"rating": 4}})),
        );
        assert_fidelity(&state, &config);

        let genre_index = &state.indexes[0];
        let old_key = vec![crate::index::KeyPart::String("sci-fi".into())];
        assert!(genre_index.get(&old_key).is_none());
    }

    #[test]
    fn update_leaves_untouched_indexes_alone() {
        let config = config();
        let mut state = sample_state();
        // Only the title changes; the genre and compound indexes keep
        // their keys, and fidelity still holds.
        state.replace(
            "2",
            entity(json!({"id": "2", "title": "Darker Matters", "genre": "thriller"})),
        );
        assert_fidelity(&state, &config);
    }

    #[test]
    fn remove_clears_every_occurrence() {
        let config = config();
        let mut state = sample_state();
        let removed = state.remove("1").unwrap();
        assert_eq!(removed.id(), Some("1"));
        assert!(state.remove("1").is_none());
        assert_fidelity(&state, &config);
        assert!(state.search.as_ref().unwrap().lookup(&tokenize("dune")).is_empty());
    }

    #[test]
    fn remove_preserves_insertion_order() {
        let config = config();
        let mut state = sample_state();
        state.insert("3".into(), entity(json!({"id": "3", "title": "Third"})));
        state.remove("1");
        let ids: Vec<&String> = state.entities.keys().collect();
        assert_eq!(ids, ["2", "3"]);
        assert_fidelity(&state, &config);
    }

    #[test]
    fn stats_report_shape() {
        let state = sample_state();
        let stats = state.stats("books");
        assert_eq!(stats.entity_count, 2);
        assert_eq!(stats.index_keys[0].0, "genre");
        assert_eq!(stats.index_keys[0].1, 2);
        assert!(stats.search_tokens.unwrap() > 0);
    }
}
