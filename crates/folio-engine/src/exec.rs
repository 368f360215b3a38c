//! Query execution: the fixed-order pipeline of candidate resolution,
//! residual filtering, search scoring, sort, pagination, projection, and
//! population.
//!
//! Everything here reads a borrowed view of the engine's state; the
//! executor never mutates collections.

use std::collections::HashMap;

use serde_json::Value;

use folio_core::config::CollectionConfig;
use folio_core::entity::Entity;
use folio_core::error::{FolioError, Result};
use folio_core::relation::Relation;

use folio_query::aggregate::{self, AggregateConfig, AggregateResult};
use folio_query::config::{QueryConfig, Select, SortDirection};
use folio_query::cursor::Cursor;
use folio_query::filter::{self, FilterContext, RelationAccess, RelationKind};
use folio_query::plan::{self, PlanLeaf, QueryPlan};
use folio_query::search;
use folio_query::select;
use folio_query::sort;

use crate::index::{IdSet, KeyPart};
use crate::state::CollectionState;

/// A borrowed, read-only view of the engine.
pub(crate) struct EngineView<'a> {
    pub configs: &'a HashMap<String, CollectionConfig>,
    pub states: &'a HashMap<String, CollectionState>,
    pub operators: &'a folio_query::OperatorRegistry,
}

/// The result of executing one query.
pub(crate) struct ExecOutput {
    /// Result elements; dangling references surface as `Err` elements.
    pub items: Vec<Result<Entity>>,
    /// Continuation token, when the query paginated by cursor or limit.
    pub next_cursor: Option<String>,
}

impl<'a> EngineView<'a> {
    pub fn config(&self, collection: &str) -> Result<&'a CollectionConfig> {
        self.configs
            .get(collection)
            .ok_or_else(|| FolioError::Operation(format!("unknown collection {collection:?}")))
    }

    pub fn state(&self, collection: &str) -> Result<&'a CollectionState> {
        self.states
            .get(collection)
            .ok_or_else(|| FolioError::Operation(format!("unknown collection {collection:?}")))
    }

    // -- Entry points --------------------------------------------------------

    /// Runs the full pipeline for one query.
    pub fn execute(&self, collection: &str, query: &QueryConfig) -> Result<ExecOutput> {
        query.check_pagination()?;
        let config = self.config(collection)?;

        // 1-4: candidates, computed injection, residual filter, scoring,
        // sort.
        let mut items = self.filtered_candidates(collection, query.filter.as_ref())?;
        let search_clause = query
            .filter
            .as_ref()
            .and_then(search::extract_clause);

        if !query.sort.is_empty() {
            sort::sort_entities(&mut items, &query.sort);
        } else if let Some(clause) = &search_clause {
            // Relevance order when a search participated and no explicit
            // sort overrides it.
            let fields: Vec<String> = clause
                .fields
                .clone()
                .unwrap_or_else(|| config.search_fields.clone());
            let tokens = clause.tokens();
            let mut scored: Vec<(f64, Entity)> = items
                .into_iter()
                .map(|e| (search::score(&e, &tokens, &fields), e))
                .collect();
            scored.sort_by(|(a, _), (b, _)| b.total_cmp(a));
            items = scored.into_iter().map(|(_, e)| e).collect();
        }

        // 5: paginate.
        let (page, next_cursor) = paginate(items, query)?;

        // 6-7: project, then populate (population reads the pre-projection
        // entity so a projected-away foreign key still resolves).
        let populate_names = self.population_set(config, query);
        let mut out = Vec::with_capacity(page.len());
        for original in page {
            let mut shaped = match &query.select {
                Some(selection) => select::project(&original, selection),
                None => original.clone(),
            };
            match self.populate_into(collection, config, &original, &mut shaped, &populate_names) {
                Ok(()) => out.push(Ok(shaped)),
                Err(e) => out.push(Err(e)),
            }
        }

        Ok(ExecOutput {
            items: out,
            next_cursor,
        })
    }

    /// Runs candidate resolution + computed injection + residual filter,
    /// returning matching entities in pipeline order.
    pub fn filtered_candidates(
        &self,
        collection: &str,
        filter: Option<&Value>,
    ) -> Result<Vec<Entity>> {
        let config = self.config(collection)?;
        let state = self.state(collection)?;

        let excluded = self.unplannable_paths(config);
        let query_plan = plan::plan(filter, &excluded);
        let candidate_ids = resolve_candidates(state, &query_plan);

        // Candidates stream in primary-map insertion order.
        let mut items: Vec<Entity> = match &candidate_ids {
            Some(ids) => state
                .entities
                .iter()
                .filter(|(id, _)| ids.contains(*id))
                .map(|(_, e)| e.clone())
                .collect(),
            None => state.entities.values().cloned().collect(),
        };

        // Computed fields join the snapshot before the residual filter so
        // filters and sorts can see them; they never have index coverage.
        if !config.computed.is_empty() {
            for item in &mut items {
                let stored = item.clone();
                for computed in &config.computed {
                    item.insert(computed.name.clone(), (computed.compute)(&stored));
                }
            }
        }

        if let Some(filter) = filter {
            let relations = RelView {
                view: self,
                collection: collection.to_owned(),
            };
            let ctx = FilterContext {
                operators: self.operators,
                relations: Some(&relations),
                search_fields: &config.search_fields,
            };
            items.retain(|e| filter::matches(e, filter, &ctx));
        }

        Ok(items)
    }

    /// Fetches one entity by id, with computed fields materialized.
    pub fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Entity>> {
        let config = self.config(collection)?;
        let state = self.state(collection)?;
        Ok(state.entities.get(id).map(|stored| {
            let mut entity = stored.clone();
            for computed in &config.computed {
                entity.insert(computed.name.clone(), (computed.compute)(stored));
            }
            entity
        }))
    }

    /// Runs an aggregate over the filtered candidate set.
    pub fn aggregate(&self, collection: &str, config: &AggregateConfig) -> Result<AggregateResult> {
        let items = self.filtered_candidates(collection, config.filter.as_ref())?;
        Ok(aggregate::aggregate(items.iter(), config))
    }

    /// The ids matching a where document, in insertion order.
    pub fn matching_ids(&self, collection: &str, filter: Option<&Value>) -> Result<Vec<String>> {
        Ok(self
            .filtered_candidates(collection, filter)?
            .iter()
            .filter_map(|e| e.id().map(str::to_owned))
            .collect())
    }

    // -- Helpers -------------------------------------------------------------

    /// Paths the planner must never claim: computed fields and relation
    /// names.
    fn unplannable_paths(&self, config: &CollectionConfig) -> Vec<String> {
        config
            .computed
            .iter()
            .map(|c| c.name.clone())
            .chain(config.relations.iter().map(|r| r.name().to_owned()))
            .collect()
    }

    /// Relations to populate: the explicit list plus select-tree entries
    /// naming a relation.
    fn population_set(&self, config: &CollectionConfig, query: &QueryConfig) -> Vec<String> {
        let mut names = query.populate.clone();
        if let Some(Select::Tree(tree)) = &query.select {
            for (field, spec) in tree {
                let requested = matches!(spec, Value::Bool(true) | Value::Object(_));
                if requested
                    && config.relation_named(field).is_some()
                    && !names.contains(field)
                {
                    names.push(field.clone());
                }
            }
        }
        names
    }

    /// Resolves one relation into `shaped`, reading keys from `original`.
    fn populate_into(
        &self,
        collection: &str,
        config: &CollectionConfig,
        original: &Entity,
        shaped: &mut Entity,
        names: &[String],
    ) -> Result<()> {
        for name in names {
            let Some(relation) = config.relation_named(name) else {
                return Err(FolioError::Operation(format!(
                    "unknown relation {name:?} on {collection:?}"
                )));
            };
            match relation {
                Relation::Ref { field, target, .. } => {
                    let Some(fk) = original.get_path(field).as_value().and_then(Value::as_str)
                    else {
                        continue;
                    };
                    let target_state = self.state(target)?;
                    match target_state.entities.get(fk) {
                        Some(entity) => shaped.insert(name.clone(), entity.to_value()),
                        None => {
                            return Err(FolioError::DanglingReference {
                                collection: collection.to_owned(),
                                field: field.clone(),
                                target_id: fk.to_owned(),
                            });
                        }
                    }
                }
                Relation::Inverse {
                    target,
                    foreign_key,
                    ..
                } => {
                    let Some(id) = original.id() else { continue };
                    let targets = self.inverse_entities(target, foreign_key, id)?;
                    shaped.insert(
                        name.clone(),
                        Value::Array(targets.iter().map(Entity::to_value).collect()),
                    );
                }
            }
        }
        Ok(())
    }

    /// Entities of `target` whose foreign key equals `id`, via the
    /// foreign-key index when one is declared.
    pub fn inverse_entities(
        &self,
        target: &str,
        foreign_key: &str,
        id: &str,
    ) -> Result<Vec<Entity>> {
        let state = self.state(target)?;
        if let Some(index) = state
            .indexes
            .iter()
            .find(|i| i.spec.covers_single(foreign_key))
        {
            let key = vec![KeyPart::String(id.to_owned())];
            let ids = index.get(&key).cloned().unwrap_or_default();
            return Ok(state
                .entities
                .iter()
                .filter(|(entity_id, _)| ids.contains(*entity_id))
                .map(|(_, e)| e.clone())
                .collect());
        }
        Ok(state
            .entities
            .values()
            .filter(|e| {
                e.get_path(foreign_key)
                    .as_value()
                    .and_then(Value::as_str)
                    .is_some_and(|fk| fk == id)
            })
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Relation access for the residual filter
// ---------------------------------------------------------------------------

struct RelView<'a> {
    view: &'a EngineView<'a>,
    collection: String,
}

impl RelView<'_> {
    fn relation(&self, name: &str) -> Option<&Relation> {
        self.view
            .configs
            .get(&self.collection)
            .and_then(|c| c.relation_named(name))
    }
}

impl RelationAccess for RelView<'_> {
    fn kind(&self, relation: &str) -> Option<RelationKind> {
        self.relation(relation).map(|r| match r {
            Relation::Ref { .. } => RelationKind::Ref,
            Relation::Inverse { .. } => RelationKind::Inverse,
        })
    }

    fn ref_target(&self, relation: &str, entity: &Entity) -> Option<Entity> {
        let Relation::Ref { field, target, .. } = self.relation(relation)? else {
            return None;
        };
        let fk = entity.get_path(field).as_value()?.as_str()?;
        self.view.states.get(target)?.entities.get(fk).cloned()
    }

    fn inverse_targets(&self, relation: &str, entity: &Entity) -> Vec<Entity> {
        let Some(Relation::Inverse {
            target,
            foreign_key,
            ..
        }) = self.relation(relation)
        else {
            return Vec::new();
        };
        let Some(id) = entity.id() else {
            return Vec::new();
        };
        self.view
            .inverse_entities(target, foreign_key, id)
            .unwrap_or_default()
    }

    fn target_access(&self, relation: &str) -> Option<Box<dyn RelationAccess + '_>> {
        let target = self.relation(relation)?.target().to_owned();
        Some(Box::new(RelView {
            view: self.view,
            collection: target,
        }))
    }
}

// ---------------------------------------------------------------------------
// Candidate resolution
// ---------------------------------------------------------------------------

/// Resolves the plan against the collection's indexes.
///
/// `None` means no clause had index coverage and the caller scans the
/// primary map. Leaves without coverage are simply skipped; the residual
/// filter re-checks every clause anyway.
fn resolve_candidates(state: &CollectionState, query_plan: &QueryPlan) -> Option<IdSet> {
    if query_plan.is_empty() {
        return None;
    }

    let mut sets: Vec<IdSet> = Vec::new();

    // Compound indexes answer conjunctions of equalities over their exact
    // field list.
    for index in state.indexes.iter().filter(|i| i.spec.fields.len() > 1) {
        let mut key = Vec::with_capacity(index.spec.fields.len());
        for field in &index.spec.fields {
            match query_plan.all.iter().find_map(|leaf| match leaf {
                PlanLeaf::Eq { path, value } if path == field => Some(value),
                _ => None,
            }) {
                Some(value) => key.push(KeyPart::from_value(value)),
                None => {
                    key.clear();
                    break;
                }
            }
        }
        if !key.is_empty() {
            sets.push(index.get(&key).cloned().unwrap_or_default());
        }
    }

    for leaf in &query_plan.all {
        if let Some(ids) = leaf_ids(state, leaf) {
            sets.push(ids);
        }
    }

    if let Some(groups) = &query_plan.any {
        if let Some(union) = resolve_or(state, groups) {
            sets.push(union);
        }
    }

    if sets.is_empty() {
        return None;
    }
    let mut iter = sets.into_iter();
    let mut acc = iter.next().expect("sets is non-empty");
    for set in iter {
        acc = acc.intersection(&set).cloned().collect();
    }
    Some(acc)
}

/// An `$or` bounds candidates only when every arm resolves through some
/// index.
fn resolve_or(state: &CollectionState, groups: &[Vec<PlanLeaf>]) -> Option<IdSet> {
    let mut union = IdSet::new();
    for arm in groups {
        let mut arm_sets: Vec<IdSet> = Vec::new();
        for leaf in arm {
            if let Some(ids) = leaf_ids(state, leaf) {
                arm_sets.push(ids);
            }
        }
        if arm_sets.is_empty() {
            return None;
        }
        let mut iter = arm_sets.into_iter();
        let mut acc = iter.next().expect("arm_sets is non-empty");
        for set in iter {
            acc = acc.intersection(&set).cloned().collect();
        }
        union.extend(acc);
    }
    Some(union)
}

fn leaf_ids(state: &CollectionState, leaf: &PlanLeaf) -> Option<IdSet> {
    match leaf {
        PlanLeaf::Eq { path, value } => {
            let index = state.indexes.iter().find(|i| i.spec.covers_single(path))?;
            let key = vec![KeyPart::from_value(value)];
            Some(index.get(&key).cloned().unwrap_or_default())
        }
        PlanLeaf::Range { path, lower, upper } => {
            let index = state.indexes.iter().find(|i| i.spec.covers_single(path))?;
            Some(index.range(lower, upper))
        }
        PlanLeaf::In { path, values } => {
            let index = state.indexes.iter().find(|i| i.spec.covers_single(path))?;
            let mut out = IdSet::new();
            for value in values {
                let key = vec![KeyPart::from_value(value)];
                if let Some(ids) = index.get(&key) {
                    out.extend(ids.iter().cloned());
                }
            }
            Some(out)
        }
        PlanLeaf::Search(clause) => {
            let search_index = state.search.as_ref()?;
            let tokens = clause.tokens();
            // An empty query matches everything; only a non-empty token
            // set can bound the candidates. The index merges all declared
            // fields, so its id set is a (safe) superset for field-scoped
            // clauses; the residual filter narrows.
            if tokens.is_empty() {
                return None;
            }
            Some(search_index.lookup(&tokens))
        }
    }
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// Applies cursor or offset/limit pagination, returning the page and the
/// next continuation token.
fn paginate(items: Vec<Entity>, query: &QueryConfig) -> Result<(Vec<Entity>, Option<String>)> {
    if let Some(cursor_text) = &query.cursor {
        let cursor = Cursor::decode(cursor_text)?;
        let start = seek_past(&items, &cursor, &query.sort);
        let rest = &items[start..];
        let size = cursor.size.unwrap_or(rest.len());
        let page: Vec<Entity> = rest.iter().take(size).cloned().collect();
        let next = next_cursor_token(&page, rest.len(), cursor.size, &query.sort)?;
        return Ok((page, next));
    }

    let offset = query.offset.unwrap_or(0);
    let after_offset: Vec<Entity> = items.into_iter().skip(offset).collect();
    let size = query.limit.unwrap_or(after_offset.len());
    let remaining = after_offset.len();
    let page: Vec<Entity> = after_offset.into_iter().take(size).collect();
    let next = next_cursor_token(&page, remaining, query.limit, &query.sort)?;
    Ok((page, next))
}

/// Index of the first item strictly past the cursor position.
fn seek_past(items: &[Entity], cursor: &Cursor, keys: &[(String, SortDirection)]) -> usize {
    let mut index = 0;
    while index < items.len() {
        let item = &items[index];
        let ordering = compare_to_cursor(item, cursor, keys);
        if ordering == std::cmp::Ordering::Greater {
            break;
        }
        index += 1;
        if ordering == std::cmp::Ordering::Equal
            && item.id().is_some_and(|id| id == cursor.id)
        {
            // Landed exactly on the cursor row; everything after it is the
            // next page even if key tuples tie.
            break;
        }
    }
    index
}

fn compare_to_cursor(
    item: &Entity,
    cursor: &Cursor,
    keys: &[(String, SortDirection)],
) -> std::cmp::Ordering {
    use folio_core::path::Slot;

    for (position, (path, direction)) in keys.iter().enumerate() {
        let cursor_slot = match cursor.keys.get(position) {
            Some(Value::Null) | None => Slot::Null,
            Some(v) => Slot::Value(v),
        };
        let ordering = sort::compare_slots(item.get_path(path), cursor_slot, *direction);
        if ordering != std::cmp::Ordering::Equal {
            return ordering;
        }
    }
    std::cmp::Ordering::Equal
}

fn next_cursor_token(
    page: &[Entity],
    remaining: usize,
    size: Option<usize>,
    keys: &[(String, SortDirection)],
) -> Result<Option<String>> {
    let Some(size) = size else {
        return Ok(None);
    };
    if page.len() < size || remaining <= page.len() {
        return Ok(None);
    }
    let Some(last) = page.last() else {
        return Ok(None);
    };
    let cursor = Cursor {
        keys: keys
            .iter()
            .map(|(path, _)| {
                last.get_path(path)
                    .present()
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect(),
        id: last.id().unwrap_or_default().to_owned(),
        size: Some(size),
    };
    Ok(Some(cursor.encode()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::config::IndexSpec;
    use folio_core::schema::DocumentSchema;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entity(v: Value) -> Entity {
        Entity::from_value(v).unwrap()
    }

    fn compound_state() -> (CollectionConfig, CollectionState) {
        // Compound index only; no single-field index exists, so any
        // resolved candidate set must have come from the composite key.
        let config = CollectionConfig::new("books", DocumentSchema::new().into_ref())
            .index(IndexSpec::on(&["metadata.rating", "genre"]));
        let mut state = CollectionState::new(&config);
        state.insert(
            "1".into(),
            entity(json!({"id": "1", "genre": "sci-fi", "metadata": {"rating": 5}})),
        );
        state.insert(
            "2".into(),
            entity(json!({"id": "2", "genre": "sci-fi", "metadata": {"rating": 3}})),
        );
        state.insert(
            "3".into(),
            entity(json!({"id": "3", "genre": "fantasy", "metadata": {"rating": 5}})),
        );
        (config, state)
    }

    #[test]
    fn compound_index_answers_nested_equality() {
        let (_, state) = compound_state();
        let filter = json!({"metadata": {"rating": 5}, "genre": "sci-fi"});
        let query_plan = plan::plan(Some(&filter), &[]);

        let ids = resolve_candidates(&state, &query_plan)
            .expect("composite key lookup, not a scan");
        assert_eq!(ids, IdSet::from(["1".to_owned()]));
    }

    #[test]
    fn unindexed_clause_falls_back_to_scan() {
        let (_, state) = compound_state();
        let filter = json!({"title": "Dune"});
        let query_plan = plan::plan(Some(&filter), &[]);
        assert!(resolve_candidates(&state, &query_plan).is_none());
    }

    #[test]
    fn or_resolves_as_union() {
        let config = CollectionConfig::new("books", DocumentSchema::new().into_ref())
            .index(IndexSpec::on(&["genre"]))
            .index(IndexSpec::on(&["year"]));
        let mut state = CollectionState::new(&config);
        state.insert("1".into(), entity(json!({"id": "1", "genre": "sci-fi", "year": 1965})));
        state.insert("2".into(), entity(json!({"id": "2", "genre": "fantasy", "year": 1954})));
        state.insert("3".into(), entity(json!({"id": "3", "genre": "horror", "year": 1986})));

        let filter = json!({"$or": [{"genre": "sci-fi"}, {"year": 1954}]});
        let query_plan = plan::plan(Some(&filter), &[]);
        let ids = resolve_candidates(&state, &query_plan).expect("both arms indexable");
        assert_eq!(ids, IdSet::from(["1".to_owned(), "2".to_owned()]));
    }

    #[test]
    fn range_leaf_uses_ordered_index() {
        let config = CollectionConfig::new("books", DocumentSchema::new().into_ref())
            .index(IndexSpec::on(&["year"]));
        let mut state = CollectionState::new(&config);
        for (id, year) in [("1", 1960), ("2", 1970), ("3", 1980)] {
            state.insert(id.into(), entity(json!({"id": id, "year": year})));
        }
        let filter = json!({"year": {"$gte": 1965, "$lte": 1975}});
        let query_plan = plan::plan(Some(&filter), &[]);
        let ids = resolve_candidates(&state, &query_plan).expect("range over ordered index");
        assert_eq!(ids, IdSet::from(["2".to_owned()]));
    }
}
