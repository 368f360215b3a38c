//! The public per-collection API.

use std::sync::Arc;

use serde_json::Value;

use folio_core::entity::Entity;
use folio_core::error::Result;

use folio_query::aggregate::{AggregateConfig, AggregateResult};
use folio_query::config::QueryConfig;
use folio_query::cursor::Page;

use crate::crud::{DeleteOutcome, UpsertSpec, Upserted};
use crate::database::DatabaseInner;
use crate::exec::EngineView;
use crate::state::CollectionStats;
use crate::stream::QueryStream;
use crate::watch::Watcher;

/// A handle to one collection of a [`Database`](crate::Database).
///
/// Cheap to clone; all handles share the engine.
#[derive(Clone)]
pub struct Collection {
    inner: Arc<DatabaseInner>,
    name: String,
}

impl Collection {
    pub(crate) fn new(inner: Arc<DatabaseInner>, name: String) -> Self {
        Self { inner, name }
    }

    /// The collection's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn with_view<T>(&self, f: impl FnOnce(&EngineView<'_>) -> Result<T>) -> Result<T> {
        let states = self.inner.lock_states()?;
        let view = EngineView {
            configs: &self.inner.configs,
            states: &states,
            operators: &self.inner.operators,
        };
        f(&view)
    }

    // -- Queries -------------------------------------------------------------

    /// Runs the query pipeline, returning the lazy result stream.
    ///
    /// The stream is a snapshot; re-invoking `query` with the same config
    /// re-executes against the then-current store.
    pub fn query(&self, config: &QueryConfig) -> Result<QueryStream> {
        self.with_view(|view| {
            let output = view.execute(&self.name, config)?;
            Ok(QueryStream::new(output.items))
        })
    }

    /// Runs the query and eagerly collects it.
    pub fn find(&self, config: &QueryConfig) -> Result<Vec<Entity>> {
        self.query(config)?.run()
    }

    /// Runs a paginated query, returning `{items, next_cursor}`.
    ///
    /// The first page uses `limit` as the page size; follow-up pages pass
    /// the returned cursor (and no limit/offset).
    pub fn find_page(&self, config: &QueryConfig) -> Result<Page<Entity>> {
        self.with_view(|view| {
            let output = view.execute(&self.name, config)?;
            let items: Result<Vec<Entity>> = output.items.into_iter().collect();
            Ok(Page {
                items: items?,
                next_cursor: output.next_cursor,
            })
        })
    }

    /// Fetches one entity by id.
    pub fn find_by_id(&self, id: &str) -> Result<Option<Entity>> {
        self.with_view(|view| view.find_by_id(&self.name, id))
    }

    /// First entity matching a where document, in insertion order.
    pub fn find_one(&self, filter: &Value) -> Result<Option<Entity>> {
        self.with_view(|view| {
            Ok(view
                .filtered_candidates(&self.name, Some(filter))?
                .into_iter()
                .next())
        })
    }

    /// Single-pass aggregates over the filtered candidate set.
    pub fn aggregate(&self, config: &AggregateConfig) -> Result<AggregateResult> {
        self.with_view(|view| view.aggregate(&self.name, config))
    }

    /// Subscribes a live-updating watcher for this query.
    pub fn watch(&self, config: QueryConfig) -> Result<Watcher> {
        config.check_pagination()?;
        let subscription = self.inner.bus.subscribe();
        Ok(Watcher::new(
            Arc::clone(&self.inner),
            self.name.clone(),
            config,
            subscription,
        ))
    }

    // -- Mutations -----------------------------------------------------------

    /// Creates one entity.
    pub fn create(&self, value: Value) -> Result<Entity> {
        self.inner.mutate(false, |ctx| ctx.create(&self.name, value))
    }

    /// Creates a batch atomically: either every entity commits or none.
    pub fn create_many(&self, values: Vec<Value>) -> Result<Vec<Entity>> {
        self.inner
            .mutate(true, |ctx| ctx.create_many(&self.name, values))
    }

    /// Applies a patch (update operators included) to one entity.
    pub fn update(&self, id: &str, patch: Value) -> Result<Entity> {
        self.inner
            .mutate(false, |ctx| ctx.update(&self.name, id, patch))
    }

    /// Patches every entity matching the where document, atomically.
    pub fn update_many(&self, filter: &Value, patch: Value) -> Result<Vec<Entity>> {
        self.inner
            .mutate(true, |ctx| ctx.update_many(&self.name, filter, patch))
    }

    /// Updates the first match or creates from the `create` payload.
    pub fn upsert(&self, spec: UpsertSpec) -> Result<Upserted> {
        self.inner.mutate(false, |ctx| ctx.upsert(&self.name, spec))
    }

    /// A batch of upserts, atomically.
    pub fn upsert_many(&self, specs: Vec<UpsertSpec>) -> Result<Vec<Upserted>> {
        self.inner
            .mutate(true, |ctx| ctx.upsert_many(&self.name, specs))
    }

    /// Deletes one entity, returning the removed snapshot.
    pub fn delete(&self, id: &str) -> Result<Entity> {
        self.inner.mutate(false, |ctx| ctx.delete(&self.name, id))
    }

    /// Deletes every entity matching the where document, atomically.
    pub fn delete_many(&self, filter: &Value) -> Result<DeleteOutcome> {
        self.inner
            .mutate(true, |ctx| ctx.delete_many(&self.name, filter))
    }

    /// Deletes every entity the predicate accepts, atomically.
    pub fn delete_many_by(&self, predicate: impl Fn(&Entity) -> bool) -> Result<DeleteOutcome> {
        self.inner
            .mutate(true, |ctx| ctx.delete_many_by(&self.name, &predicate))
    }

    // -- Relationship (cascade) variants --------------------------------------

    /// Creates an entity, first inserting/updating any embedded ref
    /// targets.
    pub fn create_with_relationships(&self, value: Value) -> Result<Entity> {
        self.inner
            .mutate(true, |ctx| ctx.create_with_relationships(&self.name, value))
    }

    /// Updates an entity, first inserting/updating any embedded ref
    /// targets.
    pub fn update_with_relationships(&self, id: &str, patch: Value) -> Result<Entity> {
        self.inner
            .mutate(true, |ctx| ctx.update_with_relationships(&self.name, id, patch))
    }

    /// Deletes an entity honoring the declared cascade policies.
    pub fn delete_with_relationships(&self, id: &str) -> Result<Entity> {
        self.inner
            .mutate(true, |ctx| ctx.delete_with_relationships(&self.name, id))
    }

    // -- Maintenance ---------------------------------------------------------

    /// Entity count and per-index key counts.
    pub fn stats(&self) -> Result<CollectionStats> {
        let states = self.inner.lock_states()?;
        Ok(states[&self.name].stats(&self.name))
    }

    /// Rebuilds every index from the entity set.
    ///
    /// Indexes are pure functions of the entities, so this is a no-op
    /// unless state was corrupted; it exists as a maintenance escape
    /// hatch.
    pub fn rebuild_indexes(&self) -> Result<()> {
        let config = self.inner.configs[&self.name].clone();
        let _writer = self.inner.lock_writer()?;
        let mut states = self.inner.lock_states()?;
        let state = states
            .get_mut(&self.name)
            .ok_or_else(|| folio_core::error::FolioError::Operation(format!(
                "missing state for collection {:?}",
                self.name
            )))?;
        *state = state.rebuilt(&config);
        Ok(())
    }

    /// Number of entities.
    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.lock_states()?[&self.name].len())
    }

    /// Returns `true` when the collection holds no entities.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.inner.lock_states()?[&self.name].is_empty())
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish()
    }
}
