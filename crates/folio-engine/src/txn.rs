//! The transaction context.
//!
//! [`TxContext`] exposes the collection API over a private working copy of
//! every collection's state. Reads inside the transaction see the working
//! copy; writes mutate only the working copy and queue their change
//! events. [`Database::transaction`](crate::Database::transaction) owns
//! commit and rollback.

use serde_json::Value;

use folio_core::entity::Entity;
use folio_core::error::Result;

use folio_query::aggregate::{AggregateConfig, AggregateResult};
use folio_query::config::QueryConfig;

use crate::crud::{DeleteOutcome, MutCtx, UpsertSpec, Upserted};
use crate::exec::EngineView;
use crate::stream::QueryStream;

/// The collection API bound to a transaction's working copy.
pub struct TxContext<'t, 'a> {
    ctx: &'t mut MutCtx<'a>,
}

impl<'t, 'a> TxContext<'t, 'a> {
    pub(crate) fn new(ctx: &'t mut MutCtx<'a>) -> Self {
        Self { ctx }
    }

    fn view(&self) -> EngineView<'_> {
        self.ctx.view()
    }

    // -- Reads (working copy) ------------------------------------------------

    /// Runs a query against the working copy.
    pub fn query(&self, collection: &str, config: &QueryConfig) -> Result<QueryStream> {
        let output = self.view().execute(collection, config)?;
        Ok(QueryStream::new(output.items))
    }

    /// Fetches one entity by id from the working copy.
    pub fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<Entity>> {
        self.view().find_by_id(collection, id)
    }

    /// First entity matching a where document, in insertion order.
    pub fn find_one(&self, collection: &str, filter: &Value) -> Result<Option<Entity>> {
        Ok(self
            .view()
            .filtered_candidates(collection, Some(filter))?
            .into_iter()
            .next())
    }

    /// Aggregates over the working copy.
    pub fn aggregate(
        &self,
        collection: &str,
        config: &AggregateConfig,
    ) -> Result<AggregateResult> {
        self.view().aggregate(collection, config)
    }

    // -- Writes (working copy) -----------------------------------------------

    pub fn create(&mut self, collection: &str, value: Value) -> Result<Entity> {
        self.ctx.create(collection, value)
    }

    pub fn create_many(&mut self, collection: &str, values: Vec<Value>) -> Result<Vec<Entity>> {
        self.ctx.create_many(collection, values)
    }

    pub fn update(&mut self, collection: &str, id: &str, patch: Value) -> Result<Entity> {
        self.ctx.update(collection, id, patch)
    }

    pub fn update_many(
        &mut self,
        collection: &str,
        filter: &Value,
        patch: Value,
    ) -> Result<Vec<Entity>> {
        self.ctx.update_many(collection, filter, patch)
    }

    pub fn upsert(&mut self, collection: &str, spec: UpsertSpec) -> Result<Upserted> {
        self.ctx.upsert(collection, spec)
    }

    pub fn upsert_many(
        &mut self,
        collection: &str,
        specs: Vec<UpsertSpec>,
    ) -> Result<Vec<Upserted>> {
        self.ctx.upsert_many(collection, specs)
    }

    pub fn delete(&mut self, collection: &str, id: &str) -> Result<Entity> {
        self.ctx.delete(collection, id)
    }

    pub fn delete_many(&mut self, collection: &str, filter: &Value) -> Result<DeleteOutcome> {
        self.ctx.delete_many(collection, filter)
    }

    pub fn delete_many_by(
        &mut self,
        collection: &str,
        predicate: impl Fn(&Entity) -> bool,
    ) -> Result<DeleteOutcome> {
        self.ctx.delete_many_by(collection, &predicate)
    }

    pub fn create_with_relationships(&mut self, collection: &str, value: Value) -> Result<Entity> {
        self.ctx.create_with_relationships(collection, value)
    }

    pub fn update_with_relationships(
        &mut self,
        collection: &str,
        id: &str,
        patch: Value,
    ) -> Result<Entity> {
        self.ctx.update_with_relationships(collection, id, patch)
    }

    pub fn delete_with_relationships(&mut self, collection: &str, id: &str) -> Result<Entity> {
        self.ctx.delete_with_relationships(collection, id)
    }
}
