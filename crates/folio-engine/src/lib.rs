//! The folio document database engine.
//!
//! A single process owns a set of named collections persisted as
//! human-readable text files. Consumers express reads and writes through
//! the typed query/CRUD API on [`Collection`], subscribe to live-updating
//! result streams with [`Collection::watch`], and group mutations with
//! [`Database::transaction`].

mod bus;
pub mod collection;
mod crud;
pub mod database;
mod exec;
pub mod index;
mod patch;
pub mod plugin;
pub mod state;
pub mod stream;
pub mod txn;
pub mod watch;

pub use collection::Collection;
pub use crud::{DeleteOutcome, UpsertAction, UpsertSpec, Upserted};
pub use database::{Database, DatabaseConfig};
pub use plugin::Plugin;
pub use state::CollectionStats;
pub use stream::QueryStream;
pub use txn::TxContext;
pub use watch::Watcher;

// The building blocks most callers need alongside the engine.
pub use folio_codec::{Codec, CodecRegistry};
pub use folio_core::{
    CascadePolicy, CollectionConfig, ComputedField, DocumentSchema, Entity, FieldDef, FieldType,
    FolioError, HookSet, IdGenerator, IndexSpec, Migration, Relation, Result, Schema, SchemaRef,
};
pub use folio_query::{
    AggregateConfig, AggregateResult, FilterOperator, Page, QueryConfig, Select, SortDirection,
};
pub use folio_storage::{FsAdapter, MemAdapter, MigrationStatus, StorageAdapter};
