//! Core types and traits for the folio document database.

pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod idgen;
pub mod path;
pub mod relation;
pub mod schema;
pub mod tokenize;

pub use config::{
    AfterHook, BeforeHook, CollectionConfig, ComputedField, DeleteGuard, HookSet, IndexSpec,
    Migration,
};
pub use entity::{Entity, EntityMap, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD, VERSION_KEY};
pub use error::{FolioError, MigrationFault, PluginFault, Result};
pub use event::{ChangeEvent, Operation};
pub use idgen::{HashIdGenerator, IdGenerator};
pub use path::Slot;
pub use relation::{CascadePolicy, Relation};
pub use schema::{DocumentSchema, FieldDef, FieldType, Schema, SchemaRef, SchemaViolation};
