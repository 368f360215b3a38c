//! The entity value model.
//!
//! An [`Entity`] is a dictionary keyed by string field names, stored as the
//! schema-encoded `serde_json` object. Every committed entity carries a
//! string `id`; collections that opt in also carry engine-stamped
//! `createdAt`/`updatedAt` timestamps (RFC 3339).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FolioError, Result};
use crate::path::{self, Slot};

/// Reserved field: the primary key.
pub const ID_FIELD: &str = "id";
/// Reserved field: creation timestamp (when the collection opts in).
pub const CREATED_AT_FIELD: &str = "createdAt";
/// Reserved field: last-mutation timestamp (when the collection opts in).
pub const UPDATED_AT_FIELD: &str = "updatedAt";
/// Reserved key inside persisted files; never a valid entity id.
pub const VERSION_KEY: &str = "_version";

/// A single document in a collection.
///
/// Entities handed to callers are immutable snapshots; the engine clones
/// before mutating.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Entity {
    fields: Map<String, Value>,
}

impl Entity {
    /// Creates an empty entity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing field map.
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Converts a JSON value into an entity; fails unless it is an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(FolioError::validation(format!(
                "entity must be an object, got {}",
                type_name(&other)
            ))),
        }
    }

    /// The entity's id, if assigned.
    pub fn id(&self) -> Option<&str> {
        self.fields.get(ID_FIELD).and_then(Value::as_str)
    }

    /// The entity's id; errors when missing or non-string.
    pub fn require_id(&self) -> Result<&str> {
        self.id()
            .ok_or_else(|| FolioError::validation("entity has no string id"))
    }

    /// Assigns the entity's id.
    pub fn set_id(&mut self, id: impl Into<String>) {
        self.fields.insert(ID_FIELD.to_owned(), Value::String(id.into()));
    }

    /// A top-level field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Resolves a dot-path into the entity, distinguishing null from absent.
    pub fn get_path(&self, dot_path: &str) -> Slot<'_> {
        path::resolve(&self.fields, dot_path)
    }

    /// Sets a top-level field.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) {
        self.fields.insert(field.into(), value);
    }

    /// Sets a value at a dot-path, creating intermediate objects.
    pub fn set_path(&mut self, dot_path: &str, value: Value) {
        path::set(&mut self.fields, dot_path, value);
    }

    /// Removes a top-level field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Removes a value at a dot-path.
    pub fn remove_path(&mut self, dot_path: &str) -> Option<Value> {
        path::remove(&mut self.fields, dot_path)
    }

    /// Stamps `createdAt` and `updatedAt` with `now`.
    pub fn stamp_created(&mut self, now: DateTime<Utc>) {
        let stamp = Value::String(now.to_rfc3339());
        self.fields.insert(CREATED_AT_FIELD.to_owned(), stamp.clone());
        self.fields.insert(UPDATED_AT_FIELD.to_owned(), stamp);
    }

    /// Stamps `updatedAt` with `now`.
    pub fn stamp_updated(&mut self, now: DateTime<Utc>) {
        self.fields
            .insert(UPDATED_AT_FIELD.to_owned(), Value::String(now.to_rfc3339()));
    }

    /// Deep-merges a partial object into the entity (objects recurse,
    /// scalars replace).
    pub fn merge(&mut self, patch: Map<String, Value>) {
        path::deep_merge(&mut self.fields, patch);
    }

    /// Top-level field names that differ between `self` and `other`.
    ///
    /// Conservative dataflow for index maintenance: a field counts as
    /// touched when it exists on only one side or compares unequal.
    pub fn changed_fields(&self, other: &Entity) -> Vec<String> {
        let mut changed = Vec::new();
        for (name, value) in &self.fields {
            match other.fields.get(name) {
                Some(v) if v == value => {}
                _ => changed.push(name.clone()),
            }
        }
        for name in other.fields.keys() {
            if !self.fields.contains_key(name) {
                changed.push(name.clone());
            }
        }
        changed
    }

    /// Borrow the underlying field map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Mutably borrow the underlying field map.
    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    /// Consumes the entity, returning the field map.
    pub fn into_map(self) -> Map<String, Value> {
        self.fields
    }

    /// The entity as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// Iterates `(field, value)` pairs in field order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` when the entity has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl From<Map<String, Value>> for Entity {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

/// An id → entity map in insertion order.
pub type EntityMap = indexmap::IndexMap<String, Entity>;

/// Human-readable JSON type name, for error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
