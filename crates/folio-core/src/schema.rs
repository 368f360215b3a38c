//! The schema contract and a built-in declarative implementation.
//!
//! The engine only assumes the [`Schema`] trait: validate, encode, decode,
//! and a way to enumerate field names and which are optional. External
//! schema libraries are bridged by implementing the trait;
//! [`DocumentSchema`] is the built-in implementation used by most
//! collections and all tests.

use std::sync::Arc;

use serde_json::Value;

use crate::entity::{type_name, ID_FIELD};
use crate::error::{FolioError, Result};

/// One validation failure, with the dot-path that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Dot-path of the offending field ("" for whole-document failures).
    pub path: String,
    /// What went wrong.
    pub message: String,
}

impl SchemaViolation {
    /// Creates a violation at the given path.
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Folds a violation list into a single [`FolioError::Validation`].
pub fn violations_to_error(violations: &[SchemaViolation]) -> FolioError {
    let detail = violations
        .iter()
        .map(|v| {
            if v.path.is_empty() {
                v.message.clone()
            } else {
                format!("{}: {}", v.path, v.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ");
    FolioError::validation(detail)
}

/// The contract a collection's schema must expose.
pub trait Schema: Send + Sync {
    /// Checks a runtime value against the schema.
    fn validate(&self, value: &Value) -> std::result::Result<(), Vec<SchemaViolation>>;

    /// Converts a runtime value to its storage form.
    fn encode(&self, value: Value) -> Result<Value>;

    /// Converts a storage value back to its runtime form.
    fn decode(&self, value: Value) -> Result<Value>;

    /// All declared field names.
    fn field_names(&self) -> Vec<String>;

    /// The subset of field names that may be omitted.
    fn optional_field_names(&self) -> Vec<String>;
}

/// A shared schema handle.
pub type SchemaRef = Arc<dyn Schema>;

// ---------------------------------------------------------------------------
// Built-in declarative schema
// ---------------------------------------------------------------------------

/// The runtime type a declared field must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
    /// Any JSON value, including null.
    Any,
}

impl FieldType {
    /// Checks whether `value` conforms to this type.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }

    /// Human-readable name for error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }
}

/// One declared field.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// The field name.
    pub name: String,
    /// The required runtime type.
    pub field_type: FieldType,
    /// Whether the field may be omitted.
    pub optional: bool,
    /// Whether an explicit null is accepted.
    pub nullable: bool,
}

impl FieldDef {
    /// A required, non-nullable field.
    pub fn required(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional: false,
            nullable: false,
        }
    }

    /// An optional field (may be omitted, still type-checked when present).
    pub fn optional(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional: true,
            nullable: false,
        }
    }

    /// Marks the field as accepting explicit null.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// A declarative field-list schema.
///
/// Encode and decode are identity transforms; validation enforces presence
/// and runtime types. The `id` field is always declared.
#[derive(Debug, Clone)]
pub struct DocumentSchema {
    fields: Vec<FieldDef>,
}

impl DocumentSchema {
    /// Creates a schema with just the mandatory `id` field.
    pub fn new() -> Self {
        Self {
            fields: vec![FieldDef::optional(ID_FIELD, FieldType::String)],
        }
    }

    /// Adds a required field.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldDef::required(name, field_type));
        self
    }

    /// Adds an optional field.
    pub fn optional(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.push(FieldDef::optional(name, field_type));
        self
    }

    /// Adds a fully specified field definition.
    pub fn with(mut self, def: FieldDef) -> Self {
        self.fields.push(def);
        self
    }

    /// Wraps the schema in an [`Arc`] for use in a collection config.
    pub fn into_ref(self) -> SchemaRef {
        Arc::new(self)
    }

    fn def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

impl Default for DocumentSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema for DocumentSchema {
    fn validate(&self, value: &Value) -> std::result::Result<(), Vec<SchemaViolation>> {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => {
                return Err(vec![SchemaViolation::new(
                    "",
                    format!("expected object, got {}", type_name(value)),
                )]);
            }
        };

        let mut violations = Vec::new();

        for def in &self.fields {
            match obj.get(&def.name) {
                None => {
                    // `id` is assigned by the engine before commit, so its
                    // absence in the input payload is not a violation.
                    if !def.optional && def.name != ID_FIELD {
                        violations.push(SchemaViolation::new(&def.name, "required field missing"));
                    }
                }
                Some(Value::Null) => {
                    if !def.nullable {
                        violations
                            .push(SchemaViolation::new(&def.name, "null not allowed for field"));
                    }
                }
                Some(v) => {
                    if !def.field_type.matches(v) {
                        violations.push(SchemaViolation::new(
                            &def.name,
                            format!("expected {}, got {}", def.field_type.as_str(), type_name(v)),
                        ));
                    }
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }

    fn encode(&self, value: Value) -> Result<Value> {
        Ok(value)
    }

    fn decode(&self, value: Value) -> Result<Value> {
        Ok(value)
    }

    fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    fn optional_field_names(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|f| f.optional)
            .map(|f| f.name.clone())
            .collect()
    }
}
