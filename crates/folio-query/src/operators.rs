//! Filter-operator registry.
//!
//! Built-in operators are evaluated directly by the filter module; this
//! registry holds the custom operators plugins install. A custom operator
//! declares the runtime types it applies to, and is silently ignored for
//! fields of any other type.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use folio_core::error::{FolioError, PluginFault, Result};

/// Every operator name the filter language reserves.
pub const BUILT_IN_OPERATORS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$startsWith", "$endsWith", "$contains", "$in",
    "$nin", "$all", "$size", "$and", "$or", "$not", "$search", "$some", "$every", "$none", "$set",
];

/// The runtime type of a JSON value, for operator applicability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Null,
    Boolean,
    Number,
    String,
    Array,
    Object,
}

impl ValueType {
    /// The observed type of a value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }
}

/// A plugin-supplied filter operator.
pub trait FilterOperator: Send + Sync {
    /// The operator key, including the leading `$`.
    fn name(&self) -> &str;

    /// The runtime types the operator applies to. A clause on a field of
    /// another observed type is silently ignored.
    fn value_types(&self) -> Vec<ValueType>;

    /// Whether `field_value` satisfies the operator with `operand`.
    fn evaluate(&self, field_value: &Value, operand: &Value) -> bool;
}

/// A shared operator handle.
pub type OperatorRef = Arc<dyn FilterOperator>;

/// Registry of custom operators used by the query pipeline.
#[derive(Clone, Default)]
pub struct OperatorRegistry {
    custom: HashMap<String, OperatorRef>,
}

impl OperatorRegistry {
    /// An empty registry (built-ins are always available).
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for names the filter language reserves.
    pub fn is_built_in(name: &str) -> bool {
        BUILT_IN_OPERATORS.contains(&name)
    }

    /// Installs a custom operator for `plugin`, rejecting conflicts with
    /// built-ins or previously installed operators.
    pub fn register(&mut self, plugin: &str, operator: OperatorRef) -> Result<()> {
        let name = operator.name().to_owned();
        if name.is_empty() || !name.starts_with('$') {
            return Err(FolioError::plugin(
                plugin,
                PluginFault::InvalidOperator,
                format!("operator name {name:?} must start with '$'"),
            ));
        }
        if Self::is_built_in(&name) || self.custom.contains_key(&name) {
            return Err(FolioError::plugin(
                plugin,
                PluginFault::OperatorConflict,
                format!("operator {name} is already defined"),
            ));
        }
        self.custom.insert(name, operator);
        Ok(())
    }

    /// Looks up a custom operator.
    pub fn get(&self, name: &str) -> Option<&OperatorRef> {
        self.custom.get(name)
    }

    /// Number of custom operators installed.
    pub fn len(&self) -> usize {
        self.custom.len()
    }

    /// Returns `true` when no custom operator is installed.
    pub fn is_empty(&self) -> bool {
        self.custom.is_empty()
    }
}

impl std::fmt::Debug for OperatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.custom.keys().collect();
        names.sort();
        f.debug_struct("OperatorRegistry").field("custom", &names).finish()
    }
}
