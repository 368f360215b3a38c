//! Change events published on every committed mutation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of mutation an event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// The wire-format string for this operation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single committed mutation, published on the change bus in commit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// The collection the mutation applied to.
    pub collection: String,
    /// The kind of mutation.
    pub operation: Operation,
    /// The affected entity id.
    pub id: String,
}

impl ChangeEvent {
    /// Creates an event.
    pub fn new(collection: impl Into<String>, operation: Operation, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            operation,
            id: id.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_strings() {
        assert_eq!(Operation::Create.to_string(), "create");
        assert_eq!(Operation::Delete.as_str(), "delete");
    }

    #[test]
    fn event_serializes_flat() {
        let e = ChangeEvent::new("books", Operation::Update, "b-1");
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"collection": "books", "operation": "update", "id": "b-1"})
        );
    }
}
