//! Relationship descriptors between collections.

use serde::{Deserialize, Serialize};

/// What happens to dependents when the target of an inverse relation is
/// deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CascadePolicy {
    /// Deletion fails while dependents exist.
    #[default]
    Restrict,
    /// Dependents are deleted recursively.
    Cascade,
    /// Dependents' foreign key becomes null.
    SetNull,
}

/// A directional link between two collections via a foreign-key field.
#[derive(Debug, Clone)]
pub enum Relation {
    /// This entity carries a foreign-key field whose value is the target
    /// entity's id (0..1 target).
    Ref {
        /// Name the relation is populated/filtered under.
        name: String,
        /// The foreign-key field on this entity.
        field: String,
        /// The target collection.
        target: String,
    },

    /// Target entities carry a foreign-key field pointing back; this side
    /// produces the 0..N matching targets.
    Inverse {
        /// Name the relation is populated/filtered under.
        name: String,
        /// The target collection holding the foreign keys.
        target: String,
        /// The foreign-key field on the target entities.
        foreign_key: String,
        /// Deletion policy for dependents.
        on_delete: CascadePolicy,
    },
}

impl Relation {
    /// A ref relation whose name doubles as the foreign-key field.
    pub fn ref_to(name: impl Into<String>, field: impl Into<String>, target: impl Into<String>) -> Self {
        Self::Ref {
            name: name.into(),
            field: field.into(),
            target: target.into(),
        }
    }

    /// An inverse relation with the given cascade policy.
    pub fn inverse_of(
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
        on_delete: CascadePolicy,
    ) -> Self {
        Self::Inverse {
            name: name.into(),
            target: target.into(),
            foreign_key: foreign_key.into(),
            on_delete,
        }
    }

    /// The name the relation is addressed by in queries and populate.
    pub fn name(&self) -> &str {
        match self {
            Self::Ref { name, .. } | Self::Inverse { name, .. } => name,
        }
    }

    /// The collection on the far side of the relation.
    pub fn target(&self) -> &str {
        match self {
            Self::Ref { target, .. } | Self::Inverse { target, .. } => target,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_relation_accessors() {
        let r = Relation::ref_to("company", "companyId", "companies");
        assert_eq!(r.name(), "company");
        assert_eq!(r.target(), "companies");
    }

    #[test]
    fn inverse_relation_accessors() {
        let r = Relation::inverse_of("employees", "users", "companyId", CascadePolicy::Cascade);
        assert_eq!(r.name(), "employees");
        assert_eq!(r.target(), "users");
        match r {
            Relation::Inverse { on_delete, .. } => assert_eq!(on_delete, CascadePolicy::Cascade),
            _ => panic!("expected inverse"),
        }
    }

    #[test]
    fn default_policy_is_restrict() {
        assert_eq!(CascadePolicy::default(), CascadePolicy::Restrict);
    }
}
