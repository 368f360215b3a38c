//! Where-document evaluation (the residual filter).
//!
//! The filter language is a JSON document. A direct value means `{$eq}`;
//! an object operand mixes `$`-operators with nested field constraints;
//! dot-paths resolve into nested objects and skip undefined parents
//! without error. Relationship filters recurse through a
//! [`RelationAccess`] the engine provides.

use serde_json::Value;

use folio_core::entity::Entity;
use folio_core::path::Slot;

use crate::operators::{OperatorRegistry, ValueType};
use crate::search;
use crate::sort::compare_values;

/// The two relationship directions the filter language recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// This entity carries the foreign key (0..1 target).
    Ref,
    /// Targets carry the foreign key back (0..N targets).
    Inverse,
}

/// Engine-side access to relationship data, pre-bound to one collection.
pub trait RelationAccess {
    /// The kind of the named relation, or `None` when the name is a plain
    /// field.
    fn kind(&self, relation: &str) -> Option<RelationKind>;

    /// The ref target entity, if the foreign key is set and resolves.
    fn ref_target(&self, relation: &str, entity: &Entity) -> Option<Entity>;

    /// All inverse targets pointing at `entity`.
    fn inverse_targets(&self, relation: &str, entity: &Entity) -> Vec<Entity>;

    /// Relation access for the target collection, for nested relation
    /// filters.
    fn target_access(&self, relation: &str) -> Option<Box<dyn RelationAccess + '_>>;
}

/// Everything filter evaluation needs besides the entity.
pub struct FilterContext<'a> {
    /// Custom operators installed by plugins.
    pub operators: &'a OperatorRegistry,
    /// Relationship access for the queried collection.
    pub relations: Option<&'a dyn RelationAccess>,
    /// Default field set for `$search` without explicit fields.
    pub search_fields: &'a [String],
}

impl<'a> FilterContext<'a> {
    /// A context with no relations and no search fields.
    pub fn bare(operators: &'a OperatorRegistry) -> Self {
        Self {
            operators,
            relations: None,
            search_fields: &[],
        }
    }
}

/// Evaluates a full where document against one entity.
pub fn matches(entity: &Entity, filter: &Value, ctx: &FilterContext<'_>) -> bool {
    match filter {
        Value::Object(map) => map.iter().all(|(key, operand)| match key.as_str() {
            "$and" => operand
                .as_array()
                .is_none_or(|arms| arms.iter().all(|arm| matches(entity, arm, ctx))),
            "$or" => operand
                .as_array()
                .is_none_or(|arms| arms.iter().any(|arm| matches(entity, arm, ctx))),
            "$not" => !matches(entity, operand, ctx),
            "$search" => search_clause_matches(entity, operand, None, ctx),
            _ => {
                if let Some(relations) = ctx.relations {
                    if let Some(kind) = relations.kind(key) {
                        return relation_matches(entity, key, kind, operand, relations, ctx);
                    }
                }
                field_matches(entity, key, operand, ctx)
            }
        }),
        // A missing/malformed filter matches everything.
        _ => true,
    }
}

/// Evaluates one field constraint (direct value or operator document).
fn field_matches(entity: &Entity, path: &str, operand: &Value, ctx: &FilterContext<'_>) -> bool {
    match operand {
        Value::Object(ops) => ops.iter().all(|(op, arg)| {
            if op.starts_with('$') {
                apply_operator(entity, path, op, arg, ctx)
            } else {
                // Nested constraint: {metadata: {rating: 5}} is
                // {"metadata.rating": 5}.
                field_matches(entity, &format!("{path}.{op}"), arg, ctx)
            }
        }),
        direct => slot_eq(entity.get_path(path), direct),
    }
}

/// `$eq` semantics: explicit null matches null; absent matches nothing.
fn slot_eq(slot: Slot<'_>, expected: &Value) -> bool {
    match (slot, expected) {
        (Slot::Null, Value::Null) => true,
        (Slot::Value(v), e) => v == e,
        _ => false,
    }
}

/// Ordered comparison applies to same-kind scalars only.
fn comparable(a: &Value, b: &Value) -> bool {
    matches!(
        (a, b),
        (Value::Number(_), Value::Number(_))
            | (Value::String(_), Value::String(_))
            | (Value::Bool(_), Value::Bool(_))
    )
}

fn apply_operator(
    entity: &Entity,
    path: &str,
    op: &str,
    arg: &Value,
    ctx: &FilterContext<'_>,
) -> bool {
    let slot = entity.get_path(path);

    match op {
        "$eq" => slot_eq(slot, arg),
        "$ne" => !slot_eq(slot, arg),

        "$gt" | "$gte" | "$lt" | "$lte" => {
            let Some(value) = slot.as_value() else {
                return false;
            };
            if !comparable(value, arg) {
                return false;
            }
            let ordering = compare_values(value, arg);
            match op {
                "$gt" => ordering.is_gt(),
                "$gte" => ordering.is_ge(),
                "$lt" => ordering.is_lt(),
                _ => ordering.is_le(),
            }
        }

        "$startsWith" => string_op(slot, arg, |s, needle| s.starts_with(needle)),
        "$endsWith" => string_op(slot, arg, |s, needle| s.ends_with(needle)),

        "$contains" => match slot.as_value() {
            Some(Value::String(s)) => arg.as_str().is_some_and(|needle| s.contains(needle)),
            Some(Value::Array(items)) => items.contains(arg),
            _ => false,
        },

        "$in" => in_matches(slot, arg),
        "$nin" => !in_matches(slot, arg),

        "$all" => match (slot.as_value(), arg) {
            (Some(Value::Array(items)), Value::Array(wanted)) => {
                wanted.iter().all(|w| items.contains(w))
            }
            _ => false,
        },

        "$size" => match (slot.as_value(), arg.as_u64()) {
            (Some(Value::Array(items)), Some(n)) => items.len() as u64 == n,
            _ => false,
        },

        "$search" => search_clause_matches(entity, arg, Some(path), ctx),

        _ => custom_operator(slot, op, arg, ctx),
    }
}

fn string_op(slot: Slot<'_>, arg: &Value, op: impl Fn(&str, &str) -> bool) -> bool {
    match (slot.as_value().and_then(Value::as_str), arg.as_str()) {
        (Some(s), Some(needle)) => op(s, needle),
        _ => false,
    }
}

fn in_matches(slot: Slot<'_>, arg: &Value) -> bool {
    let Some(candidates) = arg.as_array() else {
        return false;
    };
    match slot {
        Slot::Value(v) => candidates.contains(v),
        Slot::Null => candidates.contains(&Value::Null),
        Slot::Absent => false,
    }
}

/// Custom operators apply only when the field's observed type is in the
/// operator's declared list; otherwise the clause is silently ignored.
fn custom_operator(slot: Slot<'_>, op: &str, arg: &Value, ctx: &FilterContext<'_>) -> bool {
    let Some(operator) = ctx.operators.get(op) else {
        // Unknown operator: ignored rather than failing the element.
        return true;
    };
    let observed = match slot {
        Slot::Value(v) => ValueType::of(v),
        Slot::Null => ValueType::Null,
        Slot::Absent => return true,
    };
    if !operator.value_types().contains(&observed) {
        return true;
    }
    let value = slot.present().unwrap_or(&Value::Null);
    operator.evaluate(value, arg)
}

fn search_clause_matches(
    entity: &Entity,
    operand: &Value,
    field_scope: Option<&str>,
    ctx: &FilterContext<'_>,
) -> bool {
    let Some(clause) = search::parse_clause(operand) else {
        return false;
    };
    let fields: Vec<String> = match (&clause.fields, field_scope) {
        (Some(fields), _) => fields.clone(),
        (None, Some(field)) => vec![field.to_owned()],
        (None, None) => ctx.search_fields.to_vec(),
    };
    search::matches(entity, &clause.tokens(), &fields)
}

fn relation_matches(
    entity: &Entity,
    name: &str,
    kind: RelationKind,
    operand: &Value,
    relations: &dyn RelationAccess,
    ctx: &FilterContext<'_>,
) -> bool {
    let target_access = relations.target_access(name);
    let sub_ctx = FilterContext {
        operators: ctx.operators,
        relations: target_access.as_deref(),
        search_fields: &[],
    };

    match kind {
        RelationKind::Ref => match relations.ref_target(name, entity) {
            Some(target) => matches(&target, operand, &sub_ctx),
            None => false,
        },
        RelationKind::Inverse => {
            let targets = relations.inverse_targets(name, entity);
            let Some(quantifiers) = operand.as_object() else {
                return false;
            };
            quantifiers.iter().all(|(quantifier, sub)| match quantifier.as_str() {
                "$some" => targets.iter().any(|t| matches(t, sub, &sub_ctx)),
                "$every" => targets.iter().all(|t| matches(t, sub, &sub_ctx)),
                "$none" => !targets.iter().any(|t| matches(t, sub, &sub_ctx)),
                _ => true,
            })
        }
    }
}
