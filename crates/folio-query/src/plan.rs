//! Candidate-resolution planning.
//!
//! The planner inspects a where document for clauses an index could answer
//! (equality, range, `$in`, `$search`) and reports them as leaves. The
//! engine intersects the id sets of leaves it actually has indexes for and
//! unions `$or` arms; everything else stays with the residual filter. A
//! clause over an excluded path (computed fields, relation names) is never
//! claimed.

use serde_json::{Map, Value};

use crate::search::{self, SearchClause};

/// A range bound.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Bound {
    #[default]
    Unbounded,
    Included(Value),
    Excluded(Value),
}

/// One index-answerable clause.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanLeaf {
    /// Equality on a field path.
    Eq { path: String, value: Value },
    /// Ordered range on a field path.
    Range {
        path: String,
        lower: Bound,
        upper: Bound,
    },
    /// `$in` on a field path (a union of equalities).
    In { path: String, values: Vec<Value> },
    /// `$search` against the search index.
    Search(SearchClause),
}

impl PlanLeaf {
    /// The field path a leaf constrains, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Eq { path, .. } | Self::Range { path, .. } | Self::In { path, .. } => {
                Some(path)
            }
            Self::Search(_) => None,
        }
    }
}

/// The index-answerable portion of a where document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    /// Conjunctive leaves: candidates are the intersection of their id
    /// sets.
    pub all: Vec<PlanLeaf>,
    /// A top-level `$or` whose arms were all plannable: candidates from
    /// this part are the union of each arm's intersection.
    pub any: Option<Vec<Vec<PlanLeaf>>>,
}

impl QueryPlan {
    /// Returns `true` when nothing was plannable and the engine must scan.
    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.any.is_none()
    }
}

/// Only scalar values become index keys.
fn is_scalar(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_)
    )
}

/// Builds the plan for a where document.
///
/// `excluded` lists path heads the planner must never claim: computed
/// field names and relation names.
pub fn plan(filter: Option<&Value>, excluded: &[String]) -> QueryPlan {
    let mut out = QueryPlan::default();
    let Some(Value::Object(map)) = filter else {
        return out;
    };
    collect(map, excluded, &mut out.all, &mut out.any, true);
    out
}

fn is_excluded(path: &str, excluded: &[String]) -> bool {
    let head = path.split('.').next().unwrap_or(path);
    excluded.iter().any(|e| e == head)
}

fn collect(
    map: &Map<String, Value>,
    excluded: &[String],
    all: &mut Vec<PlanLeaf>,
    any: &mut Option<Vec<Vec<PlanLeaf>>>,
    top_level: bool,
) {
    for (key, operand) in map {
        match key.as_str() {
            "$and" => {
                if let Some(arms) = operand.as_array() {
                    for arm in arms {
                        if let Some(arm_map) = arm.as_object() {
                            collect(arm_map, excluded, all, any, top_level);
                        }
                    }
                }
            }
            "$or" if top_level => {
                if let Some(arms) = operand.as_array() {
                    if let Some(groups) = plan_or(arms, excluded) {
                        // Only the first $or contributes candidates; any
                        // further one stays with the residual filter.
                        if any.is_none() {
                            *any = Some(groups);
                        }
                    }
                }
            }
            "$search" => {
                if let Some(clause) = search::parse_clause(operand) {
                    all.push(PlanLeaf::Search(clause));
                }
            }
            "$or" | "$not" => {}
            _ => {
                if !is_excluded(key, excluded) {
                    collect_field(key, operand, all);
                }
            }
        }
    }
}

/// Plans one `$or`: usable only when every arm contributes at least one
/// leaf, otherwise the union cannot bound the candidate set.
fn plan_or(arms: &[Value], excluded: &[String]) -> Option<Vec<Vec<PlanLeaf>>> {
    let mut groups = Vec::with_capacity(arms.len());
    for arm in arms {
        let arm_map = arm.as_object()?;
        let mut leaves = Vec::new();
        let mut nested_any = None;
        collect(arm_map, excluded, &mut leaves, &mut nested_any, false);
        if leaves.is_empty() {
            return None;
        }
        groups.push(leaves);
    }
    Some(groups)
}

fn collect_field(path: &str, operand: &Value, all: &mut Vec<PlanLeaf>) {
    match operand {
        Value::Object(ops) => {
            if ops.keys().any(|k| k.starts_with('$')) {
                collect_operators(path, ops, all);
            } else {
                // Nested equality object: flatten to dot-paths.
                for (field, sub) in ops {
                    collect_field(&format!("{path}.{field}"), sub, all);
                }
            }
        }
        direct if is_scalar(direct) => all.push(PlanLeaf::Eq {
            path: path.to_owned(),
            value: direct.clone(),
        }),
        _ => {}
    }
}

fn collect_operators(path: &str, ops: &Map<String, Value>, all: &mut Vec<PlanLeaf>) {
    let mut lower = Bound::Unbounded;
    let mut upper = Bound::Unbounded;

    for (op, arg) in ops {
        match op.as_str() {
            "$eq" if is_scalar(arg) => all.push(PlanLeaf::Eq {
                path: path.to_owned(),
                value: arg.clone(),
            }),
            "$gt" if is_scalar(arg) => lower = Bound::Excluded(arg.clone()),
            "$gte" if is_scalar(arg) => lower = Bound::Included(arg.clone()),
            "$lt" if is_scalar(arg) => upper = Bound::Excluded(arg.clone()),
            "$lte" if is_scalar(arg) => upper = Bound::Included(arg.clone()),
            "$in" => {
                if let Some(values) = arg.as_array() {
                    if values.iter().all(is_scalar) {
                        all.push(PlanLeaf::In {
                            path: path.to_owned(),
                            values: values.clone(),
                        });
                    }
                }
            }
            "$search" => {
                if let Some(mut clause) = search::parse_clause(arg) {
                    if clause.fields.is_none() {
                        clause.fields = Some(vec![path.to_owned()]);
                    }
                    all.push(PlanLeaf::Search(clause));
                }
            }
            _ => {}
        }
    }

    if lower != Bound::Unbounded || upper != Bound::Unbounded {
        all.push(PlanLeaf::Range {
            path: path.to_owned(),
            lower,
            upper,
        });
    }
}
