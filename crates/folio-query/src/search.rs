//! `$search` clause parsing, matching, and relevance scoring.
//!
//! Matching: every query token must have an exact or prefix match among
//! the tokens of the searched fields. Scoring: per field and query token,
//! an exact match contributes [`EXACT_BOOST`] and a prefix match
//! [`PREFIX_BOOST`]; scores are ephemeral annotations that drive the
//! automatic relevance sort.

use serde_json::Value;

use folio_core::entity::Entity;
use folio_core::tokenize::tokenize;

/// Score contribution of an exact token match.
pub const EXACT_BOOST: f64 = 2.0;
/// Score contribution of a prefix token match.
pub const PREFIX_BOOST: f64 = 1.0;

/// A parsed `$search` clause.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchClause {
    /// The raw query text.
    pub query: String,
    /// Explicit field list; `None` falls back to the collection's search
    /// index fields.
    pub fields: Option<Vec<String>>,
}

impl SearchClause {
    /// The query's token set.
    pub fn tokens(&self) -> Vec<String> {
        tokenize(&self.query)
    }
}

/// Parses a `$search` operand: either a bare string or
/// `{query, fields?}`.
pub fn parse_clause(operand: &Value) -> Option<SearchClause> {
    match operand {
        Value::String(query) => Some(SearchClause {
            query: query.clone(),
            fields: None,
        }),
        Value::Object(map) => {
            let query = map.get("query")?.as_str()?.to_owned();
            let fields = map.get("fields").and_then(Value::as_array).map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            });
            Some(SearchClause { query, fields })
        }
        _ => None,
    }
}

/// Finds the `$search` clause participating in a where document: either
/// top-level `$search` or a field-level `{field: {$search: ...}}` (which
/// scopes the search to that field).
pub fn extract_clause(filter: &Value) -> Option<SearchClause> {
    let map = filter.as_object()?;

    if let Some(operand) = map.get("$search") {
        return parse_clause(operand);
    }

    for (field, operand) in map {
        if field.starts_with('$') {
            // Look inside $and arms so a search combined with other
            // clauses still gets scored.
            if field == "$and" {
                if let Some(arms) = operand.as_array() {
                    for arm in arms {
                        if let Some(clause) = extract_clause(arm) {
                            return Some(clause);
                        }
                    }
                }
            }
            continue;
        }
        if let Some(ops) = operand.as_object() {
            if let Some(inner) = ops.get("$search") {
                let mut clause = parse_clause(inner)?;
                if clause.fields.is_none() {
                    clause.fields = Some(vec![field.clone()]);
                }
                return Some(clause);
            }
        }
    }
    None
}

/// Tokens of one entity field (absent or non-string resolves empty).
fn field_tokens(entity: &Entity, path: &str) -> Vec<String> {
    entity
        .get_path(path)
        .as_value()
        .and_then(Value::as_str)
        .map(tokenize)
        .unwrap_or_default()
}

/// Whether every query token has an exact or prefix match in some field.
pub fn matches(entity: &Entity, query_tokens: &[String], fields: &[String]) -> bool {
    if query_tokens.is_empty() {
        return true;
    }
    if fields.is_empty() {
        return false;
    }
    let entity_tokens: Vec<String> = fields
        .iter()
        .flat_map(|f| field_tokens(entity, f))
        .collect();
    query_tokens
        .iter()
        .all(|qt| entity_tokens.iter().any(|et| et == qt || et.starts_with(qt.as_str())))
}

/// Relevance score: summed per field and query token, exact beating prefix.
pub fn score(entity: &Entity, query_tokens: &[String], fields: &[String]) -> f64 {
    let mut total = 0.0;
    for field in fields {
        let tokens = field_tokens(entity, field);
        for qt in query_tokens {
            if tokens.iter().any(|et| et == qt) {
                total += EXACT_BOOST;
            } else if tokens.iter().any(|et| et.starts_with(qt.as_str())) {
                total += PREFIX_BOOST;
            }
        }
    }
    total
}
