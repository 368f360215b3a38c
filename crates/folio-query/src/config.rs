//! Query configuration: where, sort, select, populate, and pagination.

use serde_json::{Map, Value};

use folio_core::error::{FolioError, Result};

/// Sort direction for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    /// Parses `"asc"`/`"desc"` (any case).
    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

/// Projection: either an ordered field list or a nested selection tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Select {
    /// Ordered list of field paths to keep.
    List(Vec<String>),
    /// `{field: true | nested}` tree; `true` keeps the subtree, a nested
    /// object recurses.
    Tree(Map<String, Value>),
}

/// A composed query over one collection.
///
/// `cursor` is mutually exclusive with `limit`/`offset`; the conflict is
/// rejected when the query runs.
#[derive(Debug, Clone, Default)]
pub struct QueryConfig {
    /// The where document (see the filter module for the operator language).
    pub filter: Option<Value>,
    /// Multi-key sort: ordered `(path, direction)` pairs.
    pub sort: Vec<(String, SortDirection)>,
    /// Projection of the result entities.
    pub select: Option<Select>,
    /// Relationship names to populate on each result.
    pub populate: Vec<String>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Results to skip before taking `limit`.
    pub offset: Option<usize>,
    /// Opaque continuation token from a previous page.
    pub cursor: Option<String>,
}

impl QueryConfig {
    /// An empty query (matches everything, insertion order).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the where document.
    pub fn filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Appends a sort key.
    pub fn sort(mut self, path: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((path.into(), direction));
        self
    }

    /// Sets a field-list projection.
    pub fn select_fields(mut self, fields: &[&str]) -> Self {
        self.select = Some(Select::List(fields.iter().map(|f| (*f).to_owned()).collect()));
        self
    }

    /// Sets a nested-tree projection.
    pub fn select_tree(mut self, tree: Value) -> Self {
        if let Value::Object(map) = tree {
            self.select = Some(Select::Tree(map));
        }
        self
    }

    /// Requests a relationship be populated.
    pub fn populate(mut self, relation: impl Into<String>) -> Self {
        self.populate.push(relation.into());
        self
    }

    /// Caps the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips leading results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Continues from a cursor returned by a previous page.
    pub fn cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// Rejects configs that combine cursor with limit/offset.
    pub fn check_pagination(&self) -> Result<()> {
        if self.cursor.is_some() && (self.limit.is_some() || self.offset.is_some()) {
            return Err(FolioError::validation(
                "cursor is mutually exclusive with limit/offset",
            ));
        }
        Ok(())
    }

    /// Parses a `{"field": "asc"|"desc", ...}` document into sort keys,
    /// preserving key order.
    pub fn sort_from_value(mut self, sort: &Value) -> Self {
        if let Value::Object(map) = sort {
            for (path, dir) in map {
                let direction = dir
                    .as_str()
                    .and_then(SortDirection::parse)
                    .unwrap_or_default();
                self.sort.push((path.clone(), direction));
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_accumulates() {
        let q = QueryConfig::new()
            .filter(json!({"genre": "sci-fi"}))
            .sort("year", SortDirection::Desc)
            .limit(2);
        assert!(q.filter.is_some());
        assert_eq!(q.sort, vec![("year".to_owned(), SortDirection::Desc)]);
        assert_eq!(q.limit, Some(2));
        assert!(q.check_pagination().is_ok());
    }

    #[test]
    fn cursor_excludes_limit_offset() {
        let q = QueryConfig::new().cursor("abc").limit(3);
        assert!(q.check_pagination().is_err());
        let q = QueryConfig::new().cursor("abc").offset(1);
        assert!(q.check_pagination().is_err());
        let q = QueryConfig::new().cursor("abc");
        assert!(q.check_pagination().is_ok());
    }

    #[test]
    fn sort_from_value_preserves_order() {
        let q = QueryConfig::new().sort_from_value(&json!({"year": "asc", "title": "desc"}));
        assert_eq!(
            q.sort,
            vec![
                ("year".to_owned(), SortDirection::Asc),
                ("title".to_owned(), SortDirection::Desc)
            ]
        );
    }

    #[test]
    fn select_tree_ignores_non_objects() {
        let q = QueryConfig::new().select_tree(json!(["a"]));
        assert!(q.select.is_none());
    }
}
