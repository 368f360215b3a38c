//! Projection (`select`).
//!
//! Either an ordered list of field paths or a nested `{field: true |
//! nested}` tree. Only listed fields survive. Populated relationship
//! values (entities or arrays of entities) project like any other object
//! or array of objects.

use serde_json::{Map, Value};

use folio_core::entity::Entity;

use crate::config::Select;

/// Projects one entity through a select.
pub fn project(entity: &Entity, select: &Select) -> Entity {
    match select {
        Select::List(paths) => project_list(entity, paths),
        Select::Tree(tree) => Entity::from_map(project_tree(entity.as_map(), tree)),
    }
}

fn project_list(entity: &Entity, paths: &[String]) -> Entity {
    let mut out = Entity::new();
    for path in paths {
        if let Some(value) = entity.get_path(path).present() {
            out.set_path(path, value.clone());
        }
    }
    out
}

fn project_tree(source: &Map<String, Value>, tree: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (field, spec) in tree {
        let Some(value) = source.get(field) else {
            continue;
        };
        match spec {
            Value::Bool(true) => {
                out.insert(field.clone(), value.clone());
            }
            Value::Object(nested) => match value {
                Value::Object(inner) => {
                    out.insert(field.clone(), Value::Object(project_tree(inner, nested)));
                }
                Value::Array(items) => {
                    let projected: Vec<Value> = items
                        .iter()
                        .map(|item| match item {
                            Value::Object(inner) => Value::Object(project_tree(inner, nested)),
                            other => other.clone(),
                        })
                        .collect();
                    out.insert(field.clone(), Value::Array(projected));
                }
                _ => {}
            },
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn entity(v: Value) -> Entity {
        Entity::from_value(v).unwrap()
    }

    #[test]
    fn list_keeps_listed_fields_in_order() {
        let e = entity(json!({"id": "1", "title": "Dune", "year": 1965, "genre": "sf"}));
        let projected = project(&e, &Select::List(vec!["title".into(), "year".into()]));
        assert_eq!(projected.to_value(), json!({"title": "Dune", "year": 1965}));
    }

    #[test]
    fn list_supports_dot_paths() {
        let e = entity(json!({"id": "1", "meta": {"rating": 5, "source": "x"}}));
        let projected = project(&e, &Select::List(vec!["meta.rating".into()]));
        assert_eq!(projected.to_value(), json!({"meta": {"rating": 5}}));
    }

    #[test]
    fn list_keeps_explicit_null_drops_absent() {
        let e = entity(json!({"id": "1", "n": null}));
        let projected = project(&e, &Select::List(vec!["n".into(), "missing".into()]));
        assert_eq!(projected.to_value(), json!({"n": null}));
    }

    #[test]
    fn tree_true_keeps_subtree() {
        let e = entity(json!({"id": "1", "meta": {"rating": 5}, "title": "Dune"}));
        let projected = project(
            &e,
            &Select::Tree(json!({"meta": true}).as_object().unwrap().clone()),
        );
        assert_eq!(projected.to_value(), json!({"meta": {"rating": 5}}));
    }

    #[test]
    fn tree_nested_recurses() {
        let e = entity(json!({"id": "1", "meta": {"rating": 5, "source": "x"}}));
        let projected = project(
            &e,
            &Select::Tree(json!({"meta": {"rating": true}}).as_object().unwrap().clone()),
        );
        assert_eq!(projected.to_value(), json!({"meta": {"rating": 5}}));
    }

    #[test]
    fn tree_projects_arrays_of_objects() {
        // The shape of a populated inverse relation.
        let e = entity(json!({
            "id": "1",
            "reviews": [
                {"id": "r1", "stars": 5, "body": "long"},
                {"id": "r2", "stars": 2, "body": "short"}
            ]
        }));
        let projected = project(
            &e,
            &Select::Tree(json!({"reviews": {"stars": true}}).as_object().unwrap().clone()),
        );
        assert_eq!(
            projected.to_value(),
            json!({"reviews": [{"stars": 5}, {"stars": 2}]})
        );
    }
}
