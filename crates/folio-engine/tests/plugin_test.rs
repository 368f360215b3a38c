//! End-to-end tests of the plugin surface: custom codecs, filter
//! operators, id generators, and global hooks installed at construction.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use folio_core::error::{FolioError, PluginFault};
use folio_engine::{
    Codec, CollectionConfig, Database, DatabaseConfig, DocumentSchema, FieldType, FilterOperator,
    IdGenerator, MemAdapter, Plugin, QueryConfig, StorageAdapter,
};
use folio_query::ValueType;

// ---------------------------------------------------------------------------
// Custom codec
// ---------------------------------------------------------------------------

/// A trivial uppercase-JSON-keys codec standing in for a real custom
/// format: encodes as JSON wrapped in a recognizable banner line.
#[derive(Debug)]
struct BannerCodec;

impl Codec for BannerCodec {
    fn name(&self) -> &str {
        "banner"
    }

    fn extensions(&self) -> Vec<String> {
        vec!["bnr".into()]
    }

    fn encode(&self, value: &Value) -> folio_core::error::Result<String> {
        let body = serde_json::to_string_pretty(value)
            .map_err(|e| FolioError::serialization("banner", e.to_string()))?;
        Ok(format!("### banner v1\n{body}\n"))
    }

    fn decode(&self, text: &str) -> folio_core::error::Result<Value> {
        let body = text
            .strip_prefix("### banner v1\n")
            .ok_or_else(|| FolioError::serialization("banner", "missing banner header"))?;
        serde_json::from_str(body).map_err(|e| FolioError::serialization("banner", e.to_string()))
    }
}

#[test]
fn plugin_codec_persists_collections() {
    let adapter = Arc::new(MemAdapter::new());
    let config = || {
        DatabaseConfig::new()
            .adapter(Arc::clone(&adapter) as Arc<dyn StorageAdapter>)
            .plugin(Plugin::new("banner-format").codec(Arc::new(BannerCodec)))
            .collection(
                CollectionConfig::new(
                    "notes",
                    DocumentSchema::new().field("body", FieldType::String).into_ref(),
                )
                .file("data/notes.bnr"),
            )
    };

    {
        let db = Database::open(config()).unwrap();
        db.collection("notes")
            .unwrap()
            .create(json!({"id": "n1", "body": "written through a plugin codec"}))
            .unwrap();
        db.flush().unwrap();
    }

    let text = adapter.contents(std::path::Path::new("data/notes.bnr")).unwrap();
    assert!(text.starts_with("### banner v1\n"));

    let reopened = Database::open(config()).unwrap();
    let note = reopened
        .collection("notes")
        .unwrap()
        .find_by_id("n1")
        .unwrap()
        .unwrap();
    assert_eq!(note.get("body"), Some(&json!("written through a plugin codec")));
}

// ---------------------------------------------------------------------------
// Custom operator
// ---------------------------------------------------------------------------

struct DivisibleBy;

impl FilterOperator for DivisibleBy {
    fn name(&self) -> &str {
        "$divisibleBy"
    }

    fn value_types(&self) -> Vec<ValueType> {
        vec![ValueType::Number]
    }

    fn evaluate(&self, field_value: &Value, operand: &Value) -> bool {
        match (field_value.as_i64(), operand.as_i64()) {
            (Some(v), Some(d)) if d != 0 => v % d == 0,
            _ => false,
        }
    }
}

fn numbers_db() -> Database {
    Database::open(
        DatabaseConfig::new()
            .adapter(Arc::new(MemAdapter::new()))
            .plugin(Plugin::new("math").operator(Arc::new(DivisibleBy)))
            .collection(CollectionConfig::new(
                "numbers",
                DocumentSchema::new()
                    .field("n", FieldType::Integer)
                    .optional("label", FieldType::String)
                    .into_ref(),
            )),
    )
    .unwrap()
}

#[test]
fn plugin_operator_usable_in_where() {
    let db = numbers_db();
    let numbers = db.collection("numbers").unwrap();
    for n in 1..=10 {
        numbers.create(json!({"id": format!("n{n}"), "n": n})).unwrap();
    }

    let found = numbers
        .find(&QueryConfig::new().filter(json!({"n": {"$divisibleBy": 3}})))
        .unwrap();
    let values: Vec<i64> = found.iter().filter_map(|e| e.get("n")?.as_i64()).collect();
    assert_eq!(values, [3, 6, 9]);
}

#[test]
fn plugin_operator_ignored_for_other_types() {
    let db = numbers_db();
    let numbers = db.collection("numbers").unwrap();
    numbers
        .create(json!({"id": "x", "n": 5, "label": "five"}))
        .unwrap();

    // The operator declares Number; on a string field the clause is
    // silently ignored and the entity passes.
    let found = numbers
        .find(&QueryConfig::new().filter(json!({"label": {"$divisibleBy": 3}})))
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[test]
fn conflicting_operator_fails_construction() {
    let err = Database::open(
        DatabaseConfig::new()
            .adapter(Arc::new(MemAdapter::new()))
            .plugin(Plugin::new("math").operator(Arc::new(DivisibleBy)))
            .plugin(Plugin::new("more-math").operator(Arc::new(DivisibleBy))),
    )
    .unwrap_err();
    assert_eq!(err.plugin_fault(), Some(PluginFault::OperatorConflict));
}

// ---------------------------------------------------------------------------
// Custom id generator
// ---------------------------------------------------------------------------

struct SequentialIds {
    next: AtomicU64,
}

impl IdGenerator for SequentialIds {
    fn generate(&self, collection: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        format!("{collection}-{n:04}")
    }
}

#[test]
fn plugin_id_generator_selected_per_collection() {
    let db = Database::open(
        DatabaseConfig::new()
            .adapter(Arc::new(MemAdapter::new()))
            .plugin(Plugin::new("seq").id_generator(
                "sequential",
                Arc::new(SequentialIds { next: AtomicU64::new(1) }),
            ))
            .collection(
                CollectionConfig::new(
                    "tickets",
                    DocumentSchema::new().field("title", FieldType::String).into_ref(),
                )
                .id_generator("sequential"),
            ),
    )
    .unwrap();

    let tickets = db.collection("tickets").unwrap();
    let first = tickets.create(json!({"title": "a"})).unwrap();
    let second = tickets.create(json!({"title": "b"})).unwrap();
    assert_eq!(first.id(), Some("tickets-0001"));
    assert_eq!(second.id(), Some("tickets-0002"));

    // An explicit id still wins over the generator.
    let explicit = tickets.create(json!({"id": "t-custom", "title": "c"})).unwrap();
    assert_eq!(explicit.id(), Some("t-custom"));
}

#[test]
fn unresolved_id_generator_fails_construction() {
    let err = Database::open(
        DatabaseConfig::new()
            .adapter(Arc::new(MemAdapter::new()))
            .collection(
                CollectionConfig::new(
                    "tickets",
                    DocumentSchema::new().field("title", FieldType::String).into_ref(),
                )
                .id_generator("missing"),
            ),
    )
    .unwrap_err();
    assert_eq!(err.plugin_fault(), Some(PluginFault::MissingIdGenerator));
}

// ---------------------------------------------------------------------------
// Dependencies and lifecycle
// ---------------------------------------------------------------------------

#[test]
fn missing_dependency_fails_construction() {
    let err = Database::open(
        DatabaseConfig::new()
            .adapter(Arc::new(MemAdapter::new()))
            .plugin(Plugin::new("extension").depends_on("base")),
    )
    .unwrap_err();
    assert_eq!(err.plugin_fault(), Some(PluginFault::MissingDependencies));
}

#[test]
fn failing_initialize_aborts_construction() {
    let err = Database::open(
        DatabaseConfig::new()
            .adapter(Arc::new(MemAdapter::new()))
            .plugin(
                Plugin::new("broken")
                    .on_initialize(|| Err(FolioError::Operation("no license".into()))),
            )
            .collection(CollectionConfig::new(
                "notes",
                DocumentSchema::new().field("body", FieldType::String).into_ref(),
            )),
    )
    .unwrap_err();
    assert!(matches!(err, FolioError::Plugin { .. }));
}

#[test]
fn shutdown_callbacks_run() {
    static CLOSED: AtomicU64 = AtomicU64::new(0);

    let db = Database::open(
        DatabaseConfig::new()
            .adapter(Arc::new(MemAdapter::new()))
            .plugin(Plugin::new("audit").on_shutdown(|| {
                CLOSED.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })),
    )
    .unwrap();

    db.shutdown().unwrap();
    assert_eq!(CLOSED.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Relationship filters through the engine
// ---------------------------------------------------------------------------

#[test]
fn relation_filters_recurse_and_quantify() {
    let db = Database::open(
        DatabaseConfig::new()
            .adapter(Arc::new(MemAdapter::new()))
            .collection(
                CollectionConfig::new(
                    "authors",
                    DocumentSchema::new()
                        .field("name", FieldType::String)
                        .optional("country", FieldType::String)
                        .into_ref(),
                )
                .relation(folio_engine::Relation::inverse_of(
                    "books",
                    "books",
                    "authorId",
                    folio_engine::CascadePolicy::Restrict,
                )),
            )
            .collection(
                CollectionConfig::new(
                    "books",
                    DocumentSchema::new()
                        .field("title", FieldType::String)
                        .optional("year", FieldType::Integer)
                        .optional("authorId", FieldType::String)
                        .into_ref(),
                )
                .relation(folio_engine::Relation::ref_to("author", "authorId", "authors")),
            ),
    )
    .unwrap();

    let authors = db.collection("authors").unwrap();
    let books = db.collection("books").unwrap();

    authors.create(json!({"id": "a1", "name": "Ursula K. Le Guin", "country": "US"})).unwrap();
    authors.create(json!({"id": "a2", "name": "Stanisław Lem", "country": "PL"})).unwrap();
    books.create(json!({"id": "b1", "title": "The Dispossessed", "year": 1974, "authorId": "a1"})).unwrap();
    books.create(json!({"id": "b2", "title": "Solaris", "year": 1961, "authorId": "a2"})).unwrap();
    books.create(json!({"id": "b3", "title": "The Lathe of Heaven", "year": 1971, "authorId": "a1"})).unwrap();

    // Ref relation: recurse into the target entity.
    let found = books
        .find(&QueryConfig::new().filter(json!({"author": {"country": "PL"}})))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), Some("b2"));

    // Inverse relation: quantifiers over the dependents.
    let found = authors
        .find(&QueryConfig::new().filter(json!({"books": {"$some": {"year": {"$gt": 1970}}}})))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), Some("a1"));

    let found = authors
        .find(&QueryConfig::new().filter(json!({"books": {"$every": {"year": {"$lt": 1975}}}})))
        .unwrap();
    assert_eq!(found.len(), 2);

    let found = authors
        .find(&QueryConfig::new().filter(json!({"books": {"$none": {"year": 1961}}})))
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), Some("a1"));
}
