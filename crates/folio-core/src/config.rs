//! Collection configuration: schema, relationships, indexes, hooks,
//! computed fields, persistence settings, and migrations.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::entity::{Entity, EntityMap};
use crate::error::Result;
use crate::relation::Relation;
use crate::schema::SchemaRef;

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

/// Runs before a create/update commits; may transform the pending payload.
pub type BeforeHook = Arc<dyn Fn(&mut Entity) -> Result<()> + Send + Sync>;

/// Runs before a delete commits; returning an error vetoes the delete.
pub type DeleteGuard = Arc<dyn Fn(&Entity) -> Result<()> + Send + Sync>;

/// Observes a committed entity after the mutation applied.
pub type AfterHook = Arc<dyn Fn(&Entity) + Send + Sync>;

/// The hook chains for one collection (or the plugin-global set).
///
/// Within each chain, hooks run in registration order; global hooks run
/// before collection-local ones.
#[derive(Clone, Default)]
pub struct HookSet {
    pub before_create: Vec<BeforeHook>,
    pub after_create: Vec<AfterHook>,
    pub before_update: Vec<BeforeHook>,
    pub after_update: Vec<AfterHook>,
    pub before_delete: Vec<DeleteGuard>,
    pub after_delete: Vec<AfterHook>,
}

impl HookSet {
    /// Creates an empty hook set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends every chain of `other` after the chains of `self`.
    pub fn extend(&mut self, other: &HookSet) {
        self.before_create.extend(other.before_create.iter().cloned());
        self.after_create.extend(other.after_create.iter().cloned());
        self.before_update.extend(other.before_update.iter().cloned());
        self.after_update.extend(other.after_update.iter().cloned());
        self.before_delete.extend(other.before_delete.iter().cloned());
        self.after_delete.extend(other.after_delete.iter().cloned());
    }

    /// Returns `true` if no hook is registered.
    pub fn is_empty(&self) -> bool {
        self.before_create.is_empty()
            && self.after_create.is_empty()
            && self.before_update.is_empty()
            && self.after_update.is_empty()
            && self.before_delete.is_empty()
            && self.after_delete.is_empty()
    }
}

impl fmt::Debug for HookSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookSet")
            .field("before_create", &self.before_create.len())
            .field("after_create", &self.after_create.len())
            .field("before_update", &self.before_update.len())
            .field("after_update", &self.after_update.len())
            .field("before_delete", &self.before_delete.len())
            .field("after_delete", &self.after_delete.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Indexes and computed fields
// ---------------------------------------------------------------------------

/// A declared secondary index over one or more field paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Ordered field paths (dot-paths allowed); length > 1 makes the index
    /// compound.
    pub fields: Vec<String>,
    /// A unique index maps each key to at most one id.
    pub unique: bool,
}

impl IndexSpec {
    /// A non-unique index over the given field paths.
    pub fn on(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
            unique: false,
        }
    }

    /// A unique index over the given field paths.
    pub fn unique_on(fields: &[&str]) -> Self {
        Self {
            fields: fields.iter().map(|f| (*f).to_owned()).collect(),
            unique: true,
        }
    }

    /// Canonical index name: joined field paths.
    pub fn name(&self) -> String {
        self.fields.join("+")
    }

    /// Returns `true` for a single-field index over exactly `field`.
    pub fn covers_single(&self, field: &str) -> bool {
        self.fields.len() == 1 && self.fields[0] == field
    }
}

/// A query-time derived field. Computed fields never participate in indexes.
#[derive(Clone)]
pub struct ComputedField {
    /// The name the field is visible under in results and filters.
    pub name: String,
    /// Derives the value from the stored entity.
    pub compute: Arc<dyn Fn(&Entity) -> Value + Send + Sync>,
}

impl ComputedField {
    /// Declares a computed field.
    pub fn new(
        name: impl Into<String>,
        compute: impl Fn(&Entity) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            compute: Arc::new(compute),
        }
    }
}

impl fmt::Debug for ComputedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedField").field("name", &self.name).finish()
    }
}

// ---------------------------------------------------------------------------
// Migrations
// ---------------------------------------------------------------------------

/// One single-step schema migration `from → from + 1`.
///
/// The transform receives the full id → entity map and returns the upgraded
/// map. A returned error aborts the load and leaves the on-disk file
/// untouched.
#[derive(Clone)]
pub struct Migration {
    /// Source version.
    pub from: u32,
    /// Target version; must be `from + 1`.
    pub to: u32,
    /// Optional human-readable description, reported by dry runs.
    pub description: Option<String>,
    /// The map transform.
    pub transform: Arc<dyn Fn(EntityMap) -> std::result::Result<EntityMap, String> + Send + Sync>,
}

impl Migration {
    /// Declares a migration step.
    pub fn step(
        from: u32,
        transform: impl Fn(EntityMap) -> std::result::Result<EntityMap, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            from,
            to: from + 1,
            description: None,
            transform: Arc::new(transform),
        }
    }

    /// Attaches a description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("description", &self.description)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Collection config
// ---------------------------------------------------------------------------

/// Everything the engine needs to own one collection.
#[derive(Clone)]
pub struct CollectionConfig {
    /// The collection name (unique within the database).
    pub name: String,
    /// The schema every committed entity must satisfy.
    pub schema: SchemaRef,
    /// Relationship descriptors.
    pub relations: Vec<Relation>,
    /// Secondary/unique/compound index declarations.
    pub indexes: Vec<IndexSpec>,
    /// String-valued field paths feeding the inverted search index.
    pub search_fields: Vec<String>,
    /// Query-time computed fields.
    pub computed: Vec<ComputedField>,
    /// Collection-local hooks.
    pub hooks: HookSet,
    /// Name of a plugin-provided id generator; `None` uses the built-in.
    pub id_generator: Option<String>,
    /// File the collection persists to; `None` keeps it memory-only.
    pub file_path: Option<PathBuf>,
    /// Configured schema version (files at lower versions are migrated).
    pub version: u32,
    /// The migration registry connecting version 0 to `version`.
    pub migrations: Vec<Migration>,
    /// Whether the engine stamps `createdAt`/`updatedAt`.
    pub timestamps: bool,
}

impl CollectionConfig {
    /// Creates a config with the given name and schema; everything else
    /// starts empty.
    pub fn new(name: impl Into<String>, schema: SchemaRef) -> Self {
        Self {
            name: name.into(),
            schema,
            relations: Vec::new(),
            indexes: Vec::new(),
            search_fields: Vec::new(),
            computed: Vec::new(),
            hooks: HookSet::new(),
            id_generator: None,
            file_path: None,
            version: 0,
            migrations: Vec::new(),
            timestamps: false,
        }
    }

    /// Adds a relationship.
    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    /// Adds an index declaration.
    pub fn index(mut self, spec: IndexSpec) -> Self {
        self.indexes.push(spec);
        self
    }

    /// Declares the search-index field list.
    pub fn search(mut self, fields: &[&str]) -> Self {
        self.search_fields = fields.iter().map(|f| (*f).to_owned()).collect();
        self
    }

    /// Adds a computed field.
    pub fn computed_field(mut self, field: ComputedField) -> Self {
        self.computed.push(field);
        self
    }

    /// Replaces the collection-local hook set.
    pub fn hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    /// Selects a plugin-provided id generator by name.
    pub fn id_generator(mut self, name: impl Into<String>) -> Self {
        self.id_generator = Some(name.into());
        self
    }

    /// Persists the collection at the given path.
    pub fn file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Sets the configured schema version.
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Registers a migration step.
    pub fn migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    /// Opts in to engine-stamped timestamps.
    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    /// Looks up a relation by name.
    pub fn relation_named(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name() == name)
    }

    /// Looks up a computed field by name.
    pub fn computed_named(&self, name: &str) -> Option<&ComputedField> {
        self.computed.iter().find(|c| c.name == name)
    }

    /// All ref relations (the ones carrying foreign keys on this entity).
    pub fn ref_relations(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.relations.iter().filter_map(|r| match r {
            Relation::Ref { name, field, target } => {
                Some((name.as_str(), field.as_str(), target.as_str()))
            }
            _ => None,
        })
    }
}

impl fmt::Debug for CollectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionConfig")
            .field("name", &self.name)
            .field("relations", &self.relations.len())
            .field("indexes", &self.indexes)
            .field("search_fields", &self.search_fields)
            .field("computed", &self.computed)
            .field("file_path", &self.file_path)
            .field("version", &self.version)
            .field("migrations", &self.migrations.len())
            .field("timestamps", &self.timestamps)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::CascadePolicy;
    use crate::schema::DocumentSchema;
    use serde_json::json;

    fn config() -> CollectionConfig {
        CollectionConfig::new("books", DocumentSchema::new().into_ref())
            .index(IndexSpec::on(&["genre"]))
            .index(IndexSpec::unique_on(&["isbn"]))
            .search(&["title", "author"])
            .relation(Relation::ref_to("author", "authorId", "authors"))
            .relation(Relation::inverse_of(
                "reviews",
                "reviews",
                "bookId",
                CascadePolicy::Cascade,
            ))
            .with_timestamps()
    }

    #[test]
    fn builder_accumulates() {
        let c = config();
        assert_eq!(c.indexes.len(), 2);
        assert!(c.indexes[1].unique);
        assert_eq!(c.search_fields, vec!["title", "author"]);
        assert!(c.timestamps);
    }

    #[test]
    fn relation_lookup() {
        let c = config();
        assert!(c.relation_named("author").is_some());
        assert!(c.relation_named("missing").is_none());
        let refs: Vec<_> = c.ref_relations().collect();
        assert_eq!(refs, vec![("author", "authorId", "authors")]);
    }

    #[test]
    fn index_names() {
        assert_eq!(IndexSpec::on(&["metadata.rating", "genre"]).name(), "metadata.rating+genre");
        assert!(IndexSpec::on(&["genre"]).covers_single("genre"));
        assert!(!IndexSpec::on(&["a", "b"]).covers_single("a"));
    }

    #[test]
    fn hook_set_extend_preserves_order() {
        let mut global = HookSet::new();
        global.before_create.push(Arc::new(|e: &mut Entity| {
            e.insert("order", json!(["global"]));
            Ok(())
        }));
        let mut local = HookSet::new();
        local.before_create.push(Arc::new(|e: &mut Entity| {
            if let Some(Value::Array(a)) = e.as_map_mut().get_mut("order") {
                a.push(json!("local"));
            }
            Ok(())
        }));

        let mut chain = HookSet::new();
        chain.extend(&global);
        chain.extend(&local);

        let mut e = Entity::new();
        for hook in &chain.before_create {
            hook(&mut e).unwrap();
        }
        assert_eq!(e.get("order"), Some(&json!(["global", "local"])));
    }

    #[test]
    fn computed_field_evaluates() {
        let c = ComputedField::new("titleLength", |e: &Entity| {
            json!(e.get("title").and_then(Value::as_str).map_or(0, str::len))
        });
        let e = Entity::from_value(json!({"title": "Dune"})).unwrap();
        assert_eq!((c.compute)(&e), json!(4));
    }
}
