//! The persistence engine.
//!
//! Groups collections by file path, loads whole-file snapshots (running
//! schema-version migrations where needed), encodes and writes file groups,
//! and tracks the debounced-dirty set that drives flushing.
//!
//! The engine itself owns no collection data; the database hands it
//! configs and entity-map snapshots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use folio_core::config::CollectionConfig;
use folio_core::entity::{Entity, EntityMap, VERSION_KEY};
use folio_core::error::{FolioError, MigrationFault, Result};

use crate::adapter::StorageAdapter;
use crate::migrate::{self, MigrationPlan, MigrationStatus};
use folio_codec::CodecRegistry;

/// Default debounce before a dirty file group is flushed.
pub const DEFAULT_FLUSH_DEBOUNCE: Duration = Duration::from_millis(50);

/// Loads, saves, and schedules writes for collection files.
pub struct PersistenceEngine {
    adapter: Arc<dyn StorageAdapter>,
    codecs: CodecRegistry,
    debounce: Duration,
    /// Dirty file paths with their flush deadlines.
    dirty: Mutex<HashMap<PathBuf, Instant>>,
}

impl PersistenceEngine {
    /// Creates an engine over the given adapter and codec registry.
    pub fn new(adapter: Arc<dyn StorageAdapter>, codecs: CodecRegistry, debounce: Duration) -> Self {
        Self {
            adapter,
            codecs,
            debounce,
            dirty: Mutex::new(HashMap::new()),
        }
    }

    /// The storage adapter in use.
    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    /// The configured debounce delay.
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    // -- Grouping ------------------------------------------------------------

    /// Groups collections by file path, preserving config order.
    ///
    /// Collections without a file path are omitted.
    pub fn group_by_path<'a>(
        configs: &'a [CollectionConfig],
    ) -> Vec<(PathBuf, Vec<&'a CollectionConfig>)> {
        let mut groups: Vec<(PathBuf, Vec<&CollectionConfig>)> = Vec::new();
        for config in configs {
            let Some(path) = &config.file_path else {
                continue;
            };
            match groups.iter_mut().find(|(p, _)| p == path) {
                Some((_, members)) => members.push(config),
                None => groups.push((path.clone(), vec![config])),
            }
        }
        groups
    }

    fn codec_for(&self, path: &Path) -> Result<folio_codec::CodecRef> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("json");
        self.codecs.lookup(extension)
    }

    // -- Load ----------------------------------------------------------------

    /// Loads every persisted collection, migrating files behind their
    /// configured version.
    ///
    /// Returns name → entity map. Collections without a file path (or with
    /// a missing file) come back empty. If any migration ran for a file,
    /// the upgraded data is written back to the same path; otherwise the
    /// file is left untouched.
    pub fn load(&self, configs: &[CollectionConfig]) -> Result<HashMap<String, EntityMap>> {
        for config in configs {
            migrate::validate_registry(&config.name, config.version, &config.migrations)?;
        }

        let mut loaded: HashMap<String, EntityMap> = configs
            .iter()
            .map(|c| (c.name.clone(), EntityMap::new()))
            .collect();

        for (path, group) in Self::group_by_path(configs) {
            let Some(text) = self.adapter.read(&path)? else {
                debug!(?path, "no file yet, collections start empty");
                continue;
            };
            let codec = self.codec_for(&path)?;
            let decoded = codec.decode(&text)?;
            let multi = group.len() > 1;

            let mut migrated_any = false;
            for config in &group {
                let subtree = extract_subtree(&decoded, &config.name, multi)?;
                let (file_version, raw_entities) = split_version(&config.name, subtree)?;

                if file_version > config.version {
                    return Err(FolioError::migration(
                        &config.name,
                        MigrationFault::VersionAhead,
                        -1,
                        format!(
                            "file is at version {file_version}, config expects {}",
                            config.version
                        ),
                    ));
                }

                let mut entities = EntityMap::new();
                for (id, raw) in raw_entities {
                    let decoded_entity = config.schema.decode(raw)?;
                    let mut entity = Entity::from_value(decoded_entity)?;
                    if entity.id().is_none() {
                        entity.set_id(id.clone());
                    }
                    entities.insert(id, entity);
                }

                let entities = migrate::upgrade(
                    &config.name,
                    entities,
                    file_version,
                    config.version,
                    &config.migrations,
                    config.schema.as_ref(),
                )?;

                if file_version < config.version {
                    migrated_any = true;
                    info!(
                        collection = %config.name,
                        from = file_version,
                        to = config.version,
                        "migrated collection"
                    );
                }

                loaded.insert(config.name.clone(), entities);
            }

            if migrated_any {
                let snapshot: Vec<(&CollectionConfig, &EntityMap)> = group
                    .iter()
                    .map(|c| (*c, &loaded[&c.name]))
                    .collect();
                self.save_file(&path, &snapshot)?;
            }
        }

        Ok(loaded)
    }

    // -- Save ----------------------------------------------------------------

    /// Encodes one file group and writes it through the adapter.
    pub fn save_file(&self, path: &Path, group: &[(&CollectionConfig, &EntityMap)]) -> Result<()> {
        let codec = self.codec_for(path)?;
        let multi = group.len() > 1;

        let text = if multi {
            let mut top = Map::new();
            for (config, entities) in group {
                top.insert(
                    config.name.clone(),
                    Value::Object(encode_collection(config, entities)?),
                );
            }
            codec.encode(&Value::Object(top))?
        } else {
            let (config, entities) = group[0];
            codec.encode(&Value::Object(encode_collection(config, entities)?))?
        };

        self.adapter.write(path, &text)?;
        debug!(?path, collections = group.len(), "saved file group");
        Ok(())
    }

    // -- Dirty tracking ------------------------------------------------------

    /// Marks a path dirty, (re)arming its flush deadline.
    pub fn mark_dirty(&self, path: &Path) {
        let deadline = Instant::now() + self.debounce;
        self.dirty
            .lock()
            .expect("dirty set lock poisoned")
            .insert(path.to_owned(), deadline);
    }

    /// Re-marks a path dirty after a failed save, logging the failure.
    pub fn reschedule(&self, path: &Path, error: &FolioError) {
        warn!(?path, %error, "save failed, previous file left intact, rescheduling");
        self.mark_dirty(path);
    }

    /// Removes and returns every path whose deadline has passed.
    pub fn take_due(&self) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut dirty = self.dirty.lock().expect("dirty set lock poisoned");
        let due: Vec<PathBuf> = dirty
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &due {
            dirty.remove(path);
        }
        due
    }

    /// Removes and returns every dirty path, ignoring deadlines.
    pub fn take_all(&self) -> Vec<PathBuf> {
        let mut dirty = self.dirty.lock().expect("dirty set lock poisoned");
        dirty.drain().map(|(path, _)| path).collect()
    }

    /// Returns `true` while any flush is pending.
    pub fn has_pending(&self) -> bool {
        !self.dirty.lock().expect("dirty set lock poisoned").is_empty()
    }

    // -- Dry run -------------------------------------------------------------

    /// Reports, without writing, what a load would migrate.
    pub fn dry_run(&self, configs: &[CollectionConfig]) -> Result<Vec<MigrationPlan>> {
        let mut plans = Vec::with_capacity(configs.len());

        for config in configs {
            migrate::validate_registry(&config.name, config.version, &config.migrations)?;

            let Some(path) = &config.file_path else {
                plans.push(MigrationPlan {
                    name: config.name.clone(),
                    file_path: None,
                    current_version: 0,
                    target_version: config.version,
                    status: MigrationStatus::NoFile,
                    migrations_to_apply: Vec::new(),
                });
                continue;
            };

            let Some(text) = self.adapter.read(path)? else {
                plans.push(MigrationPlan {
                    name: config.name.clone(),
                    file_path: Some(path.clone()),
                    current_version: 0,
                    target_version: config.version,
                    status: MigrationStatus::NoFile,
                    migrations_to_apply: Vec::new(),
                });
                continue;
            };

            let codec = self.codec_for(path)?;
            let decoded = codec.decode(&text)?;
            let shares_file = configs
                .iter()
                .filter(|c| c.file_path.as_deref() == Some(path.as_path()))
                .count()
                > 1;
            let subtree = extract_subtree(&decoded, &config.name, shares_file)?;
            let (file_version, _) = split_version(&config.name, subtree)?;

            let (status, steps) = if file_version >= config.version {
                (MigrationStatus::UpToDate, Vec::new())
            } else {
                (
                    MigrationStatus::NeedsMigration,
                    migrate::planned_steps(&config.migrations, file_version, config.version),
                )
            };

            plans.push(MigrationPlan {
                name: config.name.clone(),
                file_path: Some(path.clone()),
                current_version: file_version,
                target_version: config.version,
                status,
                migrations_to_apply: steps,
            });
        }

        Ok(plans)
    }
}

impl std::fmt::Debug for PersistenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceEngine")
            .field("debounce", &self.debounce)
            .field("pending", &self.has_pending())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// File-layout helpers
// ---------------------------------------------------------------------------

/// Picks the collection's subtree out of a decoded file.
fn extract_subtree(decoded: &Value, collection: &str, multi: bool) -> Result<Map<String, Value>> {
    let top = decoded.as_object().ok_or_else(|| {
        FolioError::serialization(
            collection,
            "decoded file top level must be an object".to_owned(),
        )
    })?;

    if multi {
        match top.get(collection) {
            None => Ok(Map::new()),
            Some(Value::Object(subtree)) => Ok(subtree.clone()),
            Some(other) => Err(FolioError::serialization(
                collection,
                format!(
                    "expected an object under collection key, got {}",
                    folio_core::entity::type_name(other)
                ),
            )),
        }
    } else {
        Ok(top.clone())
    }
}

/// Splits the `_version` marker off a collection subtree.
fn split_version(
    collection: &str,
    mut subtree: Map<String, Value>,
) -> Result<(u32, Map<String, Value>)> {
    let version = match subtree.shift_remove(VERSION_KEY) {
        None => 0,
        Some(Value::Number(n)) => n.as_u64().unwrap_or(0) as u32,
        Some(other) => {
            return Err(FolioError::serialization(
                collection,
                format!(
                    "{VERSION_KEY} must be an integer, got {}",
                    folio_core::entity::type_name(&other)
                ),
            ));
        }
    };
    Ok((version, subtree))
}

/// Encodes one collection into its file subtree.
fn encode_collection(config: &CollectionConfig, entities: &EntityMap) -> Result<Map<String, Value>> {
    let mut subtree = Map::new();
    if config.version > 0 {
        subtree.insert(VERSION_KEY.to_owned(), Value::from(config.version));
    }
    for (id, entity) in entities {
        let encoded = config.schema.encode(entity.to_value())?;
        subtree.insert(id.clone(), encoded);
    }
    Ok(subtree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemAdapter;
    use folio_core::config::Migration;
    use folio_core::schema::{DocumentSchema, FieldType};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn engine(adapter: Arc<MemAdapter>) -> PersistenceEngine {
        PersistenceEngine::new(adapter, CodecRegistry::with_builtins(), Duration::from_millis(1))
    }

    fn users_config(version: u32) -> CollectionConfig {
        CollectionConfig::new(
            "users",
            DocumentSchema::new()
                .optional("name", FieldType::String)
                .optional("email", FieldType::String)
                .into_ref(),
        )
        .file("data/users.json")
        .version(version)
    }

    #[test]
    fn missing_file_loads_empty() {
        let adapter = Arc::new(MemAdapter::new());
        let configs = vec![users_config(0)];
        let loaded = engine(adapter).load(&configs).unwrap();
        assert!(loaded["users"].is_empty());
    }

    #[test]
    fn load_per_collection_file() {
        let adapter = Arc::new(MemAdapter::new());
        adapter.seed(
            "data/users.json",
            json!({"u1": {"id": "u1", "name": "Alice"}, "u2": {"id": "u2", "name": "Bob"}})
                .to_string(),
        );
        let configs = vec![users_config(0)];
        let loaded = engine(adapter).load(&configs).unwrap();
        let users = &loaded["users"];
        assert_eq!(users.len(), 2);
        // Insertion order follows the file.
        let ids: Vec<&String> = users.keys().collect();
        assert_eq!(ids, ["u1", "u2"]);
    }

    #[test]
    fn load_multi_collection_file() {
        let adapter = Arc::new(MemAdapter::new());
        adapter.seed(
            "data/app.json",
            json!({
                "users": {"u1": {"id": "u1"}},
                "companies": {"c1": {"id": "c1"}}
            })
            .to_string(),
        );
        let configs = vec![
            CollectionConfig::new("users", DocumentSchema::new().into_ref()).file("data/app.json"),
            CollectionConfig::new("companies", DocumentSchema::new().into_ref())
                .file("data/app.json"),
        ];
        let loaded = engine(adapter).load(&configs).unwrap();
        assert_eq!(loaded["users"].len(), 1);
        assert_eq!(loaded["companies"].len(), 1);
    }

    #[test]
    fn version_ahead_fails_and_leaves_file() {
        let adapter = Arc::new(MemAdapter::new());
        let original = json!({"_version": 5, "u1": {"id": "u1"}}).to_string();
        adapter.seed("data/users.json", original.clone());
        let configs = vec![users_config(3)
            .migration(Migration::step(0, Ok))
            .migration(Migration::step(1, Ok))
            .migration(Migration::step(2, Ok))];
        let err = engine(Arc::clone(&adapter)).load(&configs).unwrap_err();
        assert_eq!(err.migration_fault(), Some(MigrationFault::VersionAhead));
        assert_eq!(
            adapter.contents(Path::new("data/users.json")).unwrap(),
            original
        );
    }

    #[test]
    fn migration_rewrites_file_with_version() {
        let adapter = Arc::new(MemAdapter::new());
        adapter.seed("data/users.json", json!({"u1": {"id": "u1"}}).to_string());
        let configs = vec![users_config(1).migration(Migration::step(0, |mut map: EntityMap| {
            for e in map.values_mut() {
                e.insert("name", json!("upgraded"));
            }
            Ok(map)
        }))];
        let loaded = engine(Arc::clone(&adapter)).load(&configs).unwrap();
        assert_eq!(loaded["users"]["u1"].get("name"), Some(&json!("upgraded")));

        let rewritten: Value =
            serde_json::from_str(&adapter.contents(Path::new("data/users.json")).unwrap()).unwrap();
        assert_eq!(rewritten["_version"], json!(1));
        assert_eq!(rewritten["u1"]["name"], json!("upgraded"));
    }

    #[test]
    fn failed_transform_leaves_file_untouched() {
        let adapter = Arc::new(MemAdapter::new());
        let original = json!({"u1": {"id": "u1"}}).to_string();
        adapter.seed("data/users.json", original.clone());
        let configs =
            vec![users_config(1).migration(Migration::step(0, |_| Err("boom".into())))];
        let err = engine(Arc::clone(&adapter)).load(&configs).unwrap_err();
        assert_eq!(err.migration_fault(), Some(MigrationFault::TransformFailed));
        assert_eq!(
            adapter.contents(Path::new("data/users.json")).unwrap(),
            original
        );
    }

    #[test]
    fn up_to_date_file_not_rewritten() {
        let adapter = Arc::new(MemAdapter::new());
        // Deliberately odd formatting that re-encoding would normalize.
        let original = "{\"_version\": 1,   \"u1\": {\"id\": \"u1\"}}".to_owned();
        adapter.seed("data/users.json", original.clone());
        let configs = vec![users_config(1).migration(Migration::step(0, Ok))];
        engine(Arc::clone(&adapter)).load(&configs).unwrap();
        assert_eq!(
            adapter.contents(Path::new("data/users.json")).unwrap(),
            original
        );
    }

    #[test]
    fn save_groups_by_layout() {
        let adapter = Arc::new(MemAdapter::new());
        let eng = engine(Arc::clone(&adapter));

        let users = users_config(1);
        let mut map = EntityMap::new();
        map.insert("u1".into(), Entity::from_value(json!({"id": "u1"})).unwrap());
        eng.save_file(Path::new("data/users.json"), &[(&users, &map)])
            .unwrap();

        let written: Value =
            serde_json::from_str(&adapter.contents(Path::new("data/users.json")).unwrap()).unwrap();
        assert_eq!(written, json!({"_version": 1, "u1": {"id": "u1"}}));
    }

    #[test]
    fn unversioned_collection_omits_marker() {
        let adapter = Arc::new(MemAdapter::new());
        let eng = engine(Arc::clone(&adapter));
        let users = users_config(0);
        let map = EntityMap::new();
        eng.save_file(Path::new("data/users.json"), &[(&users, &map)])
            .unwrap();
        let written: Value =
            serde_json::from_str(&adapter.contents(Path::new("data/users.json")).unwrap()).unwrap();
        assert_eq!(written, json!({}));
    }

    #[test]
    fn dirty_tracking_take_due() {
        let adapter = Arc::new(MemAdapter::new());
        let eng = PersistenceEngine::new(
            adapter,
            CodecRegistry::with_builtins(),
            Duration::from_millis(0),
        );
        eng.mark_dirty(Path::new("a.json"));
        eng.mark_dirty(Path::new("b.json"));
        assert!(eng.has_pending());
        let mut due = eng.take_due();
        due.sort();
        assert_eq!(due, vec![PathBuf::from("a.json"), PathBuf::from("b.json")]);
        assert!(!eng.has_pending());
    }

    #[test]
    fn take_due_respects_deadline() {
        let adapter = Arc::new(MemAdapter::new());
        let eng = PersistenceEngine::new(
            adapter,
            CodecRegistry::with_builtins(),
            Duration::from_secs(3600),
        );
        eng.mark_dirty(Path::new("a.json"));
        assert!(eng.take_due().is_empty());
        assert_eq!(eng.take_all(), vec![PathBuf::from("a.json")]);
    }

    #[test]
    fn dry_run_reports_statuses() {
        let adapter = Arc::new(MemAdapter::new());
        adapter.seed("data/users.json", json!({"u1": {"id": "u1"}}).to_string());
        let configs = vec![
            users_config(1).migration(Migration::step(0, Ok).describe("add name")),
            CollectionConfig::new("companies", DocumentSchema::new().into_ref())
                .file("data/companies.json"),
        ];
        let plans = engine(adapter).dry_run(&configs).unwrap();

        assert_eq!(plans[0].status, MigrationStatus::NeedsMigration);
        assert_eq!(plans[0].current_version, 0);
        assert_eq!(plans[0].target_version, 1);
        assert_eq!(plans[0].migrations_to_apply.len(), 1);
        assert_eq!(
            plans[0].migrations_to_apply[0].description.as_deref(),
            Some("add name")
        );

        assert_eq!(plans[1].status, MigrationStatus::NoFile);
    }

    #[test]
    fn dry_run_never_writes() {
        let adapter = Arc::new(MemAdapter::new());
        let original = json!({"u1": {"id": "u1"}}).to_string();
        adapter.seed("data/users.json", original.clone());
        let configs = vec![users_config(1).migration(Migration::step(0, Ok))];
        engine(Arc::clone(&adapter)).dry_run(&configs).unwrap();
        assert_eq!(
            adapter.contents(Path::new("data/users.json")).unwrap(),
            original
        );
    }

    #[test]
    fn load_through_yaml_codec() {
        let adapter = Arc::new(MemAdapter::new());
        adapter.seed("data/users.yaml", "u1:\n  id: u1\n  name: Alice\n");
        let configs = vec![CollectionConfig::new(
            "users",
            DocumentSchema::new()
                .optional("name", FieldType::String)
                .into_ref(),
        )
        .file("data/users.yaml")];
        let loaded = engine(adapter).load(&configs).unwrap();
        assert_eq!(loaded["users"]["u1"].get("name"), Some(&json!("Alice")));
    }
}
