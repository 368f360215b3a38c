//! [`Database`] -- construction, the single-writer mutation path, flush
//! orchestration, and transactions.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::info;

use folio_codec::CodecRegistry;
use folio_core::config::{CollectionConfig, HookSet};
use folio_core::entity::EntityMap;
use folio_core::error::{FolioError, PluginFault, Result};
use folio_core::event::ChangeEvent;
use folio_core::idgen::{HashIdGenerator, IdGenerator};
use folio_query::OperatorRegistry;
use folio_storage::adapter::{FsAdapter, StorageAdapter};
use folio_storage::migrate::MigrationPlan;
use folio_storage::persist::{PersistenceEngine, DEFAULT_FLUSH_DEBOUNCE};

use crate::collection::Collection;
use crate::crud::MutCtx;
use crate::plugin::{self, LifecycleFn, Plugin};
use crate::state::{CollectionState, CollectionStats};
use crate::txn::TxContext;

/// Everything needed to construct a [`Database`].
pub struct DatabaseConfig {
    pub(crate) collections: Vec<CollectionConfig>,
    pub(crate) plugins: Vec<Plugin>,
    pub(crate) adapter: Arc<dyn StorageAdapter>,
    pub(crate) codecs: CodecRegistry,
    pub(crate) flush_debounce: Duration,
}

impl DatabaseConfig {
    /// A config with filesystem storage, built-in codecs, and the default
    /// flush debounce.
    pub fn new() -> Self {
        Self {
            collections: Vec::new(),
            plugins: Vec::new(),
            adapter: Arc::new(FsAdapter::new()),
            codecs: CodecRegistry::with_builtins(),
            flush_debounce: DEFAULT_FLUSH_DEBOUNCE,
        }
    }

    /// Adds a collection.
    pub fn collection(mut self, config: CollectionConfig) -> Self {
        self.collections.push(config);
        self
    }

    /// Registers a plugin (installed in registration order).
    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Substitutes the storage adapter (e.g. the in-memory one for tests).
    pub fn adapter(mut self, adapter: Arc<dyn StorageAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Replaces the codec registry.
    pub fn codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    /// Overrides the debounce before dirty files flush.
    pub fn flush_debounce(mut self, debounce: Duration) -> Self {
        self.flush_debounce = debounce;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The engine-internal shared state.
pub(crate) struct DatabaseInner {
    /// Collection configs by name.
    pub configs: HashMap<String, CollectionConfig>,
    /// Collection names in declaration order.
    pub order: Vec<String>,
    /// Declaration-ordered configs (the persistence grouping order).
    pub ordered_configs: Vec<CollectionConfig>,
    /// Live collection states.
    pub states: Mutex<HashMap<String, CollectionState>>,
    /// Serializes all mutations (readers only take `states`).
    pub writer: Mutex<()>,
    pub bus: crate::bus::ChangeBus,
    pub persistence: PersistenceEngine,
    pub operators: OperatorRegistry,
    pub id_generators: HashMap<String, Arc<dyn IdGenerator>>,
    pub default_id_generator: HashIdGenerator,
    pub global_hooks: HookSet,
    pub shutdowns: Vec<(String, LifecycleFn)>,
}

impl DatabaseInner {
    pub(crate) fn lock_states(&self) -> Result<MutexGuard<'_, HashMap<String, CollectionState>>> {
        self.states
            .lock()
            .map_err(|e| FolioError::Operation(format!("state lock poisoned: {e}")))
    }

    pub(crate) fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer
            .lock()
            .map_err(|e| FolioError::Operation(format!("writer lock poisoned: {e}")))
    }

    fn ctx<'a>(
        &'a self,
        states: &'a mut HashMap<String, CollectionState>,
    ) -> MutCtx<'a> {
        MutCtx {
            configs: &self.configs,
            states,
            operators: &self.operators,
            id_generators: &self.id_generators,
            default_id_generator: &self.default_id_generator,
            global_hooks: &self.global_hooks,
            events: Vec::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Runs a mutation under the writer lock.
    ///
    /// `atomic` routes the work through a working copy that only swaps in
    /// on success; the direct path is for single-entity operations, whose
    /// checks all run before any state changes.
    pub(crate) fn mutate<T>(
        &self,
        atomic: bool,
        f: impl FnOnce(&mut MutCtx<'_>) -> Result<T>,
    ) -> Result<T> {
        let _writer = self.lock_writer()?;

        if atomic {
            let mut working = self.lock_states()?.clone();
            let mut ctx = self.ctx(&mut working);
            let value = f(&mut ctx)?;
            let MutCtx { events, dirty, .. } = ctx;
            *self.lock_states()? = working;
            self.commit(events, dirty);
            Ok(value)
        } else {
            let mut states = self.lock_states()?;
            let mut ctx = self.ctx(&mut *states);
            let value = f(&mut ctx)?;
            let MutCtx { events, dirty, .. } = ctx;
            drop(states);
            self.commit(events, dirty);
            Ok(value)
        }
    }

    /// Publishes events, marks dirty paths, and opportunistically flushes.
    fn commit(&self, events: Vec<ChangeEvent>, dirty: BTreeSet<String>) {
        self.bus.publish_all(&events);
        for name in dirty {
            if let Some(path) = self.configs.get(&name).and_then(|c| c.file_path.as_ref()) {
                self.persistence.mark_dirty(path);
            }
        }
        self.auto_flush();
    }

    /// Flushes every due file group; failures log and reschedule.
    fn auto_flush(&self) {
        let due = self.persistence.take_due();
        let _ = self.write_paths(due, false);
    }

    /// Blocking flush of everything pending.
    pub(crate) fn flush(&self) -> Result<()> {
        let paths = self.persistence.take_all();
        self.write_paths(paths, true)
    }

    fn write_paths(&self, paths: Vec<PathBuf>, propagate: bool) -> Result<()> {
        for path in paths {
            let group: Vec<&CollectionConfig> = self
                .ordered_configs
                .iter()
                .filter(|c| c.file_path.as_deref() == Some(path.as_path()))
                .collect();
            if group.is_empty() {
                continue;
            }

            let states = self.lock_states()?;
            let snapshot: Vec<(&CollectionConfig, &EntityMap)> = group
                .iter()
                .map(|config| (*config, &states[&config.name].entities))
                .collect();
            let result = self.persistence.save_file(&path, &snapshot);
            drop(states);

            if let Err(error) = result {
                if propagate {
                    return Err(error);
                }
                self.persistence.reschedule(&path, &error);
            }
        }
        Ok(())
    }
}

/// An embedded, schema-driven document database over text files.
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DatabaseInner>,
}

impl Database {
    /// Constructs the database: installs plugins, validates collection
    /// configs, loads (and migrates) every persisted collection, and
    /// builds the indexes.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        let DatabaseConfig {
            collections,
            plugins,
            adapter,
            mut codecs,
            flush_debounce,
        } = config;

        // Plugins install fully before any collection is usable.
        let installed = plugin::install(&plugins, &mut codecs)?;

        // Config validation.
        let mut names = BTreeSet::new();
        for collection in &collections {
            if !names.insert(collection.name.clone()) {
                return Err(FolioError::Operation(format!(
                    "duplicate collection name {:?}",
                    collection.name
                )));
            }
        }
        for collection in &collections {
            for relation in &collection.relations {
                if !names.contains(relation.target()) {
                    return Err(FolioError::Operation(format!(
                        "collection {:?}: relation {:?} targets unknown collection {:?}",
                        collection.name,
                        relation.name(),
                        relation.target()
                    )));
                }
            }
            if let Some(generator) = &collection.id_generator {
                if !installed.id_generators.contains_key(generator) {
                    return Err(FolioError::plugin(
                        generator.clone(),
                        PluginFault::MissingIdGenerator,
                        format!(
                            "collection {:?} references id generator {generator:?}, which no plugin provides",
                            collection.name
                        ),
                    ));
                }
            }
        }

        let persistence = PersistenceEngine::new(adapter, codecs, flush_debounce);
        let mut loaded = persistence.load(&collections)?;

        let mut states = HashMap::with_capacity(collections.len());
        let mut configs = HashMap::with_capacity(collections.len());
        let mut order = Vec::with_capacity(collections.len());
        for collection in &collections {
            let entities = loaded.remove(&collection.name).unwrap_or_default();
            states.insert(
                collection.name.clone(),
                CollectionState::from_entities(collection, entities),
            );
            configs.insert(collection.name.clone(), collection.clone());
            order.push(collection.name.clone());
        }

        info!(collections = order.len(), "database open");

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                configs,
                order,
                ordered_configs: collections,
                states: Mutex::new(states),
                writer: Mutex::new(()),
                bus: crate::bus::ChangeBus::new(),
                persistence,
                operators: installed.operators,
                id_generators: installed.id_generators,
                default_id_generator: HashIdGenerator::default(),
                global_hooks: installed.global_hooks,
                shutdowns: installed.shutdowns,
            }),
        })
    }

    /// A handle to one collection.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        if !self.inner.configs.contains_key(name) {
            return Err(FolioError::Operation(format!("unknown collection {name:?}")));
        }
        Ok(Collection::new(Arc::clone(&self.inner), name.to_owned()))
    }

    /// Collection names in declaration order.
    pub fn collection_names(&self) -> Vec<String> {
        self.inner.order.clone()
    }

    /// Runs `f` against a private working copy of every collection.
    ///
    /// On success the working copy swaps atomically into the live store,
    /// pending events publish in order, and persistence is scheduled once.
    /// On error nothing is applied, nothing publishes, and the error comes
    /// back wrapped as a transaction failure.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut TxContext<'_, '_>) -> Result<T>,
    ) -> Result<T> {
        let inner = &self.inner;
        let _writer = inner.lock_writer()?;

        let mut working = inner.lock_states()?.clone();
        let mut ctx = inner.ctx(&mut working);

        match f(&mut TxContext::new(&mut ctx)) {
            Ok(value) => {
                let MutCtx { events, dirty, .. } = ctx;
                *inner.lock_states()? = working;
                inner.commit(events, dirty);
                Ok(value)
            }
            Err(error) => Err(FolioError::transaction(error)),
        }
    }

    /// Blocking flush of all pending writes.
    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    /// Returns `true` while a debounced write is pending.
    pub fn has_pending_writes(&self) -> bool {
        self.inner.persistence.has_pending()
    }

    /// Reports, without writing, what a fresh load would migrate.
    pub fn dry_run(&self) -> Result<Vec<MigrationPlan>> {
        self.inner.persistence.dry_run(&self.inner.ordered_configs)
    }

    /// Index/entity statistics for every collection, in declaration order.
    pub fn stats(&self) -> Result<Vec<CollectionStats>> {
        let states = self.inner.lock_states()?;
        Ok(self
            .inner
            .order
            .iter()
            .map(|name| states[name].stats(name))
            .collect())
    }

    /// Flushes and runs every plugin's shutdown callback.
    pub fn shutdown(&self) -> Result<()> {
        self.flush()?;
        for (name, shutdown) in &self.inner.shutdowns {
            shutdown().map_err(|e| {
                FolioError::plugin(
                    name.clone(),
                    PluginFault::InvalidPluginShape,
                    format!("shutdown failed: {e}"),
                )
            })?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("collections", &self.inner.order)
            .finish_non_exhaustive()
    }
}
