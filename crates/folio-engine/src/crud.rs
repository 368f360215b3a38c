//! The mutation pipeline.
//!
//! Every write flows through [`MutCtx`]: validate, assign id, check
//! referential integrity and uniqueness, run the hook chain, apply to the
//! primary map and indexes, stamp timestamps, and record the change event.
//! The context mutates whichever state map it was given -- the live store
//! for single-entity operations (which fail before any state changes) or a
//! working copy for batch, cascade, and transactional work.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};

use folio_core::config::{CollectionConfig, HookSet};
use folio_core::entity::{Entity, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD, VERSION_KEY};
use folio_core::error::{FolioError, Result};
use folio_core::event::{ChangeEvent, Operation};
use folio_core::idgen::{HashIdGenerator, IdGenerator};
use folio_core::relation::{CascadePolicy, Relation};
use folio_core::schema::violations_to_error;

use folio_query::OperatorRegistry;

use crate::exec::EngineView;
use crate::index::key_for;
use crate::patch::apply_patch;
use crate::state::CollectionState;

/// Which branch an upsert took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Created,
    Updated,
}

/// An upsert request.
#[derive(Debug, Clone)]
pub struct UpsertSpec {
    /// Match condition; the first match is updated.
    pub filter: Value,
    /// Payload used when nothing matches.
    pub create: Value,
    /// Patch applied when a match exists.
    pub update: Value,
}

/// An upsert outcome: the committed entity and which branch ran.
#[derive(Debug, Clone, PartialEq)]
pub struct Upserted {
    pub action: UpsertAction,
    pub entity: Entity,
}

/// Result of a bulk delete.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOutcome {
    pub count: usize,
    pub deleted: Vec<Entity>,
}

/// A mutation context over some state map.
pub(crate) struct MutCtx<'a> {
    pub configs: &'a HashMap<String, CollectionConfig>,
    pub states: &'a mut HashMap<String, CollectionState>,
    pub operators: &'a OperatorRegistry,
    pub id_generators: &'a HashMap<String, Arc<dyn IdGenerator>>,
    pub default_id_generator: &'a HashIdGenerator,
    pub global_hooks: &'a HookSet,
    /// Change events recorded in apply order, published at commit.
    pub events: Vec<ChangeEvent>,
    /// Collections whose persistence is now stale.
    pub dirty: BTreeSet<String>,
}

impl<'a> MutCtx<'a> {
    /// A read view over the context's current states.
    pub(crate) fn view(&self) -> EngineView<'_> {
        EngineView {
            configs: self.configs,
            states: &*self.states,
            operators: self.operators,
        }
    }

    fn config(&self, collection: &str) -> Result<&'a CollectionConfig> {
        self.configs
            .get(collection)
            .ok_or_else(|| FolioError::Operation(format!("unknown collection {collection:?}")))
    }

    fn state_mut(&mut self, collection: &str) -> Result<&mut CollectionState> {
        self.states
            .get_mut(collection)
            .ok_or_else(|| FolioError::Operation(format!("unknown collection {collection:?}")))
    }

    // -- Create --------------------------------------------------------------

    pub fn create(&mut self, collection: &str, value: Value) -> Result<Entity> {
        let config = self.config(collection)?;
        let mut entity = Entity::from_value(value)?;

        // 1. Validate (drops unknown fields first).
        strip_unknown_fields(config, &mut entity);
        config
            .schema
            .validate(&entity.to_value())
            .map_err(|v| violations_to_error(&v))?;

        // 2. Assign id; an explicit id always wins.
        let id = match entity.id() {
            Some(id) => {
                if id == VERSION_KEY {
                    return Err(FolioError::validation(format!(
                        "{VERSION_KEY:?} is reserved and cannot be an entity id"
                    )));
                }
                id.to_owned()
            }
            None => {
                let id = self.generate_id(config, collection)?;
                entity.set_id(id.clone());
                id
            }
        };
        if self.state_mut(collection)?.entities.contains_key(&id) {
            return Err(FolioError::duplicate_key(collection, format!("id {id:?}")));
        }

        // 3-4. Referential integrity, then uniqueness.
        self.check_foreign_keys(config, &entity)?;
        self.check_unique(collection, config, &entity, None)?;

        // 5. Hook chain: plugin-global then collection-local.
        for hook in self
            .global_hooks
            .before_create
            .iter()
            .chain(config.hooks.before_create.iter())
        {
            hook(&mut entity)?;
        }

        // 6. Timestamps + apply.
        if config.timestamps {
            entity.stamp_created(Utc::now());
        }
        self.state_mut(collection)?.insert(id.clone(), entity.clone());

        // 7-8. Event + dirty.
        self.record(collection, Operation::Create, &id);

        for hook in self
            .global_hooks
            .after_create
            .iter()
            .chain(config.hooks.after_create.iter())
        {
            hook(&entity);
        }

        Ok(entity)
    }

    pub fn create_many(&mut self, collection: &str, values: Vec<Value>) -> Result<Vec<Entity>> {
        values
            .into_iter()
            .map(|value| self.create(collection, value))
            .collect()
    }

    // -- Update --------------------------------------------------------------

    pub fn update(&mut self, collection: &str, id: &str, patch: Value) -> Result<Entity> {
        let config = self.config(collection)?;
        let old = self
            .state_mut(collection)?
            .entities
            .get(id)
            .cloned()
            .ok_or_else(|| FolioError::not_found(collection, id))?;

        let patch_map = patch
            .as_object()
            .ok_or_else(|| FolioError::validation("patch must be an object"))?;

        let mut entity = old.clone();
        apply_patch(&mut entity, patch_map)?;
        entity.set_id(id); // the primary key is immutable

        strip_unknown_fields(config, &mut entity);
        config
            .schema
            .validate(&entity.to_value())
            .map_err(|v| violations_to_error(&v))?;

        self.check_foreign_keys(config, &entity)?;
        self.check_unique(collection, config, &entity, Some(id))?;

        for hook in self
            .global_hooks
            .before_update
            .iter()
            .chain(config.hooks.before_update.iter())
        {
            hook(&mut entity)?;
        }

        if config.timestamps {
            entity.stamp_updated(Utc::now());
        }
        self.state_mut(collection)?.replace(id, entity.clone());
        self.record(collection, Operation::Update, id);

        for hook in self
            .global_hooks
            .after_update
            .iter()
            .chain(config.hooks.after_update.iter())
        {
            hook(&entity);
        }

        Ok(entity)
    }

    pub fn update_many(
        &mut self,
        collection: &str,
        filter: &Value,
        patch: Value,
    ) -> Result<Vec<Entity>> {
        let ids = self.view().matching_ids(collection, Some(filter))?;
        ids.iter()
            .map(|id| self.update(collection, id, patch.clone()))
            .collect()
    }

    // -- Upsert --------------------------------------------------------------

    pub fn upsert(&mut self, collection: &str, spec: UpsertSpec) -> Result<Upserted> {
        let existing = self
            .view()
            .matching_ids(collection, Some(&spec.filter))?
            .into_iter()
            .next();
        match existing {
            Some(id) => Ok(Upserted {
                action: UpsertAction::Updated,
                entity: self.update(collection, &id, spec.update)?,
            }),
            None => Ok(Upserted {
                action: UpsertAction::Created,
                entity: self.create(collection, spec.create)?,
            }),
        }
    }

    pub fn upsert_many(&mut self, collection: &str, specs: Vec<UpsertSpec>) -> Result<Vec<Upserted>> {
        specs
            .into_iter()
            .map(|spec| self.upsert(collection, spec))
            .collect()
    }

    // -- Delete --------------------------------------------------------------

    pub fn delete(&mut self, collection: &str, id: &str) -> Result<Entity> {
        let config = self.config(collection)?;
        let entity = self
            .state_mut(collection)?
            .entities
            .get(id)
            .cloned()
            .ok_or_else(|| FolioError::not_found(collection, id))?;

        // A plain delete never leaves dangling references behind;
        // cascade/set-null behavior belongs to the relationship variant.
        self.assert_no_dependents(collection, id)?;

        for hook in self
            .global_hooks
            .before_delete
            .iter()
            .chain(config.hooks.before_delete.iter())
        {
            hook(&entity)?;
        }

        self.state_mut(collection)?.remove(id);
        self.record(collection, Operation::Delete, id);

        for hook in self
            .global_hooks
            .after_delete
            .iter()
            .chain(config.hooks.after_delete.iter())
        {
            hook(&entity);
        }

        Ok(entity)
    }

    pub fn delete_many(&mut self, collection: &str, filter: &Value) -> Result<DeleteOutcome> {
        let ids = self.view().matching_ids(collection, Some(filter))?;
        self.delete_ids(collection, ids)
    }

    /// `delete_many` with a predicate instead of a where document.
    pub fn delete_many_by(
        &mut self,
        collection: &str,
        predicate: &dyn Fn(&Entity) -> bool,
    ) -> Result<DeleteOutcome> {
        let ids: Vec<String> = self
            .view()
            .filtered_candidates(collection, None)?
            .iter()
            .filter(|e| predicate(e))
            .filter_map(|e| e.id().map(str::to_owned))
            .collect();
        self.delete_ids(collection, ids)
    }

    fn delete_ids(&mut self, collection: &str, ids: Vec<String>) -> Result<DeleteOutcome> {
        let mut deleted = Vec::with_capacity(ids.len());
        for id in ids {
            deleted.push(self.delete(collection, &id)?);
        }
        Ok(DeleteOutcome {
            count: deleted.len(),
            deleted,
        })
    }

    // -- Relationship (cascade) variants --------------------------------------

    pub fn create_with_relationships(&mut self, collection: &str, value: Value) -> Result<Entity> {
        let payload = self.resolve_embedded(collection, value)?;
        self.create(collection, payload)
    }

    pub fn update_with_relationships(
        &mut self,
        collection: &str,
        id: &str,
        patch: Value,
    ) -> Result<Entity> {
        let payload = self.resolve_embedded(collection, patch)?;
        self.update(collection, id, payload)
    }

    /// Replaces embedded ref-relation objects with foreign keys, inserting
    /// or updating the targets first.
    fn resolve_embedded(&mut self, collection: &str, value: Value) -> Result<Value> {
        let config = self.config(collection)?;
        let mut payload = match value {
            Value::Object(map) => map,
            other => return Ok(other),
        };

        let refs: Vec<(String, String, String)> = config
            .ref_relations()
            .map(|(name, field, target)| (name.to_owned(), field.to_owned(), target.to_owned()))
            .collect();

        for (name, field, target) in refs {
            let Some(embedded) = payload.get(&name) else {
                continue;
            };
            if !embedded.is_object() {
                continue;
            }
            let embedded = payload.remove(&name).expect("key was just present");
            let target_entity = self.upsert_embedded(&target, embedded)?;
            payload.insert(field, Value::String(target_entity.require_id()?.to_owned()));
        }

        Ok(Value::Object(payload))
    }

    fn upsert_embedded(&mut self, target: &str, embedded: Value) -> Result<Entity> {
        let id = embedded
            .as_object()
            .and_then(|o| o.get(ID_FIELD))
            .and_then(Value::as_str)
            .map(str::to_owned);
        let exists = match &id {
            Some(id) => self.state_mut(target)?.entities.contains_key(id),
            None => false,
        };
        match (id, exists) {
            (Some(id), true) => self.update(target, &id, embedded),
            _ => self.create(target, embedded),
        }
    }

    pub fn delete_with_relationships(&mut self, collection: &str, id: &str) -> Result<Entity> {
        if !self
            .state_mut(collection)?
            .entities
            .contains_key(id)
        {
            return Err(FolioError::not_found(collection, id));
        }

        let mut deletes: Vec<(String, String)> = Vec::new();
        let mut set_nulls: Vec<(String, String, String)> = Vec::new();
        let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
        self.cascade_plan(collection, id, &mut deletes, &mut set_nulls, &mut seen)?;

        for (dep_collection, dep_id, field) in set_nulls {
            let patch = Value::Object(Map::from_iter([(field, Value::Null)]));
            self.update(&dep_collection, &dep_id, patch)?;
        }

        // Children were planned before their parents, so applying in plan
        // order never leaves a dangling reference.
        let mut root = None;
        for (dep_collection, dep_id) in deletes {
            let deleted = self.delete_planned(&dep_collection, &dep_id)?;
            if dep_collection == collection && dep_id == id {
                root = Some(deleted);
            }
        }
        root.ok_or_else(|| FolioError::Operation("cascade plan missed the root entity".into()))
    }

    /// Post-order cascade walk: dependents first, then the entity itself.
    fn cascade_plan(
        &mut self,
        collection: &str,
        id: &str,
        deletes: &mut Vec<(String, String)>,
        set_nulls: &mut Vec<(String, String, String)>,
        seen: &mut BTreeSet<(String, String)>,
    ) -> Result<()> {
        if !seen.insert((collection.to_owned(), id.to_owned())) {
            return Ok(());
        }

        for (dep_collection, field, dependents) in self.dependents_of(collection, id)? {
            if dependents.is_empty() {
                continue;
            }
            match self.cascade_policy(collection, &dep_collection, &field) {
                CascadePolicy::Restrict => {
                    return Err(FolioError::foreign_key(format!(
                        "cannot delete {collection}/{id}: {} dependent(s) in {dep_collection} via {field:?}",
                        dependents.len()
                    )));
                }
                CascadePolicy::Cascade => {
                    for dependent in dependents {
                        self.cascade_plan(&dep_collection, &dependent, deletes, set_nulls, seen)?;
                    }
                }
                CascadePolicy::SetNull => {
                    for dependent in dependents {
                        set_nulls.push((dep_collection.clone(), dependent, field.clone()));
                    }
                }
            }
        }

        deletes.push((collection.to_owned(), id.to_owned()));
        Ok(())
    }

    /// Deletes one planned entity (dependents already handled).
    fn delete_planned(&mut self, collection: &str, id: &str) -> Result<Entity> {
        let config = self.config(collection)?;
        let entity = self
            .state_mut(collection)?
            .entities
            .get(id)
            .cloned()
            .ok_or_else(|| FolioError::not_found(collection, id))?;

        for hook in self
            .global_hooks
            .before_delete
            .iter()
            .chain(config.hooks.before_delete.iter())
        {
            hook(&entity)?;
        }

        self.state_mut(collection)?.remove(id);
        self.record(collection, Operation::Delete, id);

        for hook in self
            .global_hooks
            .after_delete
            .iter()
            .chain(config.hooks.after_delete.iter())
        {
            hook(&entity);
        }
        Ok(entity)
    }

    // -- Shared checks --------------------------------------------------------

    fn generate_id(&mut self, config: &CollectionConfig, collection: &str) -> Result<String> {
        let generator: &dyn IdGenerator = match &config.id_generator {
            Some(name) => self
                .id_generators
                .get(name)
                .map(|g| g.as_ref() as &dyn IdGenerator)
                .ok_or_else(|| {
                    FolioError::plugin(
                        name.clone(),
                        folio_core::error::PluginFault::MissingIdGenerator,
                        format!("collection {collection:?} references id generator {name:?}"),
                    )
                })?,
            None => self.default_id_generator,
        };

        // Collision-resistant, but guard against an unlucky draw.
        let state = self
            .states
            .get(collection)
            .ok_or_else(|| FolioError::Operation(format!("unknown collection {collection:?}")))?;
        for _ in 0..8 {
            let id = generator.generate(collection);
            if !state.entities.contains_key(&id) && id != VERSION_KEY {
                return Ok(id);
            }
        }
        Err(FolioError::Operation(format!(
            "id generator failed to produce a fresh id for {collection:?}"
        )))
    }

    /// Every set foreign key must point at an existing target.
    fn check_foreign_keys(&self, config: &CollectionConfig, entity: &Entity) -> Result<()> {
        for (name, field, target) in config.ref_relations() {
            let Some(value) = entity.get_path(field).as_value() else {
                continue;
            };
            let Some(fk) = value.as_str() else {
                return Err(FolioError::validation(format!(
                    "foreign key {field:?} of relation {name:?} must be a string id"
                )));
            };
            let exists = self
                .states
                .get(target)
                .is_some_and(|s| s.entities.contains_key(fk));
            if !exists {
                return Err(FolioError::foreign_key(format!(
                    "{field:?} references missing {target}/{fk}"
                )));
            }
        }
        Ok(())
    }

    /// No unique-index key may collide with another id.
    fn check_unique(
        &self,
        collection: &str,
        config: &CollectionConfig,
        entity: &Entity,
        except: Option<&str>,
    ) -> Result<()> {
        let state = self
            .states
            .get(collection)
            .ok_or_else(|| FolioError::Operation(format!("unknown collection {collection:?}")))?;
        for index in state.indexes.iter().filter(|i| i.spec.unique) {
            let key = key_for(entity, &index.spec.fields);
            if let Some(holder) = index.unique_holder(&key, except) {
                return Err(FolioError::duplicate_key(
                    collection,
                    format!("unique index {} already maps this key to {holder:?}", index.spec.name()),
                ));
            }
        }
        Ok(())
    }

    /// Fails when any ref relation anywhere still points at `id`.
    fn assert_no_dependents(&self, collection: &str, id: &str) -> Result<()> {
        for (dep_collection, field, dependents) in self.dependents_of(collection, id)? {
            if !dependents.is_empty() {
                return Err(FolioError::foreign_key(format!(
                    "cannot delete {collection}/{id}: {} dependent(s) in {dep_collection} via {field:?}",
                    dependents.len()
                )));
            }
        }
        Ok(())
    }

    /// All `(collection, fk field, dependent ids)` triples whose ref
    /// relations target `collection`.
    fn dependents_of(&self, collection: &str, id: &str) -> Result<Vec<(String, String, Vec<String>)>> {
        let mut out = Vec::new();
        for (other_name, other_config) in self.configs {
            for (_, field, target) in other_config.ref_relations() {
                if target != collection {
                    continue;
                }
                let dependents: Vec<String> = self
                    .view()
                    .inverse_entities(other_name, field, id)?
                    .iter()
                    .filter_map(|e| e.id().map(str::to_owned))
                    .collect();
                out.push((other_name.clone(), field.to_owned(), dependents));
            }
        }
        Ok(out)
    }

    /// The declared cascade policy for dependents in `dep_collection` via
    /// `field`; undeclared inverse sides restrict.
    fn cascade_policy(&self, collection: &str, dep_collection: &str, field: &str) -> CascadePolicy {
        let Some(config) = self.configs.get(collection) else {
            return CascadePolicy::Restrict;
        };
        config
            .relations
            .iter()
            .find_map(|r| match r {
                Relation::Inverse {
                    target,
                    foreign_key,
                    on_delete,
                    ..
                } if target == dep_collection && foreign_key == field => Some(*on_delete),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn record(&mut self, collection: &str, operation: Operation, id: &str) {
        self.events.push(ChangeEvent::new(collection, operation, id));
        self.dirty.insert(collection.to_owned());
    }
}

/// Drops fields the schema does not declare (reserved engine fields are
/// always kept).
fn strip_unknown_fields(config: &CollectionConfig, entity: &mut Entity) {
    let declared = config.schema.field_names();
    if declared.is_empty() {
        return;
    }
    let keep: Vec<String> = entity
        .as_map()
        .keys()
        .filter(|field| {
            declared.iter().any(|d| d == *field)
                || *field == ID_FIELD
                || (config.timestamps
                    && (*field == CREATED_AT_FIELD || *field == UPDATED_AT_FIELD))
        })
        .cloned()
        .collect();
    let all: Vec<String> = entity.as_map().keys().cloned().collect();
    for field in all {
        if !keep.contains(&field) {
            entity.remove(&field);
        }
    }
}
