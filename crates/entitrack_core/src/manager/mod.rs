//! The entity manager: identity map, attach/detach and merge.

mod cache;
mod export;

pub use export::{
    BundleHeader, ExportBundle, ExportOptions, ExportedEntity, ImportOptions, ImportResult,
    MetadataVersionFn, PropertySerializer, BUNDLE_FORMAT,
};

use crate::config::ManagerConfig;
use crate::entity::{
    link_silently, sever_relations, unlink_silently, Entity, EntityKey, PropertyValue, SeverMode,
    WriteMode,
};
use crate::error::{CoreError, CoreResult};
use crate::events::{EntityAction, EntityChangedArgs, EventChannel};
use crate::key_generator::KeyGenerator;
use crate::merge::{self, Incoming, MergeAction, MergeStrategy};
use crate::metadata::{EntityType, MetadataStore};
use crate::state::EntityState;
use crate::types::ManagerId;
use cache::EntityCache;
use entitrack_codec::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

pub(crate) struct ManagerShared {
    id: ManagerId,
    config: ManagerConfig,
    cache: RwLock<EntityCache>,
    key_generator: Mutex<KeyGenerator>,
    property_changed_enabled: AtomicBool,
    entity_changed: EventChannel<EntityChangedArgs>,
}

/// Tracks a set of entities: one instance per identity, their states and
/// their relationships.
///
/// `EntityManager` is a cheap handle; clones share the same cache.
///
/// # Example
///
/// ```rust,ignore
/// use entitrack_core::EntityManager;
///
/// let em = EntityManager::with_metadata(store);
/// let order = em.create_entity("Order", &[("shipName", "Barnum".into())])?;
/// assert!(order.aspect().entity_state().is_added());
/// assert!(order.aspect().has_temp_key());
/// ```
#[derive(Clone)]
pub struct EntityManager {
    shared: Arc<ManagerShared>,
}

/// Whether a key can be used for an Added entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyStatus {
    Complete,
    NeedsTempKey,
    Missing,
}

fn key_status(entity_type: &EntityType, key: &EntityKey) -> KeyStatus {
    let defaulted = entity_type
        .key_properties()
        .zip(key.values())
        .filter(|(prop, value)| value.is_null() || prop.default_value() == **value)
        .count();
    if defaulted == 0 {
        KeyStatus::Complete
    } else if entity_type.auto_generated_key_type().generates_keys() {
        KeyStatus::NeedsTempKey
    } else if defaulted == key.values().len() {
        KeyStatus::Missing
    } else {
        KeyStatus::Complete
    }
}

fn missing_key(entity_type: &EntityType) -> CoreError {
    CoreError::MissingKey {
        type_name: entity_type.name().to_string(),
        key_names: entity_type
            .key_properties()
            .map(|p| p.name().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    }
}

impl EntityManager {
    /// Creates a manager.
    pub fn new(config: ManagerConfig) -> Self {
        let enabled = config.property_changed_enabled;
        Self {
            shared: Arc::new(ManagerShared {
                id: ManagerId::next(),
                config,
                cache: RwLock::new(EntityCache::default()),
                key_generator: Mutex::new(KeyGenerator::new()),
                property_changed_enabled: AtomicBool::new(enabled),
                entity_changed: EventChannel::new(),
            }),
        }
    }

    /// Creates a manager with default settings over `store`.
    pub fn with_metadata(store: Arc<MetadataStore>) -> Self {
        Self::new(ManagerConfig::new(store))
    }

    pub(crate) fn from_shared(shared: Arc<ManagerShared>) -> Self {
        Self { shared }
    }

    /// Returns the manager id.
    pub fn id(&self) -> ManagerId {
        self.shared.id
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.shared.config
    }

    /// Returns the metadata store.
    pub fn metadata_store(&self) -> &Arc<MetadataStore> {
        &self.shared.config.metadata_store
    }

    /// Channel notified of every cache-level change.
    pub fn entity_changed(&self) -> &EventChannel<EntityChangedArgs> {
        &self.shared.entity_changed
    }

    /// Returns true if both handles refer to the same manager.
    pub fn same(&self, other: &EntityManager) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Returns the number of cached entities.
    pub fn len(&self) -> usize {
        self.shared.cache.read().len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Creation and attach
    // ------------------------------------------------------------------

    /// Creates an entity and adds it to the cache as Added.
    ///
    /// Defaults, `initial` values and the type's initializer are applied
    /// first; a temporary key is assigned if the type generates keys and
    /// none was given.
    pub fn create_entity(&self, type_name: &str, initial: &[(&str, PropertyValue)]) -> CoreResult<Entity> {
        self.create_entity_with(type_name, initial, EntityState::Added, MergeStrategy::Disallowed)
    }

    /// Creates an entity and attaches it in `state`.
    ///
    /// If another instance with the same key is cached, `strategy` decides
    /// whether the new values merge into it; the cached instance is then
    /// returned. A `Detached` state leaves the new entity unattached.
    pub fn create_entity_with(
        &self,
        type_name: &str,
        initial: &[(&str, PropertyValue)],
        state: EntityState,
        strategy: MergeStrategy,
    ) -> CoreResult<Entity> {
        let entity = self.metadata_store().create_entity(type_name, initial)?;
        if state.is_detached() {
            return Ok(entity);
        }
        self.attach_core(&entity, state, strategy, EntityAction::Attach)
    }

    /// Adds a detached entity as Added, minting a temporary key if needed.
    pub fn add_entity(&self, entity: &Entity) -> CoreResult<Entity> {
        if let Some(owner) = entity.manager() {
            if owner.same(self) {
                return Err(CoreError::invalid_operation(format!(
                    "entity {} is already attached to this EntityManager",
                    entity.key()
                )));
            }
        }
        self.attach_entity(entity, EntityState::Added)
    }

    /// Attaches an entity in `state`, failing if another instance with the
    /// same key is already cached.
    pub fn attach_entity(&self, entity: &Entity, state: EntityState) -> CoreResult<Entity> {
        self.attach_entity_with(entity, state, MergeStrategy::Disallowed)
    }

    /// Attaches an entity in `state`, merging into a cached instance with
    /// the same key according to `strategy`.
    ///
    /// Detached entities reachable through navigation properties are
    /// attached in the same state.
    pub fn attach_entity_with(
        &self,
        entity: &Entity,
        state: EntityState,
        strategy: MergeStrategy,
    ) -> CoreResult<Entity> {
        self.attach_core(entity, state, strategy, EntityAction::Attach)
    }

    fn attach_core(
        &self,
        entity: &Entity,
        state: EntityState,
        strategy: MergeStrategy,
        action: EntityAction,
    ) -> CoreResult<Entity> {
        if state.is_detached() {
            return Err(CoreError::invalid_operation(
                "cannot attach an entity in the Detached state",
            ));
        }
        self.check_ownership(entity)?;
        if entity.manager().is_some() {
            return Ok(entity.clone());
        }
        let minted = state.is_added() && self.check_entity_key(entity)?;
        let key = entity.key();
        if let Some(existing) = self.find_entity_by_key(&key) {
            let action = match merge::resolve(Some(existing.state()), strategy, &key) {
                Err(CoreError::MergeConflict { key }) => return Err(CoreError::DuplicateKey { key }),
                other => other?,
            };
            if action != MergeAction::Skip {
                let values = entity.values_by_name();
                let originals = entity.original_values();
                let incoming = Incoming {
                    values: &values,
                    original_values: Some(&originals),
                    state,
                };
                merge::apply(&existing, action, &incoming)?;
                self.notify(EntityAction::MergeOnAttach, Some(&existing));
            }
            return Ok(existing);
        }
        self.register(entity, state, action)?;
        if minted {
            self.register_temp_key(key);
        }
        self.attach_related(entity, state)?;
        Ok(entity.clone())
    }

    fn check_ownership(&self, entity: &Entity) -> CoreResult<()> {
        if !Arc::ptr_eq(entity.metadata_store(), self.metadata_store()) {
            return Err(CoreError::ForeignMetadataStore {
                type_name: entity.type_name().to_string(),
            });
        }
        match entity.manager() {
            Some(owner) if !owner.same(self) => Err(CoreError::CrossManagerAttach {
                key: entity.key().to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Checks the key of an entity about to be added. Returns true if a
    /// temporary key was written.
    fn check_entity_key(&self, entity: &Entity) -> CoreResult<bool> {
        let entity_type = Arc::clone(entity.entity_type());
        match key_status(&entity_type, &entity.key()) {
            KeyStatus::Complete => Ok(false),
            KeyStatus::NeedsTempKey => self.assign_temp_key(entity).map(|_| true),
            KeyStatus::Missing => Err(missing_key(&entity_type)),
        }
    }

    /// Checks that a detached `entity` could be attached as Added under
    /// `key`, without changing anything.
    pub(crate) fn check_attachable(&self, entity: &Entity, key: &EntityKey) -> CoreResult<()> {
        self.check_ownership(entity)?;
        let entity_type = entity.entity_type();
        match key_status(entity_type, key) {
            KeyStatus::Missing => Err(missing_key(entity_type)),
            KeyStatus::NeedsTempKey if key.values().len() > 1 => {
                Err(CoreError::MultipartKeyUnsupported {
                    type_name: entity_type.name().to_string(),
                })
            }
            KeyStatus::NeedsTempKey => Ok(()),
            KeyStatus::Complete => self.ensure_key_available(key, entity),
        }
    }

    /// Fails if `key` is cached for an instance other than `entity`.
    pub(crate) fn ensure_key_available(&self, key: &EntityKey, entity: &Entity) -> CoreResult<()> {
        match self.shared.cache.read().get(key) {
            Some(other) if other != entity => Err(CoreError::DuplicateKey {
                key: key.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Puts `entity` in the cache in `state` and links it to cached
    /// relatives.
    fn register(&self, entity: &Entity, state: EntityState, action: EntityAction) -> CoreResult<()> {
        let key = entity.key();
        {
            let mut cache = self.shared.cache.write();
            if cache.contains(&key) {
                return Err(CoreError::DuplicateKey {
                    key: key.to_string(),
                });
            }
            cache.insert(key.clone(), entity.clone());
        }
        entity.set_manager(Some(Arc::downgrade(&self.shared)));
        entity.set_state(state);
        if matches!(state, EntityState::Added | EntityState::Unchanged) {
            entity.set_original_values(BTreeMap::new());
        }
        self.link_related(entity);
        if self.shared.config.validate_on_attach {
            entity.aspect().validate_entity();
        }
        debug!(key = %key, %state, ?action, "entity attached");
        self.notify(action, Some(entity));
        Ok(())
    }

    /// Attaches detached entities reachable from `entity`.
    fn attach_related(&self, entity: &Entity, state: EntityState) -> CoreResult<()> {
        let entity_type = Arc::clone(entity.entity_type());
        let mut related = Vec::new();
        for (index, nav) in entity_type.navigation_properties().iter().enumerate() {
            if nav.is_scalar() {
                related.extend(entity.reference(index));
            } else if let Some(array) = entity.collection_at(index) {
                related.extend(array.to_vec());
            }
        }
        for other in related {
            if other.state().is_detached() && other.manager().is_none() {
                self.attach_core(&other, state, MergeStrategy::Disallowed, EntityAction::Attach)?;
            }
        }
        Ok(())
    }

    /// Builds a new entity from raw values and caches it in `state`.
    pub(crate) fn materialize(
        &self,
        entity_type: &Arc<EntityType>,
        values: &BTreeMap<String, Value>,
        original_values: Option<&BTreeMap<String, Value>>,
        state: EntityState,
        action: EntityAction,
    ) -> CoreResult<Entity> {
        let entity = Entity::new(Arc::clone(self.metadata_store()), Arc::clone(entity_type));
        entity.load_values_raw(&merge::coerce_values(entity_type, values)?);
        self.register(&entity, state, action)?;
        entity.set_original_values(merge::filter_originals(entity_type, original_values));
        Ok(entity)
    }

    // ------------------------------------------------------------------
    // Detach
    // ------------------------------------------------------------------

    /// Removes an entity from the cache. Returns false if it was not
    /// attached here.
    ///
    /// The entity leaves every relationship; dependents keep their
    /// foreign keys and relink if it is attached again.
    pub fn detach_entity(&self, entity: &Entity) -> CoreResult<bool> {
        match entity.manager() {
            Some(owner) if owner.same(self) => {}
            _ => return Ok(false),
        }
        let key = entity.key();
        sever_relations(entity, SeverMode::Detach);
        {
            let mut cache = self.shared.cache.write();
            cache.remove(&key, entity);
            cache.unpark_entity(entity);
        }
        self.shared.key_generator.lock().unregister(&key);
        entity.set_manager(None);
        entity.set_state(EntityState::Detached);
        entity.set_original_values(BTreeMap::new());
        entity.aspect().clear_validation_errors();
        debug!(key = %key, "entity detached");
        self.notify(EntityAction::Detach, Some(entity));
        Ok(true)
    }

    /// Detaches every entity.
    pub fn clear(&self) {
        let entities = self.shared.cache.write().clear();
        for entity in &entities {
            entity.set_manager(None);
        }
        for entity in &entities {
            sever_relations(entity, SeverMode::Detach);
            entity.set_state(EntityState::Detached);
            entity.set_original_values(BTreeMap::new());
            entity.aspect().clear_validation_errors();
        }
        self.shared.key_generator.lock().clear();
        debug!(count = entities.len(), "entity manager cleared");
        self.notify(EntityAction::Clear, None);
    }

    // ------------------------------------------------------------------
    // Queries over the cache
    // ------------------------------------------------------------------

    fn check_types(&self, type_names: &[&str]) -> CoreResult<()> {
        for name in type_names {
            self.metadata_store().entity_type(name)?;
        }
        Ok(())
    }

    /// Returns cached entities, optionally filtered by type and state, in
    /// attach order. Unknown type names are an error.
    pub fn get_entities(
        &self,
        type_names: Option<&[&str]>,
        states: Option<&[EntityState]>,
    ) -> CoreResult<Vec<Entity>> {
        if let Some(names) = type_names {
            self.check_types(names)?;
        }
        let all = self.shared.cache.read().entities();
        Ok(all
            .into_iter()
            .filter(|e| type_names.map_or(true, |names| names.contains(&e.type_name())))
            .filter(|e| states.map_or(true, |states| states.contains(&e.state())))
            .collect())
    }

    /// Looks up a cached entity by type and key values.
    pub fn get_entity_by_key(&self, type_name: &str, values: Vec<Value>) -> CoreResult<Option<Entity>> {
        let entity_type = self.metadata_store().entity_type(type_name)?;
        let key_props: Vec<_> = entity_type.key_properties().collect();
        if key_props.len() != values.len() {
            return Err(CoreError::invalid_operation(format!(
                "type {type_name} has {} key properties but {} values were given",
                key_props.len(),
                values.len()
            )));
        }
        let values = key_props
            .iter()
            .zip(values)
            .map(|(prop, value)| prop.coerce(value))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(self.find_entity_by_key(&EntityKey::new(type_name, values)))
    }

    /// Looks up a cached entity by key.
    pub fn find_entity_by_key(&self, key: &EntityKey) -> Option<Entity> {
        self.shared.cache.read().get(key).cloned()
    }

    /// Returns Added, Modified and Deleted entities.
    pub fn get_changes(&self, type_names: Option<&[&str]>) -> CoreResult<Vec<Entity>> {
        self.get_entities(type_names, Some(&EntityState::CHANGED[..]))
    }

    /// Returns true if any entity has pending changes.
    pub fn has_changes(&self, type_names: Option<&[&str]>) -> CoreResult<bool> {
        Ok(!self.get_changes(type_names)?.is_empty())
    }

    /// Rejects all pending changes and returns the entities affected.
    pub fn reject_changes(&self) -> CoreResult<Vec<Entity>> {
        let changed = self.get_changes(None)?;
        for entity in &changed {
            entity.aspect().reject_changes()?;
        }
        debug!(count = changed.len(), "changes rejected");
        Ok(changed)
    }

    /// Accepts all pending changes, as after a successful save.
    pub fn accept_changes(&self) -> CoreResult<()> {
        let changed = self.get_changes(None)?;
        for entity in &changed {
            entity.aspect().accept_changes()?;
        }
        debug!(count = changed.len(), "changes accepted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Temporary keys
    // ------------------------------------------------------------------

    /// Replaces the key of an Added entity of this manager with a fresh
    /// temporary value and returns it.
    ///
    /// Composite keys are not supported, and the entity's type must have
    /// store-generated keys.
    pub fn generate_temp_key_value(&self, entity: &Entity) -> CoreResult<Value> {
        let entity_type = Arc::clone(entity.entity_type());
        if entity_type.key_property_indices().len() > 1 {
            return Err(CoreError::MultipartKeyUnsupported {
                type_name: entity_type.name().to_string(),
            });
        }
        if !entity_type.auto_generated_key_type().generates_keys() {
            return Err(CoreError::invalid_operation(format!(
                "{} keys are not store-generated; temporary keys are unavailable",
                entity_type.name()
            )));
        }
        let attached_here = entity.manager().is_some_and(|owner| owner.same(self));
        if !attached_here || !entity.state().is_added() {
            return Err(CoreError::invalid_operation(format!(
                "temporary keys are only assigned to Added entities of this EntityManager; {} is {}",
                entity.key(),
                entity.state()
            )));
        }
        let value = self.assign_temp_key(entity)?;
        self.register_temp_key(entity.key());
        Ok(value)
    }

    /// Writes a freshly minted temporary key into `entity`. The key is not
    /// recorded as temporary until the caller has the entity cached.
    fn assign_temp_key(&self, entity: &Entity) -> CoreResult<Value> {
        let entity_type = Arc::clone(entity.entity_type());
        let (index, value) = self.mint_temp_key(&entity_type)?;
        entity.write_data(index, value.clone(), WriteMode::USER)?;
        debug!(key = %entity.key(), "temporary key generated");
        Ok(value)
    }

    /// Mints a temporary value for the single key property of
    /// `entity_type` that no cached entity uses. Returns the property index
    /// and the value.
    pub(crate) fn mint_temp_key(&self, entity_type: &EntityType) -> CoreResult<(usize, Value)> {
        let indices = entity_type.key_property_indices();
        let &[index] = indices.as_slice() else {
            return Err(CoreError::MultipartKeyUnsupported {
                type_name: entity_type.name().to_string(),
            });
        };
        let data_type = entity_type.data_properties()[index].data_type();
        loop {
            let candidate = self
                .shared
                .key_generator
                .lock()
                .generate(entity_type.name(), data_type)?;
            let key = EntityKey::new(entity_type.name(), vec![candidate.clone()]);
            if !self.shared.cache.read().contains(&key) {
                return Ok((index, candidate));
            }
        }
    }

    pub(crate) fn register_temp_key(&self, key: EntityKey) {
        self.shared.key_generator.lock().register(key);
    }

    /// Returns true if `key` is a temporary key minted by this manager.
    pub fn is_temp_key(&self, key: &EntityKey) -> bool {
        self.shared.key_generator.lock().is_temp_key(key)
    }

    /// Returns every temporary key minted by this manager that is still in
    /// use.
    pub fn temp_keys(&self) -> Vec<EntityKey> {
        self.shared.key_generator.lock().temp_keys()
    }

    // ------------------------------------------------------------------
    // Query merge
    // ------------------------------------------------------------------

    /// Merges one query result row into the cache.
    ///
    /// An unknown identity is materialized as Unchanged. A cached one is
    /// merged according to `strategy` (or the configured default) and
    /// announced with a single property-changed notification whose
    /// property name is `None`.
    pub fn merge_query_result(
        &self,
        type_name: &str,
        values: &BTreeMap<String, Value>,
        strategy: Option<MergeStrategy>,
    ) -> CoreResult<Entity> {
        let entity_type = self.metadata_store().entity_type(type_name)?;
        let strategy = strategy.unwrap_or(self.shared.config.query_merge_strategy);
        let key = key_from_values(&entity_type, values)?;
        let existing = self.find_entity_by_key(&key);
        let action = merge::resolve(existing.as_ref().map(Entity::state), strategy, &key)?;
        match existing {
            None => self.materialize(
                &entity_type,
                values,
                None,
                EntityState::Unchanged,
                EntityAction::AttachOnQuery,
            ),
            Some(entity) if action == MergeAction::Skip => Ok(entity),
            Some(entity) => {
                let incoming = Incoming {
                    values,
                    original_values: None,
                    state: EntityState::Unchanged,
                };
                merge::apply(&entity, action, &incoming)?;
                self.notify(EntityAction::MergeOnQuery, Some(&entity));
                Ok(entity)
            }
        }
    }

    /// Merges a batch of query result rows, in order.
    pub fn merge_query_results(
        &self,
        type_name: &str,
        rows: &[BTreeMap<String, Value>],
        strategy: Option<MergeStrategy>,
    ) -> CoreResult<Vec<Entity>> {
        rows.iter()
            .map(|row| self.merge_query_result(type_name, row, strategy))
            .collect()
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Returns true if property-changed notifications are delivered.
    pub fn is_property_changed_enabled(&self) -> bool {
        self.shared.property_changed_enabled.load(Ordering::Acquire)
    }

    /// Turns property-changed notifications on or off for every entity in
    /// this manager.
    pub fn set_property_changed_enabled(&self, enabled: bool) {
        self.shared
            .property_changed_enabled
            .store(enabled, Ordering::Release);
    }

    /// Suppresses property-changed notifications until the returned guard
    /// is dropped.
    pub fn suppress_property_changed(&self) -> PropertyChangedSuppression {
        let previous = self
            .shared
            .property_changed_enabled
            .swap(false, Ordering::AcqRel);
        PropertyChangedSuppression {
            manager: self.clone(),
            previous,
        }
    }

    pub(crate) fn notify(&self, action: EntityAction, entity: Option<&Entity>) {
        if action == EntityAction::PropertyChange && !self.is_property_changed_enabled() {
            return;
        }
        if !self.shared.entity_changed.has_subscribers() {
            return;
        }
        self.shared.entity_changed.publish(&EntityChangedArgs {
            action,
            entity: entity.cloned(),
        });
    }

    // ------------------------------------------------------------------
    // Relationship fix-up
    // ------------------------------------------------------------------

    /// Cached entity with `key` that a child may link to.
    pub(crate) fn find_linkable(&self, key: &EntityKey) -> Option<Entity> {
        self.find_entity_by_key(key)
            .filter(|e| !e.state().is_deleted())
    }

    /// Remembers a child whose parent is not cached yet.
    pub(crate) fn park_child(&self, parent_key: EntityKey, nav_name: &str, child: &Entity) {
        trace!(parent = %parent_key, child = %child.key(), nav = nav_name, "child parked");
        self.shared.cache.write().park(parent_key, nav_name, child);
    }

    /// Re-indexes `entity` after its key changed.
    pub(crate) fn rekey(&self, entity: &Entity, old_key: &EntityKey) {
        let new_key = entity.key();
        let moved = {
            let mut cache = self.shared.cache.write();
            let moved = cache.remove(old_key, entity);
            if moved {
                cache.insert(new_key.clone(), entity.clone());
            }
            moved
        };
        self.shared.key_generator.lock().unregister(old_key);
        if moved {
            debug!(from = %old_key, to = %new_key, "entity re-keyed");
            self.adopt_parked(entity);
        }
    }

    /// Links `entity` to cached parents named by its foreign keys and to
    /// parked children waiting for its key. No events are published.
    pub(crate) fn link_related(&self, entity: &Entity) {
        let state = entity.state();
        if state.is_deleted() || state.is_detached() {
            return;
        }
        let entity_type = Arc::clone(entity.entity_type());
        for (index, nav) in entity_type.navigation_properties().iter().enumerate() {
            if !nav.is_scalar() || nav.foreign_key_names().is_empty() {
                continue;
            }
            let fk = entity.foreign_key(index);
            let parent = fk.as_ref().and_then(|k| self.find_linkable(k));
            match (parent, fk) {
                (Some(parent), _) => link_silently(entity, index, &parent),
                (None, fk) => {
                    if entity
                        .reference(index)
                        .is_some_and(|current| Some(current.key()) != fk)
                    {
                        unlink_silently(entity, index);
                    }
                    if let Some(fk) = fk {
                        self.park_child(fk, nav.name(), entity);
                    }
                }
            }
        }
        self.adopt_parked(entity);
    }

    fn adopt_parked(&self, parent: &Entity) {
        if parent.state().is_deleted() {
            return;
        }
        let key = parent.key();
        let waiting = self.shared.cache.write().take_parked(&key);
        for (nav_name, child) in waiting {
            let Some(index) = child.entity_type().navigation_index(&nav_name) else {
                continue;
            };
            let same_manager = child.manager().is_some_and(|m| m.same(self));
            if same_manager
                && !child.state().is_deleted()
                && child.foreign_key(index).as_ref() == Some(&key)
            {
                link_silently(&child, index, parent);
            }
        }
    }
}

/// Key of the row described by `values`.
pub(crate) fn key_from_values(
    entity_type: &EntityType,
    values: &BTreeMap<String, Value>,
) -> CoreResult<EntityKey> {
    let key_values = entity_type
        .key_properties()
        .map(|prop| {
            values
                .get(prop.name())
                .cloned()
                .ok_or_else(|| missing_key(entity_type))
                .and_then(|v| prop.coerce(v))
        })
        .collect::<CoreResult<Vec<_>>>()?;
    Ok(EntityKey::new(entity_type.name(), key_values))
}

impl fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityManager")
            .field("id", &self.shared.id)
            .field("entities", &self.len())
            .field("parked", &self.shared.cache.read().parked_count())
            .field("metadata", &self.metadata_store().name())
            .finish()
    }
}

/// Restores the previous property-changed setting when dropped.
#[must_use = "notifications are restored as soon as the guard is dropped"]
pub struct PropertyChangedSuppression {
    manager: EntityManager,
    previous: bool,
}

impl Drop for PropertyChangedSuppression {
    fn drop(&mut self) {
        self.manager.set_property_changed_enabled(self.previous);
    }
}
