//! Change-tracking view of an entity.

use super::{sever_relations, Entity, EntityKey, SeverMode, WriteMode};
use crate::error::{CoreError, CoreResult};
use crate::events::{EntityAction, EventChannel, PropertyChangedArgs};
use crate::manager::EntityManager;
use crate::state::EntityState;
use crate::validation::ValidationError;
use entitrack_codec::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// State, original values, validation results and lifecycle operations of
/// one entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityAspect<'a> {
    entity: &'a Entity,
}

impl<'a> EntityAspect<'a> {
    pub(crate) fn new(entity: &'a Entity) -> Self {
        Self { entity }
    }

    /// Returns the entity.
    pub fn entity(&self) -> &'a Entity {
        self.entity
    }

    /// Returns the current state.
    pub fn entity_state(&self) -> EntityState {
        self.entity.state()
    }

    /// Returns the owning manager, if attached.
    pub fn entity_manager(&self) -> Option<EntityManager> {
        self.entity.manager()
    }

    /// Returns the entity key.
    pub fn key(&self) -> EntityKey {
        self.entity.key()
    }

    /// Returns true if the key was minted by the manager's key generator.
    pub fn has_temp_key(&self) -> bool {
        self.entity
            .manager()
            .is_some_and(|m| m.is_temp_key(&self.entity.key()))
    }

    /// Values of mapped properties as they were at the last clean point,
    /// for properties changed since.
    pub fn original_values(&self) -> BTreeMap<String, Value> {
        self.entity.original_values()
    }

    /// Original value of one property, if it changed.
    pub fn original_value(&self, name: &str) -> Option<Value> {
        self.entity.inner.data.read().original_values.get(name).cloned()
    }

    /// Marks the entity for deletion.
    ///
    /// Added entities are simply detached. Unchanged and Modified entities
    /// become Deleted and leave every relationship; their foreign keys are
    /// kept so the delete can be rejected.
    pub fn set_deleted(&self) -> CoreResult<()> {
        let entity = self.entity;
        match entity.state() {
            EntityState::Detached => Err(CoreError::invalid_operation(format!(
                "cannot delete detached entity {}",
                entity.key()
            ))),
            EntityState::Deleted => Ok(()),
            EntityState::Added => {
                if let Some(manager) = entity.manager() {
                    manager.detach_entity(entity)?;
                }
                Ok(())
            }
            EntityState::Unchanged | EntityState::Modified => {
                {
                    let mut data = entity.inner.data.write();
                    data.state = EntityState::Deleted;
                    data.validation_errors.clear();
                }
                debug!(key = %entity.key(), "entity deleted");
                entity.notify_manager(EntityAction::EntityStateChange);
                sever_relations(entity, SeverMode::Delete);
                Ok(())
            }
        }
    }

    /// Marks an Unchanged entity as Modified.
    pub fn set_modified(&self) -> CoreResult<()> {
        match self.entity.state() {
            EntityState::Unchanged => {
                self.entity.mark_modified();
                Ok(())
            }
            EntityState::Modified => Ok(()),
            other => Err(CoreError::invalid_operation(format!(
                "cannot mark {other} entity {} as Modified",
                self.entity.key()
            ))),
        }
    }

    /// Makes the current values the clean point without saving.
    ///
    /// A Deleted entity is resurrected as Unchanged and relinked.
    pub fn set_unchanged(&self) -> CoreResult<()> {
        let entity = self.entity;
        match entity.state() {
            EntityState::Detached => Err(CoreError::invalid_operation(format!(
                "cannot mark detached entity {} as Unchanged",
                entity.key()
            ))),
            EntityState::Deleted => {
                self.make_clean();
                if let Some(manager) = entity.manager() {
                    manager.link_related(entity);
                }
                Ok(())
            }
            _ => self.accept_changes(),
        }
    }

    /// Accepts pending changes.
    ///
    /// Deleted entities are detached; every other tracked entity becomes
    /// Unchanged with no original values.
    pub fn accept_changes(&self) -> CoreResult<()> {
        let entity = self.entity;
        match entity.state() {
            EntityState::Detached => Ok(()),
            EntityState::Deleted => {
                entity.notify_manager(EntityAction::AcceptChanges);
                if let Some(manager) = entity.manager() {
                    manager.detach_entity(entity)?;
                }
                Ok(())
            }
            _ => {
                self.make_clean();
                entity.notify_manager(EntityAction::AcceptChanges);
                Ok(())
            }
        }
    }

    /// Reverts pending changes.
    ///
    /// Added entities are detached. Modified and Deleted entities get
    /// their original values back, return to Unchanged and are relinked
    /// to related entities in the cache.
    pub fn reject_changes(&self) -> CoreResult<()> {
        let entity = self.entity;
        match entity.state() {
            EntityState::Detached | EntityState::Unchanged => Ok(()),
            EntityState::Added => {
                if let Some(manager) = entity.manager() {
                    manager.detach_entity(entity)?;
                }
                Ok(())
            }
            EntityState::Modified | EntityState::Deleted => {
                let originals = entity.original_values();
                let previous = entity.set_state(EntityState::Unchanged);
                let entity_type = entity.entity_type().clone();
                for (name, value) in originals {
                    if let Some(index) = entity_type.data_property_index(&name) {
                        entity.write_data(index, value, WriteMode::RESTORE)?;
                    }
                }
                entity.set_original_values(BTreeMap::new());
                if let Some(manager) = entity.manager() {
                    manager.link_related(entity);
                    manager.notify(EntityAction::RejectChanges, Some(entity));
                    if previous != EntityState::Unchanged {
                        manager.notify(EntityAction::EntityStateChange, Some(entity));
                    }
                }
                debug!(key = %entity.key(), from = %previous, "changes rejected");
                Ok(())
            }
        }
    }

    /// Runs the type's validators and stores the result. Returns true if
    /// the entity is valid.
    pub fn validate_entity(&self) -> bool {
        let entity = self.entity;
        let errors: Vec<ValidationError> = entity
            .metadata_store()
            .validators(entity.type_name())
            .iter()
            .flat_map(|v| v.validate(entity))
            .collect();
        let valid = errors.is_empty();
        entity.inner.data.write().validation_errors = errors;
        valid
    }

    /// Returns the errors from the last validation.
    pub fn validation_errors(&self) -> Vec<ValidationError> {
        self.entity.inner.data.read().validation_errors.clone()
    }

    /// Adds an error found outside the registered validators.
    pub fn add_validation_error(&self, error: ValidationError) {
        self.entity.inner.data.write().validation_errors.push(error);
    }

    /// Discards stored validation errors.
    pub fn clear_validation_errors(&self) {
        self.entity.inner.data.write().validation_errors.clear();
    }

    /// Channel notified on every property change of this entity.
    pub fn property_changed(&self) -> &'a EventChannel<PropertyChangedArgs> {
        self.entity.property_changed_channel()
    }

    fn make_clean(&self) {
        let changed = {
            let mut data = self.entity.inner.data.write();
            data.original_values.clear();
            std::mem::replace(&mut data.state, EntityState::Unchanged) != EntityState::Unchanged
        };
        if changed {
            self.entity.notify_manager(EntityAction::EntityStateChange);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::northwind;

    #[test]
    fn detached_entities_cannot_be_deleted() {
        let store = northwind();
        let order = store.create_entity("Order", &[]).unwrap();
        assert!(order.aspect().set_deleted().is_err());
        assert!(order.aspect().set_modified().is_err());
        assert!(order.aspect().accept_changes().is_ok());
        assert_eq!(order.aspect().entity_state(), EntityState::Detached);
        assert!(order.aspect().entity_manager().is_none());
        assert!(!order.aspect().has_temp_key());
    }

    #[test]
    fn validation_errors_are_stored() {
        let store = northwind();
        let order = store.create_entity("Order", &[]).unwrap();
        assert!(order.aspect().validate_entity());
        order
            .aspect()
            .add_validation_error(ValidationError::new("custom", "bad"));
        assert_eq!(order.aspect().validation_errors().len(), 1);
        order.aspect().clear_validation_errors();
        assert!(order.aspect().validation_errors().is_empty());
    }
}
