//! Synchronous event channels.
//!
//! Entities, relation arrays and managers each own an [`EventChannel`].
//! Listeners run on the publishing thread, in subscription order. The
//! listener list is snapshotted before delivery, so a listener may
//! subscribe, unsubscribe or mutate entities without deadlocking; changes
//! to the list take effect from the next publish.

use crate::entity::{Entity, PropertyValue, RelationArray};
use crate::types::SubscriptionToken;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

type Listener<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// A list of listeners for one kind of event.
pub struct EventChannel<A> {
    listeners: RwLock<Vec<(SubscriptionToken, Listener<A>)>>,
}

impl<A> EventChannel<A> {
    /// Creates a channel with no listeners.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Adds a listener and returns its token.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionToken
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let token = SubscriptionToken::next();
        self.listeners.write().push((token, Arc::new(listener)));
        token
    }

    /// Removes a listener. Returns false if the token is unknown.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(t, _)| *t != token);
        listeners.len() != before
    }

    /// Delivers `args` to every listener.
    pub fn publish(&self, args: &A) {
        let snapshot: Vec<Listener<A>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in snapshot {
            listener(args);
        }
    }

    /// Returns the number of listeners.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns true if anyone is listening.
    pub fn has_subscribers(&self) -> bool {
        !self.listeners.read().is_empty()
    }

    /// Removes every listener.
    pub fn clear(&self) {
        self.listeners.write().clear();
    }
}

impl<A> Default for EventChannel<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for EventChannel<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Published when a property of an entity changes.
#[derive(Debug, Clone)]
pub struct PropertyChangedArgs {
    /// The entity that changed.
    pub entity: Entity,
    /// The property name, or `None` when a merge replaced many values at
    /// once.
    pub property_name: Option<String>,
    /// The previous value.
    pub old_value: PropertyValue,
    /// The new value.
    pub new_value: PropertyValue,
}

/// Published when a relation array gains or loses members.
#[derive(Debug, Clone)]
pub struct ArrayChangedArgs {
    /// The array that changed.
    pub relation: RelationArray,
    /// Entities added.
    pub added: Vec<Entity>,
    /// Entities removed.
    pub removed: Vec<Entity>,
}

/// Kind of manager-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityAction {
    /// Entity attached by the application.
    Attach,
    /// Entity attached from a query result.
    AttachOnQuery,
    /// Entity attached by an import.
    AttachOnImport,
    /// Entity detached.
    Detach,
    /// Query result merged into a cached entity.
    MergeOnQuery,
    /// Imported data merged into a cached entity.
    MergeOnImport,
    /// Attached data merged into a cached entity.
    MergeOnAttach,
    /// A property changed.
    PropertyChange,
    /// The entity state changed.
    EntityStateChange,
    /// Changes were accepted.
    AcceptChanges,
    /// Changes were rejected.
    RejectChanges,
    /// The manager was cleared.
    Clear,
}

impl EntityAction {
    /// Returns true for actions that add an entity to the cache.
    pub fn is_attach(&self) -> bool {
        matches!(
            self,
            EntityAction::Attach | EntityAction::AttachOnQuery | EntityAction::AttachOnImport
        )
    }

    /// Returns true for merge actions.
    pub fn is_merge(&self) -> bool {
        matches!(
            self,
            EntityAction::MergeOnQuery | EntityAction::MergeOnImport | EntityAction::MergeOnAttach
        )
    }
}

/// Published by a manager for every cache-level change.
#[derive(Debug, Clone)]
pub struct EntityChangedArgs {
    /// What happened.
    pub action: EntityAction,
    /// The entity concerned; `None` for [`EntityAction::Clear`].
    pub entity: Option<Entity>,
}
