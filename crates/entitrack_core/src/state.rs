//! Entity state machine.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Change-tracking state of an entity.
///
/// Exactly one predicate (`is_added`, `is_unchanged`, ...) holds for any
/// state. Transitions are performed by the entity aspect and the manager;
/// application code requests them through those APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityState {
    /// Not tracked by any manager.
    Detached,
    /// New, not yet persisted.
    Added,
    /// Persisted and unmodified since the last clean point.
    Unchanged,
    /// Persisted with local modifications.
    Modified,
    /// Persisted and marked for deletion.
    Deleted,
}

impl EntityState {
    /// All states, in declaration order.
    pub const ALL: [EntityState; 5] = [
        EntityState::Detached,
        EntityState::Added,
        EntityState::Unchanged,
        EntityState::Modified,
        EntityState::Deleted,
    ];

    /// The states that count as pending changes.
    pub const CHANGED: [EntityState; 3] = [
        EntityState::Added,
        EntityState::Modified,
        EntityState::Deleted,
    ];

    /// Returns true if detached.
    #[must_use]
    pub fn is_detached(&self) -> bool {
        matches!(self, EntityState::Detached)
    }

    /// Returns true if added.
    #[must_use]
    pub fn is_added(&self) -> bool {
        matches!(self, EntityState::Added)
    }

    /// Returns true if unchanged.
    #[must_use]
    pub fn is_unchanged(&self) -> bool {
        matches!(self, EntityState::Unchanged)
    }

    /// Returns true if modified.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        matches!(self, EntityState::Modified)
    }

    /// Returns true if deleted.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        matches!(self, EntityState::Deleted)
    }

    /// Returns true if an entity in this state was loaded from (or accepted
    /// into) the backing store, so its key can no longer change.
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        matches!(
            self,
            EntityState::Unchanged | EntityState::Modified | EntityState::Deleted
        )
    }

    /// Returns the canonical name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            EntityState::Detached => "Detached",
            EntityState::Added => "Added",
            EntityState::Unchanged => "Unchanged",
            EntityState::Modified => "Modified",
            EntityState::Deleted => "Deleted",
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for EntityState {
    type Err = CoreError;

    /// Parses a state name, case-insensitively.
    fn from_str(s: &str) -> CoreResult<Self> {
        EntityState::ALL
            .into_iter()
            .find(|state| state.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::UnknownEntityState { name: s.to_string() })
    }
}
