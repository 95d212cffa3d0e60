//! Core identifier types.
//!
//! All identifiers are drawn from process-wide monotonic counters, so two
//! values of the same kind are never equal unless they name the same thing.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);
static NEXT_STORE: AtomicU64 = AtomicU64::new(1);
static NEXT_MANAGER: AtomicU64 = AtomicU64::new(1);

/// Identity of one entity instance.
///
/// Instance ids increase in creation order, which gives cache queries a
/// stable ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u64);

impl InstanceId {
    /// Allocates the next instance id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inst:{}", self.0)
    }
}

/// Handle returned by a subscription, used to unsubscribe.
///
/// Tokens are unique across every channel in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionToken(pub u64);

impl SubscriptionToken {
    /// Allocates the next token.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub:{}", self.0)
    }
}

/// Identity of a metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreId(pub u64);

impl StoreId {
    /// Allocates the next store id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_STORE.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store:{}", self.0)
    }
}

/// Identity of an entity manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManagerId(pub u64);

impl ManagerId {
    /// Allocates the next manager id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_MANAGER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ManagerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "em:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_ids_increase() {
        let a = InstanceId::next();
        let b = InstanceId::next();
        assert!(a < b);
    }

    #[test]
    fn tokens_are_distinct() {
        let a = SubscriptionToken::next();
        let b = SubscriptionToken::next();
        assert_ne!(a, b);
        assert_eq!(format!("{}", SubscriptionToken(7)), "sub:7");
    }

    #[test]
    fn manager_id_display() {
        assert_eq!(format!("{}", ManagerId(3)), "em:3");
        assert_eq!(format!("{}", StoreId(4)), "store:4");
    }
}
