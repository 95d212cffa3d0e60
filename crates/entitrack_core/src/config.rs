//! Entity manager configuration.

use crate::merge::MergeStrategy;
use crate::metadata::MetadataStore;
use std::fmt;
use std::sync::Arc;

/// Configuration for creating an [`EntityManager`](crate::EntityManager).
#[derive(Clone)]
pub struct ManagerConfig {
    /// Types the manager can track.
    pub metadata_store: Arc<MetadataStore>,

    /// Strategy used by query merges when the caller gives none.
    pub query_merge_strategy: MergeStrategy,

    /// Strategy used by imports when the caller gives none.
    pub import_merge_strategy: MergeStrategy,

    /// Whether to validate entities as they are attached.
    pub validate_on_attach: bool,

    /// Whether to validate after every tracked property write.
    pub validate_on_property_change: bool,

    /// Initial value of the property-changed notification switch.
    pub property_changed_enabled: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new(Arc::new(MetadataStore::new("")))
    }
}

impl ManagerConfig {
    /// Creates a configuration with default settings over `metadata_store`.
    #[must_use]
    pub fn new(metadata_store: Arc<MetadataStore>) -> Self {
        Self {
            metadata_store,
            query_merge_strategy: MergeStrategy::PreserveChanges,
            import_merge_strategy: MergeStrategy::PreserveChanges,
            validate_on_attach: true,
            validate_on_property_change: false,
            property_changed_enabled: true,
        }
    }

    /// Sets the metadata store.
    #[must_use]
    pub fn metadata_store(mut self, store: Arc<MetadataStore>) -> Self {
        self.metadata_store = store;
        self
    }

    /// Sets the default query merge strategy.
    #[must_use]
    pub fn query_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.query_merge_strategy = strategy;
        self
    }

    /// Sets the default import merge strategy.
    #[must_use]
    pub fn import_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.import_merge_strategy = strategy;
        self
    }

    /// Sets whether to validate on attach.
    #[must_use]
    pub fn validate_on_attach(mut self, value: bool) -> Self {
        self.validate_on_attach = value;
        self
    }

    /// Sets whether to validate on property change.
    #[must_use]
    pub fn validate_on_property_change(mut self, value: bool) -> Self {
        self.validate_on_property_change = value;
        self
    }

    /// Sets whether property-changed notifications start enabled.
    #[must_use]
    pub fn property_changed_enabled(mut self, value: bool) -> Self {
        self.property_changed_enabled = value;
        self
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("metadata_store", &self.metadata_store.name())
            .field("query_merge_strategy", &self.query_merge_strategy)
            .field("import_merge_strategy", &self.import_merge_strategy)
            .field("validate_on_attach", &self.validate_on_attach)
            .field("validate_on_property_change", &self.validate_on_property_change)
            .field("property_changed_enabled", &self.property_changed_enabled)
            .finish()
    }
}
