//! Result store abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use printopt_core::EntityKey;

use super::record::{MetadataPatch, ModelMetadata};

/// Keyed storage for task outcomes.
///
/// Records are keyed by entity (model id), not by task. `merge` is a
/// get-or-create followed by a per-field overwrite and must be atomic per key.
pub trait ResultStore: Send + Sync {
    /// Merge a patch into the entity's record, creating it if missing.
    /// Returns the record as stored after the merge.
    fn merge(&self, key: &EntityKey, patch: &MetadataPatch)
        -> Result<ModelMetadata, ResultStoreError>;

    /// Load the entity's record.
    fn get(&self, key: &EntityKey) -> Result<Option<ModelMetadata>, ResultStoreError>;
}

impl<S: ResultStore + ?Sized> ResultStore for Arc<S> {
    fn merge(
        &self,
        key: &EntityKey,
        patch: &MetadataPatch,
    ) -> Result<ModelMetadata, ResultStoreError> {
        (**self).merge(key, patch)
    }

    fn get(&self, key: &EntityKey) -> Result<Option<ModelMetadata>, ResultStoreError> {
        (**self).get(key)
    }
}

/// Result store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResultStoreError {
    #[error("result store unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// In-memory result store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    records: RwLock<HashMap<EntityKey, ModelMetadata>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResultStore for InMemoryResultStore {
    fn merge(
        &self,
        key: &EntityKey,
        patch: &MetadataPatch,
    ) -> Result<ModelMetadata, ResultStoreError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| ResultStoreError::Storage("result store lock poisoned".into()))?;
        let record = records
            .entry(key.clone())
            .or_insert_with(|| ModelMetadata::empty(key.clone()));
        record.apply(patch);
        Ok(record.clone())
    }

    fn get(&self, key: &EntityKey) -> Result<Option<ModelMetadata>, ResultStoreError> {
        let records = self
            .records
            .read()
            .map_err(|_| ResultStoreError::Storage("result store lock poisoned".into()))?;
        Ok(records.get(key).cloned())
    }
}
