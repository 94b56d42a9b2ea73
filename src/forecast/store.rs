//! Versioned persistence for trained models.
//!
//! Stores are append-only: a retrain writes a new version and never
//! touches the old one, so a forecast produced from version 3 stays
//! explainable after version 4 lands. The in-memory implementation backs
//! tests and single-process deployments; the trait seam is where a
//! database-backed store would plug in.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use crate::error::AnalyticsError;
use crate::forecast::TrainedModel;
use crate::model::SensorKey;

#[async_trait]
pub trait ModelStore: Send + Sync {
    /// Appends one immutable version. Re-storing an existing version for
    /// the same key is a conflict.
    async fn put(&self, record: TrainedModel) -> Result<(), AnalyticsError>;

    /// Highest-version record for a key, if any.
    async fn latest(&self, key: &SensorKey) -> Result<Option<TrainedModel>, AnalyticsError>;

    /// One specific version, if stored.
    async fn version(
        &self,
        key: &SensorKey,
        version: u32,
    ) -> Result<Option<TrainedModel>, AnalyticsError>;

    /// All stored version numbers for a key, ascending.
    async fn versions(&self, key: &SensorKey) -> Result<Vec<u32>, AnalyticsError>;
}

#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    inner: RwLock<HashMap<SensorKey, BTreeMap<u32, TrainedModel>>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelStore for InMemoryModelStore {
    async fn put(&self, record: TrainedModel) -> Result<(), AnalyticsError> {
        let mut inner = self.inner.write();
        let versions = inner.entry(record.key.clone()).or_default();
        if versions.contains_key(&record.version) {
            return Err(AnalyticsError::Internal(format!(
                "model version {} already stored for {}",
                record.version, record.key
            )));
        }
        versions.insert(record.version, record);
        Ok(())
    }

    async fn latest(&self, key: &SensorKey) -> Result<Option<TrainedModel>, AnalyticsError> {
        let inner = self.inner.read();
        Ok(inner
            .get(key)
            .and_then(|versions| versions.values().next_back().cloned()))
    }

    async fn version(
        &self,
        key: &SensorKey,
        version: u32,
    ) -> Result<Option<TrainedModel>, AnalyticsError> {
        let inner = self.inner.read();
        Ok(inner
            .get(key)
            .and_then(|versions| versions.get(&version).cloned()))
    }

    async fn versions(&self, key: &SensorKey) -> Result<Vec<u32>, AnalyticsError> {
        let inner = self.inner.read();
        Ok(inner
            .get(key)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
