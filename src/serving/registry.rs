//! Model registry boundary and cached handle loading

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::predictor::PredictorRef;
use crate::cache::{BoundedCache, CacheConfig, CacheStats};
use crate::error::{Result, ServingError};

/// Source of predictor handles, typically backed by experiment tracking storage
pub trait ModelRegistry: Send + Sync {
    /// Load the predictor for one version
    fn get(&self, model_id: &str, version: &str) -> Result<PredictorRef>;

    /// Registered versions, oldest first
    fn list_versions(&self, model_id: &str) -> Result<Vec<String>>;
}

/// Registry kept entirely in memory
#[derive(Default)]
pub struct InMemoryModelRegistry {
    models: RwLock<HashMap<String, Vec<(String, PredictorRef)>>>,
}

impl InMemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a version, replacing any predictor already stored under it
    pub fn register(&self, model_id: &str, version: &str, predictor: PredictorRef) {
        let mut models = self.models.write();
        let versions = models.entry(model_id.to_string()).or_default();
        match versions.iter_mut().find(|(v, _)| v.as_str() == version) {
            Some(slot) => slot.1 = predictor,
            None => versions.push((version.to_string(), predictor)),
        }
    }
}

impl ModelRegistry for InMemoryModelRegistry {
    fn get(&self, model_id: &str, version: &str) -> Result<PredictorRef> {
        let models = self.models.read();
        let versions = models
            .get(model_id)
            .ok_or_else(|| ServingError::ModelNotFound(model_id.to_string()))?;
        versions
            .iter()
            .find(|(v, _)| v.as_str() == version)
            .map(|(_, p)| Arc::clone(p))
            .ok_or_else(|| ServingError::VersionNotFound {
                model_id: model_id.to_string(),
                version: version.to_string(),
            })
    }

    fn list_versions(&self, model_id: &str) -> Result<Vec<String>> {
        self.models
            .read()
            .get(model_id)
            .map(|versions| versions.iter().map(|(v, _)| v.clone()).collect())
            .ok_or_else(|| ServingError::ModelNotFound(model_id.to_string()))
    }
}

/// Loads predictor handles through a bounded cache so each version is
/// fetched from the registry once and reused afterwards.
pub struct ModelLoader {
    registry: Arc<dyn ModelRegistry>,
    cache: BoundedCache<(String, String), PredictorRef>,
}

impl ModelLoader {
    pub fn new(registry: Arc<dyn ModelRegistry>, config: &CacheConfig) -> Self {
        Self {
            registry,
            cache: BoundedCache::from_config(config),
        }
    }

    pub fn registry(&self) -> &Arc<dyn ModelRegistry> {
        &self.registry
    }

    /// Return a cached handle, fetching from the registry on a miss
    pub fn load(&self, model_id: &str, version: &str) -> Result<PredictorRef> {
        let key = (model_id.to_string(), version.to_string());
        self.cache.get_or_try_insert_with(key, || {
            debug!(model_id, version, "Loading model handle from registry");
            self.registry.get(model_id, version)
        })
    }

    /// Drop a cached handle so the next load refetches it
    pub fn invalidate(&self, model_id: &str, version: &str) -> bool {
        self.cache.delete(&(model_id.to_string(), version.to_string()))
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
