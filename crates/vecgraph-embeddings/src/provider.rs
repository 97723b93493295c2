//! Shared registry of built space embeddings.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::config::TransformationConfig;
use crate::engine::EngineRegistry;
use crate::error::Result;
use crate::transformation::SpaceEmbedding;

/// Builds each distinct space configuration once so ingestion and queries
/// share the same embedding caches.
#[derive(Debug)]
pub struct EmbeddingProvider {
    engines: EngineRegistry,
    cache_size: usize,
    embeddings: DashMap<String, Arc<SpaceEmbedding>>,
}

impl EmbeddingProvider {
    pub fn new(engines: EngineRegistry, cache_size: usize) -> Self {
        Self {
            engines,
            cache_size,
            embeddings: DashMap::new(),
        }
    }

    pub fn engines(&self) -> &EngineRegistry {
        &self.engines
    }

    pub fn get(&self, config: &TransformationConfig) -> Result<Arc<SpaceEmbedding>> {
        let key = serde_json::to_string(config)?;
        if let Some(existing) = self.embeddings.get(&key) {
            return Ok(existing.clone());
        }
        let built = Arc::new(SpaceEmbedding::new(
            config.clone(),
            &self.engines,
            self.cache_size,
        )?);
        debug!(kind = config.embedding.kind_name(), "Built space embedding");
        Ok(self.embeddings.entry(key).or_insert(built).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingConfig, ModelConfig};
    use crate::mock::MockEmbeddingEngine;

    #[test]
    fn test_same_config_shared() {
        let engines = EngineRegistry::new().with_engine(Arc::new(MockEmbeddingEngine::new("m", 4)));
        let provider = EmbeddingProvider::new(engines, 16);
        let config = TransformationConfig::new(EmbeddingConfig::Text(ModelConfig {
            engine: "m".into(),
            dimension: 4,
        }));
        let a = provider.get(&config).unwrap();
        let b = provider.get(&config).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
