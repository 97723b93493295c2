//! Embedding engine trait and registry.
//!
//! Engines are the external collaborators behind text and image spaces:
//! a batched, stateless `embed(inputs, is_query)` service.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{EmbeddingError, Result};

/// Engine information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInfo {
    /// Engine name used to look it up from space configurations
    pub name: String,
    /// Embedding dimension
    pub dimension: usize,
}

/// Trait for embedding engines.
///
/// Implementations must be thread-safe (Send + Sync) for concurrent use.
pub trait EmbeddingEngine: Send + Sync {
    /// Get engine information
    fn info(&self) -> &EngineInfo;

    /// Embed a batch of inputs. Returns one vector per input, in order.
    fn embed(&self, inputs: &[String], is_query: bool) -> Result<Vec<Vec<f32>>>;

    /// Embed a single input.
    fn embed_one(&self, input: &str, is_query: bool) -> Result<Vec<f32>> {
        self.embed(&[input.to_string()], is_query)?
            .pop()
            .ok_or_else(|| EmbeddingError::Engine("engine returned no vector".to_string()))
    }
}

/// Engines available to spaces, keyed by name.
///
/// Built once and passed to whatever needs to resolve engines.
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn EmbeddingEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an engine under its own name, replacing any previous one.
    pub fn register(&mut self, engine: Arc<dyn EmbeddingEngine>) {
        self.engines.insert(engine.info().name.clone(), engine);
    }

    pub fn with_engine(mut self, engine: Arc<dyn EmbeddingEngine>) -> Self {
        self.register(engine);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn EmbeddingEngine>> {
        self.engines
            .get(name)
            .cloned()
            .ok_or_else(|| EmbeddingError::EngineNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.engines.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEmbeddingEngine;

    #[test]
    fn test_registry_lookup() {
        let registry =
            EngineRegistry::new().with_engine(Arc::new(MockEmbeddingEngine::new("mini", 8)));
        assert_eq!(registry.get("mini").unwrap().info().dimension, 8);
        assert!(matches!(
            registry.get("missing"),
            Err(EmbeddingError::EngineNotFound(_))
        ));
    }

    #[test]
    fn test_embed_one_default() {
        let engine = MockEmbeddingEngine::new("mini", 4);
        let v = engine.embed_one("hello world", false).unwrap();
        assert_eq!(v.len(), 4);
    }
}
