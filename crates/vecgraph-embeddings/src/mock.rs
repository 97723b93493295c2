//! Deterministic engine for tests and local runs.
//!
//! Each lowercase token is hashed into one of `dimension` buckets, so texts
//! sharing words end up close to each other.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::engine::{EmbeddingEngine, EngineInfo};
use crate::error::{EmbeddingError, Result};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug)]
pub struct MockEmbeddingEngine {
    info: EngineInfo,
    calls: AtomicUsize,
    embedded_inputs: AtomicUsize,
}

impl MockEmbeddingEngine {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            info: EngineInfo {
                name: name.into(),
                dimension,
            },
            calls: AtomicUsize::new(0),
            embedded_inputs: AtomicUsize::new(0),
        }
    }

    /// Number of `embed` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// Number of individual inputs embedded so far.
    pub fn embedded_inputs(&self) -> usize {
        self.embedded_inputs.load(Ordering::Relaxed)
    }

    fn bucket(&self, token: &str) -> usize {
        let hash = token.bytes().fold(FNV_OFFSET, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
        });
        (hash % self.info.dimension as u64) as usize
    }
}

impl EmbeddingEngine for MockEmbeddingEngine {
    fn info(&self) -> &EngineInfo {
        &self.info
    }

    fn embed(&self, inputs: &[String], _is_query: bool) -> Result<Vec<Vec<f32>>> {
        if self.info.dimension == 0 {
            return Err(EmbeddingError::Engine(format!(
                "engine {} has zero dimension",
                self.info.name
            )));
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.embedded_inputs.fetch_add(inputs.len(), Ordering::Relaxed);
        Ok(inputs
            .iter()
            .map(|input| {
                let mut values = vec![0.0; self.info.dimension];
                for token in input
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                {
                    values[self.bucket(&token.to_lowercase())] += 1.0;
                }
                values
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic() {
        let engine = MockEmbeddingEngine::new("mock", 16);
        let a = engine.embed(&["Rust graph engine".into()], false).unwrap();
        let b = engine.embed(&["rust GRAPH engine".into()], true).unwrap();
        assert_eq!(a, b);
        assert_eq!(engine.calls(), 2);
        assert_eq!(engine.embedded_inputs(), 2);
    }

    #[test]
    fn test_token_counts() {
        let engine = MockEmbeddingEngine::new("mock", 16);
        let v = engine.embed_one("a a a", false).unwrap();
        assert_eq!(v.iter().sum::<f32>(), 3.0);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let engine = MockEmbeddingEngine::new("mock", 0);
        assert!(engine.embed(&["x".into()], false).is_err());
    }
}
