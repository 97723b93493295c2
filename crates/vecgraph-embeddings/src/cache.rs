//! Bounded content -> vector cache shared by model-based spaces.
//!
//! ## Thread Safety
//!
//! - LRU cache protected by Mutex; the lock is never held across an engine call
//! - Hit/miss counters are atomics

use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use lru::LruCache;
use tracing::debug;

use crate::error::{EmbeddingError, Result};

/// Cache hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Which inputs of a batch are already cached and which still need embedding.
#[derive(Debug, Default)]
struct CacheInfo {
    found: HashMap<String, Vec<f32>>,
    /// Unique uncached inputs in first-seen order
    to_embed: Vec<String>,
}

/// LRU cache keyed by raw input content. Capacity 0 disables caching.
#[derive(Debug)]
pub struct EmbeddingCache {
    entries: Option<Mutex<LruCache<String, Vec<f32>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EmbeddingCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|c| Mutex::new(LruCache::new(c))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries
            .as_ref()
            .and_then(|entries| entries.lock().ok().map(|cache| cache.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Return one vector per input, embedding only inputs not seen before.
    ///
    /// Duplicates within the batch are embedded once.
    pub fn get_or_embed<F>(&self, inputs: &[String], embed: F) -> Result<Vec<Vec<f32>>>
    where
        F: FnOnce(&[String]) -> Result<Vec<Vec<f32>>>,
    {
        let info = self.calculate_cache_info(inputs)?;
        let embedded = if info.to_embed.is_empty() {
            Vec::new()
        } else {
            let embedded = embed(&info.to_embed)?;
            if embedded.len() != info.to_embed.len() {
                return Err(EmbeddingError::Engine(format!(
                    "engine returned {} vectors for {} inputs",
                    embedded.len(),
                    info.to_embed.len()
                )));
            }
            embedded
        };
        self.update(&info.to_embed, &embedded)?;
        debug!(
            inputs = inputs.len(),
            cached = info.found.len(),
            embedded = info.to_embed.len(),
            "Embedding batch resolved"
        );
        Ok(Self::combine_vectors(inputs, info, embedded))
    }

    fn calculate_cache_info(&self, inputs: &[String]) -> Result<CacheInfo> {
        let mut info = CacheInfo::default();
        let mut seen = HashSet::new();
        let mut cache = match &self.entries {
            Some(entries) => Some(
                entries
                    .lock()
                    .map_err(|_| EmbeddingError::Cache("cache mutex poisoned".to_string()))?,
            ),
            None => None,
        };
        for input in inputs {
            if !seen.insert(input.as_str()) {
                continue;
            }
            match cache.as_mut().and_then(|c| c.get(input).cloned()) {
                Some(vector) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    info.found.insert(input.clone(), vector);
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    info.to_embed.push(input.clone());
                }
            }
        }
        Ok(info)
    }

    fn update(&self, inputs: &[String], vectors: &[Vec<f32>]) -> Result<()> {
        let Some(entries) = &self.entries else {
            return Ok(());
        };
        let mut cache = entries
            .lock()
            .map_err(|_| EmbeddingError::Cache("cache mutex poisoned".to_string()))?;
        for (input, vector) in inputs.iter().zip(vectors) {
            cache.put(input.clone(), vector.clone());
        }
        Ok(())
    }

    fn combine_vectors(inputs: &[String], mut info: CacheInfo, embedded: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
        info.found
            .extend(info.to_embed.into_iter().zip(embedded));
        inputs
            .iter()
            .map(|input| info.found.get(input).cloned().unwrap_or_default())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn lengths(inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|i| vec![i.len() as f32]).collect())
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_duplicates_embedded_once() {
        let cache = EmbeddingCache::new(10);
        let seen = Cell::new(0);
        let result = cache
            .get_or_embed(&strings(&["ab", "abc", "ab"]), |missing| {
                seen.set(missing.len());
                lengths(missing)
            })
            .unwrap();
        assert_eq!(seen.get(), 2);
        assert_eq!(result, vec![vec![2.0], vec![3.0], vec![2.0]]);
    }

    #[test]
    fn test_second_batch_hits_cache() {
        let cache = EmbeddingCache::new(10);
        cache.get_or_embed(&strings(&["x"]), lengths).unwrap();
        let result = cache
            .get_or_embed(&strings(&["x"]), |_| panic!("should be cached"))
            .unwrap();
        assert_eq!(result, vec![vec![1.0]]);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = EmbeddingCache::new(0);
        assert!(!cache.is_enabled());
        cache.get_or_embed(&strings(&["x"]), lengths).unwrap();
        let calls = Cell::new(0);
        cache
            .get_or_embed(&strings(&["x"]), |m| {
                calls.set(calls.get() + 1);
                lengths(m)
            })
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = EmbeddingCache::new(2);
        cache.get_or_embed(&strings(&["a", "b", "c"]), lengths).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_engine_count_mismatch() {
        let cache = EmbeddingCache::new(2);
        let err = cache
            .get_or_embed(&strings(&["a", "b"]), |_| Ok(vec![vec![1.0]]))
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::Engine(_)));
    }
}
