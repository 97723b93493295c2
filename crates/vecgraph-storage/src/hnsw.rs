//! HNSW candidate index using usearch.
//!
//! Parameters tuned for quality over speed:
//! - M = 16 (connections per layer)
//! - ef_construction = 200 (build-time quality)
//! - ef_search = 100 (search-time quality)
//!
//! The index only proposes candidates. Callers re-score them exactly, so
//! the metric here just has to rank roughly like the exact one.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, info};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::error::{Result, StorageError};
use crate::index_config::{DistanceMetric, Precision, VectorFieldDescriptor};

/// Initial reservation; grows by doubling.
const INITIAL_CAPACITY: usize = 1024;

/// HNSW index configuration
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Vector dimension
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub precision: Precision,
    /// Number of connections per layer (M parameter)
    pub connectivity: usize,
    /// Build-time search depth (ef_construction)
    pub expansion_add: usize,
    /// Query-time search depth (ef_search)
    pub expansion_search: usize,
}

impl HnswConfig {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            metric: DistanceMetric::Cosine,
            precision: Precision::Float32,
            connectivity: 16,
            expansion_add: 200,
            expansion_search: 100,
        }
    }

    pub fn for_field(field: &VectorFieldDescriptor) -> Self {
        Self {
            metric: field.distance_metric,
            precision: field.precision,
            ..Self::new(field.dimension)
        }
    }

    pub fn with_connectivity(mut self, m: usize) -> Self {
        self.connectivity = m;
        self
    }

    pub fn with_expansion(mut self, ef_add: usize, ef_search: usize) -> Self {
        self.expansion_add = ef_add;
        self.expansion_search = ef_search;
        self
    }

    fn options(&self) -> IndexOptions {
        IndexOptions {
            dimensions: self.dimension,
            metric: match self.metric {
                DistanceMetric::Cosine => MetricKind::Cos,
                DistanceMetric::InnerProduct => MetricKind::IP,
                DistanceMetric::Euclidean => MetricKind::L2sq,
            },
            quantization: match self.precision {
                Precision::Float32 => ScalarKind::F32,
                Precision::Float16 => ScalarKind::F16,
            },
            connectivity: self.connectivity,
            expansion_add: self.expansion_add,
            expansion_search: self.expansion_search,
            multi: false, // Single vector per key
        }
    }
}

/// Row keys mapped to usearch labels.
#[derive(Debug, Default)]
struct Labels {
    by_key: HashMap<String, u64>,
    by_label: HashMap<u64, String>,
    next: u64,
}

impl Labels {
    fn label_for(&mut self, key: &str) -> (u64, bool) {
        if let Some(&label) = self.by_key.get(key) {
            return (label, true);
        }
        let label = self.next;
        self.next += 1;
        self.by_key.insert(key.to_string(), label);
        self.by_label.insert(label, key.to_string());
        (label, false)
    }
}

/// HNSW index wrapper around usearch.
pub struct HnswIndex {
    index: RwLock<Index>,
    labels: RwLock<Labels>,
    config: HnswConfig,
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("config", &self.config)
            .field("len", &self.len())
            .finish()
    }
}

impl HnswIndex {
    pub fn new(config: HnswConfig) -> Result<Self> {
        info!(dim = config.dimension, metric = ?config.metric, "Creating HNSW index");
        let index = Index::new(&config.options()).map_err(|e| StorageError::Index(e.to_string()))?;
        index
            .reserve(INITIAL_CAPACITY)
            .map_err(|e| StorageError::Index(e.to_string()))?;
        Ok(Self {
            index: RwLock::new(index),
            labels: RwLock::new(Labels::default()),
            config,
        })
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn len(&self) -> usize {
        self.index.read().map(|i| i.size()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace the vector stored under `key`.
    #[allow(clippy::readonly_write_lock)] // usearch::Index uses interior mutability
    pub fn upsert(&self, key: &str, values: &[f32]) -> Result<()> {
        if values.len() != self.config.dimension {
            return Err(StorageError::InvalidState(format!(
                "vector for {key} has dimension {}, index expects {}",
                values.len(),
                self.config.dimension
            )));
        }
        let (label, existed) = self.labels.write().map_err(poisoned)?.label_for(key);
        let index = self.index.write().map_err(poisoned)?;
        if existed {
            index
                .remove(label)
                .map_err(|e| StorageError::Index(e.to_string()))?;
        }
        if index.size() + 1 > index.capacity() {
            let capacity = (index.capacity() * 2).max(INITIAL_CAPACITY);
            index
                .reserve(capacity)
                .map_err(|e| StorageError::Index(e.to_string()))?;
        }
        index
            .add(label, values)
            .map_err(|e| StorageError::Index(e.to_string()))?;
        debug!(key, label, "Indexed vector");
        Ok(())
    }

    /// Up to `k` nearest row keys.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<String>> {
        if query.len() != self.config.dimension {
            return Err(StorageError::Validation(format!(
                "query dimension {} does not match index dimension {}",
                query.len(),
                self.config.dimension
            )));
        }
        let index = self.index.read().map_err(poisoned)?;
        let matches = index
            .search(query, k)
            .map_err(|e| StorageError::Index(e.to_string()))?;
        let labels = self.labels.read().map_err(poisoned)?;
        let keys: Vec<String> = matches
            .keys
            .iter()
            .filter_map(|label| labels.by_label.get(label).cloned())
            .collect();
        debug!(k, found = keys.len(), "HNSW candidates");
        Ok(keys)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StorageError {
    StorageError::InvalidState("HNSW index lock poisoned".to_string())
}
