//! Request validation, exact scoring and the registry of initialized indices.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};
use vecgraph_types::Value;

use crate::entity::{EntityId, SearchResult};
use crate::error::{Result, StorageError};
use crate::hnsw::{HnswConfig, HnswIndex};
use crate::index_config::{DistanceMetric, IndexConfig, KnnSearchParams, SearchAlgorithm};

/// Default upper bound for `limit`.
pub const DEFAULT_MAX_LIMIT: usize = 10_000;

/// HNSW candidates fetched per requested result, to leave room for filters.
const CANDIDATE_OVERSAMPLING: usize = 10;

/// Reject searches the index cannot answer.
pub fn validate_search(config: &IndexConfig, params: &KnnSearchParams, max_limit: usize) -> Result<()> {
    if params.vector_field != config.vector_field.field_name {
        return Err(StorageError::Validation(format!(
            "vector field {} does not match index {} vector field {}",
            params.vector_field, config.index_name, config.vector_field.field_name
        )));
    }
    if let Some(filter) = params.filters.iter().find(|f| !config.is_indexed(&f.field)) {
        return Err(StorageError::Validation(format!(
            "filter field {} is not indexed by {}",
            filter.field, config.index_name
        )));
    }
    if let Some(limit) = params.limit {
        if limit == 0 || limit > max_limit {
            return Err(StorageError::Validation(format!(
                "limit must be between 1 and {max_limit}, got {limit}"
            )));
        }
    }
    if let Some(radius) = params.radius {
        if !(0.0..=1.0).contains(&radius) {
            return Err(StorageError::Validation(format!(
                "radius must be between 0 and 1, got {radius}"
            )));
        }
    }
    if params.vector.dimension() != config.vector_field.dimension {
        return Err(StorageError::Validation(format!(
            "query vector has dimension {}, index {} expects {}",
            params.vector.dimension(),
            config.index_name,
            config.vector_field.dimension
        )));
    }
    Ok(())
}

/// Similarity where larger is closer.
pub fn similarity(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    match metric {
        DistanceMetric::Cosine => {
            let norms = norm(a) * norm(b);
            if norms == 0.0 {
                0.0
            } else {
                dot / norms
            }
        }
        DistanceMetric::InnerProduct => dot,
        DistanceMetric::Euclidean => {
            let distance: f32 = a
                .iter()
                .zip(b)
                .map(|(x, y)| (x - y) * (x - y))
                .sum::<f32>()
                .sqrt();
            1.0 / (1.0 + distance)
        }
    }
}

fn norm(values: &[f32]) -> f32 {
    values.iter().map(|v| v * v).sum::<f32>().sqrt()
}

/// Score, filter and rank candidate entities of the searched schema.
pub fn rank<'a>(
    config: &IndexConfig,
    params: &KnnSearchParams,
    candidates: impl IntoIterator<Item = (&'a EntityId, &'a BTreeMap<String, Value>)>,
) -> Result<Vec<SearchResult>> {
    let query = params.vector.values();
    let min_score = params.radius.map(|r| 1.0 - r);
    let mut results = Vec::new();
    for (id, fields) in candidates {
        if id.schema != params.schema {
            continue;
        }
        let Some(stored) = fields.get(&params.vector_field) else {
            continue;
        };
        let vector = stored.as_vector().ok_or_else(|| {
            StorageError::InvalidState(format!(
                "{id} field {} holds a {} value, expected a vector",
                params.vector_field,
                stored.type_name()
            ))
        })?;
        if vector.dimension() != config.vector_field.dimension {
            return Err(StorageError::InvalidState(format!(
                "{id} stores a vector of dimension {}, index {} expects {}",
                vector.dimension(),
                config.index_name,
                config.vector_field.dimension
            )));
        }
        if !params.filters.iter().all(|f| f.matches(fields.get(&f.field))) {
            continue;
        }
        let score = similarity(config.vector_field.distance_metric, query, vector.values());
        if min_score.is_some_and(|min| score < min) {
            continue;
        }
        let returned = params
            .fields_to_return
            .iter()
            .filter_map(|name| fields.get(name).map(|v| (name.clone(), v.clone())))
            .collect();
        results.push(SearchResult {
            object_id: id.object_id.clone(),
            score,
            fields: returned,
        });
    }
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.object_id.cmp(&b.object_id))
    });
    if let Some(limit) = params.limit {
        results.truncate(limit);
    }
    Ok(results)
}

/// An initialized search index.
#[derive(Debug)]
pub struct RegisteredIndex {
    pub config: IndexConfig,
    pub hnsw: Option<HnswIndex>,
}

impl RegisteredIndex {
    fn new(config: IndexConfig) -> Result<Self> {
        let hnsw = match config.vector_field.search_algorithm {
            SearchAlgorithm::Hnsw => Some(HnswIndex::new(HnswConfig::for_field(&config.vector_field))?),
            SearchAlgorithm::Flat => None,
        };
        Ok(Self { config, hnsw })
    }

    /// Row keys worth scoring, or `None` when every entity must be scanned.
    pub fn candidates(&self, params: &KnnSearchParams, total: usize) -> Result<Option<Vec<String>>> {
        let Some(hnsw) = &self.hnsw else {
            return Ok(None);
        };
        let wanted = params.limit.unwrap_or(total).max(1);
        let k = wanted.saturating_mul(CANDIDATE_OVERSAMPLING);
        if k >= hnsw.len() || params.radius.is_some() {
            return Ok(None);
        }
        hnsw.search(params.vector.values(), k).map(Some)
    }
}

/// Indices created through `init_search_indices`, keyed by name.
#[derive(Debug, Default)]
pub struct IndexRegistry {
    indices: DashMap<String, Arc<RegisteredIndex>>,
}

impl IndexRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index_name: &str) -> Result<Arc<RegisteredIndex>> {
        self.indices
            .get(index_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(index_name.to_string()))
    }

    pub fn contains(&self, index_name: &str) -> bool {
        self.indices.contains_key(index_name)
    }

    /// Register `config` unless already present. Returns whether it was (re)created.
    ///
    /// `existing` yields stored (row key, vector) pairs used to fill a new HNSW index.
    pub fn register<I>(&self, config: &IndexConfig, override_existing: bool, existing: impl FnOnce() -> Result<I>) -> Result<bool>
    where
        I: IntoIterator<Item = (String, Vec<f32>)>,
    {
        config.validate()?;
        if self.contains(&config.index_name) && !override_existing {
            debug!(index = %config.index_name, "Search index exists, skipping");
            return Ok(false);
        }
        let registered = RegisteredIndex::new(config.clone())?;
        if let Some(hnsw) = &registered.hnsw {
            let mut count = 0usize;
            for (key, vector) in existing()? {
                hnsw.upsert(&key, &vector)?;
                count += 1;
            }
            debug!(index = %config.index_name, vectors = count, "Filled HNSW index");
        }
        info!(
            index = %config.index_name,
            dimension = config.vector_field.dimension,
            algorithm = ?config.vector_field.search_algorithm,
            "Initialized search index"
        );
        self.indices
            .insert(config.index_name.clone(), Arc::new(registered));
        Ok(true)
    }

    pub fn has_hnsw(&self) -> bool {
        self.indices.iter().any(|entry| entry.value().hnsw.is_some())
    }

    /// Reject vectors that an HNSW index would refuse, before anything is written.
    pub fn check_write(&self, id: &EntityId, fields: &BTreeMap<String, Value>) -> Result<()> {
        for entry in self.indices.iter() {
            let registered = entry.value();
            if registered.hnsw.is_none() {
                continue;
            }
            let expected = registered.config.vector_field.dimension;
            if let Some(vector) = fields
                .get(&registered.config.vector_field.field_name)
                .and_then(Value::as_vector)
                .filter(|v| v.dimension() != expected)
            {
                return Err(StorageError::Validation(format!(
                    "{id} writes a vector of dimension {}, index {} expects {expected}",
                    vector.dimension(),
                    registered.config.index_name
                )));
            }
        }
        Ok(())
    }

    /// Keep HNSW indices in sync with a written entity.
    pub fn on_write(&self, id: &EntityId, fields: &BTreeMap<String, Value>) -> Result<()> {
        for entry in self.indices.iter() {
            let registered = entry.value();
            let Some(hnsw) = &registered.hnsw else {
                continue;
            };
            if let Some(vector) = fields
                .get(&registered.config.vector_field.field_name)
                .and_then(Value::as_vector)
            {
                hnsw.upsert(&id.row_key(), vector.values())?;
            }
        }
        Ok(())
    }
}
