//! Volatile storage backed by a concurrent map.

use std::collections::BTreeMap;

use dashmap::DashMap;
use tracing::debug;
use vecgraph_types::Value;

use crate::contract::StorageContract;
use crate::entity::{EntityData, EntityId, SearchResult};
use crate::error::Result;
use crate::index_config::{IndexConfig, KnnSearchParams};
use crate::search::{self, IndexRegistry, DEFAULT_MAX_LIMIT};

/// In-memory [`StorageContract`] keyed by `schema:object_id`.
#[derive(Debug)]
pub struct InMemoryStorage {
    entities: DashMap<String, (EntityId, BTreeMap<String, Value>)>,
    indices: IndexRegistry,
    max_limit: usize,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            indices: IndexRegistry::new(),
            max_limit: DEFAULT_MAX_LIMIT,
        }
    }

    pub fn with_max_limit(mut self, max_limit: usize) -> Self {
        self.max_limit = max_limit;
        self
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl StorageContract for InMemoryStorage {
    fn write_entities(&self, entities: Vec<EntityData>) -> Result<()> {
        let count = entities.len();
        for entity in &entities {
            self.indices.check_write(&entity.id, &entity.fields)?;
        }
        for entity in entities {
            let key = entity.id.row_key();
            let mut row = self
                .entities
                .entry(key)
                .or_insert_with(|| (entity.id.clone(), BTreeMap::new()));
            row.1.extend(entity.fields);
            self.indices.on_write(&entity.id, &row.1)?;
        }
        debug!(entities = count, "Wrote entities");
        Ok(())
    }

    fn read(
        &self,
        schema: &str,
        object_id: &str,
        field_names: &[String],
    ) -> Result<BTreeMap<String, Value>> {
        let key = EntityId::new(schema, object_id).row_key();
        let Some(row) = self.entities.get(&key) else {
            return Ok(BTreeMap::new());
        };
        Ok(field_names
            .iter()
            .filter_map(|name| row.1.get(name).map(|v| (name.clone(), v.clone())))
            .collect())
    }

    fn init_search_indices(&self, configs: &[IndexConfig], override_existing: bool) -> Result<()> {
        for config in configs {
            let field = &config.vector_field.field_name;
            self.indices.register(config, override_existing, || {
                Ok(self
                    .entities
                    .iter()
                    .filter_map(|row| {
                        let (id, fields) = row.value();
                        fields
                            .get(field)
                            .and_then(Value::as_vector)
                            .map(|v| (id.row_key(), v.values().to_vec()))
                    })
                    .collect::<Vec<_>>())
            })?;
        }
        Ok(())
    }

    fn knn_search(&self, config: &IndexConfig, params: &KnnSearchParams) -> Result<Vec<SearchResult>> {
        search::validate_search(config, params, self.max_limit)?;
        let registered = self.indices.get(&config.index_name)?;
        let rows: Vec<(EntityId, BTreeMap<String, Value>)> =
            match registered.candidates(params, self.entities.len())? {
                Some(keys) => keys
                    .iter()
                    .filter_map(|k| self.entities.get(k).map(|row| row.value().clone()))
                    .collect(),
                None => self.entities.iter().map(|row| row.value().clone()).collect(),
            };
        let mut results = search::rank(config, params, rows.iter().map(|(id, f)| (id, f)))?;
        if registered.hnsw.is_some() && params.limit.is_some_and(|l| results.len() < l) {
            // approximate candidates were filtered out; fall back to a full scan
            let all: Vec<_> = self.entities.iter().map(|row| row.value().clone()).collect();
            results = search::rank(config, params, all.iter().map(|(id, f)| (id, f)))?;
        }
        debug!(
            index = %config.index_name,
            schema = %params.schema,
            limit = ?params.limit,
            found = results.len(),
            "knn search"
        );
        Ok(results)
    }
}
