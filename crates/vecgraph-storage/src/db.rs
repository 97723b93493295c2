//! RocksDB-backed storage.
//!
//! Provides:
//! - Database open with column family setup
//! - Atomic write batches per `write_entities` call, retried with backoff
//! - Field-level point reads and prefix scans
//! - Index configs persisted and restored on reopen

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use tracing::{debug, error, info, warn};
use vecgraph_types::Value;

use crate::column_families::{build_cf_descriptors, CF_ENTITIES, CF_INDEX_CONFIGS};
use crate::contract::StorageContract;
use crate::entity::{EntityData, EntityId, SearchResult};
use crate::error::{Result, StorageError};
use crate::index_config::{IndexConfig, KnnSearchParams};
use crate::keys::{FieldKey, IndexConfigKey};
use crate::search::{self, IndexRegistry, DEFAULT_MAX_LIMIT};

/// Attempts per batch write before giving up.
const MAX_WRITE_ATTEMPTS: u32 = 5;

type Rows = BTreeMap<EntityId, BTreeMap<String, Value>>;

/// Durable [`StorageContract`] implementation.
pub struct RocksStorage {
    db: DB,
    indices: IndexRegistry,
    max_limit: usize,
}

impl std::fmt::Debug for RocksStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStorage")
            .field("path", &self.db.path())
            .field("indices", &self.indices)
            .finish()
    }
}

impl RocksStorage {
    /// Open storage at the given path, creating if necessary.
    ///
    /// Previously initialized search indices are restored.
    pub fn open(path: &Path) -> Result<Self> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;
        let storage = Self {
            db,
            indices: IndexRegistry::new(),
            max_limit: DEFAULT_MAX_LIMIT,
        };
        let configs = storage.load_index_configs()?;
        if !configs.is_empty() {
            storage.register_indices(&configs, true)?;
        }
        Ok(storage)
    }

    pub fn with_max_limit(mut self, max_limit: usize) -> Self {
        self.max_limit = max_limit;
        self
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    fn load_index_configs(&self) -> Result<Vec<IndexConfig>> {
        let cf = self.cf(CF_INDEX_CONFIGS)?;
        let mut configs = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            configs.push(serde_json::from_slice(&value)?);
        }
        Ok(configs)
    }

    fn register_indices(&self, configs: &[IndexConfig], override_existing: bool) -> Result<()> {
        for config in configs {
            let field = config.vector_field.field_name.clone();
            let created = self.indices.register(config, override_existing, || {
                let rows = self.scan(&[])?;
                Ok(rows
                    .into_iter()
                    .filter_map(|(id, fields)| {
                        fields
                            .get(&field)
                            .and_then(Value::as_vector)
                            .map(|v| (id.row_key(), v.values().to_vec()))
                    })
                    .collect::<Vec<_>>())
            })?;
            if created {
                let cf = self.cf(CF_INDEX_CONFIGS)?;
                self.db.put_cf(
                    cf,
                    IndexConfigKey::new(&config.index_name).to_bytes(),
                    serde_json::to_vec(config)?,
                )?;
            }
        }
        Ok(())
    }

    /// All entities under `prefix`, grouped by entity.
    fn scan(&self, prefix: &[u8]) -> Result<Rows> {
        let cf = self.cf(CF_ENTITIES)?;
        let mut rows: Rows = BTreeMap::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            // Stop if we've passed the prefix
            if !key.starts_with(prefix) {
                break;
            }
            let field_key = FieldKey::from_bytes(&key)?;
            let value: Value = serde_json::from_slice(&value)?;
            rows.entry(field_key.entity_id())
                .or_default()
                .insert(field_key.field, value);
        }
        Ok(rows)
    }

    /// Write a batch, retrying transient failures with exponential backoff.
    fn write_with_retry(&self, build: impl Fn(&mut WriteBatch) -> Result<()>) -> Result<()> {
        let mut backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(10),
            max_elapsed_time: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        let mut attempts = 0;
        loop {
            attempts += 1;
            let mut batch = WriteBatch::default();
            build(&mut batch)?;
            match self.db.write(batch) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    if attempts >= MAX_WRITE_ATTEMPTS {
                        error!(error = %e, "Max write retries exceeded");
                        return Err(e.into());
                    }
                    match backoff.next_backoff() {
                        Some(duration) => {
                            warn!(
                                error = %e,
                                retry_in_ms = duration.as_millis(),
                                "Batch write failed, retrying"
                            );
                            std::thread::sleep(duration);
                        }
                        None => {
                            error!(error = %e, "Backoff exhausted");
                            return Err(e.into());
                        }
                    }
                }
            }
        }
    }
}

impl StorageContract for RocksStorage {
    fn write_entities(&self, entities: Vec<EntityData>) -> Result<()> {
        let cf = self.cf(CF_ENTITIES)?;
        let mut encoded = Vec::new();
        for entity in &entities {
            self.indices.check_write(&entity.id, &entity.fields)?;
            for (field, value) in &entity.fields {
                encoded.push((
                    FieldKey::new(&entity.id, field.clone()).to_bytes(),
                    serde_json::to_vec(value)?,
                ));
            }
        }
        self.write_with_retry(|batch| {
            for (key, value) in &encoded {
                batch.put_cf(cf, key, value);
            }
            Ok(())
        })?;
        for entity in entities.iter().filter(|_| self.indices.has_hnsw()) {
            if let Some(fields) = self.scan(&FieldKey::entity_prefix(&entity.id))?.remove(&entity.id) {
                self.indices.on_write(&entity.id, &fields)?;
            }
        }
        debug!(entities = entities.len(), fields = encoded.len(), "Wrote entities");
        Ok(())
    }

    fn read(
        &self,
        schema: &str,
        object_id: &str,
        field_names: &[String],
    ) -> Result<BTreeMap<String, Value>> {
        let cf = self.cf(CF_ENTITIES)?;
        let id = EntityId::new(schema, object_id);
        let mut fields = BTreeMap::new();
        for name in field_names {
            let key = FieldKey::new(&id, name.clone()).to_bytes();
            if let Some(bytes) = self.db.get_cf(cf, key)? {
                fields.insert(name.clone(), serde_json::from_slice(&bytes)?);
            }
        }
        Ok(fields)
    }

    fn init_search_indices(&self, configs: &[IndexConfig], override_existing: bool) -> Result<()> {
        self.register_indices(configs, override_existing)
    }

    fn knn_search(&self, config: &IndexConfig, params: &KnnSearchParams) -> Result<Vec<SearchResult>> {
        search::validate_search(config, params, self.max_limit)?;
        let registered = self.indices.get(&config.index_name)?;
        let schema_rows = || self.scan(&FieldKey::schema_prefix(&params.schema));
        let hnsw_total = registered.hnsw.as_ref().map(|h| h.len()).unwrap_or(0);
        let results = match registered.candidates(params, hnsw_total)? {
            Some(keys) => {
                let mut rows = Rows::new();
                for key in keys {
                    let Some((schema, object_id)) = key.split_once(':') else {
                        continue;
                    };
                    let id = EntityId::new(schema, object_id);
                    if let Some(fields) = self.scan(&FieldKey::entity_prefix(&id))?.remove(&id) {
                        rows.insert(id, fields);
                    }
                }
                let ranked = search::rank(config, params, rows.iter())?;
                if params.limit.is_some_and(|l| ranked.len() < l) {
                    search::rank(config, params, schema_rows()?.iter())?
                } else {
                    ranked
                }
            }
            None => search::rank(config, params, schema_rows()?.iter())?,
        };
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
