//! The application facade: one index, its evaluators and the storage they share.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};
use vecgraph_embeddings::{EmbeddingProvider, EngineRegistry};
use vecgraph_graph::{Index, NodeId};
use vecgraph_online::{
    ConcurrentExecutor, EntityCache, EventRecord, OnlineDagEvaluator, OnlineSchemaDagCompiler,
    ParsedRecord, ORIGIN_ID_FIELD,
};
use vecgraph_query::{QueryDag, QueryDagCompiler, QueryInputs, QueryNodeInput};
use vecgraph_storage::{
    FieldDescriptor, IndexConfig, KnnSearchParams, SearchAlgorithm, SearchResult, StorageContract,
    VectorFieldDescriptor,
};
use vecgraph_types::{ExecutionContext, Settings};

use crate::error::{Result, ServiceError};
use crate::request::QueryRequest;

/// Ingests records and events into storage and answers k-NN queries for one index.
pub struct App {
    index: Index,
    storage: Arc<dyn StorageContract>,
    settings: Settings,
    online: OnlineDagEvaluator,
    query: QueryDag,
    index_config: IndexConfig,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("index", &self.index.index_node_id())
            .field("index_config", &self.index_config)
            .finish()
    }
}

impl App {
    /// Compile both evaluators for `index`.
    ///
    /// Text and image spaces resolve their engines from `engines`.
    pub fn new(
        index: Index,
        engines: EngineRegistry,
        storage: Arc<dyn StorageContract>,
        settings: Settings,
    ) -> Result<Self> {
        settings.validate()?;
        let provider = Arc::new(EmbeddingProvider::new(engines, settings.embedding_cache_size));
        let compiler = OnlineSchemaDagCompiler::new(provider.clone())
            .with_store_compilation_results(settings.store_compilation_results);
        let online = OnlineDagEvaluator::new(
            index.dag(),
            index.schemas(),
            compiler,
            ConcurrentExecutor::from_settings(&settings.concurrency),
        )?;
        let query = QueryDagCompiler::new(provider).compile(index.dag())?;
        let index_config = build_index_config(&index, SearchAlgorithm::default());
        info!(
            index = index.index_node_id(),
            schemas = index.schemas().len(),
            vector_length = index.vector_length(),
            "App ready"
        );
        Ok(Self {
            index,
            storage,
            settings,
            online,
            query,
            index_config,
        })
    }

    pub fn with_search_algorithm(mut self, algorithm: SearchAlgorithm) -> Self {
        self.index_config = build_index_config(&self.index, algorithm);
        self
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn index_config(&self) -> &IndexConfig {
        &self.index_config
    }

    pub fn storage(&self) -> &Arc<dyn StorageContract> {
        &self.storage
    }

    pub fn query_dag(&self) -> &QueryDag {
        &self.query
    }

    pub fn init_search_indices(&self, override_existing: bool) -> Result<()> {
        self.storage
            .init_search_indices(std::slice::from_ref(&self.index_config), override_existing)?;
        Ok(())
    }

    /// Evaluate records and write their vectors and stored fields in one batch.
    ///
    /// Effect groups affecting the records' schemas stay locked until the
    /// batch is written. Returns the number of entities written.
    pub fn ingest(&self, records: &[ParsedRecord]) -> Result<usize> {
        let context = ExecutionContext::online();
        let _guards = self
            .online
            .lock_groups_affecting(records.iter().map(|r| r.schema.as_str()));
        let cache = EntityCache::new(self.storage.as_ref());
        self.online.evaluate(records, &context, &cache)?;
        for record in records {
            let entity = record.entity_id();
            for field in self.index.stored_fields_of(&record.schema) {
                if let Some(value) = record.field(&field.name) {
                    cache.set(&entity, field.name.clone(), value);
                }
            }
        }
        let written = cache.flush()?;
        info!(records = records.len(), entities = written, "Ingested records");
        Ok(written)
    }

    /// Apply events to the entities they affect. Returns the number of updated index vectors.
    pub fn ingest_events(&self, events: &[EventRecord]) -> Result<usize> {
        let updated = self
            .online
            .evaluate_events(events, &ExecutionContext::online(), self.storage.as_ref())?;
        let updated = updated.iter().filter(|(_, result)| result.is_some()).count();
        info!(events = events.len(), updated, "Ingested events");
        Ok(updated)
    }

    pub fn query(&self, request: &QueryRequest) -> Result<Vec<SearchResult>> {
        let schema = request.schema.as_str();
        if !self.index.has_schema(schema) {
            return Err(ServiceError::InvalidRequest(format!(
                "schema {schema} is not indexed"
            )));
        }
        let mut context = ExecutionContext::query().with_queried_schema(schema);
        if let Some(now) = request.now {
            context = context.with_fixed_now(now);
        }
        for (space, weight) in &request.space_weights {
            context = context.with_node_weight(self.space_nodes(space, schema)?.top.clone(), *weight);
        }

        let mut inputs = QueryInputs::new();
        for (space, values) in &request.space_inputs {
            let node = self.space_nodes(space, schema)?.embedding.clone();
            inputs.entry(node).or_default().extend(
                values
                    .iter()
                    .map(|value| QueryNodeInput::new(value.item.clone(), value.weight)),
            );
        }
        if let Some(vector) = &request.vector {
            let embeddings = self
                .index
                .spaces()
                .iter()
                .map(|space| Ok(self.space_nodes(space.name(), schema)?.embedding.clone()))
                .collect::<Result<Vec<NodeId>>>()?;
            let parts = self.query.get_vector_parts(vector, &embeddings, &context)?;
            for (node, part) in embeddings.into_iter().zip(parts) {
                inputs
                    .entry(node)
                    .or_default()
                    .push(QueryNodeInput::to_invert(part, 1.0));
            }
        }

        let vector = self.query.evaluate(&inputs, &context)?;
        let mut params = KnnSearchParams::new(
            schema,
            self.index_config.vector_field.field_name.clone(),
            vector,
        )
        .with_filters(request.filters.iter().cloned())
        .with_limit(request.limit.unwrap_or(self.settings.default_query_limit))
        .with_fields_to_return(request.fields_to_return.iter().cloned());
        if let Some(radius) = request.radius {
            params = params.with_radius(radius);
        }
        let results = self.storage.knn_search(&self.index_config, &params)?;
        debug!(schema, found = results.len(), limit = ?params.limit, "Query answered");
        Ok(results)
    }

    fn space_nodes(&self, space: &str, schema: &str) -> Result<&vecgraph_graph::SpaceNodes> {
        self.index.space_nodes(space, schema).ok_or_else(|| {
            ServiceError::InvalidRequest(format!("unknown space {space} for schema {schema}"))
        })
    }
}

/// Vectors live in the field named after the index node; stored fields are filterable.
fn build_index_config(index: &Index, algorithm: SearchAlgorithm) -> IndexConfig {
    let id = index.index_node_id();
    let mut fields: BTreeSet<&str> = index.stored_fields().iter().map(|f| f.name.as_str()).collect();
    if index.spaces().iter().any(|s| s.chunking().is_some()) {
        fields.insert(ORIGIN_ID_FIELD);
    }
    IndexConfig::new(
        id,
        VectorFieldDescriptor::new(id, index.vector_length()).with_search_algorithm(algorithm),
    )
    .with_fields(fields.into_iter().map(FieldDescriptor::new))
}
