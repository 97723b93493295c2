//! Online nodes: how each node kind evaluates a batch of inputs during ingestion.
//!
//! An [`OnlineNode`] pairs a graph node with its parents as projected for one
//! schema dag and with an [`OnlineOperator`] holding the kind specific state
//! (built spaces, event aggregators). Operators are shared between the schema
//! dags that contain the same node.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, trace};
use vecgraph_embeddings::{EmbeddingConfig, EmbeddingProvider, SpaceEmbedding};
use vecgraph_graph::{ChunkingConfig, EventAggregationParams, NamedFunction, Node, NodeId, NodeKind};
use vecgraph_storage::EntityId;
use vecgraph_types::{ComparisonOperator, ExecutionContext, Normalization, SchemaField, Value, Vector, Weighted};

use crate::decay::DecayStrategy;
use crate::entity_cache::EntityCache;
use crate::error::{OnlineError, Result};
use crate::event::{EventAggregator, EventMetadataHandler};
use crate::record::{EvaluationResult, EventRecord, OnlineInput};

/// Field on chunk entities holding the object id they were cut from.
pub const ORIGIN_ID_FIELD: &str = "__origin_id";

/// Results of evaluated nodes, one entry per input of the batch.
pub type NodeResults = HashMap<NodeId, Vec<Option<EvaluationResult>>>;

#[derive(Debug)]
pub enum OnlineOperator {
    SchemaField(SchemaField),
    Constant(Value),
    Now,
    Chunking(ChunkingConfig),
    Embedding(Arc<SpaceEmbedding>),
    Concatenation,
    Aggregation {
        embedding: Arc<SpaceEmbedding>,
        weights: BTreeMap<NodeId, f32>,
    },
    EventAggregation(Box<EventAggregationOperator>),
    ComparisonFilter {
        field: SchemaField,
        operator: ComparisonOperator,
        operand: Value,
    },
    Index,
}

impl OnlineOperator {
    pub fn compile(
        node: &Node,
        provider: &EmbeddingProvider,
        decay: &Arc<dyn DecayStrategy>,
    ) -> Result<Self> {
        Ok(match node.kind() {
            NodeKind::SchemaField { field } => OnlineOperator::SchemaField(field.clone()),
            NodeKind::Constant { value } => OnlineOperator::Constant(value.clone()),
            NodeKind::NamedFunction {
                function: NamedFunction::Now,
            } => OnlineOperator::Now,
            NodeKind::Chunking { config } => OnlineOperator::Chunking(*config),
            NodeKind::Embedding { transformation } => {
                OnlineOperator::Embedding(provider.get(transformation)?)
            }
            NodeKind::Concatenation => OnlineOperator::Concatenation,
            NodeKind::Aggregation {
                weights,
                transformation,
            } => OnlineOperator::Aggregation {
                embedding: provider.get(transformation)?,
                weights: weights.clone(),
            },
            NodeKind::EventAggregation(params) => OnlineOperator::EventAggregation(Box::new(
                EventAggregationOperator::new(node.id(), params.clone(), decay.clone()),
            )),
            NodeKind::ComparisonFilter {
                field,
                operator,
                operand,
            } => OnlineOperator::ComparisonFilter {
                field: field.clone(),
                operator: *operator,
                operand: operand.clone(),
            },
            NodeKind::Index => OnlineOperator::Index,
        })
    }
}

/// Parent values for one evaluated row.
struct Row<'r> {
    input: &'r OnlineInput<'r>,
    parents: Vec<Option<&'r Value>>,
}

/// A node compiled for one schema dag.
#[derive(Debug, Clone)]
pub struct OnlineNode {
    node: Arc<Node>,
    parents: Vec<NodeId>,
    operator: Arc<OnlineOperator>,
}

impl OnlineNode {
    pub fn new(node: Arc<Node>, parents: Vec<NodeId>, operator: Arc<OnlineOperator>) -> Self {
        Self {
            node,
            parents,
            operator,
        }
    }

    pub fn id(&self) -> &str {
        self.node.id()
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Parents as projected for the owning schema dag.
    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    pub fn operator(&self) -> &Arc<OnlineOperator> {
        &self.operator
    }

    /// Evaluate every input, then persist or fall back to stored results.
    ///
    /// All parents must already be in `results`.
    pub fn evaluate(
        &self,
        inputs: &[OnlineInput<'_>],
        results: &NodeResults,
        context: &ExecutionContext,
        cache: &EntityCache<'_>,
    ) -> Result<Vec<Option<EvaluationResult>>> {
        let parent_results = self
            .parents
            .iter()
            .map(|id| {
                results.get(id).ok_or_else(|| {
                    OnlineError::InvalidState(format!("{} evaluated before parent {id}", self.id()))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let evaluated = match self.operator.as_ref() {
            OnlineOperator::Chunking(config) => self.evaluate_chunking(config, inputs, &parent_results)?,
            OnlineOperator::EventAggregation(operator) => {
                operator.evaluate(inputs, !self.parents.is_empty(), results, context, cache)?
            }
            _ => self.evaluate_rows(inputs, &parent_results, context)?,
        };

        let mut output = Vec::with_capacity(inputs.len());
        for (input, result) in inputs.iter().zip(evaluated) {
            let result = match result {
                Some(result) => {
                    self.persist(input, &result, cache);
                    Some(result)
                }
                None => self.fallback(input, cache)?,
            };
            output.push(result);
        }
        trace!(node_id = self.id(), inputs = inputs.len(), "Evaluated online node");
        Ok(output)
    }

    /// One row per input plus one per parent chunk, evaluated as a single batch.
    fn evaluate_rows(
        &self,
        inputs: &[OnlineInput<'_>],
        parent_results: &[&Vec<Option<EvaluationResult>>],
        context: &ExecutionContext,
    ) -> Result<Vec<Option<EvaluationResult>>> {
        let mut rows = Vec::with_capacity(inputs.len());
        // (input index, is chunk row)
        let mut owners = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            let mains: Vec<Option<&Value>> = parent_results
                .iter()
                .map(|results| results.get(i).and_then(Option::as_ref).map(|r| &r.main))
                .collect();
            for (p, results) in parent_results.iter().enumerate() {
                let Some(result) = results.get(i).and_then(Option::as_ref) else {
                    continue;
                };
                for chunk in &result.chunks {
                    let mut parents = mains.clone();
                    parents[p] = Some(chunk);
                    rows.push(Row { input, parents });
                    owners.push((i, true));
                }
            }
            rows.push(Row {
                input,
                parents: mains,
            });
            owners.push((i, false));
        }

        let values = self.evaluate_self(&rows, context)?;
        let mut mains: Vec<Option<Value>> = vec![None; inputs.len()];
        let mut chunks: Vec<Vec<Value>> = vec![Vec::new(); inputs.len()];
        for ((i, is_chunk), value) in owners.into_iter().zip(values) {
            match (is_chunk, value) {
                (true, Some(value)) => chunks[i].push(value),
                (false, value) => mains[i] = value,
                (true, None) => {}
            }
        }
        Ok(mains
            .into_iter()
            .zip(chunks)
            .map(|(main, chunks)| main.map(|main| EvaluationResult::new(main).with_chunks(chunks)))
            .collect())
    }

    fn evaluate_self(&self, rows: &[Row<'_>], context: &ExecutionContext) -> Result<Vec<Option<Value>>> {
        match self.operator.as_ref() {
            OnlineOperator::SchemaField(field) => Ok(rows.iter().map(|row| row.input.field(field)).collect()),
            OnlineOperator::Constant(value) => Ok(rows.iter().map(|_| Some(value.clone())).collect()),
            OnlineOperator::Now => Ok(rows.iter().map(|_| Some(Value::Int(context.now()))).collect()),
            OnlineOperator::ComparisonFilter {
                operator, operand, ..
            } => Ok(rows
                .iter()
                .map(|row| {
                    let field = row.parents.first().copied().flatten();
                    Some(Value::Bool(operator.evaluate(field, operand)))
                })
                .collect()),
            OnlineOperator::Embedding(embedding) => self.embed(embedding, rows, context),
            OnlineOperator::Concatenation => rows.iter().map(|row| self.concatenate(row, context)).collect(),
            OnlineOperator::Aggregation { embedding, weights } => rows
                .iter()
                .map(|row| self.aggregate(embedding, weights, row))
                .collect(),
            OnlineOperator::Index => rows
                .iter()
                .map(|row| match row.parents.as_slice() {
                    [parent] => Ok((*parent).cloned()),
                    parents => Err(OnlineError::InvalidState(format!(
                        "index node {} has {} projected parents",
                        self.id(),
                        parents.len()
                    ))),
                })
                .collect(),
            OnlineOperator::Chunking(_) | OnlineOperator::EventAggregation(_) => Err(OnlineError::InvalidState(
                format!("{} node {} is not row evaluated", self.node.tag(), self.id()),
            )),
        }
    }

    fn embed(
        &self,
        embedding: &SpaceEmbedding,
        rows: &[Row<'_>],
        context: &ExecutionContext,
    ) -> Result<Vec<Option<Value>>> {
        let is_image = matches!(embedding.config().embedding, EmbeddingConfig::Image(_));
        let mut items = Vec::new();
        let mut positions = Vec::new();
        for (position, row) in rows.iter().enumerate() {
            let item = if is_image {
                // image and description; either may be missing but not both
                if row.parents.iter().all(Option::is_none) {
                    None
                } else {
                    Some(row.parents.iter().map(|&v| v.cloned().unwrap_or_default()).collect::<Vec<_>>())
                }
            } else {
                row.parents.first().copied().flatten().map(|v| vec![v.clone()])
            };
            if let Some(item) = item {
                items.push(item);
                positions.push(position);
            }
        }
        let mut values: Vec<Option<Value>> = vec![None; rows.len()];
        if items.is_empty() {
            return Ok(values);
        }
        let vectors = embedding.embed_and_normalize(&items, context)?;
        for (position, vector) in positions.into_iter().zip(vectors) {
            values[position] = Some(Value::Vector(vector));
        }
        Ok(values)
    }

    /// Weighted parts joined in parent order, then unit length.
    fn concatenate(&self, row: &Row<'_>, context: &ExecutionContext) -> Result<Option<Value>> {
        if row.parents.is_empty() {
            return Ok(None);
        }
        let mut parts = Vec::with_capacity(row.parents.len());
        for (parent_id, value) in self.parents.iter().zip(&row.parents) {
            let Some(value) = value else {
                return Ok(None);
            };
            let vector = expect_vector(parent_id, value)?;
            parts.push(vector.multiply(context.node_weight(parent_id)));
        }
        let concatenated = Vector::concatenate(&parts);
        concatenated.check_dimension(self.node.length())?;
        Ok(Some(Value::Vector(Normalization::L2Norm.normalize(&concatenated))))
    }

    fn aggregate(
        &self,
        embedding: &SpaceEmbedding,
        weights: &BTreeMap<NodeId, f32>,
        row: &Row<'_>,
    ) -> Result<Option<Value>> {
        let mut weighted = Vec::with_capacity(row.parents.len());
        for (parent_id, value) in self.parents.iter().zip(&row.parents) {
            let Some(value) = value else { continue };
            let vector = expect_vector(parent_id, value)?;
            if vector.is_empty() {
                continue;
            }
            let weight = weights.get(parent_id).copied().unwrap_or(1.0);
            weighted.push(Weighted::new(vector.clone(), weight));
        }
        match weighted.len() {
            0 => Ok(None),
            1 => Ok(weighted.pop().map(|w| Value::Vector(w.item))),
            _ => Ok(Some(Value::Vector(embedding.aggregate(&weighted)?))),
        }
    }

    fn evaluate_chunking(
        &self,
        config: &ChunkingConfig,
        inputs: &[OnlineInput<'_>],
        parent_results: &[&Vec<Option<EvaluationResult>>],
    ) -> Result<Vec<Option<EvaluationResult>>> {
        let Some(parent) = parent_results.first() else {
            return Ok(vec![None; inputs.len()]);
        };
        (0..inputs.len())
            .map(|i| {
                let Some(result) = parent.get(i).and_then(Option::as_ref) else {
                    return Ok(None);
                };
                if !result.chunks.is_empty() {
                    return Err(OnlineError::InvalidState(format!(
                        "chunking node {} received already chunked input",
                        self.id()
                    )));
                }
                let text = result.main.as_str().ok_or_else(|| {
                    OnlineError::InvalidInput(format!(
                        "chunking needs text, got {}",
                        result.main.type_name()
                    ))
                })?;
                let chunks = split_text(text, config).into_iter().map(Value::String).collect();
                Ok(Some(EvaluationResult::new(text).with_chunks(chunks)))
            })
            .collect()
    }

    /// Stage the result of this node for the input's entity and chunk entities.
    fn persist(&self, input: &OnlineInput<'_>, result: &EvaluationResult, cache: &EntityCache<'_>) {
        if !self.node.persist_node_result() {
            return;
        }
        cache.set(&input.entity_id(), self.id(), result.main.clone());
        for (n, chunk) in result.chunks.iter().enumerate() {
            let chunk_entity = EntityId::new(input.schema(), format!("{}-{n}", input.object_id()));
            cache.set(&chunk_entity, self.id(), chunk.clone());
            cache.set(&chunk_entity, ORIGIN_ID_FIELD, Value::String(input.object_id().to_string()));
        }
    }

    /// Stored result of a vector node that could not be evaluated.
    ///
    /// Text and image embeddings without a stored result fall back to zeros.
    fn fallback(&self, input: &OnlineInput<'_>, cache: &EntityCache<'_>) -> Result<Option<EvaluationResult>> {
        if !self.node.is_vector() || matches!(self.operator.as_ref(), OnlineOperator::EventAggregation(_)) {
            return Ok(None);
        }
        let entity = input.entity_id();
        match cache.get(&entity, self.id())? {
            Some(Value::Vector(vector)) => Ok(Some(EvaluationResult::new(vector))),
            Some(other) => Err(OnlineError::InvalidState(format!(
                "stored result of {} for {entity} is {}",
                self.id(),
                other.type_name()
            ))),
            None => match self.operator.as_ref() {
                OnlineOperator::Embedding(embedding)
                    if matches!(
                        embedding.config().embedding,
                        EmbeddingConfig::Text(_) | EmbeddingConfig::Image(_)
                    ) =>
                {
                    Ok(Some(EvaluationResult::new(Vector::zeros(embedding.length()))))
                }
                _ => Err(OnlineError::MissingStoredResult {
                    node_id: self.id().to_string(),
                    entity: entity.to_string(),
                }),
            },
        }
    }
}

/// Folds events into the stored aggregate of the affected entity.
#[derive(Debug)]
pub struct EventAggregationOperator {
    node_id: NodeId,
    params: EventAggregationParams,
    aggregator: EventAggregator,
    metadata: EventMetadataHandler,
}

impl EventAggregationOperator {
    pub fn new(node_id: &str, params: EventAggregationParams, decay: Arc<dyn DecayStrategy>) -> Self {
        let aggregator = EventAggregator::new(
            params.transformation.aggregation,
            params.effect_modifier,
            decay,
        );
        Self {
            node_id: node_id.to_string(),
            metadata: EventMetadataHandler::new(node_id),
            aggregator,
            params,
        }
    }

    pub fn params(&self) -> &EventAggregationParams {
        &self.params
    }

    /// Without projected parents, or for plain records, the stored aggregate
    /// is returned. Events are applied one after another so that several
    /// events for one entity in a batch all count.
    fn evaluate(
        &self,
        inputs: &[OnlineInput<'_>],
        has_parents: bool,
        results: &NodeResults,
        context: &ExecutionContext,
        cache: &EntityCache<'_>,
    ) -> Result<Vec<Option<EvaluationResult>>> {
        let mut output = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            let entity = input.entity_id();
            if let (true, Some(event)) = (has_parents, input.event_record()) {
                self.apply_event(i, &entity, event, results, context, cache)?;
            }
            output.push(self.current(&entity, cache)?.map(EvaluationResult::new));
        }
        Ok(output)
    }

    fn current(&self, entity: &EntityId, cache: &EntityCache<'_>) -> Result<Option<Vector>> {
        match cache.get(entity, &self.node_id)? {
            None => Ok(None),
            Some(Value::Vector(vector)) if vector.is_empty() => Ok(None),
            Some(Value::Vector(vector)) => Ok(Some(vector)),
            Some(other) => Err(OnlineError::InvalidState(format!(
                "stored aggregate of {} for {entity} is {}",
                self.node_id,
                other.type_name()
            ))),
        }
    }

    fn apply_event(
        &self,
        i: usize,
        affected: &EntityId,
        event: &EventRecord,
        results: &NodeResults,
        context: &ExecutionContext,
        cache: &EntityCache<'_>,
    ) -> Result<()> {
        if event.schema() != self.params.event_schema {
            return Ok(());
        }
        let mut weights = Vec::with_capacity(self.params.filters.len());
        for filter in &self.params.filters {
            let filter_results = results.get(&filter.item).ok_or_else(|| {
                OnlineError::InvalidState(format!("filter {} was not evaluated", filter.item))
            })?;
            let passed = filter_results
                .get(i)
                .and_then(Option::as_ref)
                .and_then(|r| r.main.as_bool())
                .unwrap_or(false);
            if passed {
                weights.push(filter.weight);
            }
        }
        if weights.is_empty() {
            return Ok(());
        }
        let now = context.now();
        let modifier = self.aggregator.modifier();
        if modifier
            .max_age_secs
            .is_some_and(|max_age| now - event.created_at > max_age)
        {
            trace!(event = event.event_id(), "Skipping expired event");
            return Ok(());
        }

        let affecting_id = event.reference(&self.params.affecting.reference_field).ok_or_else(|| {
            OnlineError::InvalidInput(format!(
                "event {} has no reference in {}",
                event.event_id(),
                self.params.affecting.reference_field
            ))
        })?;
        let affecting_entity = EntityId::new(&self.params.affecting.schema, affecting_id);
        let affecting = match cache.get(&affecting_entity, &self.params.input_to_aggregate)? {
            Some(Value::Vector(vector)) => vector,
            Some(other) => {
                return Err(OnlineError::InvalidState(format!(
                    "stored vector of {affecting_entity} is {}",
                    other.type_name()
                )))
            }
            None => {
                return Err(OnlineError::MissingStoredResult {
                    node_id: self.params.input_to_aggregate.clone(),
                    entity: affecting_entity.to_string(),
                })
            }
        };
        if affecting.is_empty() {
            return Ok(());
        }

        let metadata = self.metadata.read(cache, affected)?;
        if modifier
            .max_count
            .is_some_and(|max_count| metadata.effect_count >= max_count)
        {
            trace!(entity = %affected, "Event count limit reached");
            return Ok(());
        }
        let metadata = metadata.recalculate(event.created_at, weights.len() as i64);
        let average_weight = weights.iter().sum::<f32>() / weights.len() as f32;
        let stored = self.current(affected, cache)?.unwrap_or_else(Vector::empty);
        let updated = self.aggregator.calculate_event_vector(
            now,
            &stored,
            Weighted::new(&affecting, average_weight),
            &metadata,
        )?;
        cache.set(affected, self.node_id.as_str(), Value::Vector(updated));
        self.metadata.write(cache, affected, &metadata);
        debug!(
            node_id = %self.node_id,
            entity = %affected,
            affecting = %affecting_entity,
            effect_count = metadata.effect_count,
            "Applied event"
        );
        Ok(())
    }
}

fn expect_vector<'v>(node_id: &str, value: &'v Value) -> Result<&'v Vector> {
    value.as_vector().ok_or_else(|| {
        OnlineError::InvalidState(format!("parent {node_id} produced {}", value.type_name()))
    })
}

/// Overlapping character windows of `chunk_size`, advancing by
/// `chunk_size - chunk_overlap`.
pub fn split_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = config.chunk_size.saturating_sub(config.chunk_overlap).max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}
