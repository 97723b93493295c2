//! Query nodes: the query-time counterpart of the graph nodes that survive
//! compilation.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::trace;
use vecgraph_embeddings::{EmbeddingConfig, EmbeddingProvider, SpaceEmbedding};
use vecgraph_graph::{NamedFunction, Node, NodeId, NodeKind};
use vecgraph_types::{ExecutionContext, Value, Vector, Weighted};

use crate::error::{QueryError, Result};
use crate::input::QueryNodeInput;

#[derive(Debug)]
pub enum QueryOperator {
    Constant(Value),
    Now,
    Embedding(Arc<SpaceEmbedding>),
    /// Passes its single parent through; event aggregates do not exist at query time.
    Aggregation,
    Concatenation,
    Index,
}

impl QueryOperator {
    pub fn compile(node: &Node, provider: &EmbeddingProvider) -> Result<Self> {
        Ok(match node.kind() {
            NodeKind::Constant { value } => QueryOperator::Constant(value.clone()),
            NodeKind::NamedFunction {
                function: NamedFunction::Now,
            } => QueryOperator::Now,
            NodeKind::Embedding { transformation } => {
                QueryOperator::Embedding(provider.get(transformation)?)
            }
            NodeKind::Aggregation { .. } => QueryOperator::Aggregation,
            NodeKind::Concatenation => QueryOperator::Concatenation,
            NodeKind::Index => QueryOperator::Index,
            kind => {
                return Err(QueryError::InvalidQueryDag(format!(
                    "{} node {} is ingestion only",
                    kind.tag(),
                    node.id()
                )))
            }
        })
    }
}

/// A graph node compiled for query evaluation.
#[derive(Debug, Clone)]
pub struct QueryNode {
    node: Arc<Node>,
    parents: Vec<NodeId>,
    /// Entity schemas whose vectors this node produces at query time
    schemas: BTreeSet<String>,
    operator: Arc<QueryOperator>,
}

impl QueryNode {
    pub fn new(
        node: Arc<Node>,
        parents: Vec<NodeId>,
        schemas: BTreeSet<String>,
        operator: Arc<QueryOperator>,
    ) -> Self {
        Self {
            node,
            parents,
            schemas,
            operator,
        }
    }

    pub fn id(&self) -> &str {
        self.node.id()
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn parents(&self) -> &[NodeId] {
        &self.parents
    }

    pub fn schemas(&self) -> &BTreeSet<String> {
        &self.schemas
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.schemas.contains(schema)
    }

    pub fn operator(&self) -> &QueryOperator {
        &self.operator
    }

    pub fn length(&self) -> usize {
        self.node.length()
    }
}

/// Embed the inputs addressed to one space and fold them into a single
/// query vector.
///
/// Plain inputs and parent values are embedded and normalized; inputs to
/// invert are already space vectors. Without any weighted contribution the
/// space's default vector is returned.
pub(crate) fn evaluate_embedding(
    node_id: &str,
    space: &SpaceEmbedding,
    inputs: &[QueryNodeInput],
    parent_values: Vec<Value>,
    context: &ExecutionContext,
) -> Result<Vector> {
    if space.should_return_default(context) {
        return Ok(space.default_vector());
    }

    let mut plain: Vec<Weighted<Value>> = Vec::new();
    let mut inverted: Vec<Weighted<Vector>> = Vec::new();
    for input in inputs {
        if input.to_invert {
            let vector = input.value.item.as_vector().ok_or_else(|| {
                QueryError::InvalidInput(format!(
                    "inputs to invert must be vectors, got {} for {node_id}",
                    input.value.item.type_name()
                ))
            })?;
            vector.check_dimension(space.length())?;
            inverted.push(Weighted::new(vector.clone(), input.weight()));
        } else {
            plain.push(input.value.clone());
        }
    }
    plain.extend(parent_values.into_iter().map(Weighted::from));
    if matches!(space.config().embedding, EmbeddingConfig::Recency(_)) {
        plain.push(Weighted::from(Value::Int(context.now())));
    }

    let mut weighted: Vec<Weighted<Vector>> = Vec::with_capacity(plain.len() + inverted.len());
    if !plain.is_empty() {
        let items: Vec<Vec<Value>> = plain.iter().map(|w| vec![w.item.clone()]).collect();
        let embedded = space.embed_and_normalize(&items, context)?;
        weighted.extend(
            embedded
                .into_iter()
                .zip(&plain)
                .map(|(vector, input)| Weighted::new(vector, input.weight)),
        );
    }
    weighted.extend(inverted);

    if weighted.iter().all(|w| w.weight == 0.0) {
        trace!(node_id, "No weighted query input, using default vector");
        return Ok(space.default_vector());
    }
    let vector = space.aggregate(&weighted)?;
    if vector.is_empty() {
        return Ok(space.default_vector());
    }
    vector.check_dimension(space.length())?;
    Ok(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vecgraph_embeddings::{
        CategoricalConfig, EngineRegistry, MockEmbeddingEngine, ModelConfig, NumberConfig,
        NumberMode, PeriodTime, RecencyConfig, TransformationConfig,
    };

    fn space(embedding: EmbeddingConfig) -> SpaceEmbedding {
        let engines = EngineRegistry::new().with_engine(Arc::new(MockEmbeddingEngine::new("mock", 4)));
        SpaceEmbedding::new(TransformationConfig::new(embedding), &engines, 8).unwrap()
    }

    fn text_space() -> SpaceEmbedding {
        space(EmbeddingConfig::Text(ModelConfig {
            engine: "mock".into(),
            dimension: 4,
        }))
    }

    #[test]
    fn test_no_input_gives_default() {
        let space = text_space();
        let vector = evaluate_embedding("e", &space, &[], Vec::new(), &ExecutionContext::query()).unwrap();
        assert_eq!(vector, Vector::zeros(4));
    }

    #[test]
    fn test_single_input_is_normalized() {
        let space = text_space();
        let inputs = [QueryNodeInput::new("graph engines", 1.0)];
        let vector = evaluate_embedding("e", &space, &inputs, Vec::new(), &ExecutionContext::query()).unwrap();
        assert_eq!(vector.dimension(), 4);
        assert!((vector.norm() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_weight_input_is_ignored() {
        let space = text_space();
        let ctx = ExecutionContext::query();
        let alone = evaluate_embedding("e", &space, &[QueryNodeInput::new("a", 1.0)], Vec::new(), &ctx).unwrap();
        let with_zero = evaluate_embedding(
            "e",
            &space,
            &[QueryNodeInput::new("a", 1.0), QueryNodeInput::new("b", 0.0)],
            Vec::new(),
            &ctx,
        )
        .unwrap();
        assert_eq!(alone.values(), with_zero.values());

        let only_zero =
            evaluate_embedding("e", &space, &[QueryNodeInput::new("b", 0.0)], Vec::new(), &ctx).unwrap();
        assert_eq!(only_zero, Vector::zeros(4));
    }

    #[test]
    fn test_maximizing_number_space_short_circuits() {
        let space = space(EmbeddingConfig::Number(NumberConfig::new(0.0, 10.0, NumberMode::Maximum)));
        let inputs = [QueryNodeInput::new(Value::Int(3), 1.0)];
        let vector = evaluate_embedding("n", &space, &inputs, Vec::new(), &ExecutionContext::query()).unwrap();
        assert_eq!(vector.values(), &[1.0]);
    }

    #[test]
    fn test_categorical_accepts_single_string() {
        let space = space(EmbeddingConfig::Categorical(CategoricalConfig::new(["A", "B"])));
        let inputs = [QueryNodeInput::new("A", 1.0)];
        let vector = evaluate_embedding("c", &space, &inputs, Vec::new(), &ExecutionContext::query()).unwrap();
        assert!(vector.values()[0] > 0.0);
        assert_eq!(vector.values()[1], 0.0);
    }

    #[test]
    fn test_recency_uses_context_now() {
        let space = space(EmbeddingConfig::Recency(RecencyConfig::new([PeriodTime::days(10)])));
        let ctx = ExecutionContext::query().with_fixed_now(1_700_000_000);
        let first = evaluate_embedding("r", &space, &[], Vec::new(), &ctx).unwrap();
        let second = evaluate_embedding("r", &space, &[], Vec::new(), &ctx).unwrap();
        assert_eq!(first, second);
        assert!(!first.is_zero());
    }

    #[test]
    fn test_invert_input_must_match_length() {
        let space = text_space();
        let inputs = [QueryNodeInput::to_invert(Vector::new(vec![1.0, 0.0]), 1.0)];
        let err = evaluate_embedding("e", &space, &inputs, Vec::new(), &ExecutionContext::query()).unwrap_err();
        assert!(matches!(err, QueryError::Types(_)));

        let inputs = [QueryNodeInput::to_invert(Vector::new(vec![0.0, 1.0, 0.0, 0.0]), 1.0)];
        let vector = evaluate_embedding("e", &space, &inputs, Vec::new(), &ExecutionContext::query()).unwrap();
        assert_eq!(vector.values(), &[0.0, 1.0, 0.0, 0.0]);
    }
}
