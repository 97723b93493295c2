//! Content-addressed graph nodes.
//!
//! A node's id is a hash over its kind tag, its serialized parameters and its
//! parents' ids, so structurally identical nodes collapse into one. Nodes are
//! created through a [`NodeArena`], which validates parents, tracks depth and
//! merges duplicates.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::trace;
use vecgraph_embeddings::{EmbeddingConfig, TransformationConfig};
use vecgraph_types::{ComparisonOperator, SchemaField, Value, Weighted};

use crate::effect::{DagEffect, EffectModifier, ResolvedSchemaReference};
use crate::error::{GraphError, Result};

pub type NodeId = String;

/// Hex characters of the content hash kept in a node id.
const NODE_HASH_LENGTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedFunction {
    /// Current time in unix seconds, read from the execution context
    Now,
}

/// Splits long text into overlapping character windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkingConfig {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 || chunk_overlap >= chunk_size {
            return Err(GraphError::InvalidSpace(format!(
                "chunk_size must be > 0 and larger than chunk_overlap, got {chunk_size}/{chunk_overlap}"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }
}

/// Parameters of an event-aggregation node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventAggregationParams {
    /// Embedding node of the affecting schema whose stored vectors get aggregated
    pub input_to_aggregate: NodeId,
    pub event_schema: String,
    pub affected: ResolvedSchemaReference,
    pub affecting: ResolvedSchemaReference,
    /// Filter nodes with the multiplier applied when they pass
    pub filters: Vec<Weighted<NodeId>>,
    pub effect_modifier: EffectModifier,
    pub transformation: TransformationConfig,
}

/// Node variants and their parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    SchemaField {
        field: SchemaField,
    },
    Constant {
        value: Value,
    },
    NamedFunction {
        function: NamedFunction,
    },
    Chunking {
        config: ChunkingConfig,
    },
    Embedding {
        transformation: TransformationConfig,
    },
    Concatenation,
    Aggregation {
        weights: BTreeMap<NodeId, f32>,
        transformation: TransformationConfig,
    },
    EventAggregation(EventAggregationParams),
    ComparisonFilter {
        field: SchemaField,
        operator: ComparisonOperator,
        operand: Value,
    },
    Index,
}

impl NodeKind {
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::SchemaField { .. } => "schema_field",
            NodeKind::Constant { .. } => "constant",
            NodeKind::NamedFunction { .. } => "named_function",
            NodeKind::Chunking { .. } => "chunking",
            NodeKind::Embedding { .. } => "embedding",
            NodeKind::Concatenation => "concatenation",
            NodeKind::Aggregation { .. } => "aggregation",
            NodeKind::EventAggregation(_) => "event_aggregation",
            NodeKind::ComparisonFilter { .. } => "comparison_filter",
            NodeKind::Index => "index",
        }
    }

    /// Kinds that only make sense while ingesting records.
    pub fn is_ingestion_only(&self) -> bool {
        matches!(
            self,
            NodeKind::SchemaField { .. }
                | NodeKind::ComparisonFilter { .. }
                | NodeKind::Chunking { .. }
                | NodeKind::EventAggregation(_)
        )
    }

    fn parent_count(&self) -> ParentCount {
        match self {
            NodeKind::SchemaField { .. } | NodeKind::Constant { .. } | NodeKind::NamedFunction { .. } => {
                ParentCount::Exactly(0)
            }
            NodeKind::Chunking { .. } | NodeKind::ComparisonFilter { .. } => ParentCount::Exactly(1),
            NodeKind::Embedding { transformation } => match transformation.embedding {
                EmbeddingConfig::Image(_) => ParentCount::Between(1, 2),
                _ => ParentCount::Exactly(1),
            },
            NodeKind::EventAggregation(_) => ParentCount::AtLeast(2),
            NodeKind::Concatenation | NodeKind::Aggregation { .. } | NodeKind::Index => {
                ParentCount::AtLeast(1)
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ParentCount {
    Exactly(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl ParentCount {
    fn check(self, kind: &'static str, actual: usize) -> Result<()> {
        let (ok, expected) = match self {
            ParentCount::Exactly(n) => (actual == n, format!("exactly {n}")),
            ParentCount::AtLeast(n) => (actual >= n, format!("at least {n}")),
            ParentCount::Between(lo, hi) => {
                ((lo..=hi).contains(&actual), format!("between {lo} and {hi}"))
            }
        };
        if ok {
            Ok(())
        } else {
            Err(GraphError::ParentCount {
                kind,
                expected,
                actual,
            })
        }
    }
}

/// An immutable graph vertex.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    parents: Vec<NodeId>,
    schemas: BTreeSet<String>,
    dag_effects: BTreeSet<DagEffect>,
    persist_node_result: bool,
    /// Vector length; 0 for scalar nodes
    length: usize,
    depth: usize,
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Node {}

impl Node {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn tag(&self) -> &'static str {
        self.kind.tag()
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

    pub fn dag_effects(&self) -> &BTreeSet<DagEffect> {
        &self.dag_effects
    }

    pub fn persist_node_result(&self) -> bool {
        self.persist_node_result
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_vector(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Embedding { .. }
                | NodeKind::Concatenation
                | NodeKind::Aggregation { .. }
                | NodeKind::EventAggregation(_)
                | NodeKind::Index
        )
    }

    /// Transformation of the space this node belongs to, if any.
    pub fn transformation(&self) -> Option<&TransformationConfig> {
        match &self.kind {
            NodeKind::Embedding { transformation }
            | NodeKind::Aggregation { transformation, .. } => Some(transformation),
            NodeKind::EventAggregation(params) => Some(&params.transformation),
            _ => None,
        }
    }
}

/// Everything needed to create one node.
struct NodeSpec {
    kind: NodeKind,
    parents: Vec<NodeId>,
    own_schemas: BTreeSet<String>,
    own_effects: BTreeSet<DagEffect>,
    /// Only use the node's own schemas and effects, not the parents'
    isolated: bool,
    persist_self: bool,
    persist_parents: Vec<NodeId>,
}

impl NodeSpec {
    fn new(kind: NodeKind, parents: Vec<NodeId>) -> Self {
        Self {
            kind,
            parents,
            own_schemas: BTreeSet::new(),
            own_effects: BTreeSet::new(),
            isolated: false,
            persist_self: false,
            persist_parents: Vec::new(),
        }
    }
}

/// Owns nodes while a graph is being built.
#[derive(Debug)]
pub struct NodeArena {
    nodes: HashMap<NodeId, Node>,
    max_depth: usize,
}

impl NodeArena {
    pub fn new(max_depth: usize) -> Self {
        Self {
            nodes: HashMap::new(),
            max_depth,
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn get(&self, id: &str) -> Result<&Node> {
        self.nodes
            .get(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn into_nodes(self) -> HashMap<NodeId, Node> {
        self.nodes
    }

    pub fn schema_field(&mut self, field: SchemaField) -> Result<NodeId> {
        let mut spec = NodeSpec::new(
            NodeKind::SchemaField {
                field: field.clone(),
            },
            Vec::new(),
        );
        spec.own_schemas.insert(field.schema);
        self.add(spec)
    }

    pub fn constant(&mut self, value: Value) -> Result<NodeId> {
        self.add(NodeSpec::new(NodeKind::Constant { value }, Vec::new()))
    }

    pub fn named_function(&mut self, function: NamedFunction) -> Result<NodeId> {
        self.add(NodeSpec::new(NodeKind::NamedFunction { function }, Vec::new()))
    }

    pub fn chunking(&mut self, parent: NodeId, config: ChunkingConfig) -> Result<NodeId> {
        self.add(NodeSpec::new(NodeKind::Chunking { config }, vec![parent]))
    }

    pub fn embedding(
        &mut self,
        parents: Vec<NodeId>,
        transformation: TransformationConfig,
    ) -> Result<NodeId> {
        self.add(NodeSpec::new(NodeKind::Embedding { transformation }, parents))
    }

    /// Concatenation persists its parents so a partial update can be recombined.
    pub fn concatenation(&mut self, parents: Vec<NodeId>) -> Result<NodeId> {
        let mut spec = NodeSpec::new(NodeKind::Concatenation, parents.clone());
        spec.persist_parents = parents;
        self.add(spec)
    }

    pub fn aggregation(
        &mut self,
        weighted_parents: Vec<Weighted<NodeId>>,
        transformation: TransformationConfig,
        effects: BTreeSet<DagEffect>,
    ) -> Result<NodeId> {
        let parents: Vec<NodeId> = weighted_parents.iter().map(|w| w.item.clone()).collect();
        let weights = weighted_parents
            .into_iter()
            .map(|w| (w.item, w.weight))
            .collect();
        let mut spec = NodeSpec::new(
            NodeKind::Aggregation {
                weights,
                transformation,
            },
            parents.clone(),
        );
        spec.own_effects = effects;
        spec.persist_parents = parents;
        self.add(spec)
    }

    pub fn event_aggregation(
        &mut self,
        params: EventAggregationParams,
        effects: BTreeSet<DagEffect>,
    ) -> Result<NodeId> {
        let mut parents = vec![params.input_to_aggregate.clone()];
        parents.extend(params.filters.iter().map(|f| f.item.clone()));
        let mut spec = NodeSpec::new(NodeKind::EventAggregation(params.clone()), parents);
        spec.own_schemas = [params.event_schema.clone(), params.affected.schema.clone()]
            .into_iter()
            .collect();
        spec.own_effects = effects;
        spec.isolated = true;
        spec.persist_self = true;
        spec.persist_parents = vec![params.input_to_aggregate];
        self.add(spec)
    }

    pub fn comparison_filter(
        &mut self,
        parent: NodeId,
        field: SchemaField,
        operator: ComparisonOperator,
        operand: Value,
    ) -> Result<NodeId> {
        self.add(NodeSpec::new(
            NodeKind::ComparisonFilter {
                field,
                operator,
                operand,
            },
            vec![parent],
        ))
    }

    pub fn index(&mut self, parents: Vec<NodeId>) -> Result<NodeId> {
        let mut spec = NodeSpec::new(NodeKind::Index, parents);
        spec.persist_self = true;
        self.add(spec)
    }

    fn add(&mut self, spec: NodeSpec) -> Result<NodeId> {
        let tag = spec.kind.tag();
        spec.kind.parent_count().check(tag, spec.parents.len())?;
        let parents = spec
            .parents
            .iter()
            .map(|id| self.get(id))
            .collect::<Result<Vec<&Node>>>()?;
        let length = Self::validate_parents(&spec.kind, &parents)?;

        let depth = parents.iter().map(|p| p.depth + 1).max().unwrap_or(0);
        if depth > self.max_depth {
            return Err(GraphError::DepthExceeded {
                max_depth: self.max_depth,
            });
        }

        let mut schemas = spec.own_schemas;
        let mut dag_effects = spec.own_effects;
        if !spec.isolated {
            for parent in &parents {
                schemas.extend(parent.schemas.iter().cloned());
                dag_effects.extend(parent.dag_effects.iter().cloned());
            }
        }

        let id = Self::content_id(&spec.kind, &spec.parents)?;
        match self.nodes.get_mut(&id) {
            Some(existing) => {
                existing.schemas.extend(schemas);
                existing.dag_effects.extend(dag_effects);
                existing.persist_node_result |= spec.persist_self;
            }
            None => {
                trace!(node_id = %id, kind = tag, "Created node");
                self.nodes.insert(
                    id.clone(),
                    Node {
                        id: id.clone(),
                        kind: spec.kind,
                        parents: spec.parents,
                        schemas,
                        dag_effects,
                        persist_node_result: spec.persist_self,
                        length,
                        depth,
                    },
                );
            }
        }
        for parent_id in &spec.persist_parents {
            if let Some(parent) = self.nodes.get_mut(parent_id) {
                parent.persist_node_result = true;
            }
        }
        Ok(id)
    }

    /// Check parent output types and return the new node's vector length.
    fn validate_parents(kind: &NodeKind, parents: &[&Node]) -> Result<usize> {
        let require_scalar = |p: &Node| {
            if p.is_vector() {
                Err(GraphError::InvalidParent(format!(
                    "{} node cannot take vector parent {}",
                    kind.tag(),
                    p.id
                )))
            } else {
                Ok(())
            }
        };
        let require_vector = |p: &Node| {
            if p.is_vector() {
                Ok(())
            } else {
                Err(GraphError::InvalidParent(format!(
                    "{} node cannot take scalar parent {}",
                    kind.tag(),
                    p.id
                )))
            }
        };
        match kind {
            NodeKind::SchemaField { .. } | NodeKind::Constant { .. } | NodeKind::NamedFunction { .. } => {
                Ok(0)
            }
            NodeKind::Chunking { .. } | NodeKind::ComparisonFilter { .. } => {
                parents.iter().try_for_each(|p| require_scalar(p))?;
                Ok(0)
            }
            NodeKind::Embedding { transformation } => {
                parents.iter().try_for_each(|p| require_scalar(p))?;
                Ok(transformation.length())
            }
            NodeKind::Concatenation => {
                parents.iter().try_for_each(|p| require_vector(p))?;
                Ok(parents.iter().map(|p| p.length).sum())
            }
            NodeKind::Aggregation {
                weights,
                transformation,
            } => {
                for parent in parents {
                    require_vector(parent)?;
                    Self::require_length(parent, transformation.length())?;
                    if !weights.contains_key(&parent.id) {
                        return Err(GraphError::InvalidParent(format!(
                            "aggregation has no weight for parent {}",
                            parent.id
                        )));
                    }
                }
                Ok(transformation.length())
            }
            NodeKind::EventAggregation(params) => {
                let (input, filters) = parents
                    .split_first()
                    .ok_or_else(|| GraphError::InvalidState("missing aggregated input".to_string()))?;
                require_vector(input)?;
                Self::require_length(input, params.transformation.length())?;
                filters.iter().try_for_each(|p| require_scalar(p))?;
                Ok(params.transformation.length())
            }
            NodeKind::Index => {
                parents.iter().try_for_each(|p| require_vector(p))?;
                let length = parents.first().map(|p| p.length).unwrap_or(0);
                for parent in parents {
                    Self::require_length(parent, length)?;
                }
                Ok(length)
            }
        }
    }

    fn require_length(parent: &Node, expected: usize) -> Result<()> {
        if parent.length != expected {
            return Err(GraphError::InvalidParent(format!(
                "parent {} has length {}, expected {expected}",
                parent.id, parent.length
            )));
        }
        Ok(())
    }

    /// Stable, order-sensitive id over kind, parameters and parent ids.
    fn content_id(kind: &NodeKind, parents: &[NodeId]) -> Result<NodeId> {
        let params = serde_json::to_string(kind)?;
        let mut hasher = Sha256::new();
        hasher.update(kind.tag().as_bytes());
        hasher.update(b"|");
        hasher.update(params.as_bytes());
        hasher.update(b" | ");
        hasher.update(parents.join(",").as_bytes());
        let hash = hex::encode(hasher.finalize());
        Ok(format!("{}_{}", kind.tag(), &hash[..NODE_HASH_LENGTH]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vecgraph_embeddings::{ModelConfig, NumberConfig, NumberMode};

    fn text() -> TransformationConfig {
        TransformationConfig::new(EmbeddingConfig::Text(ModelConfig {
            engine: "mock".into(),
            dimension: 4,
        }))
    }

    fn number() -> TransformationConfig {
        TransformationConfig::new(EmbeddingConfig::Number(NumberConfig::new(
            0.0,
            10.0,
            NumberMode::Maximum,
        )))
    }

    fn embedding(arena: &mut NodeArena, field: &str, config: TransformationConfig) -> NodeId {
        let f = arena.schema_field(SchemaField::new("paper", field)).unwrap();
        arena.embedding(vec![f], config).unwrap()
    }

    #[test]
    fn test_identical_nodes_share_identity() {
        let mut a = NodeArena::new(20);
        let mut b = NodeArena::new(20);
        let id_a = embedding(&mut a, "body", text());
        let id_b = embedding(&mut b, "body", text());
        assert_eq!(id_a, id_b);
        let again = embedding(&mut a, "body", text());
        assert_eq!(again, id_a);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_different_params_differ() {
        let mut arena = NodeArena::new(20);
        assert_ne!(
            embedding(&mut arena, "body", text()),
            embedding(&mut arena, "title", text())
        );
    }

    #[test]
    fn test_concatenation_length_and_persistence() {
        let mut arena = NodeArena::new(20);
        let t = embedding(&mut arena, "body", text());
        let n = embedding(&mut arena, "score", number());
        let concat = arena.concatenation(vec![t.clone(), n.clone()]).unwrap();
        assert_eq!(arena.get(&concat).unwrap().length(), 5);
        assert!(arena.get(&t).unwrap().persist_node_result());
        assert!(arena.get(&n).unwrap().persist_node_result());
        assert!(!arena.get(&concat).unwrap().persist_node_result());
        assert!(arena.get(&concat).unwrap().has_schema("paper"));
    }

    #[test]
    fn test_concatenation_order_matters() {
        let mut arena = NodeArena::new(20);
        let t = embedding(&mut arena, "body", text());
        let n = embedding(&mut arena, "score", number());
        let ab = arena.concatenation(vec![t.clone(), n.clone()]).unwrap();
        let ba = arena.concatenation(vec![n, t]).unwrap();
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_concatenation_without_parents_fails() {
        let mut arena = NodeArena::new(20);
        let err = arena.concatenation(vec![]).unwrap_err();
        assert!(matches!(err, GraphError::ParentCount { .. }));
    }

    #[test]
    fn test_embedding_parent_count() {
        let mut arena = NodeArena::new(20);
        let a = arena.schema_field(SchemaField::new("paper", "a")).unwrap();
        let b = arena.schema_field(SchemaField::new("paper", "b")).unwrap();
        assert!(matches!(
            arena.embedding(vec![a, b], text()),
            Err(GraphError::ParentCount { .. })
        ));
    }

    #[test]
    fn test_embedding_rejects_vector_parent() {
        let mut arena = NodeArena::new(20);
        let t = embedding(&mut arena, "body", text());
        assert!(matches!(
            arena.embedding(vec![t], text()),
            Err(GraphError::InvalidParent(_))
        ));
    }

    #[test]
    fn test_depth_exceeded() {
        let mut arena = NodeArena::new(2);
        let t = embedding(&mut arena, "body", text());
        let c1 = arena.concatenation(vec![t]).unwrap();
        let err = arena.concatenation(vec![c1]).unwrap_err();
        assert!(matches!(err, GraphError::DepthExceeded { max_depth: 2 }));
    }

    #[test]
    fn test_index_requires_equal_lengths() {
        let mut arena = NodeArena::new(20);
        let t = embedding(&mut arena, "body", text());
        let n = embedding(&mut arena, "score", number());
        assert!(matches!(
            arena.index(vec![t, n]),
            Err(GraphError::InvalidParent(_))
        ));
    }

    #[test]
    fn test_ingestion_only_kinds() {
        assert!(NodeKind::SchemaField {
            field: SchemaField::new("a", "b")
        }
        .is_ingestion_only());
        assert!(!NodeKind::Concatenation.is_ingestion_only());
    }
}
