//! Compiles schema dags into level-ordered online dags.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;
use vecgraph_embeddings::EmbeddingProvider;
use vecgraph_graph::{Node, NodeId, NodeKind, SchemaDag};
use vecgraph_types::ExecutionContext;

use crate::decay::{DecayStrategy, LinearDecay};
use crate::entity_cache::EntityCache;
use crate::error::{OnlineError, Result};
use crate::executor::ConcurrentExecutor;
use crate::node::{NodeResults, OnlineNode, OnlineOperator};
use crate::record::{EvaluationResult, OnlineInput};

/// Builds [`OnlineSchemaDag`]s, memoizing operators by node id.
#[derive(Debug)]
pub struct OnlineSchemaDagCompiler {
    provider: Arc<EmbeddingProvider>,
    decay: Arc<dyn DecayStrategy>,
    store_compilation_results: bool,
    compiled: HashMap<NodeId, Arc<OnlineOperator>>,
}

impl OnlineSchemaDagCompiler {
    pub fn new(provider: Arc<EmbeddingProvider>) -> Self {
        Self {
            provider,
            decay: Arc::new(LinearDecay),
            store_compilation_results: true,
            compiled: HashMap::new(),
        }
    }

    pub fn with_decay_strategy(mut self, decay: Arc<dyn DecayStrategy>) -> Self {
        self.decay = decay;
        self
    }

    /// Keep compiled operators for later compilations instead of dropping them after each one.
    pub fn with_store_compilation_results(mut self, store: bool) -> Self {
        self.store_compilation_results = store;
        self
    }

    pub fn compiled_count(&self) -> usize {
        self.compiled.len()
    }

    pub fn compile_schema_dag(&mut self, dag: &SchemaDag) -> Result<OnlineSchemaDag> {
        validate_leaf(dag)?;
        let by_id: HashMap<&str, &Arc<Node>> = dag.nodes().iter().map(|n| (n.id(), n)).collect();

        // the aggregated input is read from storage, never evaluated for the affected entity
        let projected_parents = |node: &Node| -> Vec<NodeId> {
            let parents = dag.parents_of(node.id());
            match node.kind() {
                NodeKind::EventAggregation(params) => parents
                    .iter()
                    .filter(|p| **p != params.input_to_aggregate)
                    .cloned()
                    .collect(),
                _ => parents.to_vec(),
            }
        };

        let mut reachable: HashSet<&str> = HashSet::new();
        let mut stack = vec![dag.leaf_id()];
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            let node: &Node = by_id
                .get(id)
                .ok_or_else(|| OnlineError::InvalidSchemaDag(format!("unknown node {id}")))?;
            for parent in projected_parents(node) {
                if let Some(parent) = by_id.get(parent.as_str()) {
                    stack.push(parent.id());
                }
            }
        }

        let mut levels: Vec<Vec<OnlineNode>> = Vec::new();
        let mut level_of: HashMap<&str, usize> = HashMap::new();
        for node in dag.nodes().iter().filter(|n| reachable.contains(n.id())) {
            let parents = projected_parents(node.as_ref());
            let mut level = 0;
            for parent in &parents {
                let parent_level = level_of.get(parent.as_str()).ok_or_else(|| {
                    OnlineError::InvalidSchemaDag(format!("{} listed before parent {parent}", node.id()))
                })?;
                level = level.max(parent_level + 1);
            }
            level_of.insert(node.id(), level);
            let operator = self.operator(node)?;
            if levels.len() <= level {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(OnlineNode::new(node.clone(), parents, operator));
        }

        let compiled = OnlineSchemaDag {
            schema: dag.schema().to_string(),
            leaf_id: dag.leaf_id().to_string(),
            levels,
        };
        debug!(
            schema = dag.schema(),
            nodes = compiled.node_count(),
            levels = compiled.levels.len(),
            "Compiled online schema dag"
        );
        if !self.store_compilation_results {
            self.compiled.clear();
        }
        Ok(compiled)
    }

    fn operator(&mut self, node: &Node) -> Result<Arc<OnlineOperator>> {
        if let Some(existing) = self.compiled.get(node.id()) {
            return Ok(existing.clone());
        }
        let operator = Arc::new(OnlineOperator::compile(node, &self.provider, &self.decay)?);
        self.compiled.insert(node.id().to_string(), operator.clone());
        Ok(operator)
    }
}

/// Exactly one node without children, and it is the index.
fn validate_leaf(dag: &SchemaDag) -> Result<()> {
    let referenced: HashSet<&str> = dag
        .nodes()
        .iter()
        .flat_map(|n| dag.parents_of(n.id()).iter().map(String::as_str))
        .collect();
    let leaves: Vec<&Arc<Node>> = dag
        .nodes()
        .iter()
        .filter(|n| !referenced.contains(n.id()))
        .collect();
    match leaves.as_slice() {
        [leaf] if matches!(leaf.kind(), NodeKind::Index) => Ok(()),
        [leaf] => Err(OnlineError::InvalidSchemaDag(format!(
            "leaf {} is not an index node",
            leaf.id()
        ))),
        _ => Err(OnlineError::LeafNodeCount {
            found: leaves.len(),
        }),
    }
}

/// Online nodes of one schema dag grouped into levels.
///
/// Every node's parents sit in earlier levels, so nodes within one level are
/// independent and can run in parallel.
#[derive(Debug, Clone)]
pub struct OnlineSchemaDag {
    schema: String,
    leaf_id: NodeId,
    levels: Vec<Vec<OnlineNode>>,
}

impl OnlineSchemaDag {
    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn leaf_id(&self) -> &str {
        &self.leaf_id
    }

    pub fn levels(&self) -> &[Vec<OnlineNode>] {
        &self.levels
    }

    pub fn node_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.levels.iter().flatten().any(|n| n.id() == id)
    }

    /// Leaf results for `inputs`, in input order.
    pub fn evaluate(
        &self,
        inputs: &[OnlineInput<'_>],
        context: &ExecutionContext,
        cache: &EntityCache<'_>,
        executor: &ConcurrentExecutor,
    ) -> Result<Vec<Option<EvaluationResult>>> {
        let mut results = NodeResults::new();
        for level in &self.levels {
            let evaluated = executor.execute(level, |node| node.evaluate(inputs, &results, context, cache));
            for (node, result) in level.iter().zip(evaluated) {
                results.insert(node.id().to_string(), result?);
            }
        }
        results
            .remove(&self.leaf_id)
            .ok_or_else(|| OnlineError::InvalidState(format!("leaf {} was not evaluated", self.leaf_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ParsedRecord;
    use vecgraph_embeddings::{
        EmbeddingConfig, EngineRegistry, MockEmbeddingEngine, ModelConfig, NumberConfig, NumberMode,
        TransformationConfig,
    };
    use vecgraph_graph::{Index, IndexBuilder, Space};
    use vecgraph_storage::InMemoryStorage;
    use vecgraph_types::{SchemaField, Value};

    fn provider() -> Arc<EmbeddingProvider> {
        let engines = EngineRegistry::new().with_engine(Arc::new(MockEmbeddingEngine::new("mock", 4)));
        Arc::new(EmbeddingProvider::new(engines, 16))
    }

    fn index() -> Index {
        let text = Space::new(
            "body",
            TransformationConfig::new(EmbeddingConfig::Text(ModelConfig {
                engine: "mock".into(),
                dimension: 4,
            })),
            [SchemaField::new("paper", "body")],
        )
        .unwrap();
        let number = Space::new(
            "year",
            TransformationConfig::new(EmbeddingConfig::Number(NumberConfig::new(
                2000.0,
                2020.0,
                NumberMode::Maximum,
            ))),
            [SchemaField::new("paper", "year")],
        )
        .unwrap();
        IndexBuilder::new([text, number]).build().unwrap()
    }

    #[test]
    fn test_levels_respect_parents() {
        let index = index();
        let dag = index.dag().project_to_schema("paper").unwrap();
        let compiled = OnlineSchemaDagCompiler::new(provider())
            .compile_schema_dag(&dag)
            .unwrap();
        assert_eq!(compiled.node_count(), dag.nodes().len());
        let mut seen = HashSet::new();
        for level in compiled.levels() {
            for node in level {
                assert!(node.parents().iter().all(|p| seen.contains(p)));
            }
            seen.extend(level.iter().map(|n| n.id().to_string()));
        }
        assert_eq!(compiled.levels().last().unwrap()[0].id(), index.index_node_id());
    }

    #[test]
    fn test_compilation_memo() {
        let index = index();
        let dag = index.dag().project_to_schema("paper").unwrap();
        let mut compiler = OnlineSchemaDagCompiler::new(provider());
        compiler.compile_schema_dag(&dag).unwrap();
        assert_eq!(compiler.compiled_count(), dag.nodes().len());

        let mut forgetful = OnlineSchemaDagCompiler::new(provider()).with_store_compilation_results(false);
        forgetful.compile_schema_dag(&dag).unwrap();
        assert_eq!(forgetful.compiled_count(), 0);
    }

    #[test]
    fn test_evaluate_record_batch() {
        let index = index();
        let dag = index.dag().project_to_schema("paper").unwrap();
        let compiled = OnlineSchemaDagCompiler::new(provider())
            .compile_schema_dag(&dag)
            .unwrap();
        let storage = InMemoryStorage::new();
        let cache = EntityCache::new(&storage);
        let records = [
            ParsedRecord::new("paper", "p1")
                .with_field("body", "graph engines")
                .with_field("year", Value::Int(2010)),
            ParsedRecord::new("paper", "p2")
                .with_field("body", "vector search")
                .with_field("year", Value::Int(2020)),
        ];
        let inputs: Vec<OnlineInput<'_>> = records.iter().map(OnlineInput::record).collect();
        for executor in [ConcurrentExecutor::sequential(), ConcurrentExecutor::new(true, 4)] {
            let results = compiled
                .evaluate(&inputs, &ExecutionContext::online(), &cache, &executor)
                .unwrap();
            assert_eq!(results.len(), 2);
            for result in &results {
                let vector = result.as_ref().unwrap().main_vector().unwrap();
                assert_eq!(vector.dimension(), index.vector_length());
                assert!((vector.norm() - 1.0).abs() < 1e-5);
            }
        }
        cache.flush().unwrap();
        let stored = storage
            .read("paper", "p1", &[index.index_node_id().to_string()])
            .unwrap();
        assert!(stored.contains_key(index.index_node_id()));
    }
}
