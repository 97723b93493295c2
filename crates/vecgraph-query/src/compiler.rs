//! Compiles the index dag into a query dag.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;
use vecgraph_embeddings::EmbeddingProvider;
use vecgraph_graph::{Dag, Node, NodeId, NodeKind};

use crate::dag::QueryDag;
use crate::error::{QueryError, Result};
use crate::node::{QueryNode, QueryOperator};

/// Builds [`QueryDag`]s, sharing space embeddings with ingestion through the provider.
#[derive(Debug, Clone)]
pub struct QueryDagCompiler {
    provider: Arc<EmbeddingProvider>,
}

impl QueryDagCompiler {
    pub fn new(provider: Arc<EmbeddingProvider>) -> Self {
        Self { provider }
    }

    /// Ingestion-only nodes are dropped together with every edge into them,
    /// so embeddings become orphans fed by query inputs and aggregations keep
    /// only the own embedding.
    pub fn compile(&self, dag: &Dag) -> Result<QueryDag> {
        let index_count = dag
            .nodes()
            .filter(|n| matches!(n.kind(), NodeKind::Index))
            .count();
        if index_count != 1 {
            return Err(QueryError::LeafNodeCount { found: index_count });
        }

        let query_parents = |node: &Node| -> Result<Vec<NodeId>> {
            let mut parents = Vec::with_capacity(node.parents().len());
            for parent in node.parents() {
                if !dag.node(parent)?.kind().is_ingestion_only() {
                    parents.push(parent.clone());
                }
            }
            Ok(parents)
        };

        let mut reachable: HashSet<&str> = HashSet::new();
        let mut stack = vec![dag.index_id()];
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            for parent in dag.node(id)?.parents() {
                if !dag.node(parent)?.kind().is_ingestion_only() {
                    stack.push(parent.as_str());
                }
            }
        }

        let mut schemas_of: HashMap<&str, BTreeSet<String>> = HashMap::new();
        let mut nodes = Vec::with_capacity(reachable.len());
        for node in dag.nodes().filter(|n| reachable.contains(n.id())) {
            let parents = query_parents(node.as_ref())?;
            if matches!(node.kind(), NodeKind::Aggregation { .. }) && parents.len() != 1 {
                return Err(QueryError::InvalidQueryDag(format!(
                    "aggregation {} must keep exactly 1 parent, kept {}",
                    node.id(),
                    parents.len()
                )));
            }
            let schemas = match node.kind() {
                NodeKind::Embedding { .. } => node.schemas().clone(),
                _ => parents
                    .iter()
                    .filter_map(|p| schemas_of.get(p.as_str()))
                    .flatten()
                    .cloned()
                    .collect(),
            };
            schemas_of.insert(node.id(), schemas.clone());
            let operator = Arc::new(QueryOperator::compile(node, &self.provider)?);
            nodes.push(QueryNode::new(node.clone(), parents, schemas, operator));
        }

        let compiled = QueryDag::new(nodes)?;
        debug!(
            index = compiled.index_id(),
            nodes = compiled.len(),
            vector_length = compiled.vector_length(),
            "Compiled query dag"
        );
        Ok(compiled)
    }
}
