//! The frozen node graph and its per-schema projections.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::effect::{DagEffect, DagEffectGroup};
use crate::error::{GraphError, Result};
use crate::node::{Node, NodeId, NodeKind};

/// All nodes reachable from one index node.
#[derive(Debug, Clone)]
pub struct Dag {
    nodes: HashMap<NodeId, Arc<Node>>,
    /// Ancestors before descendants
    order: Vec<NodeId>,
    index_id: NodeId,
    dag_effects: BTreeSet<DagEffect>,
}

impl Dag {
    /// Freeze the ancestors of `index_id` taken from `nodes`.
    pub fn new(nodes: HashMap<NodeId, Node>, index_id: &str) -> Result<Self> {
        let index = nodes
            .get(index_id)
            .ok_or_else(|| GraphError::NodeNotFound(index_id.to_string()))?;
        if !matches!(index.kind(), NodeKind::Index) {
            return Err(GraphError::InvalidState(format!(
                "{index_id} is not an index node"
            )));
        }
        let order = topological_order(index_id, |id| {
            nodes
                .get(id)
                .map(|n| n.parents().to_vec())
                .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
        })?;
        let reachable: HashSet<&NodeId> = order.iter().collect();
        let nodes: HashMap<NodeId, Arc<Node>> = nodes
            .into_iter()
            .filter(|(id, _)| reachable.contains(id))
            .map(|(id, node)| (id, Arc::new(node)))
            .collect();
        let dag_effects = nodes
            .values()
            .flat_map(|n| n.dag_effects().iter().cloned())
            .collect();
        debug!(index = index_id, nodes = nodes.len(), "Built dag");
        Ok(Self {
            nodes,
            order,
            index_id: index_id.to_string(),
            dag_effects,
        })
    }

    pub fn node(&self, id: &str) -> Result<&Arc<Node>> {
        self.nodes
            .get(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))
    }

    /// Nodes in topological order.
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn index_node(&self) -> Result<&Arc<Node>> {
        self.node(&self.index_id)
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn dag_effects(&self) -> &BTreeSet<DagEffect> {
        &self.dag_effects
    }

    pub fn dag_effect_groups(&self) -> Vec<DagEffectGroup> {
        DagEffectGroup::group_similar_effects(self.dag_effects.iter())
    }

    /// The part of the graph that evaluates records of `schema`.
    pub fn project_to_schema(&self, schema: &str) -> Result<SchemaDag> {
        self.project(schema, |node| {
            Ok(match node.kind() {
                NodeKind::Concatenation => node.parents().to_vec(),
                NodeKind::Aggregation { .. } if node.has_schema(schema) => node.parents().to_vec(),
                NodeKind::EventAggregation(params) => {
                    if params.event_schema == schema {
                        node.parents().to_vec()
                    } else {
                        Vec::new()
                    }
                }
                _ => self.parents_where(node, |p| p.has_schema(schema))?,
            })
        })
    }

    /// The part of the graph that processes events of one effect group.
    pub fn project_to_dag_effect_group(&self, group: &DagEffectGroup) -> Result<SchemaDag> {
        let event_schema = group
            .event_schema()
            .ok_or_else(|| GraphError::InvalidState("empty effect group".to_string()))?;
        let has_effect = |n: &Node| n.dag_effects().iter().any(|e| group.contains(e));
        self.project(event_schema, |node| {
            Ok(match node.kind() {
                NodeKind::Concatenation
                | NodeKind::Aggregation { .. }
                | NodeKind::ComparisonFilter { .. } => node.parents().to_vec(),
                NodeKind::EventAggregation(_) => {
                    if has_effect(node) {
                        node.parents().to_vec()
                    } else {
                        Vec::new()
                    }
                }
                _ => self.parents_where(node, has_effect)?,
            })
        })
    }

    fn parents_where(&self, node: &Node, keep: impl Fn(&Node) -> bool) -> Result<Vec<NodeId>> {
        let mut parents = Vec::new();
        for parent_id in node.parents() {
            if keep(self.node(parent_id)?) {
                parents.push(parent_id.clone());
            }
        }
        Ok(parents)
    }

    fn project(
        &self,
        schema: &str,
        projected_parents: impl Fn(&Node) -> Result<Vec<NodeId>>,
    ) -> Result<SchemaDag> {
        let mut edges: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let order = topological_order(&self.index_id, |id| {
            let parents = projected_parents(self.node(id)?)?;
            edges.insert(id.to_string(), parents.clone());
            Ok(parents)
        })?;
        let nodes = order
            .iter()
            .map(|id| self.node(id).cloned())
            .collect::<Result<Vec<_>>>()?;
        SchemaDag::new(schema, nodes, edges)
    }
}

/// A projection of the graph used by one evaluator.
///
/// Parent edges may be a subset of the nodes' own parents.
#[derive(Debug, Clone)]
pub struct SchemaDag {
    schema: String,
    nodes: Vec<Arc<Node>>,
    parents: HashMap<NodeId, Vec<NodeId>>,
    leaf_id: NodeId,
}

impl SchemaDag {
    pub fn new(
        schema: impl Into<String>,
        nodes: Vec<Arc<Node>>,
        parents: HashMap<NodeId, Vec<NodeId>>,
    ) -> Result<Self> {
        let referenced: HashSet<&NodeId> = parents.values().flatten().collect();
        let leaves: Vec<&Arc<Node>> = nodes
            .iter()
            .filter(|n| !referenced.contains(&n.id().to_string()))
            .collect();
        let leaf_id = match leaves.as_slice() {
            [leaf] if matches!(leaf.kind(), NodeKind::Index) => leaf.id().to_string(),
            _ => return Err(GraphError::LeafNodeCount { found: leaves.len() }),
        };
        Ok(Self {
            schema: schema.into(),
            nodes,
            parents,
            leaf_id,
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Nodes with ancestors first.
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn leaf_id(&self) -> &str {
        &self.leaf_id
    }

    /// Projected parents of `id`; empty when the node is unknown.
    pub fn parents_of(&self, id: &str) -> &[NodeId] {
        self.parents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.parents.contains_key(id)
    }
}

/// Depth-first post-order from `root` over `parents_of`.
fn topological_order(
    root: &str,
    mut parents_of: impl FnMut(&str) -> Result<Vec<NodeId>>,
) -> Result<Vec<NodeId>> {
    let mut order = Vec::new();
    let mut visited: HashSet<NodeId> = HashSet::new();
    // (node, parents already pushed)
    let mut stack: Vec<(NodeId, bool)> = vec![(root.to_string(), false)];
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
            continue;
        }
        if !visited.insert(id.clone()) {
            continue;
        }
        let parents = parents_of(&id)?;
        stack.push((id, true));
        for parent in parents.into_iter().rev() {
            if !visited.contains(&parent) {
                stack.push((parent, false));
            }
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeArena;
    use vecgraph_embeddings::{EmbeddingConfig, ModelConfig, TransformationConfig};
    use vecgraph_types::SchemaField;

    fn text() -> TransformationConfig {
        TransformationConfig::new(EmbeddingConfig::Text(ModelConfig {
            engine: "mock".into(),
            dimension: 4,
        }))
    }

    fn two_schema_dag() -> Dag {
        let mut arena = NodeArena::new(20);
        let mut tops = Vec::new();
        for schema in ["paper", "review"] {
            let f = arena.schema_field(SchemaField::new(schema, "body")).unwrap();
            let e = arena.embedding(vec![f], text()).unwrap();
            tops.push(arena.concatenation(vec![e]).unwrap());
        }
        let index = arena.index(tops).unwrap();
        Dag::new(arena.into_nodes(), &index).unwrap()
    }

    #[test]
    fn test_topological_order() {
        let dag = two_schema_dag();
        let mut seen = HashSet::new();
        for node in dag.nodes() {
            for parent in node.parents() {
                assert!(seen.contains(parent), "{parent} after {}", node.id());
            }
            seen.insert(node.id().to_string());
        }
        assert_eq!(seen.len(), 7);
    }

    #[test]
    fn test_project_to_schema() {
        let dag = two_schema_dag();
        let paper = dag.project_to_schema("paper").unwrap();
        assert_eq!(paper.leaf_id(), dag.index_id());
        assert_eq!(paper.nodes().len(), 4);
        assert!(paper
            .nodes()
            .iter()
            .all(|n| n.has_schema("paper")));
    }

    #[test]
    fn test_leaf_count_validation() {
        let dag = two_schema_dag();
        let nodes: Vec<Arc<Node>> = dag.nodes().cloned().collect();
        let err = SchemaDag::new("paper", nodes, HashMap::new()).unwrap_err();
        assert!(matches!(err, GraphError::LeafNodeCount { found: 7 }));
    }

    #[test]
    fn test_dag_requires_index_root() {
        let mut arena = NodeArena::new(20);
        let f = arena.schema_field(SchemaField::new("paper", "body")).unwrap();
        assert!(Dag::new(arena.into_nodes(), &f).is_err());
    }
}
