//! The compiled query dag: turns addressed inputs into one index vector.

use std::collections::{HashMap, HashSet};

use tracing::debug;
use vecgraph_graph::NodeId;
use vecgraph_types::{ExecutionContext, Normalization, Value, Vector};

use crate::error::{QueryError, Result};
use crate::input::{merge_inputs, QueryInputs, QueryNodeInput};
use crate::node::{evaluate_embedding, QueryNode, QueryOperator};

/// Query nodes ending in a single index node.
#[derive(Debug, Clone)]
pub struct QueryDag {
    nodes: HashMap<NodeId, QueryNode>,
    index_id: NodeId,
}

impl QueryDag {
    /// Exactly one node may be a leaf, and it must be the index.
    pub fn new(nodes: Vec<QueryNode>) -> Result<Self> {
        let referenced: HashSet<&str> = nodes
            .iter()
            .flat_map(|n| n.parents().iter().map(String::as_str))
            .collect();
        let leaves: Vec<&QueryNode> = nodes
            .iter()
            .filter(|n| !referenced.contains(n.id()))
            .collect();
        let index_id = match leaves.as_slice() {
            [leaf] if matches!(leaf.operator(), QueryOperator::Index) => leaf.id().to_string(),
            _ => {
                return Err(QueryError::LeafNodeCount {
                    found: leaves.len(),
                })
            }
        };
        let nodes: HashMap<NodeId, QueryNode> = nodes
            .into_iter()
            .map(|n| (n.id().to_string(), n))
            .collect();
        for node in nodes.values() {
            if let Some(missing) = node.parents().iter().find(|p| !nodes.contains_key(*p)) {
                return Err(QueryError::InvalidQueryDag(format!(
                    "{} has parent {missing} outside the query dag",
                    node.id()
                )));
            }
        }
        Ok(Self { nodes, index_id })
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn node(&self, id: &str) -> Result<&QueryNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| QueryError::InvalidInput(format!("node {id} is not part of the query dag")))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Length of the produced query vector.
    pub fn vector_length(&self) -> usize {
        self.nodes
            .get(&self.index_id)
            .map(QueryNode::length)
            .unwrap_or_default()
    }

    /// Build the query vector for the schema named in `context`.
    ///
    /// Node weights in `context` weigh the parents of concatenations, so
    /// setting them on the space nodes weighs whole spaces.
    pub fn evaluate(&self, inputs: &QueryInputs, context: &ExecutionContext) -> Result<Vector> {
        if let Some(unknown) = inputs.keys().find(|id| !self.contains(id)) {
            return Err(QueryError::InvalidInput(format!(
                "input addressed to unknown node {unknown}"
            )));
        }
        let vector = self.evaluate_vector(&self.index_id, inputs, context)?;
        if vector.dimension() != self.vector_length() {
            return Err(QueryError::InvalidState(format!(
                "query vector has dimension {}, index expects {}",
                vector.dimension(),
                self.vector_length()
            )));
        }
        debug!(
            schema = context.queried_schema_name().unwrap_or_default(),
            addressed = inputs.len(),
            "Evaluated query vector"
        );
        Ok(vector)
    }

    /// Split an index vector into the parts produced by `node_ids`, in order.
    ///
    /// Only nodes on the path of the queried schema have parts.
    pub fn get_vector_parts(
        &self,
        vector: &Vector,
        node_ids: &[NodeId],
        context: &ExecutionContext,
    ) -> Result<Vec<Vector>> {
        let mut parts = HashMap::new();
        self.collect_parts(&self.index_id, vector.clone(), context, &mut parts)?;
        node_ids
            .iter()
            .map(|id| {
                parts.remove(id.as_str()).ok_or_else(|| {
                    QueryError::InvalidInput(format!(
                        "node {id} has no part in vectors of {}",
                        context.queried_schema_name().unwrap_or_default()
                    ))
                })
            })
            .collect()
    }

    fn collect_parts<'a>(
        &'a self,
        id: &'a str,
        vector: Vector,
        context: &ExecutionContext,
        parts: &mut HashMap<&'a str, Vector>,
    ) -> Result<()> {
        let node = self.node(id)?;
        vector.check_dimension(node.length())?;
        match node.operator() {
            QueryOperator::Index => {
                let active = self.active_parent(node, context)?;
                self.collect_parts(active, vector.clone(), context, parts)?;
            }
            QueryOperator::Aggregation => {
                if let [parent] = node.parents() {
                    self.collect_parts(parent, vector.clone(), context, parts)?;
                }
            }
            QueryOperator::Concatenation => {
                for (parent, part) in node.parents().iter().zip(self.split_concatenated(node, &vector)?) {
                    self.collect_parts(parent, part, context, parts)?;
                }
            }
            QueryOperator::Embedding(_) | QueryOperator::Constant(_) | QueryOperator::Now => {}
        }
        parts.insert(node.id(), vector);
        Ok(())
    }

    fn evaluate_vector(&self, id: &str, inputs: &QueryInputs, context: &ExecutionContext) -> Result<Vector> {
        match self.evaluate_node(id, inputs, context)? {
            Value::Vector(vector) => Ok(vector),
            other => Err(QueryError::InvalidState(format!(
                "node {id} produced a {} instead of a vector",
                other.type_name()
            ))),
        }
    }

    fn evaluate_node(&self, id: &str, inputs: &QueryInputs, context: &ExecutionContext) -> Result<Value> {
        let node = self.node(id)?;
        let own: &[QueryNodeInput] = inputs.get(id).map(Vec::as_slice).unwrap_or_default();
        Ok(match node.operator() {
            QueryOperator::Constant(value) => value.clone(),
            QueryOperator::Now => Value::Int(context.now()),
            QueryOperator::Embedding(space) => {
                let parent_values = node
                    .parents()
                    .iter()
                    .map(|p| self.evaluate_node(p, inputs, context))
                    .collect::<Result<Vec<_>>>()?;
                Value::Vector(evaluate_embedding(id, space, own, parent_values, context)?)
            }
            QueryOperator::Aggregation => {
                let [parent] = node.parents() else {
                    return Err(QueryError::InvalidState(format!(
                        "aggregation {id} must have exactly 1 query parent"
                    )));
                };
                let to_invert = inputs_to_invert(id, own, false)?;
                let propagated = readdress(inputs, parent, to_invert);
                Value::Vector(self.evaluate_vector(parent, &propagated, context)?)
            }
            QueryOperator::Concatenation => Value::Vector(self.evaluate_concatenation(node, own, inputs, context)?),
            QueryOperator::Index => {
                let active = self.active_parent(node, context)?;
                let to_invert = inputs_to_invert(id, own, true)?;
                let propagated = readdress(inputs, active, to_invert);
                Value::Vector(self.evaluate_vector(active, &propagated, context)?)
            }
        })
    }

    /// Weighted concatenation of the parents.
    ///
    /// Only parents with a non-zero weighted contribution count towards the
    /// constant normalization, and the result is scaled by
    /// `parents / non_zero_parents`, so a zero weight and an omitted zero
    /// default input give the same vector.
    fn evaluate_concatenation(
        &self,
        node: &QueryNode,
        own: &[QueryNodeInput],
        inputs: &QueryInputs,
        context: &ExecutionContext,
    ) -> Result<Vector> {
        let mut readdressed = QueryInputs::new();
        for input in inputs_to_invert(node.id(), own, true)? {
            let vector = input.value.item.as_vector().ok_or_else(|| {
                QueryError::InvalidInput(format!("inputs to invert at {} must be vectors", node.id()))
            })?;
            for (parent, part) in node.parents().iter().zip(self.split_concatenated(node, vector)?) {
                readdressed
                    .entry(parent.clone())
                    .or_default()
                    .push(QueryNodeInput::to_invert(part, input.weight()));
            }
        }
        let inputs = merge_inputs(inputs, readdressed);

        let mut weighted = Vec::with_capacity(node.parents().len());
        let mut non_zero_weights = Vec::new();
        for parent in node.parents() {
            let weight = context.node_weight(parent);
            let vector = self.evaluate_vector(parent, &inputs, context)?.multiply(weight);
            if vector.norm() != 0.0 {
                non_zero_weights.push(weight);
            }
            weighted.push(vector);
        }
        let length = non_zero_weights.iter().map(|w| w * w).sum::<f32>().sqrt();
        let normalization = Normalization::constant(if length > 0.0 { length } else { 1.0 })?;
        let concatenated = normalization.normalize(&Vector::concatenate(weighted.iter()));
        let compensation = match non_zero_weights.len() {
            0 => 1.0,
            n => node.parents().len() as f32 / n as f32,
        };
        Ok(concatenated.multiply(compensation))
    }

    /// Per-parent parts of a concatenated vector, undoing the equal-weight normalization.
    fn split_concatenated(&self, node: &QueryNode, vector: &Vector) -> Result<Vec<Vector>> {
        vector.check_dimension(node.length())?;
        let lengths = node
            .parents()
            .iter()
            .map(|p| self.node(p).map(QueryNode::length))
            .collect::<Result<Vec<_>>>()?;
        let denormalizer = Normalization::constant((lengths.len() as f32).sqrt())?;
        Ok(vector
            .split(&lengths)?
            .iter()
            .map(|part| denormalizer.denormalize(part))
            .collect())
    }

    /// The index parent producing vectors of the queried schema.
    fn active_parent<'a>(&self, index: &'a QueryNode, context: &ExecutionContext) -> Result<&'a str> {
        let schema = context
            .queried_schema_name()
            .ok_or_else(|| QueryError::InvalidInput("missing schema name for query".to_string()))?;
        let mut candidates = Vec::new();
        for parent in index.parents() {
            if self.node(parent)?.has_schema(schema) {
                candidates.push(parent.as_str());
            }
        }
        match candidates.as_slice() {
            [active] => Ok(active),
            [] => Err(QueryError::InvalidInput(format!(
                "query dag has no schema {schema}"
            ))),
            _ => Err(QueryError::InvalidState(format!(
                "more than one index parent produces schema {schema}"
            ))),
        }
    }
}

/// Inputs of `node_id` that must be inverted.
///
/// `strict` nodes only accept such inputs.
fn inputs_to_invert(node_id: &str, own: &[QueryNodeInput], strict: bool) -> Result<Vec<QueryNodeInput>> {
    if strict {
        if let Some(plain) = own.iter().find(|i| !i.to_invert) {
            return Err(QueryError::InvalidInput(format!(
                "node {node_id} only accepts vectors to invert, got a {}",
                plain.value.item.type_name()
            )));
        }
    }
    Ok(own.iter().filter(|i| i.to_invert).cloned().collect())
}

fn readdress(inputs: &QueryInputs, target: &str, to_invert: Vec<QueryNodeInput>) -> QueryInputs {
    if to_invert.is_empty() {
        return inputs.clone();
    }
    merge_inputs(inputs, [(target.to_string(), to_invert)].into())
}
