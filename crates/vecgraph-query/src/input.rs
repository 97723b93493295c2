//! Inputs addressed to query nodes.

use std::collections::HashMap;

use vecgraph_graph::NodeId;
use vecgraph_types::{Value, Vector, Weighted};

/// Inputs per node id. A node may receive several weighted inputs.
pub type QueryInputs = HashMap<NodeId, Vec<QueryNodeInput>>;

/// One weighted value addressed to a query node.
///
/// Inputs marked `to_invert` are vectors in the node's own output space
/// (for example a stored index vector). Nodes that combine parents split
/// them back into per-parent parts instead of embedding them.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryNodeInput {
    pub value: Weighted<Value>,
    pub to_invert: bool,
}

impl QueryNodeInput {
    pub fn new(value: impl Into<Value>, weight: f32) -> Self {
        Self {
            value: Weighted::new(value.into(), weight),
            to_invert: false,
        }
    }

    pub fn to_invert(vector: Vector, weight: f32) -> Self {
        Self {
            value: Weighted::new(Value::Vector(vector), weight),
            to_invert: true,
        }
    }

    pub fn weight(&self) -> f32 {
        self.value.weight
    }
}

/// `base` plus `extra`, appending to nodes present in both.
pub(crate) fn merge_inputs(base: &QueryInputs, extra: QueryInputs) -> QueryInputs {
    let mut merged = base.clone();
    for (node_id, inputs) in extra {
        merged.entry(node_id).or_default().extend(inputs);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_appends() {
        let base: QueryInputs = [("a".to_string(), vec![QueryNodeInput::new("x", 1.0)])].into();
        let extra: QueryInputs = [
            ("a".to_string(), vec![QueryNodeInput::new("y", 0.5)]),
            ("b".to_string(), vec![QueryNodeInput::to_invert(Vector::zeros(2), 1.0)]),
        ]
        .into();
        let merged = merge_inputs(&base, extra);
        assert_eq!(merged["a"].len(), 2);
        assert_eq!(merged["a"][1].weight(), 0.5);
        assert!(merged["b"][0].to_invert);
        assert_eq!(base["a"].len(), 1);
    }
}
