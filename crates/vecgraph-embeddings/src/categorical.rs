//! N-hot category encoding.

use std::collections::BTreeSet;

use vecgraph_types::{ExecutionContext, Vector};

use crate::config::CategoricalConfig;

/// Present categories get 1. Absent ones get the negative filter when
/// storing and 0 when encoding a query.
pub fn embed(config: &CategoricalConfig, inputs: &[String], context: &ExecutionContext) -> Vector {
    let length = config.length();
    if inputs.is_empty() {
        return Vector::zeros(length);
    }
    let present: BTreeSet<usize> = inputs
        .iter()
        .filter_map(|category| index_of(config, category))
        .collect();
    let absent_value = if context.is_query_context() {
        0.0
    } else {
        config.negative_filter
    };
    let values = (0..length)
        .map(|i| if present.contains(&i) { 1.0 } else { absent_value })
        .collect();
    Vector::with_negative_filter_indices(values, (0..length).filter(|i| !present.contains(i)))
}

fn index_of(config: &CategoricalConfig, category: &str) -> Option<usize> {
    config
        .categories
        .iter()
        .position(|c| c == category)
        .or_else(|| {
            config
                .uncategorized_as_category
                .then_some(config.categories.len())
        })
}
