//! Query requests.

use std::collections::BTreeMap;

use vecgraph_storage::FieldFilter;
use vecgraph_types::{Value, Vector, Weighted};

/// A k-NN query against the vectors of one schema.
///
/// Inputs and weights are keyed by space name. Spaces without inputs
/// contribute their default vector.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub schema: String,
    pub space_inputs: BTreeMap<String, Vec<Weighted<Value>>>,
    pub space_weights: BTreeMap<String, f32>,
    /// A stored index vector to query with ("more like this")
    pub vector: Option<Vector>,
    pub filters: Vec<FieldFilter>,
    pub limit: Option<usize>,
    pub radius: Option<f32>,
    /// Unix seconds used as "now" by time dependent spaces
    pub now: Option<i64>,
    pub fields_to_return: Vec<String>,
}

impl QueryRequest {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            ..Self::default()
        }
    }

    pub fn with_input(self, space: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_weighted_input(space, value, 1.0)
    }

    pub fn with_weighted_input(
        mut self,
        space: impl Into<String>,
        value: impl Into<Value>,
        weight: f32,
    ) -> Self {
        self.space_inputs
            .entry(space.into())
            .or_default()
            .push(Weighted::new(value.into(), weight));
        self
    }

    pub fn with_space_weight(mut self, space: impl Into<String>, weight: f32) -> Self {
        self.space_weights.insert(space.into(), weight);
        self
    }

    pub fn with_vector(mut self, vector: Vector) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = Some(radius);
        self
    }

    pub fn with_now(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    pub fn with_fields_to_return(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fields_to_return.extend(fields.into_iter().map(Into::into));
        self
    }
}
