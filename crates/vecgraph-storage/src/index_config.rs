//! Search index declarations and request types.

use serde::{Deserialize, Serialize};
use vecgraph_types::{ComparisonOperator, Value, Vector};

use crate::error::{Result, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    InnerProduct,
    Euclidean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchAlgorithm {
    /// Exhaustive scan
    #[default]
    Flat,
    /// Approximate candidates from an HNSW graph, re-scored exactly
    Hnsw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    Float32,
    Float16,
}

/// The single vector field of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorFieldDescriptor {
    pub field_name: String,
    pub dimension: usize,
    pub distance_metric: DistanceMetric,
    pub search_algorithm: SearchAlgorithm,
    pub precision: Precision,
}

impl VectorFieldDescriptor {
    pub fn new(field_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            field_name: field_name.into(),
            dimension,
            distance_metric: DistanceMetric::default(),
            search_algorithm: SearchAlgorithm::default(),
            precision: Precision::default(),
        }
    }

    pub fn with_distance_metric(mut self, distance_metric: DistanceMetric) -> Self {
        self.distance_metric = distance_metric;
        self
    }

    pub fn with_search_algorithm(mut self, search_algorithm: SearchAlgorithm) -> Self {
        self.search_algorithm = search_algorithm;
        self
    }

    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }
}

/// A scalar field that search filters may reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub field_name: String,
}

impl FieldDescriptor {
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub index_name: String,
    pub vector_field: VectorFieldDescriptor,
    pub field_descriptors: Vec<FieldDescriptor>,
}

impl IndexConfig {
    pub fn new(index_name: impl Into<String>, vector_field: VectorFieldDescriptor) -> Self {
        Self {
            index_name: index_name.into(),
            vector_field,
            field_descriptors: Vec::new(),
        }
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        self.field_descriptors.extend(fields);
        self
    }

    pub fn indexed_field_names(&self) -> impl Iterator<Item = &str> {
        self.field_descriptors.iter().map(|f| f.field_name.as_str())
    }

    pub fn is_indexed(&self, field_name: &str) -> bool {
        self.indexed_field_names().any(|f| f == field_name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.index_name.is_empty() {
            return Err(StorageError::Validation("index name must not be empty".to_string()));
        }
        if self.vector_field.dimension == 0 {
            return Err(StorageError::Validation(format!(
                "index {} has a zero-dimensional vector field",
                self.index_name
            )));
        }
        Ok(())
    }
}

/// One search filter; the field must be declared on the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub operator: ComparisonOperator,
    pub value: Value,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, operator: ComparisonOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn matches(&self, field_value: Option<&Value>) -> bool {
        self.operator.evaluate(field_value, &self.value)
    }
}

#[derive(Debug, Clone)]
pub struct KnnSearchParams {
    pub schema: String,
    pub vector_field: String,
    pub vector: Vector,
    pub filters: Vec<FieldFilter>,
    pub limit: Option<usize>,
    /// Accept results with similarity of at least `1 - radius`
    pub radius: Option<f32>,
    pub fields_to_return: Vec<String>,
}

impl KnnSearchParams {
    pub fn new(schema: impl Into<String>, vector_field: impl Into<String>, vector: Vector) -> Self {
        Self {
            schema: schema.into(),
            vector_field: vector_field.into(),
            vector,
            filters: Vec::new(),
            limit: None,
            radius: None,
            fields_to_return: Vec::new(),
        }
    }

    pub fn with_filters(mut self, filters: impl IntoIterator<Item = FieldFilter>) -> Self {
        self.filters.extend(filters);
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

    pub fn with_fields_to_return(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fields_to_return.extend(fields.into_iter().map(Into::into));
        self
    }
}
