//! # vecgraph-types
//!
//! Shared value types for the vecgraph computation graph.
//!
//! - Vectors with negative-filter positions and normalization history
//! - Normalization and aggregation strategies
//! - Execution context (environment, "now", node weights)
//! - Schema declarations, dynamic values and filter operators
//! - Settings

pub mod aggregation;
pub mod config;
pub mod context;
pub mod error;
pub mod filter;
pub mod normalization;
pub mod schema;
pub mod value;
pub mod vector;
pub mod weighted;

pub use aggregation::AggregationKind;
pub use config::{ConcurrencySettings, Settings, StorageBackend, StorageSettings};
pub use context::{ExecutionContext, ExecutionEnvironment, NowStrategy};
pub use error::TypesError;
pub use filter::ComparisonOperator;
pub use normalization::Normalization;
pub use schema::{Schema, SchemaField, SchemaKind, SchemaReference, CREATED_AT_FIELD, ID_FIELD};
pub use value::Value;
pub use vector::Vector;
pub use weighted::Weighted;
