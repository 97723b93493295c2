//! Storage layer for vecgraph.
//!
//! Provides the [`StorageContract`] both evaluators write through, with:
//! - Field-level entity rows keyed by `schema:object_id`
//! - Idempotent search index initialization
//! - Validated k-NN search (flat, or HNSW candidates re-scored exactly)
//! - In-memory and RocksDB backends

pub mod column_families;
pub mod contract;
pub mod db;
pub mod entity;
pub mod error;
pub mod hnsw;
pub mod index_config;
pub mod keys;
pub mod memory;
pub mod search;

pub use contract::StorageContract;
pub use db::RocksStorage;
pub use entity::{EntityData, EntityId, SearchResult};
pub use error::{Result, StorageError};
pub use hnsw::{HnswConfig, HnswIndex};
pub use index_config::{
    DistanceMetric, FieldDescriptor, FieldFilter, IndexConfig, KnnSearchParams, Precision,
    SearchAlgorithm, VectorFieldDescriptor,
};
pub use keys::{FieldKey, IndexConfigKey};
pub use memory::InMemoryStorage;
pub use search::{IndexRegistry, RegisteredIndex, DEFAULT_MAX_LIMIT};
