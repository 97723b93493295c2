//! # vecgraph-embeddings
//!
//! Turns field values into space vectors.
//!
//! ## Features
//! - Engine trait for external text/image models plus a deterministic mock
//! - Number, categorical, recency and custom encoders
//! - Bounded LRU cache in front of engines (capacity 0 disables it)
//! - Provider that shares built spaces between ingestion and query

pub mod cache;
pub mod categorical;
pub mod config;
pub mod engine;
pub mod error;
pub mod mock;
pub mod number;
pub mod provider;
pub mod recency;
pub mod transformation;

pub use cache::{CacheStats, EmbeddingCache};
pub use config::{
    CategoricalConfig, CustomConfig, EmbeddingConfig, ModelConfig, NumberConfig, NumberMode,
    NumberScale, PeriodTime, RecencyConfig, TransformationConfig,
};
pub use engine::{EmbeddingEngine, EngineInfo, EngineRegistry};
pub use error::EmbeddingError;
pub use mock::MockEmbeddingEngine;
pub use provider::EmbeddingProvider;
pub use transformation::SpaceEmbedding;
