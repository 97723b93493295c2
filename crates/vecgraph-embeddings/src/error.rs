//! Embedding error types.

use thiserror::Error;
use vecgraph_types::TypesError;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The external engine failed
    #[error("Engine error: {0}")]
    Engine(String),

    /// No engine registered under this name
    #[error("Embedding engine not found: {0}")]
    EngineNotFound(String),

    /// Space configuration rejected at construction
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input value cannot be embedded by this space
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Cache error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Vector/normalization error
    #[error(transparent)]
    Types(#[from] TypesError),
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;
