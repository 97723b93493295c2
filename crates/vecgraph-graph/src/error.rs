//! Graph construction errors.

use thiserror::Error;
use vecgraph_embeddings::EmbeddingError;

#[derive(Debug, Error)]
pub enum GraphError {
    /// A node kind received the wrong number of parents
    #[error("{kind} node expects {expected} parents, got {actual}")]
    ParentCount {
        kind: &'static str,
        expected: String,
        actual: usize,
    },

    /// A parent has the wrong output type or length
    #[error("Invalid parent: {0}")]
    InvalidParent(String),

    /// Ancestor chain deeper than the configured maximum
    #[error("Graph depth exceeded the maximum of {max_depth}")]
    DepthExceeded { max_depth: usize },

    /// A space declared two fields of the same schema
    #[error("Space {space} has more than one field of schema {schema}")]
    DuplicateSchemaInSpace { space: String, schema: String },

    #[error("Invalid space: {0}")]
    InvalidSpace(String),

    /// A stored field outside the indexed schemas
    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Invalid effect: {0}")]
    InvalidEffect(String),

    #[error("Invalid effect modifier: {0}")]
    InvalidModifier(String),

    /// A schema projection must have exactly one leaf, the index node
    #[error("Expected exactly one leaf node (the index), found {found}")]
    LeafNodeCount { found: usize },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

pub type Result<T> = std::result::Result<T, GraphError>;
