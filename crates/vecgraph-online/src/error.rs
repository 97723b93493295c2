//! Error types for online evaluation.

use thiserror::Error;
use vecgraph_embeddings::EmbeddingError;
use vecgraph_graph::GraphError;
use vecgraph_storage::StorageError;
use vecgraph_types::TypesError;

/// Errors that can occur while compiling or evaluating online dags
#[derive(Error, Debug)]
pub enum OnlineError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Types(#[from] TypesError),

    /// A compiled dag must end in exactly one index node
    #[error("Online schema dag must have exactly one index leaf, found {found} leaves")]
    LeafNodeCount { found: usize },

    #[error("Invalid schema dag: {0}")]
    InvalidSchemaDag(String),

    /// Record of a schema the index does not cover
    #[error("Unknown schema: {0}")]
    UnknownSchema(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A node needed a previously persisted result that is not there
    #[error("Node {node_id} has no stored result for {entity}")]
    MissingStoredResult { node_id: String, entity: String },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, OnlineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OnlineError::MissingStoredResult {
            node_id: "embedding_1".to_string(),
            entity: "paper:1".to_string(),
        };
        assert_eq!(err.to_string(), "Node embedding_1 has no stored result for paper:1");

        let err = OnlineError::LeafNodeCount { found: 2 };
        assert!(err.to_string().contains("found 2"));
    }

    #[test]
    fn test_from_storage_error() {
        let err: OnlineError = StorageError::NotFound("idx".to_string()).into();
        assert!(matches!(err, OnlineError::Storage(_)));
    }
}
