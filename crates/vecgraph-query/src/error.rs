//! Error types for query compilation and evaluation.

use thiserror::Error;
use vecgraph_embeddings::EmbeddingError;
use vecgraph_graph::GraphError;
use vecgraph_types::TypesError;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Types(#[from] TypesError),

    /// A query dag must end in exactly one index node
    #[error("Query dag must have exactly one index leaf, found {found} leaves")]
    LeafNodeCount { found: usize },

    #[error("Invalid query dag: {0}")]
    InvalidQueryDag(String),

    /// Caller supplied inputs the dag cannot evaluate
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, QueryError>;
