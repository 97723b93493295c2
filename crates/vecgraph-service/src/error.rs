//! Service error types.

use thiserror::Error;
use vecgraph_graph::GraphError;
use vecgraph_online::OnlineError;
use vecgraph_query::QueryError;
use vecgraph_storage::StorageError;
use vecgraph_types::TypesError;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Online evaluation error: {0}")]
    Online(#[from] OnlineError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Configuration error: {0}")]
    Config(#[from] TypesError),

    /// Request names something the index does not have
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
