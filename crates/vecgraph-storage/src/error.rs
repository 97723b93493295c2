//! Storage layer error types.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Key encoding/decoding error
    #[error("Key error: {0}")]
    Key(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Search index not initialized
    #[error("Search index not found: {0}")]
    NotFound(String),

    /// Caller supplied an invalid request
    #[error("Validation error: {0}")]
    Validation(String),

    /// Stored data violates an invariant
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// HNSW index operation failed
    #[error("Vector index error: {0}")]
    Index(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
