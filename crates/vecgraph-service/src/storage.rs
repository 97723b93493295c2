//! Opening the configured storage backend.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use vecgraph_storage::{InMemoryStorage, RocksStorage, StorageContract};
use vecgraph_types::{Settings, StorageBackend};

/// Open the backend named in `settings`, creating the RocksDB directory if needed.
pub fn open_storage(settings: &Settings) -> Result<Arc<dyn StorageContract>> {
    match settings.storage.backend {
        StorageBackend::InMemory => {
            info!("Using in-memory storage");
            Ok(Arc::new(
                InMemoryStorage::new().with_max_limit(settings.max_query_limit),
            ))
        }
        StorageBackend::RocksDb => {
            let path = Path::new(&settings.storage.db_path);
            fs::create_dir_all(path)
                .with_context(|| format!("Failed to create database directory {path:?}"))?;
            let storage = RocksStorage::open(path).context("Failed to open storage")?;
            Ok(Arc::new(storage.with_max_limit(settings.max_query_limit)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vecgraph_types::Value;

    #[test]
    fn test_open_rocksdb_backend() {
        let temp = TempDir::new().unwrap();
        let mut settings = Settings::default();
        settings.storage.backend = StorageBackend::RocksDb;
        settings.storage.db_path = temp.path().join("db").to_string_lossy().into_owned();

        {
            let storage = open_storage(&settings).unwrap();
            storage.write("paper", "p1", "title", Value::from("graphs")).unwrap();
        }
        let reopened = open_storage(&settings).unwrap();
        let fields = reopened.read("paper", "p1", &["title".to_string()]).unwrap();
        assert_eq!(fields.get("title"), Some(&Value::from("graphs")));
    }

    #[test]
    fn test_open_in_memory_backend() {
        let storage = open_storage(&Settings::default()).unwrap();
        assert!(storage.read("paper", "p1", &["title".to_string()]).unwrap().is_empty());
    }
}
