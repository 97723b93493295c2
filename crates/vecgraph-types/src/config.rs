//! Configuration loading for vecgraph.
//!
//! Layered config: defaults -> config file -> explicit file -> env vars.
//! The default config file lives at `<config dir>/vecgraph/config.toml`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::TypesError;

/// Which storage backend the service opens.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum StorageBackend {
    /// Volatile concurrent map (default)
    #[default]
    #[serde(rename = "in_memory")]
    InMemory,
    /// RocksDB at `db_path`
    #[serde(rename = "rocksdb")]
    RocksDb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Path to RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            db_path: default_db_path(),
        }
    }
}

/// Worker pool configuration (opt-in, disabled by default).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    #[serde(default)]
    pub enabled: bool,

    /// Upper bound on parallel workers for one graph level.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            max_workers: default_max_workers(),
        }
    }
}

/// Main settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub concurrency: ConcurrencySettings,

    /// Entries kept per embedding cache; 0 disables caching.
    #[serde(default = "default_embedding_cache_size")]
    pub embedding_cache_size: usize,

    /// Deepest ancestor chain accepted when building a graph.
    #[serde(default = "default_max_dag_depth")]
    pub max_dag_depth: usize,

    #[serde(default = "default_query_limit")]
    pub default_query_limit: usize,

    #[serde(default = "default_max_query_limit")]
    pub max_query_limit: usize,

    /// Keep compiled online nodes between schema graph compilations.
    #[serde(default = "default_store_compilation_results")]
    pub store_compilation_results: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "vecgraph")
        .map(|p| p.data_local_dir().join("db"))
        .unwrap_or_else(|| PathBuf::from("./data"))
        .to_string_lossy()
        .to_string()
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(1)
        .min(32)
}

fn default_embedding_cache_size() -> usize {
    10_000
}

fn default_max_dag_depth() -> usize {
    20
}

fn default_query_limit() -> usize {
    10
}

fn default_max_query_limit() -> usize {
    10_000
}

fn default_store_compilation_results() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            storage: StorageSettings::default(),
            concurrency: ConcurrencySettings::default(),
            embedding_cache_size: default_embedding_cache_size(),
            max_dag_depth: default_max_dag_depth(),
            default_query_limit: default_query_limit(),
            max_query_limit: default_max_query_limit(),
            store_compilation_results: default_store_compilation_results(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/vecgraph/config.toml)
    /// 3. Explicit config file (optional)
    /// 4. Environment variables (VECGRAPH_*, nested keys joined by `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self, TypesError> {
        let config_dir = ProjectDirs::from("", "", "vecgraph")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("log_level", default_log_level())
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("storage.db_path", default_db_path())
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("embedding_cache_size", default_embedding_cache_size() as i64)
            .map_err(|e| TypesError::Config(e.to_string()))?
            .set_default("max_dag_depth", default_max_dag_depth() as i64)
            .map_err(|e| TypesError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // VECGRAPH_LOG_LEVEL, VECGRAPH_STORAGE__BACKEND, VECGRAPH_CONCURRENCY__ENABLED, ...
        builder = builder.add_source(
            Environment::with_prefix("VECGRAPH")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| TypesError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| TypesError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), TypesError> {
        if self.log_level.trim().is_empty() {
            return Err(TypesError::Config("log_level must not be empty".to_string()));
        }
        if self.concurrency.enabled && self.concurrency.max_workers == 0 {
            return Err(TypesError::Config(
                "concurrency.max_workers must be > 0 when concurrency is enabled".to_string(),
            ));
        }
        if self.max_dag_depth == 0 {
            return Err(TypesError::Config("max_dag_depth must be > 0".to_string()));
        }
        if self.default_query_limit == 0 || self.default_query_limit > self.max_query_limit {
            return Err(TypesError::Config(format!(
                "default_query_limit must be in 1..={}, got {}",
                self.max_query_limit, self.default_query_limit
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.storage.backend, StorageBackend::InMemory);
        assert!(!settings.concurrency.enabled);
        assert!(settings.concurrency.max_workers <= 32);
        assert_eq!(settings.max_dag_depth, 20);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_with_defaults() {
        let settings = Settings::load(None).unwrap();
        assert!(settings.max_query_limit >= settings.default_query_limit);
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "embedding_cache_size = 0\n[storage]\nbackend = \"rocksdb\"\n[concurrency]\nenabled = true\nmax_workers = 4"
        )
        .unwrap();
        let settings = Settings::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(settings.embedding_cache_size, 0);
        assert_eq!(settings.storage.backend, StorageBackend::RocksDb);
        assert!(settings.concurrency.enabled);
        assert_eq!(settings.concurrency.max_workers, 4);
    }

    #[test]
    fn test_load_nested_key_from_env() {
        std::env::set_var("VECGRAPH_STORAGE__DB_PATH", "/tmp/vecgraph-env-test");
        let settings = Settings::load(None);
        std::env::remove_var("VECGRAPH_STORAGE__DB_PATH");
        assert_eq!(settings.unwrap().storage.db_path, "/tmp/vecgraph-env-test");
    }

    #[test]
    fn test_validation() {
        let mut settings = Settings::default();
        settings.max_dag_depth = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.concurrency.enabled = true;
        settings.concurrency.max_workers = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.default_query_limit = settings.max_query_limit + 1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_serialization() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let decoded: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.default_query_limit, settings.default_query_limit);
        assert_eq!(decoded.storage.backend, StorageBackend::InMemory);
    }
}
