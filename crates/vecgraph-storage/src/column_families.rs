//! Column family definitions for RocksDB.
//!
//! - entities: one row per (schema, object, field), point reads and prefix scans
//! - index_configs: search index declarations, restored on open

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for entity fields
pub const CF_ENTITIES: &str = "entities";

/// Column family name for search index configs
pub const CF_INDEX_CONFIGS: &str = "index_configs";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_ENTITIES, CF_INDEX_CONFIGS];

/// Create column family options for entity fields
fn entities_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_ENTITIES, entities_options()),
        ColumnFamilyDescriptor::new(CF_INDEX_CONFIGS, Options::default()),
    ]
}
