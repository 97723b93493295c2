//! The storage contract consumed by the evaluators.

use std::collections::BTreeMap;

use vecgraph_types::Value;

use crate::entity::{EntityData, EntityId, SearchResult};
use crate::error::Result;
use crate::index_config::{IndexConfig, KnnSearchParams};

/// Field-level entity storage plus k-NN search.
///
/// Implementations must be safe to share between threads. Writes of one
/// `write_entities` call are applied atomically where the backend allows it.
pub trait StorageContract: Send + Sync {
    /// Write one field of one entity.
    fn write(&self, schema: &str, object_id: &str, field_name: &str, value: Value) -> Result<()> {
        self.write_entities(vec![
            EntityData::new(EntityId::new(schema, object_id)).with_field(field_name, value)
        ])
    }

    fn write_entities(&self, entities: Vec<EntityData>) -> Result<()>;

    /// Read the requested fields; absent fields are left out of the map.
    fn read(
        &self,
        schema: &str,
        object_id: &str,
        field_names: &[String],
    ) -> Result<BTreeMap<String, Value>>;

    /// Create search indices. Existing indices are kept unless `override_existing`.
    fn init_search_indices(&self, configs: &[IndexConfig], override_existing: bool) -> Result<()>;

    /// Ranked nearest neighbours of `params.vector` among entities of `params.schema`.
    fn knn_search(&self, config: &IndexConfig, params: &KnnSearchParams) -> Result<Vec<SearchResult>>;
}
