//! Key encoding and decoding for the entities column family.
//!
//! Key format: `{schema}:{object_id}:{field}`
//! - schema: never contains ':'
//! - object_id: may contain ':'
//! - field: node id or raw field name, never contains ':'
//!
//! Keys of one entity share the `{schema}:{object_id}:` prefix, so an entity
//! is read with one prefix scan and a schema with a shorter one.

use crate::entity::EntityId;
use crate::error::StorageError;

/// Key for one field of one entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldKey {
    pub schema: String,
    pub object_id: String,
    pub field: String,
}

impl FieldKey {
    pub fn new(id: &EntityId, field: impl Into<String>) -> Self {
        Self {
            schema: id.schema.clone(),
            object_id: id.object_id.clone(),
            field: field.into(),
        }
    }

    /// Encode key to bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}:{}:{}", self.schema, self.object_id, self.field).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let (schema, rest) = s
            .split_once(':')
            .ok_or_else(|| StorageError::Key(format!("Invalid field key format: {}", s)))?;
        let (object_id, field) = rest
            .rsplit_once(':')
            .ok_or_else(|| StorageError::Key(format!("Invalid field key format: {}", s)))?;
        Ok(Self {
            schema: schema.to_string(),
            object_id: object_id.to_string(),
            field: field.to_string(),
        })
    }

    pub fn entity_id(&self) -> EntityId {
        EntityId::new(self.schema.clone(), self.object_id.clone())
    }

    /// Prefix shared by all fields of one entity
    pub fn entity_prefix(id: &EntityId) -> Vec<u8> {
        format!("{}:{}:", id.schema, id.object_id).into_bytes()
    }

    /// Prefix shared by all entities of one schema
    pub fn schema_prefix(schema: &str) -> Vec<u8> {
        format!("{}:", schema).into_bytes()
    }
}

/// Key for index configs
/// Format: index:{index_name}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexConfigKey {
    pub index_name: String,
}

impl IndexConfigKey {
    pub fn new(index_name: impl Into<String>) -> Self {
        Self {
            index_name: index_name.into(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("index:{}", self.index_name).into_bytes()
    }
}
