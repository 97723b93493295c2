//! Entities as the storage layer sees them: field maps keyed by schema and object id.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use vecgraph_types::Value;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    pub schema: String,
    pub object_id: String,
}

impl EntityId {
    pub fn new(schema: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            object_id: object_id.into(),
        }
    }

    /// Row key: `schema:object_id`.
    pub fn row_key(&self) -> String {
        format!("{}:{}", self.schema, self.object_id)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.schema, self.object_id)
    }
}

/// Named fields of one entity to be written together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    pub id: EntityId,
    pub fields: BTreeMap<String, Value>,
}

impl EntityData {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub object_id: String,
    pub score: f32,
    pub fields: BTreeMap<String, Value>,
}
