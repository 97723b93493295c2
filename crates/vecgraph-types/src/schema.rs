//! Schema declarations referenced by the node graph.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Field every record carries with its object id.
pub const ID_FIELD: &str = "id";

/// Field every event record carries with its creation time (unix seconds).
pub const CREATED_AT_FIELD: &str = "created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    Entity,
    Event,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub kind: SchemaKind,
}

impl Schema {
    pub fn entity(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SchemaKind::Entity,
        }
    }

    pub fn event(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: SchemaKind::Event,
        }
    }

    pub fn is_event(&self) -> bool {
        self.kind == SchemaKind::Event
    }

    pub fn field(&self, name: impl Into<String>) -> SchemaField {
        SchemaField::new(self.name.clone(), name)
    }

    /// A field of this (event) schema holding the id of a `referenced` entity.
    pub fn reference(&self, field: impl Into<String>, referenced: &Schema) -> SchemaReference {
        SchemaReference {
            schema: self.name.clone(),
            field: field.into(),
            referenced_schema: referenced.name.clone(),
        }
    }
}

/// A named field of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaField {
    pub schema: String,
    pub name: String,
}

impl SchemaField {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SchemaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// An event field that holds the object id of an entity in `referenced_schema`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SchemaReference {
    pub schema: String,
    pub field: String,
    pub referenced_schema: String,
}

impl fmt::Display for SchemaReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}->{}", self.schema, self.field, self.referenced_schema)
    }
}
