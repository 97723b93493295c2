//! Records flowing into online evaluation and the results coming out.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vecgraph_storage::EntityId;
use vecgraph_types::{SchemaField, Value, Vector, CREATED_AT_FIELD, ID_FIELD};

/// One parsed entity record: `{schema, object_id, field_name -> value}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedRecord {
    pub schema: String,
    pub object_id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl ParsedRecord {
    pub fn new(schema: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            object_id: object_id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn entity_id(&self) -> EntityId {
        EntityId::new(&self.schema, &self.object_id)
    }

    /// Field value; the id field resolves to the object id.
    pub fn field(&self, name: &str) -> Option<Value> {
        if name == ID_FIELD {
            return Some(Value::String(self.object_id.clone()));
        }
        self.fields.get(name).filter(|v| !v.is_null()).cloned()
    }
}

/// One occurrence of an event schema.
///
/// Reference fields hold the object ids of the entities involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub record: ParsedRecord,
    /// Unix seconds
    pub created_at: i64,
}

impl EventRecord {
    pub fn new(schema: impl Into<String>, event_id: impl Into<String>, created_at: i64) -> Self {
        Self {
            record: ParsedRecord::new(schema, event_id),
            created_at,
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.record = self.record.with_field(name, value);
        self
    }

    pub fn schema(&self) -> &str {
        &self.record.schema
    }

    pub fn event_id(&self) -> &str {
        &self.record.object_id
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        if name == CREATED_AT_FIELD {
            return Some(Value::Int(self.created_at));
        }
        self.record.field(name)
    }

    /// Object id held by a reference field.
    pub fn reference(&self, field: &str) -> Option<&str> {
        self.record.fields.get(field).and_then(Value::as_str)
    }
}

/// What one row of an online batch evaluates.
///
/// Event inputs are evaluated for the affected entity, with the event record
/// available to filters and aggregation.
#[derive(Debug, Clone)]
pub enum OnlineInput<'a> {
    Record(&'a ParsedRecord),
    Event {
        affected: EntityId,
        event: &'a EventRecord,
    },
}

impl<'a> OnlineInput<'a> {
    pub fn record(record: &'a ParsedRecord) -> Self {
        OnlineInput::Record(record)
    }

    pub fn event(affected: EntityId, event: &'a EventRecord) -> Self {
        OnlineInput::Event { affected, event }
    }

    pub fn schema(&self) -> &str {
        match self {
            OnlineInput::Record(record) => &record.schema,
            OnlineInput::Event { affected, .. } => &affected.schema,
        }
    }

    pub fn object_id(&self) -> &str {
        match self {
            OnlineInput::Record(record) => &record.object_id,
            OnlineInput::Event { affected, .. } => &affected.object_id,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        EntityId::new(self.schema(), self.object_id())
    }

    pub fn event_record(&self) -> Option<&'a EventRecord> {
        match self {
            OnlineInput::Record(_) => None,
            OnlineInput::Event { event, .. } => Some(event),
        }
    }

    /// Value of `field` if this input carries its schema.
    pub fn field(&self, field: &SchemaField) -> Option<Value> {
        match self {
            OnlineInput::Record(record) if record.schema == field.schema => record.field(&field.name),
            OnlineInput::Event { event, .. } if event.schema() == field.schema => event.field(&field.name),
            _ => None,
        }
    }
}

/// Output of one node for one input: a main value plus chunk values.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationResult {
    pub main: Value,
    pub chunks: Vec<Value>,
}

impl EvaluationResult {
    pub fn new(main: impl Into<Value>) -> Self {
        Self {
            main: main.into(),
            chunks: Vec::new(),
        }
    }

    pub fn with_chunks(mut self, chunks: Vec<Value>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn main_vector(&self) -> Option<&Vector> {
        self.main.as_vector()
    }
}
