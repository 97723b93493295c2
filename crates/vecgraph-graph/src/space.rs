//! Declarative spaces and effects.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use vecgraph_embeddings::{EmbeddingConfig, TransformationConfig};
use vecgraph_types::{ComparisonOperator, SchemaField, SchemaReference, Value};

use crate::error::{GraphError, Result};
use crate::node::{ChunkingConfig, NodeArena, NodeId};

/// A named embedding strategy applied to one field of each covered schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Space {
    name: String,
    transformation: TransformationConfig,
    /// Keyed by schema name
    fields: BTreeMap<String, SchemaField>,
    /// Optional second input for image spaces, keyed by schema name
    description_fields: BTreeMap<String, SchemaField>,
    chunking: Option<ChunkingConfig>,
}

impl Space {
    pub fn new(
        name: impl Into<String>,
        transformation: TransformationConfig,
        fields: impl IntoIterator<Item = SchemaField>,
    ) -> Result<Self> {
        let name = name.into();
        transformation.validate()?;
        let mut by_schema = BTreeMap::new();
        for field in fields {
            if by_schema.contains_key(&field.schema) {
                return Err(GraphError::DuplicateSchemaInSpace {
                    space: name,
                    schema: field.schema,
                });
            }
            by_schema.insert(field.schema.clone(), field);
        }
        if by_schema.is_empty() {
            return Err(GraphError::InvalidSpace(format!(
                "space {name} needs at least one field"
            )));
        }
        Ok(Self {
            name,
            transformation,
            fields: by_schema,
            description_fields: BTreeMap::new(),
            chunking: None,
        })
    }

    /// Description fields embedded alongside the image of the same schema.
    pub fn with_description_fields(
        mut self,
        fields: impl IntoIterator<Item = SchemaField>,
    ) -> Result<Self> {
        if !matches!(self.transformation.embedding, EmbeddingConfig::Image(_)) {
            return Err(GraphError::InvalidSpace(format!(
                "only image spaces take description fields, {} is {}",
                self.name,
                self.transformation.embedding.kind_name()
            )));
        }
        for field in fields {
            if !self.fields.contains_key(&field.schema) {
                return Err(GraphError::InvalidSpace(format!(
                    "description field {field} has no image field in space {}",
                    self.name
                )));
            }
            if self.description_fields.contains_key(&field.schema) {
                return Err(GraphError::DuplicateSchemaInSpace {
                    space: self.name,
                    schema: field.schema,
                });
            }
            self.description_fields.insert(field.schema.clone(), field);
        }
        Ok(self)
    }

    pub fn with_chunking(mut self, chunking: ChunkingConfig) -> Result<Self> {
        if !matches!(self.transformation.embedding, EmbeddingConfig::Text(_)) {
            return Err(GraphError::InvalidSpace(format!(
                "only text spaces can be chunked, {} is {}",
                self.name,
                self.transformation.embedding.kind_name()
            )));
        }
        self.chunking = Some(chunking);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transformation(&self) -> &TransformationConfig {
        &self.transformation
    }

    pub fn length(&self) -> usize {
        self.transformation.length()
    }

    pub fn schemas(&self) -> BTreeSet<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn covers(&self, schema: &str) -> bool {
        self.fields.contains_key(schema)
    }

    pub fn field(&self, schema: &str) -> Option<&SchemaField> {
        self.fields.get(schema)
    }

    pub fn description_field(&self, schema: &str) -> Option<&SchemaField> {
        self.description_fields.get(schema)
    }

    pub fn chunking(&self) -> Option<ChunkingConfig> {
        self.chunking
    }

    /// Build (or reuse) the embedding node of this space for `schema`.
    pub(crate) fn embedding_node(&self, arena: &mut NodeArena, schema: &str) -> Result<NodeId> {
        let field = self.field(schema).ok_or_else(|| {
            GraphError::InvalidSpace(format!("space {} does not cover schema {schema}", self.name))
        })?;
        let mut input = arena.schema_field(field.clone())?;
        if let Some(chunking) = self.chunking {
            input = arena.chunking(input, chunking)?;
        }
        let mut parents = vec![input];
        if let Some(description) = self.description_field(schema) {
            parents.push(arena.schema_field(description.clone())?);
        }
        arena.embedding(parents, self.transformation.clone())
    }
}

/// Condition on an event field that must hold for an effect to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectFilter {
    pub field: SchemaField,
    pub operator: ComparisonOperator,
    pub operand: Value,
}

impl EffectFilter {
    pub fn new(field: SchemaField, operator: ComparisonOperator, operand: impl Into<Value>) -> Self {
        Self {
            field,
            operator,
            operand: operand.into(),
        }
    }
}

/// Events of `affected.schema` pull the affected entity's vector in `space`
/// towards the affecting entity's vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    pub space: String,
    pub affected: SchemaReference,
    pub affecting: SchemaReference,
    pub multiplier: f32,
    pub filter: Option<EffectFilter>,
}

impl Effect {
    pub fn new(space: impl Into<String>, affected: SchemaReference, affecting: SchemaReference) -> Self {
        Self {
            space: space.into(),
            affected,
            affecting,
            multiplier: 1.0,
            filter: None,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f32) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_filter(mut self, filter: EffectFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn event_schema(&self) -> &str {
        &self.affected.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vecgraph_embeddings::{ModelConfig, NumberConfig, NumberMode};

    fn text() -> TransformationConfig {
        TransformationConfig::new(EmbeddingConfig::Text(ModelConfig {
            engine: "mock".into(),
            dimension: 4,
        }))
    }

    #[test]
    fn test_duplicate_schema_rejected() {
        let err = Space::new(
            "body",
            text(),
            [SchemaField::new("paper", "title"), SchemaField::new("paper", "body")],
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateSchemaInSpace { .. }));
    }

    #[test]
    fn test_space_without_fields() {
        assert!(matches!(
            Space::new("empty", text(), []),
            Err(GraphError::InvalidSpace(_))
        ));
    }

    #[test]
    fn test_chunking_only_for_text() {
        let number = TransformationConfig::new(EmbeddingConfig::Number(NumberConfig::new(
            0.0,
            1.0,
            NumberMode::Maximum,
        )));
        let space = Space::new("score", number, [SchemaField::new("paper", "score")]).unwrap();
        assert!(space
            .with_chunking(ChunkingConfig::new(100, 10).unwrap())
            .is_err());
    }

    #[test]
    fn test_embedding_node_with_chunking() {
        let space = Space::new("body", text(), [SchemaField::new("paper", "body")])
            .unwrap()
            .with_chunking(ChunkingConfig::new(100, 10).unwrap())
            .unwrap();
        let mut arena = NodeArena::new(20);
        let id = space.embedding_node(&mut arena, "paper").unwrap();
        let node = arena.get(&id).unwrap();
        assert_eq!(node.depth(), 2);
        assert_eq!(node.length(), 4);
        assert!(space.embedding_node(&mut arena, "review").is_err());
    }
}
