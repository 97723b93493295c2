//! Turns spaces and effects into the node graph of one index.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{debug, info};
use vecgraph_types::{SchemaField, Value, Weighted};

use crate::dag::Dag;
use crate::effect::{DagEffect, EffectModifier, ResolvedSchemaReference};
use crate::error::{GraphError, Result};
use crate::node::{EventAggregationParams, NodeArena, NodeId};
use crate::space::{Effect, Space};

/// Default nesting limit for graph construction.
pub const MAX_DAG_DEPTH: usize = 20;

/// Node ids of one space for one schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceNodes {
    /// Embedding node fed by the schema's field
    pub embedding: NodeId,
    /// Node the concatenation sees: the aggregation when effects apply, else the embedding
    pub top: NodeId,
}

/// A built index: the frozen graph plus its declarations.
#[derive(Debug, Clone)]
pub struct Index {
    dag: Arc<Dag>,
    spaces: Vec<Space>,
    effects: Vec<Effect>,
    effect_modifier: EffectModifier,
    schemas: BTreeSet<String>,
    event_schemas: BTreeSet<String>,
    stored_fields: Vec<SchemaField>,
    space_nodes: BTreeMap<(String, String), SpaceNodes>,
    vector_length: usize,
}

impl Index {
    pub fn dag(&self) -> &Arc<Dag> {
        &self.dag
    }

    pub fn index_node_id(&self) -> &str {
        self.dag.index_id()
    }

    pub fn spaces(&self) -> &[Space] {
        &self.spaces
    }

    pub fn space(&self, name: &str) -> Option<&Space> {
        self.spaces.iter().find(|s| s.name() == name)
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn effect_modifier(&self) -> &EffectModifier {
        &self.effect_modifier
    }

    /// Entity schemas whose records produce index vectors.
    pub fn schemas(&self) -> &BTreeSet<String> {
        &self.schemas
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        self.schemas.contains(schema)
    }

    pub fn event_schemas(&self) -> &BTreeSet<String> {
        &self.event_schemas
    }

    pub fn is_event_schema(&self, schema: &str) -> bool {
        self.event_schemas.contains(schema)
    }

    pub fn stored_fields(&self) -> &[SchemaField] {
        &self.stored_fields
    }

    pub fn stored_fields_of<'a>(&'a self, schema: &'a str) -> impl Iterator<Item = &'a SchemaField> {
        self.stored_fields.iter().filter(move |f| f.schema == schema)
    }

    pub fn space_nodes(&self, space: &str, schema: &str) -> Option<&SpaceNodes> {
        self.space_nodes.get(&(space.to_string(), schema.to_string()))
    }

    /// Length of the index vector.
    pub fn vector_length(&self) -> usize {
        self.vector_length
    }
}

/// Builder for [`Index`].
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    spaces: Vec<Space>,
    effects: Vec<Effect>,
    effect_modifier: EffectModifier,
    stored_fields: Vec<SchemaField>,
    max_depth: usize,
}

impl IndexBuilder {
    pub fn new(spaces: impl IntoIterator<Item = Space>) -> Self {
        Self {
            spaces: spaces.into_iter().collect(),
            effects: Vec::new(),
            effect_modifier: EffectModifier::default(),
            stored_fields: Vec::new(),
            max_depth: MAX_DAG_DEPTH,
        }
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }

    pub fn with_effect_modifier(mut self, effect_modifier: EffectModifier) -> Self {
        self.effect_modifier = effect_modifier;
        self
    }

    /// Raw fields written next to the index vector, for filtering and returning.
    pub fn with_stored_fields(mut self, fields: impl IntoIterator<Item = SchemaField>) -> Self {
        self.stored_fields.extend(fields);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn build(self) -> Result<Index> {
        self.effect_modifier.validate()?;
        let schemas = self.validate_spaces()?;
        self.validate_stored_fields(&schemas)?;
        let resolved = self.resolve_effects(&schemas)?;
        let event_schemas: BTreeSet<String> =
            resolved.iter().map(|(e, _)| e.event_schema.clone()).collect();

        let mut arena = NodeArena::new(self.max_depth);
        let mut space_nodes = BTreeMap::new();
        for space in &self.spaces {
            for schema in &schemas {
                let embedding = space.embedding_node(&mut arena, schema)?;
                space_nodes.insert(
                    (space.name().to_string(), schema.clone()),
                    SpaceNodes {
                        top: embedding.clone(),
                        embedding,
                    },
                );
            }
        }

        for space in &self.spaces {
            for schema in &schemas {
                let affecting_this: Vec<&(DagEffect, &Effect)> = resolved
                    .iter()
                    .filter(|(d, e)| e.space == space.name() && d.resolved_affected.schema == *schema)
                    .collect();
                if affecting_this.is_empty() {
                    continue;
                }
                let top = self.aggregation_node(&mut arena, &space_nodes, space, schema, &affecting_this)?;
                if let Some(nodes) = space_nodes.get_mut(&(space.name().to_string(), schema.clone())) {
                    nodes.top = top;
                }
            }
        }

        let mut index_parents = Vec::with_capacity(schemas.len());
        for schema in &schemas {
            let tops = self
                .spaces
                .iter()
                .map(|space| {
                    space_nodes
                        .get(&(space.name().to_string(), schema.clone()))
                        .map(|n| n.top.clone())
                        .ok_or_else(|| GraphError::InvalidState(format!("no node for {schema}")))
                })
                .collect::<Result<Vec<_>>>()?;
            let parent = match <[NodeId; 1]>::try_from(tops) {
                Ok([single]) => single,
                Err(tops) => arena.concatenation(tops)?,
            };
            index_parents.push(parent);
        }
        let index_id = arena.index(index_parents)?;
        let dag = Dag::new(arena.into_nodes(), &index_id)?;
        for schema in &schemas {
            dag.project_to_schema(schema)?;
        }
        for group in dag.dag_effect_groups() {
            dag.project_to_dag_effect_group(&group)?;
        }
        drop(resolved);

        let vector_length: usize = self.spaces.iter().map(Space::length).sum();
        info!(
            index = %index_id,
            nodes = dag.len(),
            spaces = self.spaces.len(),
            effects = self.effects.len(),
            vector_length,
            "Built index"
        );
        Ok(Index {
            dag: Arc::new(dag),
            spaces: self.spaces,
            effects: self.effects,
            effect_modifier: self.effect_modifier,
            schemas,
            event_schemas,
            stored_fields: self.stored_fields,
            space_nodes,
            vector_length,
        })
    }

    /// Every space must cover every indexed schema so all index vectors share one layout.
    fn validate_spaces(&self) -> Result<BTreeSet<String>> {
        if self.spaces.is_empty() {
            return Err(GraphError::InvalidSpace(
                "an index needs at least one space".to_string(),
            ));
        }
        let mut names = HashSet::new();
        for space in &self.spaces {
            if !names.insert(space.name()) {
                return Err(GraphError::InvalidSpace(format!(
                    "duplicate space name {}",
                    space.name()
                )));
            }
        }
        let schemas: BTreeSet<String> = self.spaces.iter().flat_map(Space::schemas).collect();
        for space in &self.spaces {
            if let Some(missing) = schemas.iter().find(|s| !space.covers(s)) {
                return Err(GraphError::InvalidSpace(format!(
                    "space {} does not cover indexed schema {missing}",
                    space.name()
                )));
            }
        }
        Ok(schemas)
    }

    fn validate_stored_fields(&self, schemas: &BTreeSet<String>) -> Result<()> {
        match self.stored_fields.iter().find(|f| !schemas.contains(&f.schema)) {
            Some(field) => Err(GraphError::InvalidField(format!(
                "stored field {field} is not on an indexed schema"
            ))),
            None => Ok(()),
        }
    }

    fn resolve_effects<'a>(
        &'a self,
        schemas: &BTreeSet<String>,
    ) -> Result<Vec<(DagEffect, &'a Effect)>> {
        let mut resolved = Vec::with_capacity(self.effects.len());
        for effect in &self.effects {
            let space = self
                .spaces
                .iter()
                .find(|s| s.name() == effect.space)
                .ok_or_else(|| {
                    GraphError::InvalidEffect(format!("unknown space {}", effect.space))
                })?;
            let event_schema = effect.event_schema();
            if effect.affecting.schema != event_schema {
                return Err(GraphError::InvalidEffect(format!(
                    "affected and affecting references must be on the same event schema, got {} and {}",
                    effect.affected, effect.affecting
                )));
            }
            if schemas.contains(event_schema) {
                return Err(GraphError::InvalidEffect(format!(
                    "{event_schema} is embedded by a space and cannot be an event schema"
                )));
            }
            for reference in [&effect.affected, &effect.affecting] {
                if !space.covers(&reference.referenced_schema) {
                    return Err(GraphError::InvalidEffect(format!(
                        "space {} does not cover {}",
                        space.name(),
                        reference.referenced_schema
                    )));
                }
            }
            if let Some(filter) = &effect.filter {
                if filter.field.schema != event_schema {
                    return Err(GraphError::InvalidEffect(format!(
                        "filter field {} is not on event schema {event_schema}",
                        filter.field
                    )));
                }
            }
            let dag_effect = DagEffect::new(
                ResolvedSchemaReference::new(
                    effect.affected.referenced_schema.clone(),
                    effect.affected.field.clone(),
                    1.0,
                ),
                ResolvedSchemaReference::new(
                    effect.affecting.referenced_schema.clone(),
                    effect.affecting.field.clone(),
                    effect.multiplier,
                ),
                event_schema,
            )?;
            resolved.push((dag_effect, effect));
        }
        Ok(resolved)
    }

    /// One aggregation per (space, affected schema) over the own embedding and
    /// one event-aggregation node per group of equivalent effects.
    fn aggregation_node(
        &self,
        arena: &mut NodeArena,
        space_nodes: &BTreeMap<(String, String), SpaceNodes>,
        space: &Space,
        schema: &str,
        effects: &[&(DagEffect, &Effect)],
    ) -> Result<NodeId> {
        let node_of = |schema: &str| {
            space_nodes
                .get(&(space.name().to_string(), schema.to_string()))
                .map(|n| n.embedding.clone())
                .ok_or_else(|| GraphError::InvalidState(format!("no embedding for {schema}")))
        };

        let mut groups: Vec<Vec<&(DagEffect, &Effect)>> = Vec::new();
        for &effect in effects {
            match groups
                .iter_mut()
                .find(|g| g[0].0.is_same_effect_except_for_multiplier(&effect.0))
            {
                Some(group) => group.push(effect),
                None => groups.push(vec![effect]),
            }
        }

        let influence = self.effect_modifier.event_influence;
        let mut weighted_parents = vec![Weighted::new(node_of(schema)?, 1.0 - influence)];
        let mut all_effects = BTreeSet::new();
        for group in groups {
            let representative = &group[0].0;
            let mut filters = Vec::with_capacity(group.len());
            for (dag_effect, effect) in group.iter().map(|pair| (&pair.0, pair.1)) {
                let filter_node = match &effect.filter {
                    Some(filter) => {
                        let field_node = arena.schema_field(filter.field.clone())?;
                        arena.comparison_filter(
                            field_node,
                            filter.field.clone(),
                            filter.operator,
                            filter.operand.clone(),
                        )?
                    }
                    None => arena.constant(Value::Bool(true))?,
                };
                filters.push(Weighted::new(filter_node, dag_effect.resolved_affecting.multiplier));
            }
            let group_effects: BTreeSet<DagEffect> = group.iter().map(|pair| pair.0.clone()).collect();
            let params = EventAggregationParams {
                input_to_aggregate: node_of(&representative.resolved_affecting.schema)?,
                event_schema: representative.event_schema.clone(),
                affected: representative.resolved_affected.clone(),
                affecting: ResolvedSchemaReference::new(
                    representative.resolved_affecting.schema.clone(),
                    representative.resolved_affecting.reference_field.clone(),
                    1.0,
                ),
                filters,
                effect_modifier: self.effect_modifier,
                transformation: space.transformation().clone(),
            };
            let ean = arena.event_aggregation(params, group_effects.clone())?;
            debug!(space = space.name(), schema, node_id = %ean, effects = group_effects.len(), "Added event aggregation");
            weighted_parents.push(Weighted::new(ean, influence));
            all_effects.extend(group_effects);
        }
        arena.aggregation(weighted_parents, space.transformation().clone(), all_effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;
    use vecgraph_embeddings::{EmbeddingConfig, ModelConfig, NumberConfig, NumberMode, TransformationConfig};
    use vecgraph_types::{ComparisonOperator, Schema};

    fn text_space(schemas: &[&str]) -> Space {
        Space::new(
            "text",
            TransformationConfig::new(EmbeddingConfig::Text(ModelConfig {
                engine: "mock".into(),
                dimension: 4,
            })),
            schemas.iter().map(|s| SchemaField::new(*s, "body")),
        )
        .unwrap()
    }

    fn number_space() -> Space {
        Space::new(
            "score",
            TransformationConfig::new(EmbeddingConfig::Number(NumberConfig::new(
                0.0,
                5.0,
                NumberMode::Maximum,
            ))),
            [SchemaField::new("paper", "score")],
        )
        .unwrap()
    }

    #[test]
    fn test_single_schema_index() {
        let index = IndexBuilder::new([text_space(&["paper"]), number_space()])
            .build()
            .unwrap();
        assert_eq!(index.vector_length(), 5);
        assert_eq!(index.schemas().len(), 1);
        let root = index.dag().index_node().unwrap();
        assert_eq!(root.length(), 5);
        let concat = index.dag().node(&root.parents()[0]).unwrap();
        assert!(matches!(concat.kind(), NodeKind::Concatenation));
        assert!(index.dag().dag_effects().is_empty());
    }

    #[test]
    fn test_space_must_cover_all_schemas() {
        let err = IndexBuilder::new([text_space(&["paper", "review"]), number_space()])
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidSpace(_)));
    }

    #[test]
    fn test_duplicate_space_names() {
        let err = IndexBuilder::new([text_space(&["paper"]), text_space(&["paper"])])
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidSpace(_)));
    }

    #[test]
    fn test_effects_grouped_by_multiplier() {
        let user = Schema::entity("user");
        let post = Schema::entity("post");
        let event = Schema::event("like");
        let like_effect = |multiplier: f32| {
            Effect::new(
                "text",
                event.reference("user", &user),
                event.reference("post", &post),
            )
            .with_multiplier(multiplier)
        };
        let index = IndexBuilder::new([text_space(&["user", "post"])])
            .with_effects([
                like_effect(1.0),
                like_effect(2.0).with_filter(crate::space::EffectFilter::new(
                    event.field("kind"),
                    ComparisonOperator::Equal,
                    "super",
                )),
            ])
            .build()
            .unwrap();
        assert!(index.is_event_schema("like"));
        let groups = index.dag().dag_effect_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].effects().len(), 2);

        let user_nodes = index.space_nodes("text", "user").unwrap();
        assert_ne!(user_nodes.top, user_nodes.embedding);
        let post_nodes = index.space_nodes("text", "post").unwrap();
        assert_eq!(post_nodes.top, post_nodes.embedding);

        let eans: Vec<_> = index
            .dag()
            .nodes()
            .filter(|n| matches!(n.kind(), NodeKind::EventAggregation(_)))
            .collect();
        assert_eq!(eans.len(), 1);
        assert!(eans[0].persist_node_result());
        assert!(index.dag().node(&post_nodes.embedding).unwrap().persist_node_result());

        let event_dag = index.dag().project_to_dag_effect_group(&groups[0]).unwrap();
        assert_eq!(event_dag.schema(), "like");
        assert_eq!(event_dag.leaf_id(), index.index_node_id());
    }

    #[test]
    fn test_effect_validation() {
        let user = Schema::entity("user");
        let post = Schema::entity("post");
        let like = Schema::event("like");
        let view = Schema::event("view");
        let build = |effect: Effect| {
            IndexBuilder::new([text_space(&["user", "post"])])
                .with_effects([effect])
                .build()
        };
        let mixed = Effect::new("text", like.reference("user", &user), view.reference("post", &post));
        assert!(matches!(build(mixed), Err(GraphError::InvalidEffect(_))));

        let zero = Effect::new("text", like.reference("user", &user), like.reference("post", &post))
            .with_multiplier(0.0);
        assert!(matches!(build(zero), Err(GraphError::InvalidEffect(_))));

        let unknown = Effect::new("image", like.reference("user", &user), like.reference("post", &post));
        assert!(matches!(build(unknown), Err(GraphError::InvalidEffect(_))));

        let wrong_filter = Effect::new("text", like.reference("user", &user), like.reference("post", &post))
            .with_filter(crate::space::EffectFilter::new(
                view.field("kind"),
                ComparisonOperator::Equal,
                "x",
            ));
        assert!(matches!(build(wrong_filter), Err(GraphError::InvalidEffect(_))));
    }

    #[test]
    fn test_stored_fields_must_be_indexed() {
        let err = IndexBuilder::new([text_space(&["paper"])])
            .with_stored_fields([SchemaField::new("review", "stars")])
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidField(_)));
    }

    #[test]
    fn test_depth_limit_applies() {
        let err = IndexBuilder::new([text_space(&["paper"]), number_space()])
            .with_max_depth(1)
            .build()
            .unwrap_err();
        assert!(matches!(err, GraphError::DepthExceeded { max_depth: 1 }));
    }
}
