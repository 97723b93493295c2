//! Runtime side of a space: embed, normalize and aggregate.

use std::sync::Arc;

use vecgraph_types::{ExecutionContext, Normalization, Value, Vector, Weighted};

use crate::cache::EmbeddingCache;
use crate::config::{EmbeddingConfig, ModelConfig, NumberMode, TransformationConfig};
use crate::engine::{EmbeddingEngine, EngineRegistry};
use crate::error::{EmbeddingError, Result};
use crate::{categorical, number, recency};

/// A configured space ready to embed values.
///
/// Text and image spaces resolve their engine once and keep an LRU cache
/// of already embedded inputs.
pub struct SpaceEmbedding {
    config: TransformationConfig,
    engine: Option<Arc<dyn EmbeddingEngine>>,
    cache: EmbeddingCache,
}

impl std::fmt::Debug for SpaceEmbedding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpaceEmbedding")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish()
    }
}

impl SpaceEmbedding {
    pub fn new(
        config: TransformationConfig,
        engines: &EngineRegistry,
        cache_size: usize,
    ) -> Result<Self> {
        config.validate()?;
        let engine = match &config.embedding {
            EmbeddingConfig::Text(model) | EmbeddingConfig::Image(model) => {
                Some(resolve_engine(model, engines)?)
            }
            _ => None,
        };
        Ok(Self {
            config,
            engine,
            cache: EmbeddingCache::new(cache_size),
        })
    }

    pub fn config(&self) -> &TransformationConfig {
        &self.config
    }

    pub fn length(&self) -> usize {
        self.config.length()
    }

    pub fn normalization(&self) -> Normalization {
        self.config.normalization
    }

    pub fn cache(&self) -> &EmbeddingCache {
        &self.cache
    }

    pub fn default_vector(&self) -> Vector {
        self.config.embedding.default_vector()
    }

    /// Maximizing/minimizing number spaces are not meant to be queried by value.
    pub fn should_return_default(&self, context: &ExecutionContext) -> bool {
        context.is_query_context()
            && matches!(
                &self.config.embedding,
                EmbeddingConfig::Number(c) if c.mode != NumberMode::Similar
            )
    }

    /// Embed a batch. Each item holds the parent values for one record
    /// (one value, or image plus optional description for image spaces).
    pub fn embed(&self, items: &[Vec<Value>], context: &ExecutionContext) -> Result<Vec<Vector>> {
        let vectors = match &self.config.embedding {
            EmbeddingConfig::Text(_) => {
                let texts = items
                    .iter()
                    .map(|item| first_value(item).and_then(as_text))
                    .collect::<Result<Vec<String>>>()?;
                self.embed_with_engine(&texts, context)?
            }
            EmbeddingConfig::Image(_) => self.embed_images(items, context)?,
            EmbeddingConfig::Number(config) => items
                .iter()
                .map(|item| {
                    let value = first_value(item)?;
                    let number = value.as_f64().ok_or_else(|| wrong_type("number", value))?;
                    number::embed(config, number, context)
                })
                .collect::<Result<Vec<_>>>()?,
            EmbeddingConfig::Categorical(config) => items
                .iter()
                .map(|item| {
                    let value = first_value(item)?;
                    let categories = value
                        .as_string_list()
                        .ok_or_else(|| wrong_type("categorical", value))?;
                    Ok(categorical::embed(config, &categories, context))
                })
                .collect::<Result<Vec<_>>>()?,
            EmbeddingConfig::Recency(config) => items
                .iter()
                .map(|item| {
                    let value = first_value(item)?;
                    let timestamp = value.as_i64().ok_or_else(|| wrong_type("recency", value))?;
                    Ok(recency::embed(config, timestamp, context))
                })
                .collect::<Result<Vec<_>>>()?,
            EmbeddingConfig::Custom(_) => items
                .iter()
                .map(|item| {
                    let value = first_value(item)?;
                    value
                        .as_vector()
                        .cloned()
                        .ok_or_else(|| wrong_type("custom", value))
                })
                .collect::<Result<Vec<_>>>()?,
        };
        for vector in &vectors {
            if vector.dimension() != self.length() {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.length(),
                    actual: vector.dimension(),
                });
            }
        }
        Ok(vectors)
    }

    pub fn embed_and_normalize(
        &self,
        items: &[Vec<Value>],
        context: &ExecutionContext,
    ) -> Result<Vec<Vector>> {
        Ok(self
            .embed(items, context)?
            .iter()
            .map(|v| self.normalize(v))
            .collect())
    }

    pub fn normalize(&self, vector: &Vector) -> Vector {
        self.config.normalization.normalize(vector)
    }

    /// Aggregate with the space's aggregation, then normalize.
    pub fn aggregate(&self, vectors: &[Weighted<Vector>]) -> Result<Vector> {
        let aggregated = self.config.aggregation.aggregate(vectors)?;
        Ok(self.normalize(&aggregated))
    }

    fn embed_with_engine(&self, texts: &[String], context: &ExecutionContext) -> Result<Vec<Vector>> {
        let engine = self.engine.as_ref().ok_or_else(|| {
            EmbeddingError::InvalidConfig(format!(
                "{} space has no engine",
                self.config.embedding.kind_name()
            ))
        })?;
        let is_query = context.is_query_context();
        let raw = self
            .cache
            .get_or_embed(texts, |missing| engine.embed(missing, is_query))?;
        Ok(raw.into_iter().map(Vector::new).collect())
    }

    /// Image and optional description are embedded by the same engine and summed.
    fn embed_images(&self, items: &[Vec<Value>], context: &ExecutionContext) -> Result<Vec<Vector>> {
        let mut flat = Vec::new();
        let mut counts = Vec::with_capacity(items.len());
        for item in items {
            let parts = item
                .iter()
                .filter(|v| !v.is_null())
                .map(as_text)
                .collect::<Result<Vec<String>>>()?;
            if parts.is_empty() {
                return Err(EmbeddingError::InvalidInput(
                    "image space needs an image or a description".to_string(),
                ));
            }
            counts.push(parts.len());
            flat.extend(parts);
        }
        let embedded = self.embed_with_engine(&flat, context)?;
        let mut embedded = embedded.into_iter();
        let mut vectors = Vec::with_capacity(items.len());
        for count in counts {
            let parts: Vec<Weighted<Vector>> =
                embedded.by_ref().take(count).map(Weighted::from).collect();
            vectors.push(vecgraph_types::AggregationKind::VectorSum.aggregate(&parts)?);
        }
        Ok(vectors)
    }
}

fn resolve_engine(model: &ModelConfig, engines: &EngineRegistry) -> Result<Arc<dyn EmbeddingEngine>> {
    let engine = engines.get(&model.engine)?;
    if engine.info().dimension != model.dimension {
        return Err(EmbeddingError::DimensionMismatch {
            expected: model.dimension,
            actual: engine.info().dimension,
        });
    }
    Ok(engine)
}

fn first_value(item: &[Value]) -> Result<&Value> {
    item.first()
        .ok_or_else(|| EmbeddingError::InvalidInput("missing input value".to_string()))
}

fn as_text(value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| wrong_type("text", value))
}

fn wrong_type(space: &str, value: &Value) -> EmbeddingError {
    EmbeddingError::InvalidInput(format!(
        "{space} space cannot embed a {} value",
        value.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CategoricalConfig, CustomConfig, NumberConfig};
    use crate::mock::MockEmbeddingEngine;

    fn registry(engine: Arc<MockEmbeddingEngine>) -> EngineRegistry {
        EngineRegistry::new().with_engine(engine)
    }

    fn text_config(dimension: usize) -> TransformationConfig {
        TransformationConfig::new(EmbeddingConfig::Text(ModelConfig {
            engine: "mock".into(),
            dimension,
        }))
    }

    #[test]
    fn test_text_embedding_uses_cache() {
        let engine = Arc::new(MockEmbeddingEngine::new("mock", 8));
        let space = SpaceEmbedding::new(text_config(8), &registry(engine.clone()), 100).unwrap();
        let items = vec![vec![Value::from("hello world")], vec![Value::from("hello world")]];
        let ctx = ExecutionContext::online();
        let first = space.embed_and_normalize(&items, &ctx).unwrap();
        let second = space.embed_and_normalize(&items, &ctx).unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.embedded_inputs(), 1);
        assert!((first[0].norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_engine_dimension_checked() {
        let engine = Arc::new(MockEmbeddingEngine::new("mock", 8));
        let err = SpaceEmbedding::new(text_config(4), &registry(engine), 10).unwrap_err();
        assert!(matches!(err, EmbeddingError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_missing_engine() {
        let err = SpaceEmbedding::new(text_config(4), &EngineRegistry::new(), 10).unwrap_err();
        assert!(matches!(err, EmbeddingError::EngineNotFound(_)));
    }

    #[test]
    fn test_image_with_description() {
        let engine = Arc::new(MockEmbeddingEngine::new("clip", 8));
        let config = TransformationConfig::new(EmbeddingConfig::Image(ModelConfig {
            engine: "clip".into(),
            dimension: 8,
        }))
        .with_normalization(Normalization::NoNorm);
        let space = SpaceEmbedding::new(config, &registry(engine), 10).unwrap();
        let items = vec![vec![Value::from("cat"), Value::from("dog")], vec![Value::from("cat")]];
        let vectors = space.embed(&items, &ExecutionContext::online()).unwrap();
        assert_eq!(vectors[0].values().iter().sum::<f32>(), 2.0);
        assert_eq!(vectors[1].values().iter().sum::<f32>(), 1.0);
    }

    #[test]
    fn test_wrong_input_type() {
        let config = TransformationConfig::new(EmbeddingConfig::Number(NumberConfig::new(
            0.0,
            1.0,
            NumberMode::Maximum,
        )));
        let space = SpaceEmbedding::new(config, &EngineRegistry::new(), 0).unwrap();
        let err = space
            .embed(&[vec![Value::from("x")]], &ExecutionContext::online())
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::InvalidInput(_)));
    }

    #[test]
    fn test_custom_length_checked() {
        let config = TransformationConfig::new(EmbeddingConfig::Custom(CustomConfig { length: 2 }));
        let space = SpaceEmbedding::new(config, &EngineRegistry::new(), 0).unwrap();
        let err = space
            .embed(
                &[vec![Value::Vector(Vector::new(vec![1.0]))]],
                &ExecutionContext::online(),
            )
            .unwrap_err();
        assert!(matches!(err, EmbeddingError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_number_query_returns_default() {
        let config = TransformationConfig::new(EmbeddingConfig::Number(NumberConfig::new(
            0.0,
            1.0,
            NumberMode::Minimum,
        )));
        let space = SpaceEmbedding::new(config, &EngineRegistry::new(), 0).unwrap();
        assert!(space.should_return_default(&ExecutionContext::query()));
        assert!(!space.should_return_default(&ExecutionContext::online()));
    }

    #[test]
    fn test_aggregate_normalizes() {
        let config = TransformationConfig::new(EmbeddingConfig::Categorical(CategoricalConfig::new([
            "A", "B",
        ])));
        let space = SpaceEmbedding::new(config, &EngineRegistry::new(), 0).unwrap();
        let aggregated = space
            .aggregate(&[
                Weighted::new(Vector::new(vec![1.0, 0.0]), 1.0),
                Weighted::new(Vector::new(vec![0.0, 1.0]), 1.0),
            ])
            .unwrap();
        assert!((aggregated.norm() - 1.0).abs() < 1e-6);
    }
}
