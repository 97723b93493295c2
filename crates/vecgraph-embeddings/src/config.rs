//! Declarative per-space embedding configuration.
//!
//! These values take part in node identity, so they are plain serializable
//! data. The runtime side lives in [`crate::transformation`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use vecgraph_types::{AggregationKind, Normalization, Vector};

use crate::error::{EmbeddingError, Result};

const SECONDS_PER_DAY: i64 = 86_400;

/// Configuration of a space backed by an external engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub engine: String,
    pub dimension: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberMode {
    Minimum,
    Maximum,
    Similar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NumberScale {
    #[default]
    Linear,
    /// `log10(1 + x)` before rescaling
    Logarithmic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberConfig {
    pub min: f64,
    pub max: f64,
    pub mode: NumberMode,
    #[serde(default)]
    pub scale: NumberScale,
    #[serde(default)]
    pub negative_filter: f32,
}

impl NumberConfig {
    pub fn new(min: f64, max: f64, mode: NumberMode) -> Self {
        Self {
            min,
            max,
            mode,
            scale: NumberScale::Linear,
            negative_filter: 0.0,
        }
    }

    pub fn with_scale(mut self, scale: NumberScale) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_negative_filter(mut self, negative_filter: f32) -> Self {
        self.negative_filter = negative_filter;
        self
    }

    pub fn length(&self) -> usize {
        match self.mode {
            NumberMode::Similar => 3,
            NumberMode::Minimum | NumberMode::Maximum => 1,
        }
    }

    fn validate(&self) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min >= self.max {
            return Err(EmbeddingError::InvalidConfig(format!(
                "number space needs finite min < max, got min={} max={}",
                self.min, self.max
            )));
        }
        if self.scale == NumberScale::Logarithmic && self.min < 0.0 {
            return Err(EmbeddingError::InvalidConfig(
                "min must be 0 or higher with a logarithmic scale".to_string(),
            ));
        }
        if self.negative_filter > 0.0 {
            return Err(EmbeddingError::InvalidConfig(format!(
                "negative_filter must not be positive, got {}",
                self.negative_filter
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalConfig {
    pub categories: Vec<String>,
    #[serde(default)]
    pub uncategorized_as_category: bool,
    #[serde(default)]
    pub negative_filter: f32,
}

impl CategoricalConfig {
    pub fn new(categories: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            categories: categories.into_iter().map(Into::into).collect(),
            uncategorized_as_category: false,
            negative_filter: 0.0,
        }
    }

    pub fn with_uncategorized_as_category(mut self, enabled: bool) -> Self {
        self.uncategorized_as_category = enabled;
        self
    }

    pub fn with_negative_filter(mut self, negative_filter: f32) -> Self {
        self.negative_filter = negative_filter;
        self
    }

    pub fn length(&self) -> usize {
        self.categories.len() + usize::from(self.uncategorized_as_category)
    }

    fn validate(&self) -> Result<()> {
        if self.categories.is_empty() {
            return Err(EmbeddingError::InvalidConfig(
                "categorical space needs at least one category".to_string(),
            ));
        }
        let unique: HashSet<&String> = self.categories.iter().collect();
        if unique.len() != self.categories.len() {
            return Err(EmbeddingError::InvalidConfig(
                "categorical space has duplicate categories".to_string(),
            ));
        }
        Ok(())
    }
}

/// One recency window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodTime {
    pub period_secs: i64,
    pub weight: f32,
}

impl PeriodTime {
    pub fn new(period_secs: i64, weight: f32) -> Self {
        Self {
            period_secs,
            weight,
        }
    }

    pub fn days(days: i64) -> Self {
        Self::new(days * SECONDS_PER_DAY, 1.0)
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecencyConfig {
    pub period_times: Vec<PeriodTime>,
    #[serde(default)]
    pub hour_offset_secs: i64,
    #[serde(default)]
    pub negative_filter: f32,
}

impl RecencyConfig {
    /// Period times are kept sorted ascending so the last window is the longest.
    pub fn new(period_times: impl IntoIterator<Item = PeriodTime>) -> Self {
        let mut period_times: Vec<PeriodTime> = period_times.into_iter().collect();
        period_times.sort_by_key(|p| p.period_secs);
        Self {
            period_times,
            hour_offset_secs: 0,
            negative_filter: 0.0,
        }
    }

    pub fn with_hour_offset(mut self, hours: i64) -> Self {
        self.hour_offset_secs = hours * 3600;
        self
    }

    pub fn with_negative_filter(mut self, negative_filter: f32) -> Self {
        self.negative_filter = negative_filter;
        self
    }

    /// A (cos, sin) pair per window plus one filter component.
    pub fn length(&self) -> usize {
        self.period_times.len() * 2 + 1
    }

    fn validate(&self) -> Result<()> {
        if self.period_times.is_empty() {
            return Err(EmbeddingError::InvalidConfig(
                "recency space needs at least one period time".to_string(),
            ));
        }
        if let Some(p) = self.period_times.iter().find(|p| p.period_secs < 1) {
            return Err(EmbeddingError::InvalidConfig(format!(
                "period time must be at least 1 second, got {}",
                p.period_secs
            )));
        }
        if !(0..SECONDS_PER_DAY).contains(&self.hour_offset_secs) {
            return Err(EmbeddingError::InvalidConfig(
                "time period hour offset must be less than a day".to_string(),
            ));
        }
        if self.period_times.iter().any(|p| p.weight < 0.0) {
            tracing::warn!("negative period weight supplied; recency scores may be non-monotonic");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomConfig {
    pub length: usize,
}

/// Embedding strategy of a space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbeddingConfig {
    Text(ModelConfig),
    Image(ModelConfig),
    Number(NumberConfig),
    Categorical(CategoricalConfig),
    Recency(RecencyConfig),
    Custom(CustomConfig),
}

impl EmbeddingConfig {
    pub fn kind_name(&self) -> &'static str {
        match self {
            EmbeddingConfig::Text(_) => "text",
            EmbeddingConfig::Image(_) => "image",
            EmbeddingConfig::Number(_) => "number",
            EmbeddingConfig::Categorical(_) => "categorical",
            EmbeddingConfig::Recency(_) => "recency",
            EmbeddingConfig::Custom(_) => "custom",
        }
    }

    pub fn length(&self) -> usize {
        match self {
            EmbeddingConfig::Text(c) | EmbeddingConfig::Image(c) => c.dimension,
            EmbeddingConfig::Number(c) => c.length(),
            EmbeddingConfig::Categorical(c) => c.length(),
            EmbeddingConfig::Recency(c) => c.length(),
            EmbeddingConfig::Custom(c) => c.length,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            EmbeddingConfig::Text(c) | EmbeddingConfig::Image(c) => {
                if c.dimension == 0 {
                    return Err(EmbeddingError::InvalidConfig(format!(
                        "engine {} configured with zero dimension",
                        c.engine
                    )));
                }
                Ok(())
            }
            EmbeddingConfig::Number(c) => c.validate(),
            EmbeddingConfig::Categorical(c) => c.validate(),
            EmbeddingConfig::Recency(c) => c.validate(),
            EmbeddingConfig::Custom(c) => {
                if c.length == 0 {
                    return Err(EmbeddingError::InvalidConfig(
                        "custom space length must be > 0".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Normalization used when none is configured explicitly.
    pub fn default_normalization(&self) -> Normalization {
        match self {
            EmbeddingConfig::Number(_) | EmbeddingConfig::Recency(_) => Normalization::NoNorm,
            _ => Normalization::L2Norm,
        }
    }

    /// Vector used for a space that received no input at query time.
    pub fn default_vector(&self) -> Vector {
        match self {
            EmbeddingConfig::Number(c) if c.mode != NumberMode::Similar => Vector::new(vec![1.0]),
            _ => Vector::zeros(self.length()),
        }
    }
}

/// Everything needed to turn an input into a normalized space vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationConfig {
    pub embedding: EmbeddingConfig,
    pub aggregation: AggregationKind,
    pub normalization: Normalization,
}

impl TransformationConfig {
    pub fn new(embedding: EmbeddingConfig) -> Self {
        let normalization = embedding.default_normalization();
        Self {
            embedding,
            aggregation: AggregationKind::default(),
            normalization,
        }
    }

    pub fn with_aggregation(mut self, aggregation: AggregationKind) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn with_normalization(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn length(&self) -> usize {
        self.embedding.length()
    }

    pub fn validate(&self) -> Result<()> {
        self.embedding.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_validation() {
        assert!(NumberConfig::new(5.0, 1.0, NumberMode::Maximum).validate().is_err());
        assert!(NumberConfig::new(-1.0, 1.0, NumberMode::Maximum)
            .with_scale(NumberScale::Logarithmic)
            .validate()
            .is_err());
        assert!(NumberConfig::new(1.0, 5.0, NumberMode::Maximum)
            .with_negative_filter(1.0)
            .validate()
            .is_err());
        assert!(NumberConfig::new(1.0, 5.0, NumberMode::Maximum).validate().is_ok());
    }

    #[test]
    fn test_categorical_length() {
        let config = CategoricalConfig::new(["A", "B"]);
        assert_eq!(config.length(), 2);
        assert_eq!(config.with_uncategorized_as_category(true).length(), 3);
    }

    #[test]
    fn test_categorical_duplicates_rejected() {
        assert!(CategoricalConfig::new(["A", "A"]).validate().is_err());
    }

    #[test]
    fn test_recency_sorted_and_validated() {
        let config = RecencyConfig::new([PeriodTime::days(30), PeriodTime::days(1)]);
        assert_eq!(config.period_times[0].period_secs, SECONDS_PER_DAY);
        assert_eq!(config.length(), 5);
        assert!(config.clone().with_hour_offset(24).validate().is_err());
        assert!(RecencyConfig::new([PeriodTime::new(0, 1.0)]).validate().is_err());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_vectors() {
        let max = EmbeddingConfig::Number(NumberConfig::new(0.0, 1.0, NumberMode::Maximum));
        assert_eq!(max.default_vector().values(), &[1.0]);
        let similar = EmbeddingConfig::Number(NumberConfig::new(0.0, 1.0, NumberMode::Similar));
        assert_eq!(similar.default_vector().values(), &[0.0, 0.0, 0.0]);
        let text = EmbeddingConfig::Text(ModelConfig {
            engine: "e".into(),
            dimension: 4,
        });
        assert_eq!(text.default_vector(), Vector::zeros(4));
    }

    #[test]
    fn test_serde_tagged() {
        let config = EmbeddingConfig::Custom(CustomConfig { length: 3 });
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["kind"], "custom");
        let decoded: EmbeddingConfig = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, config);
    }
}
