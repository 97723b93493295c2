//! Numeric range encoding.

use std::f64::consts::FRAC_PI_2;

use vecgraph_types::{ExecutionContext, Vector};

use crate::config::{NumberConfig, NumberMode, NumberScale};
use crate::error::{EmbeddingError, Result};

const SIMILAR_FILTER_INDEX: usize = 2;

pub fn embed(config: &NumberConfig, input: f64, context: &ExecutionContext) -> Result<Vector> {
    if !input.is_finite() {
        return Err(EmbeddingError::InvalidInput(format!(
            "number space cannot embed {input}"
        )));
    }
    Ok(match config.mode {
        NumberMode::Similar => embed_similar(config, input, context),
        NumberMode::Minimum | NumberMode::Maximum => embed_extreme(config, input),
    })
}

/// Clamp, rescale to [0, 1] and invert for `Minimum`; zero becomes the negative filter.
fn embed_extreme(config: &NumberConfig, input: f64) -> Vector {
    let mut normalized = normalized_input(config, input);
    if config.mode == NumberMode::Minimum {
        normalized = 1.0 - normalized;
    }
    if normalized <= 0.0 {
        return Vector::with_negative_filter_indices(vec![config.negative_filter], [0]);
    }
    Vector::new(vec![normalized as f32])
}

/// Quarter-circle arc: close numbers get close angles.
fn embed_similar(config: &NumberConfig, input: f64, context: &ExecutionContext) -> Vector {
    if input < config.min || input > config.max {
        return Vector::with_negative_filter_indices(
            vec![0.0, 0.0, config.negative_filter],
            [SIMILAR_FILTER_INDEX],
        );
    }
    let angle = normalized_input(config, input) * FRAC_PI_2;
    let marker = if context.is_query_context() { 1.0 } else { 0.0 };
    Vector::with_negative_filter_indices(
        vec![angle.sin() as f32, angle.cos() as f32, marker],
        [SIMILAR_FILTER_INDEX],
    )
}

fn normalized_input(config: &NumberConfig, input: f64) -> f64 {
    let clamped = input.clamp(config.min, config.max);
    let min = scaled(config.scale, config.min);
    let max = scaled(config.scale, config.max);
    (scaled(config.scale, clamped) - min) / (max - min)
}

fn scaled(scale: NumberScale, value: f64) -> f64 {
    match scale {
        NumberScale::Linear => value,
        NumberScale::Logarithmic => (1.0 + value).log10(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max_config() -> NumberConfig {
        NumberConfig::new(1.0, 5.0, NumberMode::Maximum).with_negative_filter(-5.0)
    }

    #[test]
    fn test_maximum_bounds() {
        let ctx = ExecutionContext::online();
        let low = embed(&max_config(), 1.0, &ctx).unwrap();
        assert_eq!(low.values(), &[-5.0]);
        assert!(low.is_negative_filter(0));
        assert_eq!(embed(&max_config(), 5.0, &ctx).unwrap().values(), &[1.0]);
        assert_eq!(embed(&max_config(), 10.0, &ctx).unwrap().values(), &[1.0]);
        assert_eq!(embed(&max_config(), 3.0, &ctx).unwrap().values(), &[0.5]);
    }

    #[test]
    fn test_minimum_inverts() {
        let config = NumberConfig::new(1.0, 5.0, NumberMode::Minimum);
        let ctx = ExecutionContext::online();
        assert_eq!(embed(&config, 1.0, &ctx).unwrap().values(), &[1.0]);
        assert!(embed(&config, 5.0, &ctx).unwrap().is_negative_filter(0));
    }

    #[test]
    fn test_logarithmic_scale() {
        let config = NumberConfig::new(0.0, 99.0, NumberMode::Maximum)
            .with_scale(NumberScale::Logarithmic);
        let v = embed(&config, 9.0, &ExecutionContext::online()).unwrap();
        assert!((v.values()[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_similar_mode() {
        let config = NumberConfig::new(0.0, 10.0, NumberMode::Similar).with_negative_filter(-1.0);
        let stored = embed(&config, 10.0, &ExecutionContext::online()).unwrap();
        assert!((stored.values()[0] - 1.0).abs() < 1e-6);
        assert!(stored.values()[1].abs() < 1e-6);
        assert_eq!(stored.values()[2], 0.0);
        let query = embed(&config, 0.0, &ExecutionContext::query()).unwrap();
        assert_eq!(query.values()[2], 1.0);
        let out = embed(&config, 11.0, &ExecutionContext::online()).unwrap();
        assert_eq!(out.values(), &[0.0, 0.0, -1.0]);
    }

    #[test]
    fn test_nan_rejected() {
        assert!(embed(&max_config(), f64::NAN, &ExecutionContext::online()).is_err());
    }
}
