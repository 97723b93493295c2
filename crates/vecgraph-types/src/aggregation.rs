//! Combining weighted vectors of one space.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TypesError};
use crate::vector::Vector;
use crate::weighted::Weighted;

/// How several vectors of the same space are merged into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    #[default]
    VectorSum,
    Avg,
    Min,
    Max,
}

impl AggregationKind {
    /// Aggregate weighted vectors. Zero weights and empty vectors are ignored.
    ///
    /// A position that is a negative filter in every contributing vector keeps
    /// the filter value; contributors disagreeing on that value is an error.
    pub fn aggregate(&self, weighted_vectors: &[Weighted<Vector>]) -> Result<Vector> {
        let contributors: Vec<&Weighted<Vector>> = weighted_vectors
            .iter()
            .filter(|w| w.weight != 0.0 && !w.item.is_empty())
            .collect();
        let Some(first) = contributors.first() else {
            return Ok(Vector::empty());
        };
        let dimension = first.item.dimension();
        for w in &contributors {
            w.item.check_dimension(dimension)?;
        }
        if contributors.len() == 1 && *self == AggregationKind::VectorSum {
            return Ok(first.item.multiply(first.weight));
        }

        let mut values = Vec::with_capacity(dimension);
        let mut filter_indices = Vec::new();
        for i in 0..dimension {
            let active: Vec<(f32, f32)> = contributors
                .iter()
                .filter(|w| !w.item.is_negative_filter(i))
                .map(|w| (w.item.values()[i], w.weight))
                .collect();
            let filter_value = Self::shared_filter_value(&contributors, i)?;
            if active.is_empty() {
                // every contributor is filtered here
                values.push(filter_value.unwrap_or(0.0));
                if filter_value.is_some() {
                    filter_indices.push(i);
                }
                continue;
            }
            let combined = self.combine(&active);
            match filter_value {
                Some(filter) if combined == 0.0 => {
                    values.push(filter);
                    filter_indices.push(i);
                }
                _ => values.push(combined),
            }
        }
        Ok(Vector::with_negative_filter_indices(values, filter_indices))
    }

    fn combine(&self, active: &[(f32, f32)]) -> f32 {
        match self {
            AggregationKind::VectorSum => active.iter().map(|(v, w)| v * w).sum(),
            AggregationKind::Avg => {
                let total_weight: f32 = active.iter().map(|(_, w)| w).sum();
                if total_weight == 0.0 {
                    0.0
                } else {
                    active.iter().map(|(v, w)| v * w).sum::<f32>() / total_weight
                }
            }
            AggregationKind::Min => active
                .iter()
                .map(|(v, _)| *v)
                .fold(f32::INFINITY, f32::min),
            AggregationKind::Max => active
                .iter()
                .map(|(v, _)| *v)
                .fold(f32::NEG_INFINITY, f32::max),
        }
    }

    fn shared_filter_value(contributors: &[&Weighted<Vector>], index: usize) -> Result<Option<f32>> {
        let mut filter_value: Option<f32> = None;
        for w in contributors.iter().filter(|w| w.item.is_negative_filter(index)) {
            let value = w.item.values()[index];
            match filter_value {
                Some(existing) if existing != value => {
                    return Err(TypesError::InvalidState(format!(
                        "conflicting negative filter values at index {index}: {existing} and {value}"
                    )))
                }
                _ => filter_value = Some(value),
            }
        }
        Ok(filter_value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(values: Vec<f32>, weight: f32) -> Weighted<Vector> {
        Weighted::new(Vector::new(values), weight)
    }

    #[test]
    fn test_sum_single_vector_scaled() {
        let result = AggregationKind::VectorSum
            .aggregate(&[w(vec![1.0, 2.0], 0.5)])
            .unwrap();
        assert_eq!(result.values(), &[0.5, 1.0]);
    }

    #[test]
    fn test_sum_drops_zero_weights() {
        let result = AggregationKind::VectorSum
            .aggregate(&[w(vec![1.0, 2.0], 1.0), w(vec![9.0, 9.0], 0.0)])
            .unwrap();
        assert_eq!(result.values(), &[1.0, 2.0]);
    }

    #[test]
    fn test_sum_weighted() {
        let result = AggregationKind::VectorSum
            .aggregate(&[w(vec![1.0, 0.0], 0.5), w(vec![0.0, 1.0], 2.0)])
            .unwrap();
        assert_eq!(result.values(), &[0.5, 2.0]);
    }

    #[test]
    fn test_nothing_to_aggregate() {
        let result = AggregationKind::VectorSum.aggregate(&[]).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = AggregationKind::VectorSum
            .aggregate(&[w(vec![1.0], 1.0), w(vec![1.0, 2.0], 1.0)])
            .unwrap_err();
        assert!(matches!(err, TypesError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_filtered_positions() {
        let a = Weighted::new(Vector::with_negative_filter_indices(vec![1.0, -5.0], [1]), 1.0);
        let b = Weighted::new(Vector::with_negative_filter_indices(vec![-5.0, -5.0], [0, 1]), 1.0);
        let result = AggregationKind::VectorSum.aggregate(&[a, b]).unwrap();
        assert_eq!(result.values(), &[1.0, -5.0]);
        assert!(result.is_negative_filter(1));
        assert!(!result.is_negative_filter(0));
    }

    #[test]
    fn test_conflicting_filter_values() {
        let a = Weighted::new(Vector::with_negative_filter_indices(vec![-1.0], [0]), 1.0);
        let b = Weighted::new(Vector::with_negative_filter_indices(vec![-5.0], [0]), 1.0);
        assert!(AggregationKind::VectorSum.aggregate(&[a, b]).is_err());
    }

    #[test]
    fn test_avg_min_max() {
        let vectors = [w(vec![1.0, 4.0], 1.0), w(vec![3.0, 2.0], 1.0)];
        assert_eq!(
            AggregationKind::Avg.aggregate(&vectors).unwrap().values(),
            &[2.0, 3.0]
        );
        assert_eq!(
            AggregationKind::Min.aggregate(&vectors).unwrap().values(),
            &[1.0, 2.0]
        );
        assert_eq!(
            AggregationKind::Max.aggregate(&vectors).unwrap().values(),
            &[3.0, 4.0]
        );
    }
}
