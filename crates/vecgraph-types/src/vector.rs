//! Fixed-length float vectors with negative-filter positions.
//!
//! A negative-filter position holds a sentinel value (for example "category
//! absent") that must not take part in norm computation or in weighting.
//! Normalized vectors remember their pre-normalization form so time-dependent
//! parts can be recomputed later without losing the rest of the vector.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TypesError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vector {
    values: Vec<f32>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    negative_filter_indices: BTreeSet<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    before_normalization: Option<Box<Vector>>,
}

impl Vector {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            negative_filter_indices: BTreeSet::new(),
            before_normalization: None,
        }
    }

    /// Create a vector whose `indices` are negative-filter positions.
    ///
    /// Indices outside the vector are dropped.
    pub fn with_negative_filter_indices(
        values: Vec<f32>,
        indices: impl IntoIterator<Item = usize>,
    ) -> Self {
        let len = values.len();
        Self {
            values,
            negative_filter_indices: indices.into_iter().filter(|i| *i < len).collect(),
            before_normalization: None,
        }
    }

    pub fn zeros(dimension: usize) -> Self {
        Self::new(vec![0.0; dimension])
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn into_values(self) -> Vec<f32> {
        self.values
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn negative_filter_indices(&self) -> &BTreeSet<usize> {
        &self.negative_filter_indices
    }

    pub fn is_negative_filter(&self, index: usize) -> bool {
        self.negative_filter_indices.contains(&index)
    }

    pub fn before_normalization(&self) -> Option<&Vector> {
        self.before_normalization.as_deref()
    }

    /// Values at positions that are not negative filters.
    pub fn filtered_values(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        self.values
            .iter()
            .copied()
            .enumerate()
            .filter(|(i, _)| !self.negative_filter_indices.contains(i))
    }

    /// L2 norm over the non-filtered positions.
    pub fn norm(&self) -> f32 {
        self.filtered_values()
            .map(|(_, v)| v * v)
            .sum::<f32>()
            .sqrt()
    }

    /// True when every position is zero.
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    /// Multiply the non-filtered positions by `factor`.
    pub fn multiply(&self, factor: f32) -> Vector {
        if factor == 1.0 {
            return self.without_history();
        }
        self.map_filtered(|v| v * factor)
    }

    /// Divide the non-filtered positions by `divisor`.
    pub fn divide(&self, divisor: f32) -> Result<Vector> {
        if divisor == 0.0 {
            return Err(TypesError::Validation(
                "cannot divide a vector by zero".to_string(),
            ));
        }
        Ok(self.map_filtered(|v| v / divisor))
    }

    /// Element-wise product with another vector of the same dimension.
    pub fn multiply_elementwise(&self, other: &Vector) -> Result<Vector> {
        self.check_dimension(other.dimension())?;
        let values = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .collect();
        Ok(Vector::with_negative_filter_indices(
            values,
            self.negative_filter_indices.clone(),
        ))
    }

    pub fn dot(&self, other: &Vector) -> Result<f32> {
        self.check_dimension(other.dimension())?;
        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum())
    }

    /// Scale the non-filtered positions by `1 / length`, keeping the original.
    ///
    /// A zero length leaves the vector unchanged.
    pub fn normalize(&self, length: f32) -> Vector {
        if length == 0.0 || self.is_empty() {
            return self.clone();
        }
        let mut normalized = self.map_filtered(|v| v / length);
        normalized.before_normalization = Some(Box::new(self.without_history()));
        normalized
    }

    /// Return the stored pre-normalization form, if any.
    pub fn denormalize(&self) -> Option<Vector> {
        self.before_normalization.as_deref().cloned()
    }

    /// Concatenate vectors, shifting negative-filter indices.
    pub fn concatenate<'a>(vectors: impl IntoIterator<Item = &'a Vector>) -> Vector {
        let mut values = Vec::new();
        let mut indices = BTreeSet::new();
        for vector in vectors {
            let offset = values.len();
            indices.extend(vector.negative_filter_indices.iter().map(|i| i + offset));
            values.extend_from_slice(&vector.values);
        }
        Vector {
            values,
            negative_filter_indices: indices,
            before_normalization: None,
        }
    }

    /// Split into consecutive parts with the given lengths.
    pub fn split(&self, lengths: &[usize]) -> Result<Vec<Vector>> {
        let total: usize = lengths.iter().sum();
        self.check_dimension(total)?;
        let mut parts = Vec::with_capacity(lengths.len());
        let mut start = 0;
        for &length in lengths {
            let end = start + length;
            let indices = self
                .negative_filter_indices
                .range(start..end)
                .map(|i| i - start);
            parts.push(Vector::with_negative_filter_indices(
                self.values[start..end].to_vec(),
                indices,
            ));
            start = end;
        }
        Ok(parts)
    }

    pub fn check_dimension(&self, expected: usize) -> Result<()> {
        if self.dimension() != expected {
            return Err(TypesError::DimensionMismatch {
                expected,
                actual: self.dimension(),
            });
        }
        Ok(())
    }

    fn map_filtered(&self, f: impl Fn(f32) -> f32) -> Vector {
        let values = self
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                if self.negative_filter_indices.contains(&i) {
                    *v
                } else {
                    f(*v)
                }
            })
            .collect();
        Vector {
            values,
            negative_filter_indices: self.negative_filter_indices.clone(),
            before_normalization: None,
        }
    }

    fn without_history(&self) -> Vector {
        Vector {
            values: self.values.clone(),
            negative_filter_indices: self.negative_filter_indices.clone(),
            before_normalization: None,
        }
    }
}

impl PartialEq for Vector {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values && self.negative_filter_indices == other.negative_filter_indices
    }
}

impl From<Vec<f32>> for Vector {
    fn from(values: Vec<f32>) -> Self {
        Vector::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_ignores_negative_filters() {
        let v = Vector::with_negative_filter_indices(vec![3.0, -5.0, 4.0], [1]);
        assert!((v.norm() - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_multiply_keeps_filtered_values() {
        let v = Vector::with_negative_filter_indices(vec![1.0, -5.0], [1]);
        let scaled = v.multiply(0.0);
        assert_eq!(scaled.values(), &[0.0, -5.0]);
        assert!(scaled.is_negative_filter(1));
    }

    #[test]
    fn test_divide_by_zero_rejected() {
        assert!(Vector::new(vec![1.0]).divide(0.0).is_err());
    }

    #[test]
    fn test_normalize_keeps_original() {
        let v = Vector::new(vec![3.0, 4.0]);
        let normalized = v.normalize(5.0);
        assert_eq!(normalized.values(), &[0.6, 0.8]);
        assert_eq!(normalized.denormalize(), Some(v));
    }

    #[test]
    fn test_normalize_zero_length_is_noop() {
        let v = Vector::new(vec![0.0, 0.0]);
        let normalized = v.normalize(0.0);
        assert_eq!(normalized, v);
        assert!(normalized.before_normalization().is_none());
    }

    #[test]
    fn test_concatenate_shifts_filter_indices() {
        let a = Vector::with_negative_filter_indices(vec![1.0, -5.0], [1]);
        let b = Vector::with_negative_filter_indices(vec![-5.0, 2.0], [0]);
        let c = Vector::concatenate([&a, &b]);
        assert_eq!(c.values(), &[1.0, -5.0, -5.0, 2.0]);
        assert_eq!(
            c.negative_filter_indices().iter().copied().collect::<Vec<_>>(),
            vec![1, 2]
        );
    }

    #[test]
    fn test_split_restores_parts() {
        let a = Vector::with_negative_filter_indices(vec![1.0, -5.0], [1]);
        let b = Vector::with_negative_filter_indices(vec![-5.0, 2.0, 3.0], [0]);
        let parts = Vector::concatenate([&a, &b]).split(&[2, 3]).unwrap();
        assert_eq!(parts, vec![a, b]);
    }

    #[test]
    fn test_split_wrong_total() {
        let err = Vector::new(vec![1.0, 2.0]).split(&[1, 2]).unwrap_err();
        assert!(matches!(
            err,
            TypesError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_serialization_roundtrip_keeps_filters() {
        let v = Vector::with_negative_filter_indices(vec![1.0, -5.0], [1]).normalize(1.0);
        let json = serde_json::to_string(&v).unwrap();
        let decoded: Vector = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, v);
        assert!(decoded.before_normalization().is_some());
    }
}
