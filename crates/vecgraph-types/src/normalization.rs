//! Vector normalization strategies.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TypesError};
use crate::vector::Vector;

/// How an embedding is scaled after it is produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Normalization {
    /// Scale to unit length, ignoring negative-filter positions.
    #[default]
    L2Norm,
    /// Divide by a fixed length.
    ConstantNorm { length: f32 },
    /// Identity.
    NoNorm,
}

impl Normalization {
    /// Constant normalization; the length must be positive and finite.
    pub fn constant(length: f32) -> Result<Self> {
        if !length.is_finite() || length <= 0.0 {
            return Err(TypesError::Validation(format!(
                "constant normalization length must be positive, got {length}"
            )));
        }
        Ok(Normalization::ConstantNorm { length })
    }

    pub fn normalize(&self, vector: &Vector) -> Vector {
        match self {
            Normalization::L2Norm => vector.normalize(vector.norm()),
            Normalization::ConstantNorm { length } => vector.normalize(*length),
            Normalization::NoNorm => vector.clone(),
        }
    }

    /// Undo `normalize`.
    ///
    /// A stored pre-normalization form wins. Without one, constant
    /// normalization multiplies back and the other strategies are no-ops.
    pub fn denormalize(&self, vector: &Vector) -> Vector {
        if let Some(original) = vector.denormalize() {
            return original;
        }
        match self {
            Normalization::ConstantNorm { length } => vector.multiply(*length),
            Normalization::L2Norm | Normalization::NoNorm => vector.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-5, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn test_l2_unit_length() {
        let v = Vector::new(vec![1.0, 2.0, 2.0]);
        let n = Normalization::L2Norm.normalize(&v);
        assert!((n.norm() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_l2_skips_negative_filters() {
        let v = Vector::with_negative_filter_indices(vec![2.0, -5.0], [1]);
        let n = Normalization::L2Norm.normalize(&v);
        assert_eq!(n.values(), &[1.0, -5.0]);
    }

    #[test]
    fn test_roundtrip_l2() {
        let v = Vector::new(vec![0.3, -1.7, 2.5]);
        let norm = Normalization::L2Norm;
        assert_close(norm.denormalize(&norm.normalize(&v)).values(), v.values());
    }

    #[test]
    fn test_roundtrip_constant() {
        let v = Vector::new(vec![0.3, -1.7, 2.5]);
        let norm = Normalization::constant(3.0).unwrap();
        assert_close(norm.denormalize(&norm.normalize(&v)).values(), v.values());
    }

    #[test]
    fn test_constant_denormalize_without_history() {
        let norm = Normalization::constant(2.0).unwrap();
        let v = Vector::new(vec![0.5, 1.0]);
        assert_close(norm.denormalize(&v).values(), &[1.0, 2.0]);
    }

    #[test]
    fn test_l2_denormalize_without_history_is_noop() {
        let v = Vector::new(vec![0.5, 1.0]);
        assert_eq!(Normalization::L2Norm.denormalize(&v), v);
    }

    #[test]
    fn test_constant_rejects_zero() {
        assert!(Normalization::constant(0.0).is_err());
        assert!(Normalization::constant(-1.0).is_err());
    }

    #[test]
    fn test_zero_vector_l2_unchanged() {
        let v = Vector::zeros(3);
        assert_eq!(Normalization::L2Norm.normalize(&v), v);
    }
}
