//! Type-safe wrappers and core types for vector similarity.
//!
//! Newtypes here keep raw `f32`/`usize` values from leaking across the
//! store, search and clustering layers.

use crate::types::{Collection, OwnerId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dimension of the default embedding model (all-MiniLM-L6-v2).
pub const VECTOR_DIMENSION_384: usize = 384;

/// Similarity between two embeddings, always inside `[0.0, 1.0]`.
///
/// 1.0 means identical direction, 0.0 means orthogonal or opposed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(f32);

impl Score {
    /// Creates a new `Score` with validation.
    ///
    /// Returns an error if the score is not in the range [0.0, 1.0] or is NaN.
    pub fn new(value: f32) -> Result<Self, VectorError> {
        if value.is_nan() {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score cannot be NaN",
            });
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(VectorError::InvalidScore {
                value,
                reason: "Score must be in range [0.0, 1.0]",
            });
        }
        Ok(Self(value))
    }

    /// Clamps a raw cosine similarity into a score.
    ///
    /// Floating-point error can push identical vectors slightly above 1.0,
    /// and opposed vectors go down to -1.0; both are clamped. NaN maps to 0.
    #[must_use]
    pub fn clamped(raw: f32) -> Self {
        if raw.is_nan() {
            return Self::zero();
        }
        Self(raw.clamp(0.0, 1.0))
    }

    /// Creates a score of 0.0 (no similarity).
    #[must_use]
    pub const fn zero() -> Self {
        Self(0.0)
    }

    /// Creates a score of 1.0 (perfect similarity).
    #[must_use]
    pub const fn one() -> Self {
        Self(1.0)
    }

    /// Returns the underlying f32 value.
    #[must_use]
    pub fn get(&self) -> f32 {
        self.0
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// Type-safe wrapper for vector dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Returns the underlying dimension value.
    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// One stored embedding and its owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub owner_id: OwnerId,
    pub collection: Collection,
    pub vector: Vec<f32>,
}

impl Embedding {
    #[must_use]
    pub fn dim(&self) -> usize {
        self.vector.len()
    }
}

/// Errors raised by vector-level invariants.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    #[error("Invalid score value: {value}\nReason: {reason}")]
    InvalidScore { value: f32, reason: &'static str },

    #[error("Vector component {index} is NaN or infinite")]
    NonFinite { index: usize },
}

/// Rejects vectors containing NaN or infinite components.
pub fn ensure_finite(vector: &[f32]) -> Result<(), VectorError> {
    match vector.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(VectorError::NonFinite { index }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_validation() {
        let score = Score::new(0.5).unwrap();
        assert_eq!(score.get(), 0.5);

        assert!(Score::new(-0.1).is_err());
        assert!(Score::new(1.1).is_err());
        assert!(Score::new(f32::NAN).is_err());
    }

    #[test]
    fn test_score_clamping() {
        assert_eq!(Score::clamped(1.000_000_2).get(), 1.0);
        assert_eq!(Score::clamped(-0.4).get(), 0.0);
        assert_eq!(Score::clamped(f32::NAN), Score::zero());
        assert_eq!(Score::clamped(0.83).get(), 0.83);
    }

    #[test]
    fn test_score_ordering() {
        let mut scores = vec![Score::clamped(0.2), Score::one(), Score::clamped(0.7)];
        scores.sort();
        assert_eq!(scores[0].get(), 0.2);
        assert_eq!(scores[2], Score::one());
    }

    #[test]
    fn test_vector_dimension() {
        let dim = VectorDimension::new(384).unwrap();
        assert_eq!(dim.get(), VECTOR_DIMENSION_384);
        assert!(VectorDimension::new(0).is_err());

        assert!(dim.validate_vector(&vec![0.1; 384]).is_ok());
        assert!(matches!(
            dim.validate_vector(&vec![0.1; 100]),
            Err(VectorError::DimensionMismatch {
                expected: 384,
                actual: 100
            })
        ));
    }

    #[test]
    fn test_ensure_finite() {
        assert!(ensure_finite(&[0.1, 0.2]).is_ok());
        assert!(matches!(
            ensure_finite(&[0.1, f32::INFINITY]),
            Err(VectorError::NonFinite { index: 1 })
        ));
    }
}
