//! Similarity math shared by search and clustering.

use crate::vector::Score;

/// Computes cosine similarity between two vectors.
///
/// # Returns
/// * Cosine similarity in range [-1, 1], where 1 is most similar. Returns 0
///   when either vector has zero magnitude.
///
/// The result is bit-for-bit symmetric: swapping `a` and `b` performs the
/// same multiplications in the same order.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = magnitude(a);
    let norm_b = magnitude(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot_product / (norm_a * norm_b)
    }
}

/// Similarity score `1 - cosine_distance`, clamped into `[0, 1]`.
pub fn similarity(a: &[f32], b: &[f32]) -> Score {
    Score::clamped(cosine_similarity(a, b))
}

/// Euclidean length of a vector.
pub fn magnitude(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
