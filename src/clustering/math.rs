//! Vector helpers shared by reduction, discovery and representative selection.

use crate::error::ClusteringError;

/// Epsilon for floating-point comparisons.
pub(crate) const EPSILON: f32 = 1e-10;

/// Euclidean distance between two vectors of equal length.
#[must_use]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    squared_euclidean(a, b).sqrt()
}

#[must_use]
pub fn squared_euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Cosine distance (`1 - cosine similarity`), 1.0 when either side is zero.
#[must_use]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a < EPSILON || norm_b < EPSILON {
        return 1.0;
    }
    (1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())).max(0.0)
}

/// Arithmetic mean of the rows at `indices`.
///
/// Returns an empty vector when `indices` is empty.
#[must_use]
pub fn mean_of(vectors: &[Vec<f32>], indices: &[usize]) -> Vec<f32> {
    let Some(&first) = indices.first() else {
        return Vec::new();
    };
    let mut centroid = vec![0.0f32; vectors[first].len()];
    for &i in indices {
        for (c, v) in centroid.iter_mut().zip(&vectors[i]) {
            *c += v;
        }
    }
    let n = indices.len() as f32;
    for c in &mut centroid {
        *c /= n;
    }
    centroid
}

/// Check that every row has the same dimension and only finite values.
///
/// Returns the shared dimension, or 0 for an empty input.
pub fn validate_vectors(vectors: &[Vec<f32>]) -> Result<usize, ClusteringError> {
    let Some(first) = vectors.first() else {
        return Ok(0);
    };
    let expected = first.len();
    for (index, vector) in vectors.iter().enumerate() {
        if vector.len() != expected {
            return Err(ClusteringError::DimensionMismatch {
                expected,
                found: vector.len(),
            });
        }
        if vector.iter().any(|v| !v.is_finite()) {
            return Err(ClusteringError::NonFiniteInput { index });
        }
    }
    Ok(expected)
}
