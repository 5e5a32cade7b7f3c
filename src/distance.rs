//! Optimized distance calculations for t-SNE.
//!
//! This module provides efficient implementations of the Euclidean metric
//! using SIMD instructions where possible. It includes functions for:
//!
//! - Computing Euclidean distances between vectors using SIMD
//! - Computing squared Euclidean distances for kernel evaluations
//! - Building the full pairwise squared-distance matrix used by exact mode
//! - Handling both contiguous and non-contiguous array views

use ndarray::{Array2, ArrayView1, ArrayView2};
use tracing::warn;
use wide::f64x4;

/// Computes the squared Euclidean distance between vectors using SIMD
/// operations.
///
/// Processes vectors in chunks of 4 elements using SIMD instructions for
/// improved performance. Handles remaining elements sequentially.
///
/// # Arguments
/// * `a` - First vector
/// * `b` - Second vector
///
/// # Panics
/// * If vectors have different lengths (debug builds)
pub fn simd_squared_euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have the same length");

    let a_chunks = a.chunks_exact(4);
    let a_remainder = a_chunks.remainder();

    let b_chunks = b.chunks_exact(4);
    let b_remainder = b_chunks.remainder();

    // Process 4 elements at a time using SIMD
    let mut sum_sq = f64x4::splat(0.0);
    for (a_chunk, b_chunk) in a_chunks.zip(b_chunks) {
        let diff = f64x4::from(a_chunk) - f64x4::from(b_chunk);
        sum_sq += diff * diff;
    }

    let mut total_sum_sq: f64 = sum_sq.as_array_ref().iter().sum();

    // Handle remaining elements sequentially
    for (a, b) in a_remainder.iter().zip(b_remainder) {
        let diff = a - b;
        total_sum_sq += diff * diff;
    }

    total_sum_sq
}

/// Computes the Euclidean distance between vectors using SIMD operations.
///
/// # Arguments
/// * `a` - First vector
/// * `b` - Second vector
pub fn simd_euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    simd_squared_euclidean_distance(a, b).sqrt()
}

/// Computes the Euclidean distance between array views with an optimized path
/// for contiguous data.
///
/// Attempts to use SIMD operations on contiguous memory first, falling back to
/// slower methods for non-contiguous data with appropriate warnings.
///
/// # Arguments
/// * `a` - First vector as array view
/// * `b` - Second vector as array view
///
/// # Returns
/// Euclidean distance between the vectors
pub fn array_euclidean_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    array_squared_euclidean_distance(a, b).sqrt()
}

/// Computes the squared Euclidean distance between array views with an
/// optimized path for contiguous data.
///
/// # Arguments
/// * `a` - First vector as array view
/// * `b` - Second vector as array view
pub fn array_squared_euclidean_distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    let a_slice = a.as_slice();
    let b_slice = b.as_slice();

    match (a_slice, b_slice) {
        (Some(a), Some(b)) => simd_squared_euclidean_distance(a, b),
        (Some(a), None) => {
            warn!("b is non-contiguous, requiring allocation to compute distance");
            simd_squared_euclidean_distance(a, &b.to_vec())
        }
        (None, Some(b)) => {
            warn!("a is non-contiguous, requiring allocation to compute distance");
            simd_squared_euclidean_distance(&a.to_vec(), b)
        }
        (None, None) => {
            warn!("both a and b are non-contiguous, requiring allocation to compute distance");
            simd_squared_euclidean_distance(&a.to_vec(), &b.to_vec())
        }
    }
}

/// Builds the symmetric matrix of squared Euclidean distances between all
/// point pairs.
///
/// Used by the exact (non-tree) code paths, which calibrate kernels and
/// compute gradients over the full N×N matrix.
///
/// # Arguments
/// * `points` - Input matrix where each row is a point
///
/// # Returns
/// An N×N matrix with zeros on the diagonal
pub fn pairwise_squared_distances(points: ArrayView2<f64>) -> Array2<f64> {
    let n = points.nrows();
    let mut distances = Array2::zeros((n, n));

    for i in 0..n {
        for j in (i + 1)..n {
            let distance = array_squared_euclidean_distance(points.row(i), points.row(j));
            distances[[i, j]] = distance;
            distances[[j, i]] = distance;
        }
    }

    distances
}
