//! t-SNE gradient computation.
//!
//! The gradient of the KL objective splits into attractive forces over the
//! stored similarity edges and repulsive forces between all point pairs. The
//! approximate path prices the repulsive part through a fresh Barnes-Hut tree
//! each call; the exact path materializes the full Student-t kernel matrix
//! and serves as the reference for small inputs and for `theta == 0`.
//!
//! The per-point repulsion loop is embarrassingly parallel: the tree is
//! read-only, each point writes its own force row and returns a partial
//! normalization sum. Partial sums are collected in point order and reduced
//! serially afterwards, so a run is reproducible regardless of how rayon
//! schedules the workers.

use crate::affinity::SparseAffinities;
use crate::distance::pairwise_squared_distances;
use crate::sptree::SpTree;
use ndarray::parallel::prelude::*;
use ndarray::{Array2, ArrayView2, Axis, Zip};

/// Additive floor inside KL logarithms so zero affinities never produce
/// infinities; scale chosen to match single-precision underflow.
const LOG_FLOOR: f64 = f32::MIN_POSITIVE as f64;

/// Computes the approximate gradient using the Barnes-Hut tree.
///
/// Builds a space-partitioning tree over the current embedding, accumulates
/// edge forces with a direct sparse pass and non-edge forces with the
/// theta-approximate tree traversal, then combines them as
/// `attraction - repulsion / normalization`.
///
/// # Arguments
/// * `affinities` - Symmetrized, normalized (and possibly exaggerated)
///   similarity matrix
/// * `embedding` - Current embedding coordinates
/// * `theta` - Barnes-Hut accuracy parameter; 0 recurses to every leaf
pub fn approximate_gradient(
    affinities: &SparseAffinities,
    embedding: ArrayView2<f64>,
    theta: f64,
) -> Array2<f64> {
    let (n, dimensions) = embedding.dim();
    let tree = SpTree::new(embedding);

    let mut attraction = Array2::zeros((n, dimensions));
    tree.positive_forces(affinities, &mut attraction);

    let mut repulsion = Array2::zeros((n, dimensions));
    let partial_sums: Vec<f64> = repulsion
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .map(|(point, mut row)| {
            let mut forces = vec![0.0; dimensions];
            let mut partial = 0.0;
            tree.negative_forces(point as u32, theta, &mut forces, &mut partial);
            for (slot, force) in row.iter_mut().zip(&forces) {
                *slot = *force;
            }
            partial
        })
        .collect();
    let normalization: f64 = partial_sums.iter().sum();

    let mut gradient = attraction;
    Zip::from(&mut gradient)
        .and(&repulsion)
        .for_each(|g, &r| *g -= r / normalization);
    gradient
}

/// Computes the exact gradient from the dense affinity matrix.
///
/// Reference O(N²) implementation used when `theta == 0`.
///
/// # Arguments
/// * `affinities` - Symmetrized, normalized dense similarity matrix
/// * `embedding` - Current embedding coordinates
pub fn exact_gradient(affinities: ArrayView2<f64>, embedding: ArrayView2<f64>) -> Array2<f64> {
    let (n, dimensions) = embedding.dim();
    let distances = pairwise_squared_distances(embedding);

    // Student-t kernel and its normalization over all pairs
    let mut kernel = Array2::zeros((n, n));
    let mut normalization = 0.0;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                kernel[[i, j]] = 1.0 / (1.0 + distances[[i, j]]);
                normalization += kernel[[i, j]];
            }
        }
    }

    let mut gradient = Array2::zeros((n, dimensions));
    for i in 0..n {
        for j in 0..n {
            if i != j {
                let mult =
                    (affinities[[i, j]] - kernel[[i, j]] / normalization) * kernel[[i, j]];
                for d in 0..dimensions {
                    gradient[[i, d]] += (embedding[[i, d]] - embedding[[j, d]]) * mult;
                }
            }
        }
    }

    gradient
}

/// Estimates the KL divergence of the current embedding using the tree.
///
/// The normalization term is approximated with the same theta as the
/// gradient; the divergence itself is summed over the stored edges only.
/// Diagnostic output: it is reported, never fed back into the optimization.
///
/// # Arguments
/// * `affinities` - Sparse similarity matrix (possibly exaggerated)
/// * `embedding` - Current embedding coordinates
/// * `theta` - Barnes-Hut accuracy parameter
pub fn approximate_error(
    affinities: &SparseAffinities,
    embedding: ArrayView2<f64>,
    theta: f64,
) -> f64 {
    let (n, dimensions) = embedding.dim();
    let tree = SpTree::new(embedding);

    let mut scratch = vec![0.0; dimensions];
    let mut normalization = 0.0;
    for point in 0..n {
        scratch.fill(0.0);
        tree.negative_forces(point as u32, theta, &mut scratch, &mut normalization);
    }

    let mut error = 0.0;
    for point in 0..n {
        for i in affinities.rows[point]..affinities.rows[point + 1] {
            let other = affinities.columns[i] as usize;

            let mut squared_distance = 0.0;
            for d in 0..dimensions {
                let difference = embedding[[point, d]] - embedding[[other, d]];
                squared_distance += difference * difference;
            }

            let q = (1.0 / (1.0 + squared_distance)) / normalization;
            let p = affinities.values[i];
            error += p * ((p + LOG_FLOOR) / (q + LOG_FLOOR)).ln();
        }
    }

    error
}

/// Computes the exact KL divergence of the current embedding.
///
/// # Arguments
/// * `affinities` - Dense similarity matrix (possibly exaggerated)
/// * `embedding` - Current embedding coordinates
pub fn exact_error(affinities: ArrayView2<f64>, embedding: ArrayView2<f64>) -> f64 {
    let n = embedding.nrows();
    let distances = pairwise_squared_distances(embedding);

    // Kernel entries and normalization floored at the smallest positive
    // double so the logarithms below stay finite
    let mut kernel = Array2::from_elem((n, n), f64::MIN_POSITIVE);
    let mut normalization = f64::MIN_POSITIVE;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                kernel[[i, j]] = 1.0 / (1.0 + distances[[i, j]]);
                normalization += kernel[[i, j]];
            }
        }
    }
    kernel.mapv_inplace(|q| q / normalization);

    let mut error = 0.0;
    for i in 0..n {
        for j in 0..n {
            let p = affinities[[i, j]];
            error += p * ((p + LOG_FLOOR) / (kernel[[i, j]] + LOG_FLOOR)).ln();
        }
    }

    error
}
