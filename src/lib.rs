#![allow(clippy::multiple_crate_versions)]

//! # t-SNE: t-distributed Stochastic Neighbor Embedding
//!
//! This crate provides a Rust implementation of t-SNE with Barnes-Hut
//! approximation, a dimensionality reduction technique that preserves the
//! local neighborhood structure of high-dimensional data.
//!
//! t-SNE converts pairwise distances into neighbor probabilities, then lays
//! the points out in a low-dimensional space so the same neighborhoods get
//! the same probabilities under a heavy-tailed kernel. The result is useful
//! for visualization and exploratory analysis of embeddings, images, and
//! other high-dimensional point clouds.
//!
//! ## Key Features
//!
//! The implementation centers on the approximate optimization engine:
//! - A vantage-point tree delivers exact nearest neighbors for the sparse
//!   similarity graph in O(N log N)
//! - A Barnes-Hut space-partitioning tree approximates the repulsive forces,
//!   replacing the quadratic force sum with a tree walk
//! - Momentum gradient descent with per-coordinate adaptive gains and an
//!   early-exaggeration phase drives the embedding
//!
//! Repulsive forces are evaluated in parallel with rayon; runs are fully
//! reproducible given a seed.
//!
//! ## Examples
//!
//! Basic usage with default parameters:
//! ```rust,no_run
//! use ndarray::Array2;
//! use tsne::{fit_transform, Configuration};
//!
//! let data: Array2<f64> = // ... load your high-dimensional data
//! # Array2::zeros((500, 30));
//! let config = Configuration::default();
//! let (embedding, costs) = fit_transform(data.view(), config).unwrap();
//! ```
//!
//! Customized embedding:
//! ```rust,no_run
//! use tsne::Configuration;
//!
//! let config = Configuration::builder()
//!     .perplexity(30.0)
//!     .theta(0.5)
//!     .iterations(500)
//!     .output_dimensions(3)
//!     .seed(42)
//!     .build();
//! ```
//!
//! ## Configuration
//!
//! - `perplexity`: Effective neighborhood size; values below 2 are clamped
//!   (default: 50). The input must have more than 3×perplexity points.
//! - `theta`: Barnes-Hut accuracy/speed trade-off. Larger cells are
//!   summarized more aggressively as theta grows; 0 switches to the exact
//!   O(N²) reference path (default: 0.2)
//! - `iterations`: Gradient descent steps (default: 1000)
//! - `output_dimensions`: Embedding dimensionality, typically 2 or 3
//!   (default: 2)
//! - `learning_rate`: Gradient descent step scale (default: 200.0)
//! - `seed`: Optional RNG seed for reproducible embeddings
//!
//! ## Implementation Notes
//!
//! - Uses Euclidean distances, SIMD-accelerated where rows are contiguous
//! - Leverages ndarray for matrix operations
//! - Employs parallel iterators via rayon for the repulsive force loop
//! - Provides detailed error handling with custom error types
//!
//! ## References
//!
//! [Visualizing Data using t-SNE](https://jmlr.org/papers/v9/vandermaaten08a.html).
//! van der Maaten, L., & Hinton, G. (2008).
//! Journal of Machine Learning Research, 9(86), 2579-2605.
//!
//! [Accelerating t-SNE using Tree-Based Algorithms](https://jmlr.org/papers/v15/vandermaaten14a.html).
//! van der Maaten, L. (2014).
//! Journal of Machine Learning Research, 15(93), 3221-3245.

// Submodule imports
mod affinity;
pub mod distance;
mod gradient;
mod sampling;
mod sptree;
pub mod vptree;

#[cfg(test)]
mod tests;

use bon::Builder;
use ndarray::{Array2, ArrayView2, Axis, Zip};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use crate::affinity::{gaussian_affinities, gaussian_affinities_exact, symmetrize_dense};
use crate::gradient::{approximate_error, approximate_gradient, exact_error, exact_gradient};
use crate::sampling::random_embedding;

/// Factor applied to all affinities at the start of the optimization; the
/// inflated attraction lets clusters form before repulsion spreads them out.
const EARLY_EXAGGERATION: f64 = 12.0;

/// Iteration at which the early exaggeration is removed.
const STOP_LYING_ITERATION: usize = 250;

/// Iteration at which the momentum switches to its final value.
const MOMENTUM_SWITCH_ITERATION: usize = 250;

/// Momentum during the early phase of the optimization.
const INITIAL_MOMENTUM: f64 = 0.5;

/// Momentum after the switch iteration.
const FINAL_MOMENTUM: f64 = 0.8;

/// Lower bound on the per-coordinate adaptive gains.
const GAIN_FLOOR: f64 = 0.1;

/// Gradient sign flips relative to the velocity bump the gain by this much.
const GAIN_INCREMENT: f64 = 0.2;

/// Gradient sign agreement decays the gain by this factor.
const GAIN_DECAY: f64 = 0.8;

/// The KL divergence is evaluated and reported every this many iterations.
const ERROR_REPORT_INTERVAL: usize = 50;

/// Configuration options for the t-SNE embedding process.
///
/// Controls the similarity calibration, the accuracy of the Barnes-Hut
/// approximation, and the gradient descent schedule.
#[derive(Builder, Clone, Debug)]
pub struct Configuration {
    /// Target effective neighborhood size; clamped to at least 2
    #[builder(default = 50.0)]
    pub perplexity: f64,

    /// Barnes-Hut accuracy parameter; 0 selects the exact O(N²) path
    #[builder(default = 0.2)]
    pub theta: f64,

    /// Number of gradient descent iterations
    #[builder(default = 1000)]
    pub iterations: usize,

    /// Number of dimensions in the output embedding space, typically 2 or 3
    #[builder(default = 2)]
    pub output_dimensions: usize,

    /// Step scale of the gradient descent update
    #[builder(default = 200.0)]
    pub learning_rate: f64,

    /// Optional random seed for reproducibility
    pub seed: Option<u64>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            perplexity: 50.0,
            theta: 0.2,
            iterations: 1000,
            output_dimensions: 2,
            learning_rate: 200.0,
            seed: None,
        }
    }
}

/// A periodic KL divergence measurement taken during the optimization.
///
/// Reported for progress monitoring only; the optimization never reads it
/// back. Samples taken before iteration 250 measure the exaggerated
/// affinities and overstate the true divergence.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CostSample {
    /// Iteration the measurement was taken at
    pub iteration: usize,

    /// KL divergence between input similarities and embedding similarities
    pub kl_divergence: f64,
}

/// Errors that can occur during t-SNE embedding.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TsneError {
    /// Input data has no rows
    #[error("input matrix has no rows")]
    EmptyInput,

    /// Dataset is too small for the requested perplexity
    #[error("perplexity {perplexity} has to be smaller than a third of the number of points ({points})")]
    PerplexityTooLarge {
        /// Requested perplexity after clamping
        perplexity: f64,
        /// Number of points in the input
        points: usize,
    },

    /// Input values are identical, leaving nothing to scale
    #[error("input has zero range after centering, cannot normalize")]
    ZeroRange,
}

/// Reduces dimensionality of the input data using t-SNE.
///
/// # Arguments
/// * `x` - Input data matrix where each row is a sample
/// * `config` - Configuration options controlling the embedding process
///
/// # Returns
/// A tuple containing:
/// * Final embedding coordinates, row order matching the input
/// * KL divergence samples taken every 50 iterations
///
/// # Errors
/// * `TsneError::EmptyInput` - Input has no rows
/// * `TsneError::PerplexityTooLarge` - Input has fewer than 3×perplexity + 1
///   points
/// * `TsneError::ZeroRange` - All input values are identical
pub fn fit_transform(
    x: ArrayView2<f64>,
    config: Configuration,
) -> Result<(Array2<f64>, Vec<CostSample>), TsneError> {
    let start_time = Instant::now();

    let n = x.nrows();
    if n == 0 {
        return Err(TsneError::EmptyInput);
    }

    let mut perplexity = config.perplexity;
    if perplexity < 2.0 {
        warn!(perplexity, "perplexity has to be at least 2.0, clamping");
        perplexity = 2.0;
    }

    // The similarity graph needs 3×perplexity neighbors per point, so fail
    // fast before any computation when the dataset cannot support them
    if ((n - 1) as f64) < 3.0 * perplexity {
        return Err(TsneError::PerplexityTooLarge {
            perplexity,
            points: n,
        });
    }

    debug!(
        points = n,
        input_dimensions = x.ncols(),
        output_dimensions = config.output_dimensions,
        perplexity,
        theta = config.theta,
        "fitting t-SNE embedding"
    );

    let mut rng = match config.seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_entropy(),
    };

    // Center and scale the input so the kernel exponentials cannot overflow
    let mut data = x.to_owned();
    zero_mean(&mut data);
    normalize_magnitude(&mut data)?;

    let result = if config.theta == 0.0 {
        run_exact(data.view(), perplexity, &config, &mut rng)
    } else {
        run_approximation(data.view(), perplexity, &config, &mut rng)
    };

    debug!(elapsed = ?start_time.elapsed(), "embedding complete");
    Ok(result)
}

/// Tree-accelerated optimization: sparse similarities from the vantage-point
/// tree, Barnes-Hut gradient each iteration.
fn run_approximation<R: Rng>(
    data: ArrayView2<f64>,
    perplexity: f64,
    config: &Configuration,
    rng: &mut R,
) -> (Array2<f64>, Vec<CostSample>) {
    let n = data.nrows();

    debug!("computing input similarities");
    let mut affinities = gaussian_affinities(data, perplexity, rng);
    affinities.symmetrize();
    affinities.normalize();
    affinities.scale(EARLY_EXAGGERATION);

    let mut embedding = random_embedding(n, config.output_dimensions, rng);
    let mut velocity = Array2::zeros(embedding.dim());
    let mut gains = Array2::from_elem(embedding.dim(), 1.0);
    let mut momentum = INITIAL_MOMENTUM;
    let mut costs = Vec::new();

    debug!("input similarities computed, learning embedding");
    for iteration in 0..config.iterations {
        let gradient = approximate_gradient(&affinities, embedding.view(), config.theta);

        update_gains(&mut gains, &gradient, &velocity);
        apply_update(
            &mut embedding,
            &mut velocity,
            &gains,
            &gradient,
            momentum,
            config.learning_rate,
        );
        zero_mean(&mut embedding);

        if iteration == STOP_LYING_ITERATION {
            affinities.scale(1.0 / EARLY_EXAGGERATION);
        }
        if iteration == MOMENTUM_SWITCH_ITERATION {
            momentum = FINAL_MOMENTUM;
        }

        if iteration % ERROR_REPORT_INTERVAL == 0 {
            let kl_divergence = approximate_error(&affinities, embedding.view(), config.theta);
            debug!(iteration, kl_divergence, "progress");
            costs.push(CostSample {
                iteration,
                kl_divergence,
            });
        }
    }

    (embedding, costs)
}

/// Exact optimization over the dense affinity matrix; the reference path for
/// small inputs, selected with `theta == 0`.
fn run_exact<R: Rng>(
    data: ArrayView2<f64>,
    perplexity: f64,
    config: &Configuration,
    rng: &mut R,
) -> (Array2<f64>, Vec<CostSample>) {
    let n = data.nrows();

    debug!("computing input similarities");
    let mut affinities = gaussian_affinities_exact(data, perplexity);
    symmetrize_dense(&mut affinities);
    let total = affinities.sum();
    affinities.mapv_inplace(|value| value / total * EARLY_EXAGGERATION);

    let mut embedding = random_embedding(n, config.output_dimensions, rng);
    let mut velocity = Array2::zeros(embedding.dim());
    let mut gains = Array2::from_elem(embedding.dim(), 1.0);
    let mut momentum = INITIAL_MOMENTUM;
    let mut costs = Vec::new();

    debug!("input similarities computed, learning embedding");
    for iteration in 0..config.iterations {
        let gradient = exact_gradient(affinities.view(), embedding.view());

        update_gains(&mut gains, &gradient, &velocity);
        apply_update(
            &mut embedding,
            &mut velocity,
            &gains,
            &gradient,
            momentum,
            config.learning_rate,
        );
        zero_mean(&mut embedding);

        if iteration == STOP_LYING_ITERATION {
            affinities.mapv_inplace(|value| value / EARLY_EXAGGERATION);
        }
        if iteration == MOMENTUM_SWITCH_ITERATION {
            momentum = FINAL_MOMENTUM;
        }

        if iteration % ERROR_REPORT_INTERVAL == 0 {
            let kl_divergence = exact_error(affinities.view(), embedding.view());
            debug!(iteration, kl_divergence, "progress");
            costs.push(CostSample {
                iteration,
                kl_divergence,
            });
        }
    }

    (embedding, costs)
}

/// Shifts every column of `points` to zero mean.
fn zero_mean(points: &mut Array2<f64>) {
    if let Some(mean) = points.mean_axis(Axis(0)) {
        *points -= &mean;
    }
}

/// Scales `points` by its largest absolute value.
fn normalize_magnitude(points: &mut Array2<f64>) -> Result<(), TsneError> {
    let max_magnitude = points.iter().fold(0.0_f64, |acc, &v| acc.max(v.abs()));
    if max_magnitude == 0.0 {
        return Err(TsneError::ZeroRange);
    }
    points.mapv_inplace(|value| value / max_magnitude);
    Ok(())
}

/// Sign of a value with zero as its own bucket, so a coordinate at rest is
/// not treated as moving in either direction.
fn sign(value: f64) -> i8 {
    if value == 0.0 {
        0
    } else if value < 0.0 {
        -1
    } else {
        1
    }
}

/// Adapts the per-coordinate gains: grow where the gradient flips direction
/// against the velocity, shrink where it keeps pushing the same way.
fn update_gains(gains: &mut Array2<f64>, gradient: &Array2<f64>, velocity: &Array2<f64>) {
    Zip::from(gains)
        .and(gradient)
        .and(velocity)
        .par_for_each(|gain, &g, &v| {
            *gain = if sign(g) == sign(v) {
                *gain * GAIN_DECAY
            } else {
                *gain + GAIN_INCREMENT
            };
            *gain = gain.max(GAIN_FLOOR);
        });
}

/// Performs one momentum + gains gradient descent step in place.
fn apply_update(
    embedding: &mut Array2<f64>,
    velocity: &mut Array2<f64>,
    gains: &Array2<f64>,
    gradient: &Array2<f64>,
    momentum: f64,
    learning_rate: f64,
) {
    Zip::from(&mut *velocity)
        .and(gains)
        .and(gradient)
        .par_for_each(|v, &gain, &g| {
            *v = momentum * *v - learning_rate * gain * g;
        });
    *embedding += &*velocity;
}
