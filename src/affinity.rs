//! Input similarity computation for t-SNE.
//!
//! Each input point gets a Gaussian kernel whose bandwidth is calibrated so
//! the entropy of its neighbor distribution matches the configured
//! perplexity. The tree-accelerated path restricts each kernel row to the
//! point's 3×perplexity nearest neighbors found with the vantage-point tree
//! and stores the result sparsely; the exact path calibrates over the full
//! pairwise distance matrix. Both feed the same downstream pipeline:
//! symmetrize, normalize to unit mass, exaggerate.

use crate::distance::{pairwise_squared_distances, simd_euclidean_distance};
use crate::vptree::{MetricPoint, VpTree};
use ndarray::{Array2, ArrayView2};
use rand::Rng;
use tracing::debug;

/// Entropy must match `ln(perplexity)` this closely for a row to be
/// considered calibrated.
const ENTROPY_TOLERANCE: f64 = 1e-5;

/// Upper bound on bandwidth search steps per row.
const MAX_CALIBRATION_STEPS: usize = 200;

/// Sparse row-compressed affinity matrix.
///
/// `rows` holds N+1 offsets into `columns`/`values`; offsets are
/// non-decreasing and `rows[N]` equals the number of stored entries. After
/// [`SparseAffinities::symmetrize`], every stored (i, j) has a matching
/// (j, i) with the same value.
#[derive(Clone, Debug, PartialEq)]
pub struct SparseAffinities {
    /// Row offsets, length N+1
    pub rows: Vec<usize>,

    /// Neighbor column index per stored entry
    pub columns: Vec<u32>,

    /// Affinity weight per stored entry
    pub values: Vec<f64>,
}

impl SparseAffinities {
    /// Number of points the matrix covers.
    pub fn point_count(&self) -> usize {
        self.rows.len().saturating_sub(1)
    }

    /// Sum of all stored values.
    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Scales all stored values so they sum to one.
    pub fn normalize(&mut self) {
        let total = self.sum();
        for value in &mut self.values {
            *value /= total;
        }
    }

    /// Multiplies all stored values by `factor`.
    ///
    /// Used for the early-exaggeration phase: inflate attractive forces at
    /// the start of the optimization, deflate them once clusters have
    /// formed.
    pub fn scale(&mut self, factor: f64) {
        for value in &mut self.values {
            *value *= factor;
        }
    }

    /// Rebuilds the matrix as its symmetric average.
    ///
    /// Per-row calibration gives affinity(i, j) ≠ affinity(j, i) in general.
    /// Entries stored in both directions are merged by summation; entries
    /// stored in one direction are mirrored. Halving every value afterwards
    /// preserves the total mass exactly, and re-running the operation on an
    /// already symmetric matrix is a no-op.
    pub fn symmetrize(&mut self) {
        let n = self.point_count();

        // First pass: row sizes of the symmetric result
        let mut row_counts = vec![0_usize; n];
        for point in 0..n {
            for i in self.rows[point]..self.rows[point + 1] {
                let other = self.columns[i] as usize;
                let mirror = &self.columns[self.rows[other]..self.rows[other + 1]];
                if !mirror.contains(&(point as u32)) {
                    row_counts[other] += 1;
                }
                row_counts[point] += 1;
            }
        }

        let total: usize = row_counts.iter().sum();
        let mut sym_rows = vec![0_usize; n + 1];
        for point in 0..n {
            sym_rows[point + 1] = sym_rows[point] + row_counts[point];
        }

        // Second pass: merge or mirror every stored entry
        let mut sym_columns = vec![0_u32; total];
        let mut sym_values = vec![0.0; total];
        let mut offsets = vec![0_usize; n];
        for point in 0..n {
            for i in self.rows[point]..self.rows[point + 1] {
                let other = self.columns[i] as usize;

                let mut present = false;
                for m in self.rows[other]..self.rows[other + 1] {
                    if self.columns[m] as usize == point {
                        present = true;
                        // Write merged pairs once, from the lower-indexed side
                        if point <= other {
                            let forward = sym_rows[point] + offsets[point];
                            let backward = sym_rows[other] + offsets[other];
                            sym_columns[forward] = other as u32;
                            sym_columns[backward] = point as u32;
                            sym_values[forward] = self.values[i] + self.values[m];
                            sym_values[backward] = self.values[i] + self.values[m];
                        }
                    }
                }

                if !present {
                    let forward = sym_rows[point] + offsets[point];
                    let backward = sym_rows[other] + offsets[other];
                    sym_columns[forward] = other as u32;
                    sym_columns[backward] = point as u32;
                    sym_values[forward] = self.values[i];
                    sym_values[backward] = self.values[i];
                }

                if !present || point <= other {
                    offsets[point] += 1;
                    if other != point {
                        offsets[other] += 1;
                    }
                }
            }
        }

        for value in &mut sym_values {
            *value /= 2.0;
        }

        self.rows = sym_rows;
        self.columns = sym_columns;
        self.values = sym_values;
    }
}

/// Calibrates one kernel row so its entropy matches `ln(perplexity)`.
///
/// Binary search over the bandwidth beta: double or halve until the target is
/// bracketed, then bisect, for at most [`MAX_CALIBRATION_STEPS`] steps. The
/// kernel sum is seeded with the smallest positive double so a row of
/// underflowed weights never produces `ln(0)`.
///
/// Fills `weights` with the unnormalized kernel values for the final beta and
/// returns their sum; callers divide by it to row-normalize.
fn calibrate_row(
    squared_distances: &[f64],
    perplexity: f64,
    self_position: Option<usize>,
    weights: &mut [f64],
) -> f64 {
    let target_entropy = perplexity.ln();
    let mut beta = 1.0;
    let mut min_beta = f64::MIN;
    let mut max_beta = f64::MAX;
    let mut sum = f64::MIN_POSITIVE;

    for _ in 0..MAX_CALIBRATION_STEPS {
        // Gaussian kernel row for the current bandwidth
        for (weight, &squared) in weights.iter_mut().zip(squared_distances) {
            *weight = (-beta * squared).exp();
        }
        if let Some(position) = self_position {
            weights[position] = f64::MIN_POSITIVE;
        }

        sum = f64::MIN_POSITIVE;
        for &weight in weights.iter() {
            sum += weight;
        }

        let mut entropy = 0.0;
        for (&weight, &squared) in weights.iter().zip(squared_distances) {
            entropy += beta * squared * weight;
        }
        entropy = entropy / sum + sum.ln();

        let difference = entropy - target_entropy;
        if difference.abs() < ENTROPY_TOLERANCE {
            break;
        }

        if difference > 0.0 {
            min_beta = beta;
            beta = if max_beta == f64::MAX || max_beta == f64::MIN {
                beta * 2.0
            } else {
                (beta + max_beta) / 2.0
            };
        } else {
            max_beta = beta;
            beta = if min_beta == f64::MIN || min_beta == f64::MAX {
                beta / 2.0
            } else {
                (beta + min_beta) / 2.0
            };
        }
    }

    sum
}

/// Builds the sparse affinity matrix from each point's nearest neighbors.
///
/// Indexes the input with a vantage-point tree, takes the 3×perplexity
/// nearest neighbors of every point (the point itself is found first and
/// skipped), calibrates the kernel row over those neighbors, and stores the
/// row-normalized weights sparsely. Rows are asymmetric until
/// [`SparseAffinities::symmetrize`] runs.
///
/// # Arguments
/// * `data` - Input points, one row per point; must satisfy
///   `rows - 1 >= 3 * perplexity`
/// * `perplexity` - Target neighborhood entropy, `exp`-scaled
/// * `rng` - Random number generator for tree pivot selection
pub fn gaussian_affinities<R: Rng>(
    data: ArrayView2<f64>,
    perplexity: f64,
    rng: &mut R,
) -> SparseAffinities {
    let n = data.nrows();
    let neighbors = (3.0 * perplexity) as usize;

    let mut rows = Vec::with_capacity(n + 1);
    rows.push(0_usize);
    for point in 0..n {
        rows.push(rows[point] + neighbors);
    }
    let mut columns = vec![0_u32; n * neighbors];
    let mut values = vec![0.0; n * neighbors];

    debug!(points = n, neighbors, "indexing input points");
    let points: Vec<MetricPoint> = data
        .rows()
        .into_iter()
        .enumerate()
        .map(|(index, row)| MetricPoint {
            index: index as u32,
            coordinates: row.to_vec(),
        })
        .collect();
    let tree = VpTree::new(points, simd_euclidean_distance, rng);

    let mut squared = vec![0.0; neighbors];
    let mut weights = vec![0.0; neighbors];
    for point in 0..n {
        let target = data.row(point).to_vec();
        let found = tree.search(&target, neighbors + 1);

        // found[0] is the query point itself at distance zero
        for (m, neighbor) in found.iter().skip(1).enumerate() {
            squared[m] = neighbor.distance * neighbor.distance;
            columns[rows[point] + m] = neighbor.index;
        }

        let sum = calibrate_row(&squared, perplexity, None, &mut weights);
        for m in 0..neighbors {
            values[rows[point] + m] = weights[m] / sum;
        }
    }

    SparseAffinities {
        rows,
        columns,
        values,
    }
}

/// Builds the dense affinity matrix for exact mode.
///
/// Same calibration as [`gaussian_affinities`], but over the full pairwise
/// squared-distance matrix with no neighbor truncation. The diagonal is
/// floored at the smallest positive double rather than zeroed, so
/// diagnostics taking logarithms stay finite.
///
/// # Arguments
/// * `data` - Input points, one row per point
/// * `perplexity` - Target neighborhood entropy, `exp`-scaled
pub fn gaussian_affinities_exact(data: ArrayView2<f64>, perplexity: f64) -> Array2<f64> {
    let n = data.nrows();
    let distances = pairwise_squared_distances(data);
    let mut affinities = Array2::zeros((n, n));

    let mut squared = vec![0.0; n];
    let mut weights = vec![0.0; n];
    for point in 0..n {
        for (m, value) in squared.iter_mut().enumerate() {
            *value = distances[[point, m]];
        }

        let sum = calibrate_row(&squared, perplexity, Some(point), &mut weights);
        for m in 0..n {
            affinities[[point, m]] = weights[m] / sum;
        }
    }

    affinities
}

/// Symmetrizes a dense affinity matrix in place.
///
/// Mirrored entries are summed, not averaged; callers normalize by the total
/// mass afterwards, which makes the two conventions equivalent.
pub fn symmetrize_dense(affinities: &mut Array2<f64>) {
    let n = affinities.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let merged = affinities[[i, j]] + affinities[[j, i]];
            affinities[[i, j]] = merged;
            affinities[[j, i]] = merged;
        }
    }
}
