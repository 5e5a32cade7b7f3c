//! Space-partitioning tree for Barnes-Hut force approximation.
//!
//! Each optimization iteration builds a fresh tree over the current embedding
//! coordinates (a quadtree for 2-D embeddings, an octree for 3-D, and in
//! general a 2^D-ary tree). Distant groups of points are then summarized by
//! their center of mass during repulsive force evaluation, which drops the
//! per-iteration cost from O(N²) to O(N log N).
//!
//! Nodes live in a flat arena addressed by integer indices rather than owned
//! boxes: construction is a sequence of pushes, drop is trivial, and the
//! finished tree is plain shared data that the parallel force loop can
//! traverse without synchronization. The tree is never mutated after
//! construction; it is rebuilt from scratch next iteration.

use crate::affinity::SparseAffinities;
use ndarray::{Array2, ArrayView2};

/// Points stored directly in a cell before it subdivides.
const NODE_CAPACITY: usize = 1;

/// Margin added to the root cell extents so no point sits exactly on a
/// boundary.
const BOUNDS_EPSILON: f64 = 1e-5;

/// A cell of the tree: an axis-aligned bounding box plus the mass summary of
/// every point inserted below it.
struct Node {
    /// Cell center per dimension
    center: Vec<f64>,

    /// Cell half-extent per dimension
    half_extent: Vec<f64>,

    /// Running center of mass of all points in this subtree
    center_of_mass: Vec<f64>,

    /// Number of points in this subtree, duplicates included
    cumulative_size: u32,

    /// Whether this cell has subdivided yet
    is_leaf: bool,

    /// Points stored directly in this cell (leaves only, up to
    /// `NODE_CAPACITY`)
    points: Vec<u32>,

    /// Arena indices of the 2^D children; empty until subdivision
    children: Vec<usize>,
}

impl Node {
    fn with_bounds(center: Vec<f64>, half_extent: Vec<f64>) -> Self {
        let dimensions = center.len();
        Self {
            center,
            half_extent,
            center_of_mass: vec![0.0; dimensions],
            cumulative_size: 0,
            is_leaf: true,
            points: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// Barnes-Hut tree over a set of embedding coordinates.
///
/// Borrowing the embedding keeps insertion cheap: nodes store point indices
/// and read coordinates straight from the matrix.
pub struct SpTree<'a> {
    data: ArrayView2<'a, f64>,
    dimensions: usize,
    nodes: Vec<Node>,
}

impl<'a> SpTree<'a> {
    /// Builds the tree over all rows of `data`.
    ///
    /// The root cell is centered on the per-dimension mean and sized to the
    /// farthest coordinate from it, inflated by a small epsilon, so every
    /// point is contained.
    ///
    /// # Arguments
    /// * `data` - Embedding coordinates, one row per point
    pub fn new(data: ArrayView2<'a, f64>) -> Self {
        let dimensions = data.ncols();
        let points = data.nrows();

        let mut mean = vec![0.0; dimensions];
        let mut min = vec![f64::MAX; dimensions];
        let mut max = vec![f64::MIN; dimensions];
        for row in data.rows() {
            for d in 0..dimensions {
                let value = row[d];
                mean[d] += value;
                min[d] = min[d].min(value);
                max[d] = max[d].max(value);
            }
        }
        for m in &mut mean {
            *m /= points as f64;
        }

        let half_extent: Vec<f64> = (0..dimensions)
            .map(|d| (max[d] - mean[d]).max(mean[d] - min[d]) + BOUNDS_EPSILON)
            .collect();

        let mut tree = Self {
            data,
            dimensions,
            nodes: vec![Node::with_bounds(mean, half_extent)],
        };
        for point in 0..points {
            tree.insert(0, point as u32);
        }
        tree
    }

    /// Inserts a point into the subtree rooted at `node`.
    ///
    /// Returns false if the point lies outside the cell bounds. A point that
    /// exactly coincides with one already stored is absorbed into the
    /// existing leaf instead of subdividing forever.
    fn insert(&mut self, node: usize, point: u32) -> bool {
        let dimensions = self.dimensions;
        let data = self.data;
        let point_row = data.row(point as usize);

        {
            let cell = &self.nodes[node];
            for d in 0..dimensions {
                if (cell.center[d] - cell.half_extent[d]) > point_row[d]
                    || (cell.center[d] + cell.half_extent[d]) < point_row[d]
                {
                    return false;
                }
            }
        }

        // Online update of cumulative size and center of mass; the running
        // average stays stable for large counts
        let cell = &mut self.nodes[node];
        cell.cumulative_size += 1;
        let size = f64::from(cell.cumulative_size);
        let adjustment = (size - 1.0) / size;
        for d in 0..dimensions {
            cell.center_of_mass[d] *= adjustment;
            cell.center_of_mass[d] += point_row[d] / size;
        }

        if cell.is_leaf && cell.points.len() < NODE_CAPACITY {
            cell.points.push(point);
            return true;
        }

        // Coincident points would subdivide without end; absorb them into
        // the mass summary instead
        let duplicate = self.nodes[node].points.iter().any(|&other| {
            let other_row = data.row(other as usize);
            (0..dimensions).all(|d| point_row[d] == other_row[d])
        });
        if duplicate {
            return true;
        }

        if self.nodes[node].is_leaf {
            self.subdivide(node);
        }

        for slot in 0..self.nodes[node].children.len() {
            let child = self.nodes[node].children[slot];
            if self.insert(child, point) {
                return true;
            }
        }

        // Unreachable for points within bounds: some child must accept
        false
    }

    /// Splits a leaf into 2^D children by bisecting every dimension, then
    /// redistributes the stored points.
    fn subdivide(&mut self, node: usize) {
        let dimensions = self.dimensions;
        let child_count = 1_usize << dimensions;

        let mut children = Vec::with_capacity(child_count);
        for combination in 0..child_count {
            let mut center = vec![0.0; dimensions];
            let mut half_extent = vec![0.0; dimensions];
            for d in 0..dimensions {
                let half = self.nodes[node].half_extent[d] / 2.0;
                half_extent[d] = half;
                center[d] = if (combination >> d) & 1 == 1 {
                    self.nodes[node].center[d] - half
                } else {
                    self.nodes[node].center[d] + half
                };
            }
            children.push(self.nodes.len());
            self.nodes.push(Node::with_bounds(center, half_extent));
        }

        let stored = std::mem::take(&mut self.nodes[node].points);
        self.nodes[node].children = children;
        self.nodes[node].is_leaf = false;

        for point in stored {
            for slot in 0..self.nodes[node].children.len() {
                let child = self.nodes[node].children[slot];
                if self.insert(child, point) {
                    break;
                }
            }
        }
    }

    /// Accumulates the repulsive (non-edge) force on `point` into `forces`
    /// and the normalization contribution into `force_sum`.
    ///
    /// Cells are treated as a single summary body when they are leaves or
    /// subtend a small enough angle from the point
    /// (`max_half_extent / distance < theta`); otherwise their children are
    /// visited. With `theta == 0` no interior cell ever summarizes, which
    /// reproduces the exact O(N²) computation.
    ///
    /// # Arguments
    /// * `point` - Row index of the point the force acts on
    /// * `theta` - Accuracy/speed trade-off parameter
    /// * `forces` - Per-dimension force accumulator, length = embedding
    ///   dimensionality
    /// * `force_sum` - Running normalization sum shared across all cells
    pub fn negative_forces(&self, point: u32, theta: f64, forces: &mut [f64], force_sum: &mut f64) {
        self.negative_forces_from(0, point, theta, forces, force_sum);
    }

    fn negative_forces_from(
        &self,
        node: usize,
        point: u32,
        theta: f64,
        forces: &mut [f64],
        force_sum: &mut f64,
    ) {
        let cell = &self.nodes[node];

        // Spend no time on empty cells or self-interactions
        if cell.cumulative_size == 0
            || (cell.is_leaf && cell.points.len() == 1 && cell.points[0] == point)
        {
            return;
        }

        let data = self.data;
        let point_row = data.row(point as usize);

        let mut displacement = vec![0.0; self.dimensions];
        let mut squared_distance = 0.0;
        let mut max_half_extent = 0.0_f64;
        for d in 0..self.dimensions {
            displacement[d] = point_row[d] - cell.center_of_mass[d];
            squared_distance += displacement[d] * displacement[d];
            max_half_extent = max_half_extent.max(cell.half_extent[d]);
        }

        if cell.is_leaf || max_half_extent / squared_distance.sqrt() < theta {
            // Student-t repulsion against the cell's mass summary
            let inverse = 1.0 / (1.0 + squared_distance);
            let mut force = f64::from(cell.cumulative_size) * inverse;
            *force_sum += force;
            force *= inverse;
            for d in 0..self.dimensions {
                forces[d] += force * displacement[d];
            }
        } else {
            for &child in &cell.children {
                self.negative_forces_from(child, point, theta, forces, force_sum);
            }
        }
    }

    /// Accumulates the attractive (edge) forces for every stored affinity
    /// into `forces`.
    ///
    /// This is a direct pass over the sparse similarity matrix; the tree
    /// plays no part beyond providing the embedding coordinates.
    ///
    /// # Arguments
    /// * `affinities` - Symmetrized sparse similarity matrix
    /// * `forces` - N×D force accumulator matrix
    pub fn positive_forces(&self, affinities: &SparseAffinities, forces: &mut Array2<f64>) {
        let data = self.data;
        let mut displacement = vec![0.0; self.dimensions];

        for n in 0..forces.nrows() {
            for i in affinities.rows[n]..affinities.rows[n + 1] {
                let j = affinities.columns[i] as usize;

                // Pairwise Student-t numerator in the embedding
                let mut squared_distance = 1.0;
                for d in 0..self.dimensions {
                    displacement[d] = data[[n, d]] - data[[j, d]];
                    squared_distance += displacement[d] * displacement[d];
                }

                let force = affinities.values[i] / squared_distance;
                for d in 0..self.dimensions {
                    forces[[n, d]] += force * displacement[d];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn random_embedding(points: usize, dimensions: usize, seed: u64) -> Array2<f64> {
        let mut rng = SmallRng::seed_from_u64(seed);
        Array2::from_shape_simple_fn((points, dimensions), || rng.gen_range(-2.0..2.0))
    }

    /// Reference O(N²) repulsion used to validate the tree at theta = 0.
    fn brute_force_repulsion(data: &Array2<f64>, point: usize) -> (Vec<f64>, f64) {
        let (n, dims) = data.dim();
        let mut forces = vec![0.0; dims];
        let mut sum = 0.0;
        for other in 0..n {
            if other == point {
                continue;
            }
            let mut squared = 0.0;
            let mut displacement = vec![0.0; dims];
            for d in 0..dims {
                displacement[d] = data[[point, d]] - data[[other, d]];
                squared += displacement[d] * displacement[d];
            }
            let inverse = 1.0 / (1.0 + squared);
            sum += inverse;
            for d in 0..dims {
                forces[d] += inverse * inverse * displacement[d];
            }
        }
        (forces, sum)
    }

    #[test]
    fn test_all_points_inserted() {
        let data = random_embedding(200, 2, 4);
        let tree = SpTree::new(data.view());
        assert_eq!(tree.nodes[0].cumulative_size, 200);
    }

    #[test]
    fn test_center_of_mass() {
        let data = array![[1.0, 1.0], [3.0, 5.0], [-1.0, 0.0]];
        let tree = SpTree::new(data.view());

        let root = &tree.nodes[0];
        assert_abs_diff_eq!(root.center_of_mass[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(root.center_of_mass[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_duplicate_points_terminate() {
        // Several exact duplicates must be absorbed, not subdivided forever
        let data = array![
            [0.5, 0.5],
            [0.5, 0.5],
            [0.5, 0.5],
            [-0.5, -0.25],
            [0.25, -0.75],
        ];
        let tree = SpTree::new(data.view());
        assert_eq!(tree.nodes[0].cumulative_size, 5);
    }

    #[test]
    fn test_exact_theta_matches_brute_force() {
        let data = random_embedding(150, 2, 8);
        let tree = SpTree::new(data.view());

        for point in [0, 17, 64, 149] {
            let mut forces = vec![0.0; 2];
            let mut sum = 0.0;
            tree.negative_forces(point as u32, 0.0, &mut forces, &mut sum);

            let (expected_forces, expected_sum) = brute_force_repulsion(&data, point);
            assert_abs_diff_eq!(sum, expected_sum, epsilon = 1e-9);
            for d in 0..2 {
                assert_abs_diff_eq!(forces[d], expected_forces[d], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_small_theta_approximates_brute_force() {
        let data = random_embedding(100, 2, 21);
        let tree = SpTree::new(data.view());

        let mut forces = vec![0.0; 2];
        let mut sum = 0.0;
        tree.negative_forces(42, 0.2, &mut forces, &mut sum);

        let (expected_forces, expected_sum) = brute_force_repulsion(&data, 42);
        assert_abs_diff_eq!(sum, expected_sum, epsilon = expected_sum * 0.05);
        for d in 0..2 {
            assert_abs_diff_eq!(forces[d], expected_forces[d], epsilon = 0.05);
        }
    }

    #[test]
    fn test_three_dimensional_tree() {
        let data = random_embedding(80, 3, 13);
        let tree = SpTree::new(data.view());
        assert_eq!(tree.nodes[0].cumulative_size, 80);

        let mut forces = vec![0.0; 3];
        let mut sum = 0.0;
        tree.negative_forces(7, 0.0, &mut forces, &mut sum);

        let (expected_forces, expected_sum) = brute_force_repulsion(&data, 7);
        assert_abs_diff_eq!(sum, expected_sum, epsilon = 1e-9);
        for d in 0..3 {
            assert_abs_diff_eq!(forces[d], expected_forces[d], epsilon = 1e-9);
        }
    }
}
