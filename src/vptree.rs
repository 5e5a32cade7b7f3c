//! Vantage-point tree for exact k-nearest-neighbor queries in a metric space.
//!
//! The tree recursively partitions points around randomly chosen vantage
//! points: everything within the median distance of the vantage point goes to
//! the inner subtree, everything beyond it to the outer subtree. Queries walk
//! the tree with a bounded max-heap of candidates and prune subtrees with the
//! triangle inequality, which makes k-NN search logarithmic in practice while
//! staying exact.
//!
//! The distance function is pluggable; the similarity graph builder uses the
//! SIMD Euclidean kernel from [`crate::distance`].

use rand::Rng;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A fixed-dimensional point paired with its row index in the original
/// dataset.
///
/// Immutable after creation; the tree takes ownership and reorders points
/// internally during construction.
#[derive(Clone, Debug)]
pub struct MetricPoint {
    /// Row index of this point in the source matrix
    pub index: u32,

    /// Coordinate vector of the point
    pub coordinates: Vec<f64>,
}

/// A single k-NN search result.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Neighbor {
    /// Row index of the neighbor in the source matrix
    pub index: u32,

    /// Distance from the query target to this neighbor
    pub distance: f64,
}

/// Candidate entry in the search heap, ordered by distance so the worst
/// candidate sits on top of the max-heap.
struct HeapItem {
    /// Position in the tree's reordered item buffer
    item: usize,

    /// Distance from the query target
    distance: f64,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for HeapItem {}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance.total_cmp(&other.distance)
    }
}

/// Node of the vantage-point tree.
///
/// The node's point is the vantage point of its subtree: the inner child
/// holds points within `threshold` of it, the outer child points beyond.
struct Node {
    /// Position of the vantage point in the tree's item buffer
    item: usize,

    /// Median distance separating the inner and outer subtrees
    threshold: f64,

    /// Points within `threshold` of the vantage point
    inner: Option<Box<Node>>,

    /// Points beyond `threshold` of the vantage point
    outer: Option<Box<Node>>,
}

/// Metric-space index over a set of points supporting exact k-nearest-neighbor
/// queries.
///
/// Built once, immutable afterwards; queries take `&self` and may run
/// concurrently.
pub struct VpTree<D> {
    items: Vec<MetricPoint>,
    distance: D,
    root: Option<Box<Node>>,
}

impl<D> VpTree<D>
where
    D: Fn(&[f64], &[f64]) -> f64,
{
    /// Builds the tree over the given points in O(N log N) expected time.
    ///
    /// Pivots are drawn from the provided RNG, so a seeded generator yields a
    /// reproducible tree. An empty point set yields an empty tree.
    ///
    /// # Arguments
    /// * `items` - Points to index; the tree takes ownership
    /// * `distance` - Distance function; both arguments must have identical
    ///   dimensionality
    /// * `rng` - Random number generator for pivot selection
    pub fn new<R: Rng>(items: Vec<MetricPoint>, distance: D, rng: &mut R) -> Self {
        let count = items.len();
        let mut tree = Self {
            items,
            distance,
            root: None,
        };
        tree.root = tree.build(0, count, rng);
        tree
    }

    /// Returns the `k` nearest indexed points to `target`, nearest first.
    ///
    /// When the tree holds fewer than `k` points, all of them are returned.
    ///
    /// # Arguments
    /// * `target` - Query coordinates, same dimensionality as the indexed
    ///   points
    /// * `k` - Number of neighbors to return
    pub fn search(&self, target: &[f64], k: usize) -> Vec<Neighbor> {
        let mut heap = BinaryHeap::new();
        let mut tau = f64::MAX;

        if let Some(root) = &self.root {
            self.search_node(root, target, k, &mut heap, &mut tau);
        }

        // The max-heap pops worst-first; the sorted drain restores
        // nearest-first order.
        heap.into_sorted_vec()
            .into_iter()
            .map(|candidate| Neighbor {
                index: self.items[candidate.item].index,
                distance: candidate.distance,
            })
            .collect()
    }

    fn build<R: Rng>(&mut self, lower: usize, upper: usize, rng: &mut R) -> Option<Box<Node>> {
        if upper == lower {
            return None;
        }

        // The element at `lower` becomes the vantage point of this subtree.
        let mut node = Box::new(Node {
            item: lower,
            threshold: 0.0,
            inner: None,
            outer: None,
        });

        if upper - lower > 1 {
            // Choose an arbitrary vantage point and move it to the front
            let pivot = rng.gen_range(lower..upper);
            self.items.swap(lower, pivot);

            // Partition (not sort) the rest of the range at the median
            // distance from the vantage point
            let median = (lower + upper) / 2;
            let (head, tail) = self.items[lower..upper].split_at_mut(1);
            let vantage = &head[0];
            let distance = &self.distance;
            tail.select_nth_unstable_by(median - lower - 1, |a, b| {
                distance(&vantage.coordinates, &a.coordinates)
                    .total_cmp(&distance(&vantage.coordinates, &b.coordinates))
            });

            node.threshold = (self.distance)(
                &self.items[lower].coordinates,
                &self.items[median].coordinates,
            );

            node.inner = self.build(lower + 1, median, rng);
            node.outer = self.build(median, upper, rng);
        }

        Some(node)
    }

    fn search_node(
        &self,
        node: &Node,
        target: &[f64],
        k: usize,
        heap: &mut BinaryHeap<HeapItem>,
        tau: &mut f64,
    ) {
        let distance = (self.distance)(&self.items[node.item].coordinates, target);

        // Admit the node's own point if it beats the worst candidate so far
        if distance < *tau {
            if heap.len() == k {
                heap.pop();
            }
            heap.push(HeapItem {
                item: node.item,
                distance,
            });
            if heap.len() == k {
                if let Some(worst) = heap.peek() {
                    *tau = worst.distance;
                }
            }
        }

        if distance < node.threshold {
            // Target inside the vantage ball: the inner child is more
            // promising, but points just outside the ball can still fall
            // within tau of the target.
            if distance - *tau <= node.threshold {
                if let Some(inner) = &node.inner {
                    self.search_node(inner, target, k, heap, tau);
                }
            }
            if distance + *tau >= node.threshold {
                if let Some(outer) = &node.outer {
                    self.search_node(outer, target, k, heap, tau);
                }
            }
        } else {
            // Target outside the ball: mirror image of the above
            if distance + *tau >= node.threshold {
                if let Some(outer) = &node.outer {
                    self.search_node(outer, target, k, heap, tau);
                }
            }
            if distance - *tau <= node.threshold {
                if let Some(inner) = &node.inner {
                    self.search_node(inner, target, k, heap, tau);
                }
            }
        }
    }
}
