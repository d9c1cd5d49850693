//! Random Projection Forest Implementation
//!
//! # Algorithm Overview
//!
//! **Build**: every tree recursively splits the item set with a hyperplane
//! placed between two centroids found by a short run of 2-means on random
//! samples. Recursion stops once a node holds at most `leaf_size` items.
//! Trees differ only in the random choices made while splitting.
//!
//! **Search**: one priority queue is shared across all trees. A node's
//! priority is the smallest margin seen on the path from its root, so the
//! most promising branches of every tree are expanded first. Expansion stops
//! once `search_k` candidate items have been collected; the candidates are
//! then deduplicated and ranked by exact distance.
//!
//! More trees raise recall at the cost of memory and build time; a larger
//! `search_k` raises recall at the cost of query latency.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use super::node::{plane_margin, Node};
use crate::metric::Metric;
use crate::simd::{dot_product, l2_normalize, l2_normalized};

/// Default maximum number of items in a leaf
pub const DEFAULT_LEAF_SIZE: usize = 64;

/// 2-means refinement steps per split
const TWO_MEANS_ITERATIONS: usize = 200;

/// Plane attempts before falling back to a random balanced split
const SPLIT_ATTEMPTS: usize = 3;

#[derive(Error, Debug)]
pub enum ForestError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Forest is already built; items cannot be added")]
    AlreadyBuilt,

    #[error("Forest has not been built")]
    NotBuilt,

    #[error("Item {item} out of bounds for {count} items")]
    ItemOutOfBounds { item: usize, count: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Pending node in the search frontier (max-heap by priority)
#[derive(Clone, Copy)]
struct Pending {
    priority: f32,
    node: u32,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for Pending {}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .partial_cmp(&other.priority)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Random projection forest over items addressed by dense indices `0..len`
///
/// The forest owns a copy of every item vector, so a persisted forest is
/// self-contained.
pub struct Forest {
    dim: usize,
    metric: Metric,
    leaf_size: usize,
    /// Item vectors, row-major (`len * dim`)
    items: Vec<f32>,
    nodes: Vec<Node>,
    roots: Vec<u32>,
    built: bool,
    rng: StdRng,
}

impl Forest {
    /// Create an empty forest for `dim`-dimensional vectors
    pub fn new(dim: usize, metric: Metric) -> Self {
        Self::new_with_seed(dim, metric, rand::random())
    }

    /// Create an empty forest with a deterministic RNG seed.
    pub fn new_with_seed(dim: usize, metric: Metric, seed: u64) -> Self {
        Self {
            dim,
            metric,
            leaf_size: DEFAULT_LEAF_SIZE,
            items: Vec::new(),
            nodes: Vec::new(),
            roots: Vec::new(),
            built: false,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_leaf_size(mut self, leaf_size: usize) -> Self {
        self.leaf_size = leaf_size.max(1);
        self
    }

    /// Reassemble a built forest (used by deserialization)
    pub(crate) fn from_parts(
        dim: usize,
        metric: Metric,
        leaf_size: usize,
        items: Vec<f32>,
        nodes: Vec<Node>,
        roots: Vec<u32>,
    ) -> Self {
        Self {
            dim,
            metric,
            leaf_size,
            items,
            nodes,
            roots,
            built: true,
            rng: StdRng::seed_from_u64(rand::random()),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    pub fn n_trees(&self) -> usize {
        self.roots.len()
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Number of items
    pub fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.items.len() / self.dim
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn raw_items(&self) -> &[f32] {
        &self.items
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn roots(&self) -> &[u32] {
        &self.roots
    }

    /// Stored vector for an item
    pub fn item_vector(&self, item: usize) -> Option<&[f32]> {
        if item >= self.len() {
            return None;
        }
        Some(&self.items[item * self.dim..(item + 1) * self.dim])
    }

    /// Add (or replace) the vector for `item`
    ///
    /// Indices past the current end leave zero vectors in the gap, so callers
    /// should insert items densely from 0.
    pub fn add_item(&mut self, item: usize, vector: &[f32]) -> Result<(), ForestError> {
        if self.built {
            return Err(ForestError::AlreadyBuilt);
        }
        if self.dim == 0 {
            return Err(ForestError::InvalidParameter("dimension must be > 0".into()));
        }
        if vector.len() != self.dim {
            return Err(ForestError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if item > u32::MAX as usize {
            return Err(ForestError::ItemOutOfBounds {
                item,
                count: u32::MAX as usize,
            });
        }

        let start = item * self.dim;
        if start >= self.items.len() {
            self.items.resize(start, 0.0);
            self.items.extend_from_slice(vector);
        } else {
            self.items[start..start + self.dim].copy_from_slice(vector);
        }
        Ok(())
    }

    /// Build `n_trees` trees over all added items. An empty forest builds to
    /// a valid index with no trees.
    pub fn build(&mut self, n_trees: usize) -> Result<(), ForestError> {
        if self.built {
            return Err(ForestError::AlreadyBuilt);
        }
        if n_trees == 0 {
            return Err(ForestError::InvalidParameter("n_trees must be > 0".into()));
        }

        let count = self.len();
        if count > 0 {
            let mut builder = TreeBuilder {
                items: &self.items,
                dim: self.dim,
                metric: self.metric,
                leaf_size: self.leaf_size,
                rng: &mut self.rng,
                nodes: &mut self.nodes,
            };
            for _ in 0..n_trees {
                let all: Vec<u32> = (0..count as u32).collect();
                let root = builder.build_subtree(all);
                self.roots.push(root);
            }
        }

        self.built = true;
        tracing::debug!(
            "Built {} trees over {} items ({} nodes)",
            self.roots.len(),
            count,
            self.nodes.len()
        );
        Ok(())
    }

    /// Approximate `n` nearest neighbors of `query`
    ///
    /// # Parameters
    /// - `query`: Query vector
    /// - `n`: Number of neighbors to return
    /// - `search_k`: Candidate budget; `None` means `n * n_trees`
    ///
    /// # Returns
    /// `(item, distance)` pairs sorted by distance ascending
    pub fn nns_by_vector(
        &self,
        query: &[f32],
        n: usize,
        search_k: Option<usize>,
    ) -> Result<Vec<(usize, f32)>, ForestError> {
        if !self.built {
            return Err(ForestError::NotBuilt);
        }
        if query.len() != self.dim {
            return Err(ForestError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        if n == 0 || self.roots.is_empty() {
            return Ok(Vec::new());
        }

        // Nothing past len() can be returned, and no search yields more than
        // one candidate per item per tree.
        let n = n.min(self.len());
        let search_k = search_k
            .unwrap_or_else(|| n.saturating_mul(self.roots.len()))
            .max(n);
        let ceiling = self.len().saturating_mul(self.roots.len());

        let mut frontier: BinaryHeap<Pending> = self
            .roots
            .iter()
            .map(|&node| Pending {
                priority: f32::INFINITY,
                node,
            })
            .collect();

        let mut candidates: Vec<u32> = Vec::with_capacity(search_k.min(ceiling));
        while candidates.len() < search_k {
            let Some(top) = frontier.pop() else { break };
            match &self.nodes[top.node as usize] {
                Node::Leaf { items } => candidates.extend_from_slice(items),
                Node::Split {
                    normal,
                    offset,
                    left,
                    right,
                } => {
                    let margin = plane_margin(normal, *offset, query);
                    frontier.push(Pending {
                        priority: top.priority.min(margin),
                        node: *right,
                    });
                    frontier.push(Pending {
                        priority: top.priority.min(-margin),
                        node: *left,
                    });
                }
            }
        }

        // The same item shows up once per tree that reached it.
        candidates.sort_unstable();
        candidates.dedup();

        let mut scored: Vec<(usize, f32)> = candidates
            .into_iter()
            .map(|id| {
                let id = id as usize;
                let v = &self.items[id * self.dim..(id + 1) * self.dim];
                (id, self.metric.raw_distance(query, v))
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        scored.truncate(n);

        Ok(scored
            .into_iter()
            .map(|(id, raw)| (id, self.metric.reported_distance(raw)))
            .collect())
    }

    /// Approximate `n` nearest neighbors of a stored item (the item itself
    /// included)
    pub fn nns_by_item(
        &self,
        item: usize,
        n: usize,
        search_k: Option<usize>,
    ) -> Result<Vec<(usize, f32)>, ForestError> {
        let query = self
            .item_vector(item)
            .ok_or(ForestError::ItemOutOfBounds {
                item,
                count: self.len(),
            })?
            .to_vec();
        self.nns_by_vector(&query, n, search_k)
    }

    /// Get statistics about the forest
    pub fn stats(&self) -> ForestStats {
        let leaves = self.nodes.iter().filter(|n| n.is_leaf()).count();
        ForestStats {
            items: self.len(),
            dim: self.dim,
            metric: self.metric,
            trees: self.roots.len(),
            nodes: self.nodes.len(),
            leaves,
            leaf_size: self.leaf_size,
        }
    }
}

/// Statistics about a forest
#[derive(Debug, Clone)]
pub struct ForestStats {
    pub items: usize,
    pub dim: usize,
    pub metric: Metric,
    pub trees: usize,
    pub nodes: usize,
    pub leaves: usize,
    pub leaf_size: usize,
}

/// Borrowed build state so the item buffer can be read while the node arena
/// and RNG are mutated.
struct TreeBuilder<'a> {
    items: &'a [f32],
    dim: usize,
    metric: Metric,
    leaf_size: usize,
    rng: &'a mut StdRng,
    nodes: &'a mut Vec<Node>,
}

impl TreeBuilder<'_> {
    #[inline]
    fn vector(&self, item: u32) -> &[f32] {
        let start = item as usize * self.dim;
        &self.items[start..start + self.dim]
    }

    fn push(&mut self, node: Node) -> u32 {
        self.nodes.push(node);
        (self.nodes.len() - 1) as u32
    }

    fn build_subtree(&mut self, mut indices: Vec<u32>) -> u32 {
        if indices.len() <= self.leaf_size {
            return self.push(Node::Leaf { items: indices });
        }

        let mut plane = None;
        for _ in 0..SPLIT_ATTEMPTS {
            let (normal, offset) = self.two_means_plane(&indices);
            let (left, right) = self.partition(&indices, &normal, offset);
            if !left.is_empty() && !right.is_empty() {
                plane = Some((normal, offset, left, right));
                break;
            }
        }

        // Every attempt put everything on one side: split at random. A zero
        // normal gives both children equal priority at query time.
        let (normal, offset, left, right) = plane.unwrap_or_else(|| {
            indices.shuffle(self.rng);
            let right = indices.split_off(indices.len() / 2);
            (vec![0.0; self.dim], 0.0, indices, right)
        });

        let left = self.build_subtree(left);
        let right = self.build_subtree(right);
        self.push(Node::Split {
            normal,
            offset,
            left,
            right,
        })
    }

    fn partition(&mut self, indices: &[u32], normal: &[f32], offset: f32) -> (Vec<u32>, Vec<u32>) {
        let mut left = Vec::with_capacity(indices.len() / 2);
        let mut right = Vec::with_capacity(indices.len() / 2);
        for &item in indices {
            let margin = plane_margin(normal, offset, self.vector(item));
            let go_right = if margin == 0.0 {
                self.rng.gen_bool(0.5)
            } else {
                margin > 0.0
            };
            if go_right {
                right.push(item);
            } else {
                left.push(item);
            }
        }
        (left, right)
    }

    /// Hyperplane between two centroids refined by sampled 2-means.
    fn two_means_plane(&mut self, indices: &[u32]) -> (Vec<f32>, f32) {
        let n = indices.len();
        let i = self.rng.gen_range(0..n);
        let mut j = self.rng.gen_range(0..n - 1);
        if j >= i {
            j += 1;
        }

        let centered = self.metric.centered_splits();
        let prepare = |v: &[f32]| if centered { l2_normalized(v) } else { v.to_vec() };

        let mut p = prepare(self.vector(indices[i]));
        let mut q = prepare(self.vector(indices[j]));
        let (mut ic, mut jc) = (1.0f32, 1.0f32);

        for _ in 0..TWO_MEANS_ITERATIONS {
            let k = indices[self.rng.gen_range(0..n)];
            let x = prepare(self.vector(k));
            let di = ic * self.metric.raw_distance(&p, &x);
            let dj = jc * self.metric.raw_distance(&q, &x);
            if di < dj {
                for (pz, xz) in p.iter_mut().zip(&x) {
                    *pz = (*pz * ic + xz) / (ic + 1.0);
                }
                ic += 1.0;
            } else if dj < di {
                for (qz, xz) in q.iter_mut().zip(&x) {
                    *qz = (*qz * jc + xz) / (jc + 1.0);
                }
                jc += 1.0;
            }
        }

        let mut normal: Vec<f32> = p.iter().zip(&q).map(|(a, b)| a - b).collect();
        l2_normalize(&mut normal);

        let offset = if centered {
            0.0
        } else {
            let midpoint: Vec<f32> = p.iter().zip(&q).map(|(a, b)| (a + b) * 0.5).collect();
            -dot_product(&normal, &midpoint)
        };
        (normal, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn random_vector(dim: usize, rng: &mut StdRng) -> Vec<f32> {
        (0..dim).map(|_| rng.gen::<f32>() - 0.5).collect()
    }

    fn build_forest(
        metric: Metric,
        count: usize,
        dim: usize,
        trees: usize,
        leaf_size: usize,
    ) -> (Forest, Vec<Vec<f32>>) {
        let mut rng = StdRng::seed_from_u64(7);
        let vectors: Vec<_> = (0..count).map(|_| random_vector(dim, &mut rng)).collect();
        let mut forest = Forest::new_with_seed(dim, metric, 42).with_leaf_size(leaf_size);
        for (i, v) in vectors.iter().enumerate() {
            forest.add_item(i, v).unwrap();
        }
        forest.build(trees).unwrap();
        (forest, vectors)
    }

    #[test]
    fn test_add_and_build() {
        let (forest, _) = build_forest(Metric::Angular, 100, 16, 5, 8);
        assert_eq!(forest.len(), 100);
        assert_eq!(forest.n_trees(), 5);
        assert!(forest.is_built());
        assert!(forest.stats().leaves >= 5);
    }

    #[test]
    fn test_every_item_reachable_in_every_tree() {
        let (forest, _) = build_forest(Metric::Euclidean, 300, 8, 4, 10);

        for &root in forest.roots() {
            let mut seen = HashSet::new();
            let mut stack = vec![root];
            while let Some(id) = stack.pop() {
                match &forest.nodes()[id as usize] {
                    Node::Leaf { items } => {
                        assert!(items.len() <= 10);
                        seen.extend(items.iter().copied());
                    }
                    Node::Split { left, right, .. } => {
                        assert!(*left < id && *right < id);
                        stack.push(*left);
                        stack.push(*right);
                    }
                }
            }
            assert_eq!(seen.len(), 300);
        }
    }

    #[test]
    fn test_search_self_is_top_result() {
        for metric in Metric::ALL {
            let (forest, vectors) = build_forest(metric, 200, 32, 10, 16);
            for i in [0, 57, 199] {
                let results = forest.nns_by_vector(&vectors[i], 5, None).unwrap();
                assert_eq!(results[0].0, i, "{} should find item {} first", metric, i);
                assert!(results[0].1 < 1e-2);
            }
        }
    }

    #[test]
    fn test_results_sorted_by_distance() {
        let (forest, _) = build_forest(Metric::Manhattan, 500, 16, 10, 20);
        let mut rng = StdRng::seed_from_u64(99);
        let query = random_vector(16, &mut rng);

        let results = forest.nns_by_vector(&query, 25, Some(2_000)).unwrap();
        assert_eq!(results.len(), 25);
        for pair in results.windows(2) {
            assert!(pair[0].1 <= pair[1].1);
        }
    }

    #[test]
    fn test_recall_against_brute_force() {
        let (forest, vectors) = build_forest(Metric::Euclidean, 1000, 32, 20, 32);
        let mut rng = StdRng::seed_from_u64(1234);
        let k = 10;
        let num_queries = 10;
        let mut total_recall = 0.0;

        for _ in 0..num_queries {
            let query = random_vector(32, &mut rng);

            let mut ground_truth: Vec<(usize, f32)> = vectors
                .iter()
                .enumerate()
                .map(|(id, v)| (id, Metric::Euclidean.raw_distance(&query, v)))
                .collect();
            ground_truth.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
            let truth: HashSet<_> = ground_truth.iter().take(k).map(|(id, _)| *id).collect();

            let found: HashSet<_> = forest
                .nns_by_vector(&query, k, Some(5_000))
                .unwrap()
                .into_iter()
                .map(|(id, _)| id)
                .collect();
            total_recall += truth.intersection(&found).count() as f64 / k as f64;
        }

        let avg_recall = total_recall / num_queries as f64;
        assert!(avg_recall > 0.8, "Recall should be > 80%, got {:.2}%", avg_recall * 100.0);
    }

    #[test]
    fn test_exhaustive_search_is_exact() {
        let (forest, vectors) = build_forest(Metric::Angular, 150, 8, 3, 4);
        let query = vectors[10].iter().map(|x| x + 0.01).collect::<Vec<_>>();

        // A budget of every item per tree visits every leaf.
        let results = forest.nns_by_vector(&query, 150, Some(150 * 3)).unwrap();
        assert_eq!(results.len(), 150);
    }

    #[test]
    fn test_empty_forest_builds_and_returns_nothing() {
        let mut forest = Forest::new_with_seed(4, Metric::Angular, 1);
        forest.build(10).unwrap();

        assert!(forest.is_empty());
        assert_eq!(forest.n_trees(), 0);
        let results = forest.nns_by_vector(&[1.0, 0.0, 0.0, 0.0], 5, None).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_k_greater_than_count() {
        let (forest, _) = build_forest(Metric::Euclidean, 10, 8, 3, 4);
        let results = forest.nns_by_vector(&[0.0; 8], 100, None).unwrap();
        assert_eq!(results.len(), 10);
    }

    #[test]
    fn test_huge_k_and_budget_are_bounded_by_len() {
        let (forest, _) = build_forest(Metric::Euclidean, 10, 8, 3, 4);

        let results = forest.nns_by_vector(&[0.0; 8], usize::MAX, None).unwrap();
        assert_eq!(results.len(), 10);

        let results = forest
            .nns_by_vector(&[0.0; 8], 1_000_000_000_000, Some(usize::MAX))
            .unwrap();
        assert_eq!(results.len(), 10);
    }

    #[test]
    fn test_k_zero() {
        let (forest, _) = build_forest(Metric::Euclidean, 10, 8, 3, 4);
        assert!(forest.nns_by_vector(&[0.0; 8], 0, None).unwrap().is_empty());
    }

    #[test]
    fn test_identical_vectors_still_split() {
        let mut forest = Forest::new_with_seed(4, Metric::Euclidean, 3).with_leaf_size(2);
        for i in 0..40 {
            forest.add_item(i, &[1.0, 1.0, 1.0, 1.0]).unwrap();
        }
        forest.build(2).unwrap();

        let results = forest.nns_by_vector(&[1.0, 1.0, 1.0, 1.0], 40, Some(1_000)).unwrap();
        assert_eq!(results.len(), 40);
        assert!(results.iter().all(|(_, d)| *d == 0.0));
    }

    #[test]
    fn test_nns_by_item() {
        let (forest, _) = build_forest(Metric::Angular, 50, 8, 5, 8);
        let results = forest.nns_by_item(7, 3, None).unwrap();
        assert_eq!(results[0].0, 7);
        assert!(matches!(
            forest.nns_by_item(50, 3, None),
            Err(ForestError::ItemOutOfBounds { item: 50, count: 50 })
        ));
    }

    #[test]
    fn test_add_item_errors() {
        let mut forest = Forest::new_with_seed(3, Metric::Angular, 0);
        assert!(matches!(
            forest.add_item(0, &[1.0, 2.0]),
            Err(ForestError::DimensionMismatch { expected: 3, actual: 2 })
        ));

        forest.add_item(0, &[1.0, 2.0, 3.0]).unwrap();
        forest.build(1).unwrap();
        assert!(matches!(
            forest.add_item(1, &[1.0, 2.0, 3.0]),
            Err(ForestError::AlreadyBuilt)
        ));
    }

    #[test]
    fn test_add_item_overwrites_and_fills_gaps() {
        let mut forest = Forest::new_with_seed(2, Metric::Euclidean, 0);
        forest.add_item(2, &[5.0, 6.0]).unwrap();
        forest.add_item(0, &[1.0, 2.0]).unwrap();

        assert_eq!(forest.len(), 3);
        assert_eq!(forest.item_vector(0), Some(&[1.0, 2.0][..]));
        assert_eq!(forest.item_vector(1), Some(&[0.0, 0.0][..]));
        assert_eq!(forest.item_vector(2), Some(&[5.0, 6.0][..]));
        assert_eq!(forest.item_vector(3), None);
    }

    #[test]
    fn test_query_before_build_and_bad_dimension() {
        let mut forest = Forest::new_with_seed(3, Metric::Angular, 0);
        forest.add_item(0, &[1.0, 0.0, 0.0]).unwrap();
        assert!(matches!(
            forest.nns_by_vector(&[1.0, 0.0, 0.0], 1, None),
            Err(ForestError::NotBuilt)
        ));

        forest.build(1).unwrap();
        assert!(matches!(
            forest.nns_by_vector(&[1.0, 0.0], 1, None),
            Err(ForestError::DimensionMismatch { .. })
        ));
        assert!(matches!(forest.build(1), Err(ForestError::AlreadyBuilt)));
    }

    #[test]
    fn test_zero_trees_rejected() {
        let mut forest = Forest::new_with_seed(3, Metric::Angular, 0);
        assert!(matches!(forest.build(0), Err(ForestError::InvalidParameter(_))));
    }
}
