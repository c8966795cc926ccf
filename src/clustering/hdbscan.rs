//! Density-based cluster discovery (HDBSCAN).
//!
//! Finds clusters of varying density and leaves sparse points unassigned.
//! The number of clusters is an output, not an input.
//!
//! # Algorithm Details
//! - Core distance: distance to the `min_samples`-th nearest point (self included)
//! - Mutual reachability: `max(core(a), core(b), d(a, b))`, Euclidean
//! - Minimum spanning tree: Prim over the implicit complete graph, O(n²)
//! - Condensed tree: splits smaller than `min_cluster_size` shed points
//! - Selection: excess of mass, root excluded
//!
//! Membership probability of a point is `min(λ_p, λ_max) / λ_max` where
//! `λ = 1 / distance` at which the point left its cluster.

use super::math::{euclidean_distance, validate_vectors};
use super::types::Labeling;
use crate::error::ClusteringError;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// Lower bound on merge distances before inversion to lambda.
const MIN_MERGE_DISTANCE: f64 = 1e-12;

/// Parameters for one discovery call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryParams {
    pub min_cluster_size: usize,
    pub min_samples: usize,
}

impl DiscoveryParams {
    pub fn validate(&self) -> Result<(), ClusteringError> {
        if self.min_cluster_size < 2 {
            return Err(ClusteringError::InvalidParameter {
                name: "min_cluster_size",
                reason: format!("{} is below 2", self.min_cluster_size),
            });
        }
        if self.min_samples == 0 {
            return Err(ClusteringError::InvalidParameter {
                name: "min_samples",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Partitions points into dense groups plus noise.
///
/// Implementations label every input point, never drop one, and may return
/// all noise when no structure exists.
pub trait ClusterDiscoverer: Send + Sync {
    fn discover(
        &self,
        points: &[Vec<f32>],
        params: &DiscoveryParams,
    ) -> Result<Labeling, ClusteringError>;
}

/// HDBSCAN with excess-of-mass cluster selection.
#[derive(Debug, Clone, Default)]
pub struct HdbscanDiscoverer {
    /// Allow the root to be selected, yielding a single cluster
    pub allow_single_cluster: bool,
}

impl HdbscanDiscoverer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ClusterDiscoverer for HdbscanDiscoverer {
    fn discover(
        &self,
        points: &[Vec<f32>],
        params: &DiscoveryParams,
    ) -> Result<Labeling, ClusteringError> {
        params.validate()?;
        validate_vectors(points)?;

        let n = points.len();
        if n == 0 {
            return Ok(Labeling::default());
        }
        if n < params.min_cluster_size {
            return Ok(Labeling::all_noise(n));
        }

        let core = core_distances(points, params.min_samples);
        let mst = minimum_spanning_tree(points, &core);
        let hierarchy = single_linkage(n, mst);
        let condensed = CondensedTree::build(&hierarchy, n, params.min_cluster_size);
        let selected = condensed.select_eom(self.allow_single_cluster);
        Ok(condensed.label_points(&selected))
    }
}

/// Distance to the `min_samples`-th nearest point, counting the point itself.
fn core_distances(points: &[Vec<f32>], min_samples: usize) -> Vec<f64> {
    let n = points.len();
    let k = min_samples.min(n).saturating_sub(1);
    if k == 0 {
        return vec![0.0; n];
    }
    (0..n)
        .into_par_iter()
        .map(|i| {
            let mut distances: Vec<f64> = points
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, p)| f64::from(euclidean_distance(&points[i], p)))
                .collect();
            let (_, kth, _) = distances.select_nth_unstable_by(k - 1, f64::total_cmp);
            *kth
        })
        .collect()
}

/// Prim's algorithm over mutual reachability distances.
///
/// Returns `n - 1` edges `(a, b, weight)` sorted by weight, ties in
/// discovery order.
fn minimum_spanning_tree(points: &[Vec<f32>], core: &[f64]) -> Vec<(usize, usize, f64)> {
    let n = points.len();
    let mut in_tree = vec![false; n];
    let mut best_distance = vec![f64::INFINITY; n];
    let mut best_parent = vec![0usize; n];
    let mut edges = Vec::with_capacity(n.saturating_sub(1));

    let mut current = 0;
    in_tree[0] = true;
    for _ in 1..n {
        let mut next: Option<(usize, f64)> = None;
        for j in 0..n {
            if in_tree[j] {
                continue;
            }
            let direct = f64::from(euclidean_distance(&points[current], &points[j]));
            let reach = direct.max(core[current]).max(core[j]);
            if reach < best_distance[j] {
                best_distance[j] = reach;
                best_parent[j] = current;
            }
            if next.is_none_or(|(_, d)| best_distance[j] < d) {
                next = Some((j, best_distance[j]));
            }
        }
        let Some((j, weight)) = next else { break };
        in_tree[j] = true;
        edges.push((best_parent[j], j, weight));
        current = j;
    }

    edges.sort_by(|a, b| a.2.total_cmp(&b.2));
    edges
}

/// One merge of the single-linkage dendrogram.
#[derive(Debug, Clone, Copy)]
struct Merge {
    left: usize,
    right: usize,
    distance: f64,
    size: usize,
}

/// Dendrogram with leaves `0..n` and merge `i` as node `n + i`.
struct Hierarchy {
    merges: Vec<Merge>,
    n: usize,
}

impl Hierarchy {
    fn size(&self, node: usize) -> usize {
        if node < self.n {
            1
        } else {
            self.merges[node - self.n].size
        }
    }

    /// All nodes of the subtree rooted at `node`, breadth first.
    fn subtree(&self, node: usize) -> Vec<usize> {
        let mut order = vec![node];
        let mut cursor = 0;
        while cursor < order.len() {
            let current = order[cursor];
            if current >= self.n {
                let merge = self.merges[current - self.n];
                order.push(merge.left);
                order.push(merge.right);
            }
            cursor += 1;
        }
        order
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }
}

fn single_linkage(n: usize, mst: Vec<(usize, usize, f64)>) -> Hierarchy {
    let mut uf = UnionFind::new(2 * n);
    let mut merges = Vec::with_capacity(mst.len());
    let mut sizes = vec![1usize; 2 * n];

    for (a, b, distance) in mst {
        let left = uf.find(a);
        let right = uf.find(b);
        let node = n + merges.len();
        let size = sizes[left] + sizes[right];
        sizes[node] = size;
        uf.parent[left] = node;
        uf.parent[right] = node;
        merges.push(Merge {
            left,
            right,
            distance,
            size,
        });
    }

    Hierarchy { merges, n }
}

/// Row of the condensed tree: `child` left `parent` at `lambda`.
///
/// Children below `n` are points, children at or above `n` are clusters.
#[derive(Debug, Clone, Copy)]
struct CondensedRow {
    parent: usize,
    child: usize,
    lambda: f64,
    child_size: usize,
}

struct CondensedTree {
    rows: Vec<CondensedRow>,
    n: usize,
    root: usize,
}

impl CondensedTree {
    fn build(hierarchy: &Hierarchy, n: usize, min_cluster_size: usize) -> Self {
        let root_cluster = n;
        let mut rows = Vec::new();
        if hierarchy.merges.is_empty() {
            return Self {
                rows,
                n,
                root: root_cluster,
            };
        }

        let top = n + hierarchy.merges.len() - 1;
        let mut relabel: BTreeMap<usize, usize> = BTreeMap::new();
        relabel.insert(top, root_cluster);
        let mut next_label = root_cluster + 1;
        let mut ignore: BTreeSet<usize> = BTreeSet::new();

        for node in hierarchy.subtree(top) {
            if node < n || ignore.contains(&node) {
                continue;
            }
            let merge = hierarchy.merges[node - n];
            let Some(&parent) = relabel.get(&node) else {
                continue;
            };
            let lambda = 1.0 / merge.distance.max(MIN_MERGE_DISTANCE);
            let left_size = hierarchy.size(merge.left);
            let right_size = hierarchy.size(merge.right);
            let left_big = left_size >= min_cluster_size;
            let right_big = right_size >= min_cluster_size;

            let shed = |side: usize, rows: &mut Vec<CondensedRow>, ignore: &mut BTreeSet<usize>| {
                for sub in hierarchy.subtree(side) {
                    if sub < n {
                        rows.push(CondensedRow {
                            parent,
                            child: sub,
                            lambda,
                            child_size: 1,
                        });
                    }
                    ignore.insert(sub);
                }
            };

            match (left_big, right_big) {
                (true, true) => {
                    for (side, size) in [(merge.left, left_size), (merge.right, right_size)] {
                        relabel.insert(side, next_label);
                        rows.push(CondensedRow {
                            parent,
                            child: next_label,
                            lambda,
                            child_size: size,
                        });
                        next_label += 1;
                    }
                }
                (false, false) => {
                    shed(merge.left, &mut rows, &mut ignore);
                    shed(merge.right, &mut rows, &mut ignore);
                }
                (false, true) => {
                    relabel.insert(merge.right, parent);
                    shed(merge.left, &mut rows, &mut ignore);
                }
                (true, false) => {
                    relabel.insert(merge.left, parent);
                    shed(merge.right, &mut rows, &mut ignore);
                }
            }
        }

        Self {
            rows,
            n,
            root: root_cluster,
        }
    }

    /// Cluster labels present in the tree, ascending; root first.
    fn clusters(&self) -> Vec<usize> {
        let mut clusters: BTreeSet<usize> = BTreeSet::new();
        clusters.insert(self.root);
        for row in &self.rows {
            if row.child >= self.n {
                clusters.insert(row.child);
            }
        }
        clusters.into_iter().collect()
    }

    fn cluster_children(&self, cluster: usize) -> impl Iterator<Item = usize> + '_ {
        self.rows
            .iter()
            .filter(move |r| r.parent == cluster && r.child >= self.n)
            .map(|r| r.child)
    }

    fn stabilities(&self) -> BTreeMap<usize, f64> {
        let mut birth: BTreeMap<usize, f64> = BTreeMap::new();
        birth.insert(self.root, 0.0);
        for row in &self.rows {
            if row.child >= self.n {
                birth.insert(row.child, row.lambda);
            }
        }

        let mut stability: BTreeMap<usize, f64> =
            self.clusters().into_iter().map(|c| (c, 0.0)).collect();
        for row in &self.rows {
            let born = birth.get(&row.parent).copied().unwrap_or(0.0);
            if let Some(s) = stability.get_mut(&row.parent) {
                *s += (row.lambda - born) * row.child_size as f64;
            }
        }
        stability
    }

    /// Excess-of-mass selection. Returns selected cluster labels, ascending.
    fn select_eom(&self, allow_single_cluster: bool) -> Vec<usize> {
        let mut stability = self.stabilities();
        let clusters = self.clusters();
        let mut selected: BTreeMap<usize, bool> = clusters.iter().map(|&c| (c, true)).collect();
        if !allow_single_cluster {
            selected.insert(self.root, false);
        }

        // Children always carry larger labels than their parents
        for &cluster in clusters.iter().rev() {
            if cluster == self.root && !allow_single_cluster {
                continue;
            }
            let children: Vec<usize> = self.cluster_children(cluster).collect();
            let subtree: f64 = children.iter().map(|c| stability[c]).sum();
            if !children.is_empty() && subtree > stability[&cluster] {
                selected.insert(cluster, false);
                stability.insert(cluster, subtree);
            } else {
                let mut stack = children;
                while let Some(descendant) = stack.pop() {
                    selected.insert(descendant, false);
                    stack.extend(self.cluster_children(descendant));
                }
            }
        }

        // With the root excluded a lone root means no structure
        selected
            .into_iter()
            .filter(|(_, keep)| *keep)
            .map(|(c, _)| c)
            .collect()
    }

    fn label_points(&self, selected: &[usize]) -> Labeling {
        let mut cluster_parent: BTreeMap<usize, usize> = BTreeMap::new();
        let mut point_row: Vec<Option<(usize, f64)>> = vec![None; self.n];
        for row in &self.rows {
            if row.child >= self.n {
                cluster_parent.insert(row.child, row.parent);
            } else {
                point_row[row.child] = Some((row.parent, row.lambda));
            }
        }

        let label_of: BTreeMap<usize, usize> = selected
            .iter()
            .enumerate()
            .map(|(label, &cluster)| (cluster, label))
            .collect();

        let mut labeling = Labeling::all_noise(self.n);
        let mut point_lambda = vec![0.0f64; self.n];
        for point in 0..self.n {
            let Some((mut cluster, lambda)) = point_row[point] else {
                continue;
            };
            loop {
                if let Some(&label) = label_of.get(&cluster) {
                    labeling.labels[point] = Some(label);
                    point_lambda[point] = lambda;
                    break;
                }
                match cluster_parent.get(&cluster) {
                    Some(&parent) => cluster = parent,
                    None => break,
                }
            }
        }

        let mut max_lambda = vec![0.0f64; selected.len()];
        for point in 0..self.n {
            if let Some(label) = labeling.labels[point] {
                max_lambda[label] = max_lambda[label].max(point_lambda[point]);
            }
        }
        for point in 0..self.n {
            if let Some(label) = labeling.labels[point] {
                let max = max_lambda[label];
                labeling.probabilities[point] = if max > 0.0 {
                    (point_lambda[point].min(max) / max) as f32
                } else {
                    1.0
                };
            }
        }
        labeling
    }
}
