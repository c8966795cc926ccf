//! Neighborhood-graph dimensionality reduction (UMAP).
//!
//! This module provides a compact, deterministic implementation of the UMAP
//! embedding used before density clustering. High-dimensional text embeddings
//! are reduced to a handful of dimensions where density estimates are stable.
//!
//! # Algorithm Details
//! - Neighborhood graph: exact k nearest neighbors under cosine distance
//! - Membership: smooth kNN (per-point `rho` and `sigma`, target `log2(k)`)
//! - Symmetrization: fuzzy union `a + b - a * b`
//! - Initialization: PCA by power iteration, scaled to `[-10, 10]`
//! - Layout: epoch-scheduled SGD with negative sampling
//!
//! # Performance Characteristics
//! - O(n² · d) for the neighbor search, parallel over rows
//! - O(epochs · n · k · n_components) for the layout
//! - Fully deterministic for a given seed

use super::math::{EPSILON, cosine_distance, validate_vectors};
use crate::error::ClusteringError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Seed used by [`UmapReducer::default`].
pub const UMAP_SEED: u64 = 42;

/// Binary search steps when fitting per-point bandwidths.
const SMOOTH_KNN_ITERATIONS: usize = 64;

/// Tolerance for the bandwidth search.
const SMOOTH_KNN_TOLERANCE: f32 = 1e-5;

/// Lower bound on `sigma` relative to the mean neighbor distance.
const MIN_K_DIST_SCALE: f32 = 1e-3;

/// Power iterations per principal component.
const POWER_ITERATIONS: usize = 24;

/// Initial layout is scaled so the largest coordinate has this magnitude.
const INIT_SCALE: f32 = 10.0;

/// Gradient clip for both attractive and repulsive moves.
const GRADIENT_CLIP: f32 = 4.0;

/// Layout spread; fixed as in the reference UMAP defaults.
const SPREAD: f32 = 1.0;

/// Batches above this size get fewer layout epochs.
const LARGE_BATCH: usize = 10_000;

/// Parameters for one reduction call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReductionParams {
    pub n_components: usize,
    pub n_neighbors: usize,
    pub min_dist: f32,
}

/// Maps vectors into a lower-dimensional space, preserving local structure.
///
/// Implementations must keep row order and count, never raise the
/// dimensionality, and be deterministic for identical input.
pub trait DimensionReducer: Send + Sync {
    fn reduce(
        &self,
        vectors: &[Vec<f32>],
        params: &ReductionParams,
    ) -> Result<Vec<Vec<f32>>, ClusteringError>;
}

/// UMAP with a fixed random seed.
#[derive(Debug, Clone)]
pub struct UmapReducer {
    seed: u64,
    n_epochs: Option<usize>,
    negative_sample_rate: usize,
}

impl Default for UmapReducer {
    fn default() -> Self {
        Self {
            seed: UMAP_SEED,
            n_epochs: None,
            negative_sample_rate: 5,
        }
    }
}

impl UmapReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Override the layout epoch count (default 500, or 200 for large batches).
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.n_epochs = Some(epochs.max(1));
        self
    }

    fn epochs_for(&self, n: usize) -> usize {
        self.n_epochs
            .unwrap_or(if n > LARGE_BATCH { 200 } else { 500 })
    }
}

impl DimensionReducer for UmapReducer {
    fn reduce(
        &self,
        vectors: &[Vec<f32>],
        params: &ReductionParams,
    ) -> Result<Vec<Vec<f32>>, ClusteringError> {
        let dim = validate_vectors(vectors)?;
        let n = vectors.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        if params.n_components == 0 {
            return Err(ClusteringError::InvalidParameter {
                name: "n_components",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0..=SPREAD).contains(&params.min_dist) {
            return Err(ClusteringError::InvalidParameter {
                name: "min_dist",
                reason: format!("{} is outside 0.0..={SPREAD}", params.min_dist),
            });
        }

        let n_components = params.n_components.min(dim).max(1);
        if n == 1 {
            return Ok(vec![vec![0.0; n_components]]);
        }
        let k = params.n_neighbors.clamp(1, n - 1);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let knn = nearest_neighbors(vectors, k);
        let edges = fuzzy_simplicial_set(&knn, k);
        let mut embedding = pca_init(vectors, n_components, &mut rng);
        let (a, b) = fit_ab(params.min_dist);

        let n_epochs = self.epochs_for(n);
        optimize_layout(
            &mut embedding,
            n_components,
            &edges,
            LayoutParams {
                a,
                b,
                n_epochs,
                negative_sample_rate: self.negative_sample_rate,
            },
            &mut rng,
        );

        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(ClusteringError::Diverged { epochs: n_epochs });
        }

        Ok(embedding
            .chunks(n_components)
            .map(|row| row.to_vec())
            .collect())
    }
}

/// Exact kNN under cosine distance. Ties resolve to the lower index.
fn nearest_neighbors(vectors: &[Vec<f32>], k: usize) -> Vec<Vec<(usize, f32)>> {
    (0..vectors.len())
        .into_par_iter()
        .map(|i| {
            let mut candidates: Vec<(usize, f32)> = vectors
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(j, v)| (j, cosine_distance(&vectors[i], v)))
                .collect();
            candidates.sort_by(|x, y| x.1.total_cmp(&y.1).then(x.0.cmp(&y.0)));
            candidates.truncate(k);
            candidates
        })
        .collect()
}

/// Membership strengths of the symmetrized neighborhood graph.
///
/// Returns `(i, j, weight)` with `i < j`, sorted by `(i, j)`.
fn fuzzy_simplicial_set(knn: &[Vec<(usize, f32)>], k: usize) -> Vec<(usize, usize, f32)> {
    let target = (k as f32).log2().max(EPSILON);
    let mut directed: BTreeMap<(usize, usize), f32> = BTreeMap::new();

    for (i, neighbors) in knn.iter().enumerate() {
        let rho = neighbors
            .iter()
            .map(|(_, d)| *d)
            .find(|d| *d > 0.0)
            .unwrap_or(0.0);
        let sigma = smooth_sigma(neighbors, rho, target);
        for &(j, d) in neighbors {
            let weight = if d - rho <= 0.0 {
                1.0
            } else {
                (-(d - rho) / sigma).exp()
            };
            directed.insert((i, j), weight);
        }
    }

    let mut undirected: BTreeMap<(usize, usize), f32> = BTreeMap::new();
    for (&(i, j), &w) in &directed {
        let key = (i.min(j), i.max(j));
        if undirected.contains_key(&key) {
            continue;
        }
        let reverse = directed.get(&(j, i)).copied().unwrap_or(0.0);
        undirected.insert(key, w + reverse - w * reverse);
    }

    undirected
        .into_iter()
        .filter(|(_, w)| *w > 0.0)
        .map(|((i, j), w)| (i, j, w))
        .collect()
}

/// Binary search for the bandwidth whose membership sum equals `target`.
fn smooth_sigma(neighbors: &[(usize, f32)], rho: f32, target: f32) -> f32 {
    let mut lo = 0.0f32;
    let mut hi = f32::INFINITY;
    let mut mid = 1.0f32;

    for _ in 0..SMOOTH_KNN_ITERATIONS {
        let psum: f32 = neighbors
            .iter()
            .map(|(_, d)| {
                let excess = d - rho;
                if excess > 0.0 { (-excess / mid).exp() } else { 1.0 }
            })
            .sum();

        if (psum - target).abs() < SMOOTH_KNN_TOLERANCE {
            break;
        }
        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            mid = if hi.is_infinite() { mid * 2.0 } else { (lo + hi) / 2.0 };
        }
    }

    let mean_distance = if neighbors.is_empty() {
        0.0
    } else {
        neighbors.iter().map(|(_, d)| d).sum::<f32>() / neighbors.len() as f32
    };
    mid.max(MIN_K_DIST_SCALE * mean_distance).max(EPSILON)
}

/// Initial layout from the leading principal components.
///
/// Returns a flat row-major `n * n_components` buffer.
fn pca_init(vectors: &[Vec<f32>], n_components: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = vectors.len();
    let dim = vectors[0].len();

    let mut mean = vec![0.0f32; dim];
    for row in vectors {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v;
        }
    }
    for m in &mut mean {
        *m /= n as f32;
    }
    let centered: Vec<Vec<f32>> = vectors
        .iter()
        .map(|row| row.iter().zip(&mean).map(|(v, m)| v - m).collect())
        .collect();

    let mut components: Vec<Vec<f32>> = Vec::with_capacity(n_components);
    for _ in 0..n_components {
        let mut v: Vec<f32> = (0..dim).map(|_| rng.random::<f32>() - 0.5).collect();
        normalize(&mut v);

        for _ in 0..POWER_ITERATIONS {
            let mut w = vec![0.0f32; dim];
            for row in &centered {
                let proj = dot(row, &v);
                for (acc, x) in w.iter_mut().zip(row) {
                    *acc += proj * x;
                }
            }
            for comp in &components {
                let overlap = dot(&w, comp);
                for (x, c) in w.iter_mut().zip(comp) {
                    *x -= overlap * c;
                }
            }
            if !normalize(&mut w) {
                break;
            }
            v = w;
        }
        components.push(v);
    }

    let mut embedding: Vec<f32> = centered
        .iter()
        .flat_map(|row| components.iter().map(move |comp| dot(row, comp)))
        .collect();

    let max_abs = embedding.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
    let scale = if max_abs > EPSILON {
        INIT_SCALE / max_abs
    } else {
        1.0
    };
    // Jitter separates duplicate inputs so the layout has gradients to follow
    for value in &mut embedding {
        *value = *value * scale + rng.random_range(-1e-4f32..1e-4f32);
    }
    embedding
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scale to unit length in place; false when the vector is (near) zero.
fn normalize(v: &mut [f32]) -> bool {
    let norm = dot(v, v).sqrt();
    if norm < EPSILON {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

/// Fit `1 / (1 + a·x^(2b))` to the offset exponential implied by `min_dist`.
///
/// Grid search in `(log a, b)`; the curve only needs to be close, the layout
/// is insensitive to small errors in either parameter.
fn fit_ab(min_dist: f32) -> (f32, f32) {
    let xs: Vec<f32> = (1..=100).map(|i| i as f32 * 3.0 * SPREAD / 100.0).collect();
    let targets: Vec<f32> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / SPREAD).exp()
            }
        })
        .collect();

    let mut best = (1.577, 0.895);
    let mut best_err = f32::INFINITY;
    for bi in 0..=170 {
        let b = 0.3 + bi as f32 * 0.01;
        for ai in 0..=120 {
            let a = (-2.5f32 + ai as f32 * 0.05).exp();
            let err: f32 = xs
                .iter()
                .zip(&targets)
                .map(|(&x, &t)| {
                    let y = 1.0 / (1.0 + a * x.powf(2.0 * b));
                    (y - t) * (y - t)
                })
                .sum();
            if err < best_err {
                best_err = err;
                best = (a, b);
            }
        }
    }
    best
}

struct LayoutParams {
    a: f32,
    b: f32,
    n_epochs: usize,
    negative_sample_rate: usize,
}

fn clip(value: f32) -> f32 {
    value.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

/// Epoch-scheduled SGD over the graph edges.
fn optimize_layout(
    embedding: &mut [f32],
    dim: usize,
    edges: &[(usize, usize, f32)],
    params: LayoutParams,
    rng: &mut StdRng,
) {
    let n = embedding.len() / dim;
    let max_weight = edges.iter().fold(0.0f32, |acc, e| acc.max(e.2));
    if max_weight <= 0.0 || n < 2 {
        return;
    }
    let n_epochs = params.n_epochs as f32;

    // Edges too weak to be sampled even once are dropped
    let scheduled: Vec<(usize, usize, f32)> = edges
        .iter()
        .filter(|e| e.2 >= max_weight / n_epochs)
        .map(|&(i, j, w)| (i, j, max_weight / w))
        .collect();
    let mut next_sample: Vec<f32> = scheduled.iter().map(|e| e.2).collect();
    let (a, b) = (params.a, params.b);

    for epoch in 0..params.n_epochs {
        let alpha = 1.0 - epoch as f32 / n_epochs;
        let now = epoch as f32;

        for (edge, &(i, j, epochs_per_sample)) in scheduled.iter().enumerate() {
            if next_sample[edge] > now {
                continue;
            }

            let dist_sq = row_distance_sq(embedding, dim, i, j);
            if dist_sq > 0.0 {
                let coef = -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0);
                for d in 0..dim {
                    let grad = clip(coef * (embedding[i * dim + d] - embedding[j * dim + d]));
                    embedding[i * dim + d] += grad * alpha;
                    embedding[j * dim + d] -= grad * alpha;
                }
            }

            for _ in 0..params.negative_sample_rate {
                let k = rng.random_range(0..n);
                if k == i {
                    continue;
                }
                let dist_sq = row_distance_sq(embedding, dim, i, k);
                let coef = if dist_sq > 0.0 {
                    2.0 * b / ((0.001 + dist_sq) * (a * dist_sq.powf(b) + 1.0))
                } else {
                    0.0
                };
                for d in 0..dim {
                    let grad = if coef > 0.0 {
                        clip(coef * (embedding[i * dim + d] - embedding[k * dim + d]))
                    } else {
                        GRADIENT_CLIP
                    };
                    embedding[i * dim + d] += grad * alpha;
                }
            }

            next_sample[edge] += epochs_per_sample;
        }
    }
}

fn row_distance_sq(embedding: &[f32], dim: usize, i: usize, j: usize) -> f32 {
    (0..dim)
        .map(|d| {
            let diff = embedding[i * dim + d] - embedding[j * dim + d];
            diff * diff
        })
        .sum()
}
