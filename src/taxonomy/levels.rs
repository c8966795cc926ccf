//! Per-level parameter resolution.

use crate::clustering::{DiscoveryParams, ReductionParams};
use crate::config::ClusterConfig;

/// Everything one level of the tree needs to cluster its population.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelParams {
    pub level: u32,
    pub reduction: ReductionParams,
    pub discovery: DiscoveryParams,
    /// Clusters at least this large are subdivided
    pub min_size_to_subdivide: usize,
}

impl LevelParams {
    /// Resolve parameters for `level` over `population` vectors of
    /// `input_dim` dimensions.
    ///
    /// Pure: identical arguments always give identical parameters.
    #[must_use]
    pub fn resolve(config: &ClusterConfig, level: u32, population: usize, input_dim: usize) -> Self {
        let n_components = config.n_components(level).min(input_dim.max(1));
        let min_cluster_size = config.discovery_min_cluster_size(level);

        Self {
            level,
            reduction: ReductionParams {
                n_components,
                n_neighbors: config.n_neighbors(population),
                min_dist: config.min_dist(),
            },
            discovery: DiscoveryParams {
                min_cluster_size,
                min_samples: config.discovery_min_samples(level),
            },
            min_size_to_subdivide: config.min_size_to_subdivide(level),
        }
    }

    /// Whether a cluster of `cluster_size` drawn from `population` gets children.
    ///
    /// Requires room for another level, a large enough cluster, and a strict
    /// reduction of the population so recursion always terminates.
    #[must_use]
    pub fn should_subdivide(&self, max_levels: u32, cluster_size: usize, population: usize) -> bool {
        self.level < max_levels
            && cluster_size >= self.min_size_to_subdivide
            && cluster_size < population
    }
}
