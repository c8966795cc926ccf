//! Dimensionality reduction and density clustering.
//!
//! The orchestrator only talks to [`DimensionReducer`] and
//! [`ClusterDiscoverer`]; [`UmapReducer`] and [`HdbscanDiscoverer`] are the
//! shipped implementations.

pub mod hdbscan;
pub mod math;
pub mod reducer;
pub mod representatives;
pub mod types;

pub use hdbscan::{ClusterDiscoverer, DiscoveryParams, HdbscanDiscoverer};
pub use reducer::{DimensionReducer, ReductionParams, UMAP_SEED, UmapReducer};
pub use representatives::{Representative, closest_to_centroid};
pub use types::{Cluster, ClusteringResult, Labeling};

use crate::error::ClusteringError;
use crate::types::RecordId;

/// Reduce `vectors`, skipping the reducer entirely for an empty batch.
pub fn reduce_vectors(
    reducer: &dyn DimensionReducer,
    vectors: &[Vec<f32>],
    params: &ReductionParams,
) -> Result<Vec<Vec<f32>>, ClusteringError> {
    if vectors.is_empty() {
        return Ok(Vec::new());
    }
    let reduced = reducer.reduce(vectors, params)?;
    if reduced.len() != vectors.len() {
        return Err(ClusteringError::Worker(format!(
            "reducer returned {} rows for {} inputs",
            reduced.len(),
            vectors.len()
        )));
    }
    Ok(reduced)
}

/// Discover clusters in `points` and materialize them with ids and texts.
///
/// An empty batch yields an empty result without calling the discoverer.
pub fn discover_clusters(
    discoverer: &dyn ClusterDiscoverer,
    points: &[Vec<f32>],
    ids: &[RecordId],
    texts: &[String],
    params: &DiscoveryParams,
) -> Result<ClusteringResult, ClusteringError> {
    if points.is_empty() {
        return Ok(ClusteringResult::default());
    }
    let labeling = discoverer.discover(points, params)?;
    if labeling.labels.len() != points.len() {
        return Err(ClusteringError::Worker(format!(
            "discoverer labeled {} of {} points",
            labeling.labels.len(),
            points.len()
        )));
    }
    Ok(ClusteringResult::from_labeling(labeling, points, ids, texts))
}
