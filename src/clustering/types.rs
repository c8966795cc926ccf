//! Cluster materialization from raw discoverer labels.

use super::math::{euclidean_distance, mean_of};
use crate::types::RecordId;

/// Raw output of a [`ClusterDiscoverer`](super::ClusterDiscoverer).
///
/// `labels[i]` is `None` for noise. Label values need not be contiguous.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Labeling {
    pub labels: Vec<Option<usize>>,
    /// Membership strength per point, 0.0 for noise
    pub probabilities: Vec<f32>,
}

impl Labeling {
    /// Every point is noise.
    pub fn all_noise(n: usize) -> Self {
        Self {
            labels: vec![None; n],
            probabilities: vec![0.0; n],
        }
    }
}

/// A discovered group of records, in reduced space.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub label: usize,
    /// Positions of the members within the clustered batch, ascending
    pub member_indices: Vec<usize>,
    pub member_ids: Vec<RecordId>,
    pub member_texts: Vec<String>,
    pub centroid: Vec<f32>,
    pub size: usize,
    /// Mean Euclidean distance of members to the centroid
    pub avg_distance: f32,
    pub mean_probability: f32,
}

impl Cluster {
    /// Heuristic assignment confidence, `1 - min(avg_distance, 1.0)`.
    #[must_use]
    pub fn confidence(&self) -> f32 {
        1.0 - self.avg_distance.min(1.0)
    }
}

/// Partition of a batch into clusters and noise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusteringResult {
    /// Ordered by ascending label
    pub clusters: Vec<Cluster>,
    pub noise_indices: Vec<usize>,
    pub noise_ids: Vec<RecordId>,
    pub labels: Vec<Option<usize>>,
    pub probabilities: Vec<f32>,
}

impl ClusteringResult {
    /// Group points by label and compute per-cluster statistics.
    ///
    /// `points`, `ids`, `texts` and the labeling must all have the same length.
    pub fn from_labeling(
        labeling: Labeling,
        points: &[Vec<f32>],
        ids: &[RecordId],
        texts: &[String],
    ) -> Self {
        let mut distinct: Vec<usize> = labeling.labels.iter().flatten().copied().collect();
        distinct.sort_unstable();
        distinct.dedup();

        let clusters = distinct
            .into_iter()
            .map(|label| {
                let member_indices: Vec<usize> = labeling
                    .labels
                    .iter()
                    .enumerate()
                    .filter(|(_, l)| **l == Some(label))
                    .map(|(i, _)| i)
                    .collect();
                let centroid = mean_of(points, &member_indices);
                let size = member_indices.len();
                let avg_distance = member_indices
                    .iter()
                    .map(|&i| euclidean_distance(&points[i], &centroid))
                    .sum::<f32>()
                    / size as f32;
                let mean_probability = member_indices
                    .iter()
                    .map(|&i| labeling.probabilities.get(i).copied().unwrap_or(1.0))
                    .sum::<f32>()
                    / size as f32;

                Cluster {
                    label,
                    member_ids: member_indices.iter().map(|&i| ids[i].clone()).collect(),
                    member_texts: member_indices.iter().map(|&i| texts[i].clone()).collect(),
                    member_indices,
                    centroid,
                    size,
                    avg_distance,
                    mean_probability,
                }
            })
            .collect();

        let noise_indices: Vec<usize> = labeling
            .labels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_none())
            .map(|(i, _)| i)
            .collect();
        let noise_ids = noise_indices.iter().map(|&i| ids[i].clone()).collect();

        Self {
            clusters,
            noise_indices,
            noise_ids,
            labels: labeling.labels,
            probabilities: labeling.probabilities,
        }
    }

    pub fn num_clusters(&self) -> usize {
        self.clusters.len()
    }

    /// Number of points assigned to some cluster.
    pub fn clustered_count(&self) -> usize {
        self.clusters.iter().map(|c| c.size).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty() && self.noise_indices.is_empty()
    }
}
