//! Representative selection: the members nearest their cluster's centroid.

use super::math::euclidean_distance;
use super::types::Cluster;

/// A member chosen to stand for its cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Representative {
    /// Position within the clustered batch
    pub index: usize,
    pub text: String,
    pub distance: f32,
}

/// Up to `n` members of `cluster`, nearest the centroid first.
///
/// `reduced` is the vector set the cluster was discovered in. Ties keep the
/// cluster's member order, so the result is fully deterministic.
#[must_use]
pub fn closest_to_centroid(cluster: &Cluster, reduced: &[Vec<f32>], n: usize) -> Vec<Representative> {
    let mut ranked: Vec<(usize, &str, f32)> = cluster
        .member_indices
        .iter()
        .zip(&cluster.member_texts)
        .map(|(&index, text)| {
            (
                index,
                text.as_str(),
                euclidean_distance(&reduced[index], &cluster.centroid),
            )
        })
        .collect();

    // Stable sort: equal distances stay in member order
    ranked.sort_by(|a, b| a.2.total_cmp(&b.2));
    ranked
        .into_iter()
        .take(n)
        .map(|(index, text, distance)| Representative {
            index,
            text: text.to_string(),
            distance,
        })
        .collect()
}
