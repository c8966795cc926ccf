//! End-to-end builds over small, fully scripted populations.

use crate::common::{Harness, group, small_config};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use taxonomist::store::StoredRecord;
use taxonomist::{
    BuildStatus, ClusterConfig, KeywordLabeler, MemoryStore, RecordId, TaxonomyService,
};

#[tokio::test]
async fn test_empty_tenant_completes_with_zero_counts() {
    let harness = Harness::new(small_config(3));

    let result = harness.service.build("acme", None).await;

    assert_eq!(result.status, BuildStatus::Completed);
    assert_eq!(result.total_records, 0);
    assert_eq!(result.clustered_records, 0);
    assert_eq!(result.noise_records, 0);
    assert_eq!(result.num_clusters, 0);
    assert!(result.topics.is_empty());
    assert!(result.completed_at.is_some());
    assert_eq!(harness.reducer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_population_below_minimum_is_not_clustered() {
    let harness = Harness::new(small_config(3));
    harness.insert("acme", group("tiny", [0.0, 0.0, 0.0], 4));

    let result = harness.service.build("acme", None).await;

    assert_eq!(result.status, BuildStatus::Completed);
    assert_eq!(result.total_records, 4);
    assert_eq!(result.noise_records, 4);
    assert!(result.topics.is_empty());
    assert_eq!(harness.reducer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.discoverer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_subdivision_threshold_is_inclusive() {
    // Level 1 subdivides clusters of 20 or more
    let harness = Harness::new(small_config(2));
    let mut records = group("at", [0.0, 0.0, 0.0], 10);
    records.extend(group("at-split", [0.0, 1.0, 0.0], 10));
    records.extend(group("below", [10.0, 0.0, 0.0], 19));
    harness.insert("acme", records);

    let result = harness.service.build("acme", None).await;

    assert_eq!(result.status, BuildStatus::Completed);
    assert_eq!(result.num_clusters, 2);
    // One call for the root population, one for the cluster of exactly 20
    assert_eq!(*harness.discoverer.populations.lock(), vec![39, 20]);
    assert_eq!(result.topics.iter().filter(|t| t.level == 2).count(), 2);
}

#[tokio::test]
async fn test_max_levels_one_never_recurses() {
    let harness = Harness::new(small_config(1));
    harness.insert("acme", group("a", [0.0, 0.0, 0.0], 30));
    harness.insert("acme", group("b", [10.0, 0.0, 0.0], 30));

    let result = harness.service.build("acme", None).await;

    assert_eq!(result.num_clusters, 2);
    assert!(result.topics.iter().all(|t| t.level == 1));
    assert_eq!(harness.discoverer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rebuild_replaces_previous_taxonomy() {
    let harness = Harness::new(small_config(1));
    harness.insert("acme", group("a", [0.0, 0.0, 0.0], 10));
    harness.insert("acme", group("b", [10.0, 0.0, 0.0], 10));

    let first = harness.service.build("acme", None).await;
    let second = harness.service.build("acme", None).await;

    assert_eq!(first.topics.len(), 2);
    assert_eq!(second.topics.len(), 2);
    let stored = harness.service.topics("acme").await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(
        stored
            .iter()
            .all(|t| second.topics.iter().any(|r| r.topic_id == t.id))
    );
}

#[tokio::test]
async fn test_invalid_config_fails_before_touching_the_store() {
    let harness = Harness::new(small_config(3));
    harness.insert("acme", group("a", [0.0, 0.0, 0.0], 10));
    let config = ClusterConfig {
        max_levels: 0,
        ..small_config(3)
    };

    let result = harness.service.build("acme", Some(config)).await;

    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!(result.error_code.as_deref(), Some("INVALID_CONFIG"));
    assert_eq!(harness.reducer.calls.load(Ordering::SeqCst), 0);
}

fn blob_records(centers: usize, per_center: usize, dim: usize) -> Vec<StoredRecord> {
    let mut rng = StdRng::seed_from_u64(7);
    let mut records = Vec::new();
    for center in 0..centers {
        for i in 0..per_center {
            let embedding = (0..dim)
                .map(|d| {
                    let base = if d == center { 5.0 } else { 0.0 };
                    base + rng.random_range(-0.05..0.05)
                })
                .collect();
            records.push(StoredRecord {
                id: RecordId::new(format!("c{center}-{i}")),
                text: format!("topic{center} sample words for cluster {center}"),
                embedding,
                created_at: None,
            });
        }
    }
    records
}

#[tokio::test]
async fn test_three_separated_groups_with_default_algorithms() {
    let store = MemoryStore::new();
    store
        .insert_records("acme", blob_records(3, 50, 16))
        .unwrap();
    let service = TaxonomyService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(KeywordLabeler::new()),
    );
    let mut config = ClusterConfig {
        max_levels: 1,
        hdbscan_min_cluster_size: Some(10),
        hdbscan_min_samples: Some(5),
        ..ClusterConfig::default()
    };
    config.level_hdbscan_min_cluster_sizes.clear();

    let result = service.build("acme", Some(config)).await;

    assert_eq!(result.status, BuildStatus::Completed);
    assert_eq!(result.total_records, 150);
    assert!(
        (2..=5).contains(&result.num_clusters),
        "found {} clusters",
        result.num_clusters
    );
    assert_eq!(result.clustered_records + result.noise_records, 150);
    assert!(result.topics.iter().all(|t| t.avg_distance >= 0.0));
    assert!(result.topics.iter().all(|t| !t.title.is_empty()));
}
