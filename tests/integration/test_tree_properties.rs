//! Structural properties of a three-level scripted taxonomy.
//!
//! Layout (axis values):
//! - `a` (axis0 = 0, 40 records) splits on axis1 into
//!   - `a1` (20) which splits on axis2 into `a1x` (10) and `a1y` (10)
//!   - `a2` (20) which has no further structure
//! - `b` (axis0 = 10, 12 records), too small to subdivide

use crate::common::{Harness, group, small_config};
use std::collections::HashMap;
use taxonomist::{BuildResult, BuildStatus, ConfidenceMode, RecordId, TopicId};

fn three_level_records() -> Vec<taxonomist::store::StoredRecord> {
    let mut records = group("a1x", [0.0, 0.0, 0.0], 10);
    records.extend(group("a1y", [0.0, 0.0, 1.0], 10));
    records.extend(group("a2", [0.0, 1.0, 0.0], 20));
    records.extend(group("b", [10.0, 0.0, 0.0], 12));
    records
}

async fn build_three_levels(harness: &Harness) -> BuildResult {
    harness.insert("acme", three_level_records());
    harness.service.build("acme", None).await
}

#[tokio::test]
async fn test_tree_shape_and_summary() {
    let harness = Harness::new(small_config(3));
    let result = build_three_levels(&harness).await;

    assert_eq!(result.status, BuildStatus::Completed);
    assert_eq!(result.total_records, 52);
    assert_eq!(result.num_clusters, 2);
    assert_eq!(result.clustered_records, 52);
    assert_eq!(result.noise_records, 0);

    let per_level = |level| result.topics.iter().filter(|t| t.level == level).count();
    assert_eq!(per_level(1), 2);
    assert_eq!(per_level(2), 2);
    assert_eq!(per_level(3), 2);
    assert_eq!(result.topics.len(), 6);
}

#[tokio::test]
async fn test_parents_precede_children_and_shrink() {
    let harness = Harness::new(small_config(3));
    let result = build_three_levels(&harness).await;

    let position: HashMap<TopicId, usize> = result
        .topics
        .iter()
        .enumerate()
        .map(|(i, t)| (t.topic_id, i))
        .collect();

    for (i, topic) in result.topics.iter().enumerate() {
        assert!((1..=3).contains(&topic.level));
        match topic.parent_id {
            None => assert_eq!(topic.level, 1),
            Some(parent_id) => {
                let parent = &result.topics[position[&parent_id]];
                assert!(position[&parent_id] < i, "parent listed after child");
                assert_eq!(parent.level + 1, topic.level);
                assert!(topic.cluster_size < parent.cluster_size);
            }
        }
    }
}

#[tokio::test]
async fn test_child_populations_are_parent_members() {
    let harness = Harness::new(small_config(3));
    build_three_levels(&harness).await;

    // Root, the 40-record cluster, then its two 20-record children
    assert_eq!(*harness.reducer.populations.lock(), vec![52, 40, 20, 20]);
}

#[tokio::test]
async fn test_labeler_sees_hierarchy_context() {
    let harness = Harness::new(small_config(3));
    let result = build_three_levels(&harness).await;
    let calls = harness.labeler.calls.lock().clone();
    assert_eq!(calls.len(), 6);

    let title_of = |id: TopicId| {
        result
            .topics
            .iter()
            .find(|t| t.topic_id == id)
            .map(|t| t.title.clone())
            .unwrap()
    };

    for call in calls.iter().filter(|c| c.level == 1) {
        assert!(call.parent_title.is_none());
        assert!(call.ancestors.is_empty());
    }
    for call in calls.iter().filter(|c| c.level == 3) {
        let child = result
            .topics
            .iter()
            .find(|t| t.level == 3 && t.cluster_size == call.cluster_size)
            .unwrap();
        let parent_id = child.parent_id.unwrap();
        let parent = result.topics.iter().find(|t| t.topic_id == parent_id).unwrap();
        assert_eq!(call.parent_title.as_deref(), Some(parent.title.as_str()));
        assert_eq!(call.ancestors, vec![title_of(parent.parent_id.unwrap())]);
    }
    assert!(calls.iter().all(|c| c.texts <= 10 && c.texts <= c.cluster_size));
}

#[tokio::test]
async fn test_records_end_at_deepest_topic() {
    let harness = Harness::new(small_config(3));
    let result = build_three_levels(&harness).await;
    let level_of: HashMap<TopicId, u32> =
        result.topics.iter().map(|t| (t.topic_id, t.level)).collect();

    let assigned_level = |id: &str| {
        let assignment = harness
            .store
            .assignment("acme", &RecordId::from(id))
            .expect("record assigned");
        level_of[&assignment.topic_id]
    };
    assert_eq!(assigned_level("a1x-0"), 3);
    assert_eq!(assigned_level("a1y-9"), 3);
    assert_eq!(assigned_level("a2-3"), 2);
    assert_eq!(assigned_level("b-11"), 1);
    assert_eq!(harness.store.assignments("acme").len(), 52);
}

#[tokio::test]
async fn test_centroid_confidence_is_shared_by_cluster() {
    let harness = Harness::new(small_config(1));
    harness.insert("acme", group("b", [10.0, 0.0, 0.0], 12));
    harness.insert("acme", group("c", [20.0, 0.0, 0.0], 12));
    let result = harness.service.build("acme", None).await;

    let topic = &result.topics[0];
    let expected = 1.0 - topic.avg_distance.min(1.0);
    for assignment in harness.store.assignments("acme").values() {
        if assignment.topic_id == topic.topic_id {
            assert!((assignment.confidence - expected).abs() < 1e-6);
        }
    }
}

#[tokio::test]
async fn test_membership_probability_confidence() {
    let config = taxonomist::ClusterConfig {
        confidence_mode: ConfidenceMode::MembershipProbability,
        ..small_config(1)
    };
    let harness = Harness::new(config);
    harness.insert("acme", group("b", [10.0, 0.0, 0.0], 12));
    harness.insert("acme", group("c", [20.0, 0.0, 0.0], 12));
    harness.service.build("acme", None).await;

    let assignments = harness.store.assignments("acme");
    assert_eq!(assignments.len(), 24);
    assert!(assignments.values().all(|a| a.confidence == 0.5));
}

#[tokio::test]
async fn test_level_parameters_follow_config() {
    let harness = Harness::new(small_config(3));
    build_three_levels(&harness).await;

    let params = harness.discoverer.params.lock().clone();
    assert!(params.iter().all(|p| p.min_cluster_size == 5));
    assert!(params.iter().all(|p| p.min_samples == 3));
}
