//! How builds react to failing collaborators.

use crate::common::{
    AxisDiscoverer, FailingSource, FlakyStore, GatedLabeler, Harness, IdentityReducer,
    RecordingLabeler, SlowAssignStore, StallingLabeler, group, small_config,
};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use taxonomist::{BuildStatus, MemoryStore, NewTopic, TaxonomyService, TopicStore};

fn two_groups(harness: &Harness) {
    let mut records = group("a1", [0.0, 0.0, 0.0], 20);
    records.extend(group("a2", [0.0, 1.0, 0.0], 20));
    records.extend(group("b", [10.0, 0.0, 0.0], 12));
    harness.insert("acme", records);
}

#[tokio::test]
async fn test_label_failure_uses_fallback() {
    let harness = Harness::with_parts(
        small_config(1),
        AxisDiscoverer::default(),
        RecordingLabeler::failing(),
    );
    two_groups(&harness);

    let result = harness.service.build("acme", None).await;

    assert_eq!(result.status, BuildStatus::Completed);
    let mut titles: Vec<&str> = result.topics.iter().map(|t| t.title.as_str()).collect();
    titles.sort_unstable();
    assert_eq!(titles, vec!["Cluster (12 items)", "Cluster (40 items)"]);
    assert!(
        result
            .topics
            .iter()
            .all(|t| t.description == "Auto-generated cluster")
    );
}

#[tokio::test]
async fn test_embedding_failure_keeps_topic() {
    let labeler = RecordingLabeler::default();
    labeler.fail_embeddings.store(true, Ordering::SeqCst);
    let harness = Harness::with_parts(small_config(1), AxisDiscoverer::default(), labeler);
    two_groups(&harness);

    let result = harness.service.build("acme", None).await;

    assert_eq!(result.status, BuildStatus::Completed);
    let stored = harness.service.topics("acme").await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|t| t.embedding.is_none()));
}

#[tokio::test]
async fn test_failed_branch_does_not_stop_siblings() {
    // Discovery fails for the 40-record cluster's children only
    let harness = Harness::with_parts(
        small_config(3),
        AxisDiscoverer::failing_on(40),
        RecordingLabeler::default(),
    );
    two_groups(&harness);

    let result = harness.service.build("acme", None).await;

    assert_eq!(result.status, BuildStatus::Completed);
    assert_eq!(result.topics.len(), 2);
    assert!(result.topics.iter().all(|t| t.level == 1));
    assert_eq!(result.clustered_records, 52);
}

#[tokio::test]
async fn test_root_discovery_failure_yields_empty_taxonomy() {
    let harness = Harness::with_parts(
        small_config(3),
        AxisDiscoverer::failing_on(52),
        RecordingLabeler::default(),
    );
    two_groups(&harness);

    let result = harness.service.build("acme", None).await;

    assert_eq!(result.status, BuildStatus::Completed);
    assert!(result.topics.is_empty());
    assert_eq!(result.noise_records, 52);
}

#[tokio::test]
async fn test_load_failure_keeps_previous_topics() {
    let store = MemoryStore::new();
    store
        .save_topic(
            "acme",
            NewTopic {
                title: "Existing".to_string(),
                description: String::new(),
                level: 1,
                parent_id: None,
                cluster_size: 7,
                avg_distance: 0.1,
                embedding: None,
            },
        )
        .await
        .unwrap();
    let service = TaxonomyService::new(
        Arc::new(FailingSource),
        Arc::new(store.clone()),
        Arc::new(RecordingLabeler::default()),
    );

    let result = service.build("acme", None).await;

    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!(result.error_code.as_deref(), Some("LOAD_RECORDS_ERROR"));
    assert!(result.error_message.is_some());
    assert!(result.topics.is_empty());
    let remaining = store.list_topics("acme").await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].title, "Existing");
}

#[tokio::test]
async fn test_store_failure_fails_the_build() {
    let records = MemoryStore::new();
    records
        .insert_records("acme", group("a", [0.0, 0.0, 0.0], 10))
        .unwrap();
    records
        .insert_records("acme", group("b", [10.0, 0.0, 0.0], 10))
        .unwrap();
    let store = Arc::new(FlakyStore::new(records.clone(), 1));
    let service = TaxonomyService::new(
        Arc::new(records.clone()),
        store.clone(),
        Arc::new(RecordingLabeler::default()),
    )
    .with_reducer(Arc::new(IdentityReducer::default()))
    .with_discoverer(Arc::new(AxisDiscoverer::default()))
    .with_defaults(small_config(1));

    let result = service.build("acme", None).await;

    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!(result.error_code.as_deref(), Some("SAVE_TOPIC_ERROR"));
    assert!(result.topics.is_empty());
    // The topic written before the failure stays behind
    assert_eq!(store.list_topics("acme").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_second_concurrent_build_is_rejected() {
    let store = MemoryStore::new();
    store
        .insert_records("acme", group("a", [0.0, 0.0, 0.0], 10))
        .unwrap();
    store
        .insert_records("acme", group("b", [10.0, 0.0, 0.0], 10))
        .unwrap();
    let labeler = Arc::new(GatedLabeler::default());
    let service = TaxonomyService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        labeler.clone(),
    )
    .with_reducer(Arc::new(IdentityReducer::default()))
    .with_discoverer(Arc::new(AxisDiscoverer::default()))
    .with_defaults(small_config(1));

    let first = {
        let service = service.clone();
        tokio::spawn(async move { service.build("acme", None).await })
    };
    labeler.started.notified().await;

    let second = service.build("acme", None).await;
    assert_eq!(second.status, BuildStatus::Failed);
    assert_eq!(second.error_code.as_deref(), Some("BUILD_ALREADY_RUNNING"));

    // Other tenants are not blocked
    let other = service.build("globex", None).await;
    assert_eq!(other.status, BuildStatus::Completed);

    labeler.release.notify_one();
    let first = first.await.unwrap();
    assert_eq!(first.status, BuildStatus::Completed);
    assert_eq!(first.topics.len(), 2);
}

#[tokio::test]
async fn test_build_timeout() {
    let store = MemoryStore::new();
    store
        .insert_records("acme", group("a", [0.0, 0.0, 0.0], 10))
        .unwrap();
    store
        .insert_records("acme", group("b", [10.0, 0.0, 0.0], 10))
        .unwrap();
    let service = TaxonomyService::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        Arc::new(StallingLabeler),
    )
    .with_reducer(Arc::new(IdentityReducer::default()))
    .with_discoverer(Arc::new(AxisDiscoverer::default()))
    .with_defaults(small_config(1))
    .with_build_timeout(Some(Duration::from_millis(50)));

    let result = service.build("acme", None).await;

    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!(result.error_code.as_deref(), Some("BUILD_TIMED_OUT"));
}

#[tokio::test]
async fn test_timeout_leaves_persisted_topics_fully_assigned() {
    let records = MemoryStore::new();
    records
        .insert_records("acme", group("a", [0.0, 0.0, 0.0], 10))
        .unwrap();
    records
        .insert_records("acme", group("b", [10.0, 0.0, 0.0], 10))
        .unwrap();
    // Assigning one topic takes ~200ms, well past the deadline
    let store = Arc::new(SlowAssignStore {
        inner: records.clone(),
        delay: Duration::from_millis(20),
    });
    let service = TaxonomyService::new(
        Arc::new(records.clone()),
        store.clone(),
        Arc::new(RecordingLabeler::default()),
    )
    .with_reducer(Arc::new(IdentityReducer::default()))
    .with_discoverer(Arc::new(AxisDiscoverer::default()))
    .with_defaults(small_config(1))
    .with_build_timeout(Some(Duration::from_millis(90)));

    let result = service.build("acme", None).await;

    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!(result.error_code.as_deref(), Some("BUILD_TIMED_OUT"));

    // The topic being written at the deadline is finished, the next is never started
    let topics = records.list_topics("acme").await.unwrap();
    assert_eq!(topics.len(), 1);
    let assignments = records.assignments("acme");
    for topic in &topics {
        let assigned = assignments
            .values()
            .filter(|a| a.topic_id == topic.id)
            .count();
        assert_eq!(assigned, topic.cluster_size, "topic {} half assigned", topic.title);
    }
}

#[tokio::test]
async fn test_stuck_step_is_dropped_after_grace() {
    let store = MemoryStore::new();
    store
        .insert_records("acme", group("a", [0.0, 0.0, 0.0], 10))
        .unwrap();
    store
        .insert_records("acme", group("b", [10.0, 0.0, 0.0], 10))
        .unwrap();
    let stuck = Arc::new(SlowAssignStore {
        inner: store.clone(),
        delay: Duration::from_secs(30),
    });
    let service = TaxonomyService::new(
        Arc::new(store.clone()),
        stuck,
        Arc::new(RecordingLabeler::default()),
    )
    .with_reducer(Arc::new(IdentityReducer::default()))
    .with_discoverer(Arc::new(AxisDiscoverer::default()))
    .with_defaults(small_config(1))
    .with_build_timeout(Some(Duration::from_millis(50)))
    .with_cancel_grace(Duration::from_millis(50));

    let started = std::time::Instant::now();
    let result = service.build("acme", None).await;

    assert_eq!(result.error_code.as_deref(), Some("BUILD_TIMED_OUT"));
    assert!(started.elapsed() < Duration::from_secs(5));
    // The tenant is free again for the next build
    let retry = service.build("acme", None).await;
    assert_ne!(retry.error_code.as_deref(), Some("BUILD_ALREADY_RUNNING"));
}

#[tokio::test]
async fn test_invalid_tenant_fails_cleanly() {
    let harness = Harness::new(small_config(1));

    let result = harness.service.build("../escape", None).await;

    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!(result.error_code.as_deref(), Some("LOAD_RECORDS_ERROR"));
}
