//! Background jobs and the on-disk store.

use crate::common::{AxisDiscoverer, Harness, IdentityReducer, RecordingLabeler, group, small_config};
use std::sync::Arc;
use std::time::Duration;
use taxonomist::{BuildStatus, FileStore, JobStatus, RecordId, TaxonomyService, TopicStore};
use tempfile::TempDir;

async fn wait_for_terminal(service: &TaxonomyService, tenant: &str, job_id: &str) -> JobStatus {
    for _ in 0..500 {
        if let Some(job) = service.jobs().get(tenant, job_id) {
            if job.status.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} did not finish");
}

#[tokio::test]
async fn test_submitted_job_reaches_completion() {
    let harness = Harness::new(small_config(2));
    harness.insert("acme", group("a", [0.0, 0.0, 0.0], 15));
    harness.insert("acme", group("b", [10.0, 0.0, 0.0], 15));

    let job = harness.service.submit("acme", None);
    assert_eq!(job.status, BuildStatus::Pending);
    assert_eq!(harness.service.jobs().latest("acme").unwrap().job_id, job.job_id);

    let finished = wait_for_terminal(&harness.service, "acme", &job.job_id).await;
    assert_eq!(finished.status, BuildStatus::Completed);
    assert_eq!(finished.progress, 1.0);
    let result = finished.result.expect("finished job carries its result");
    assert_eq!(result.job_id, job.job_id);
    assert_eq!(result.num_clusters, 2);
}

#[tokio::test]
async fn test_failed_job_reports_error() {
    let harness = Harness::new(small_config(2));
    let config = taxonomist::ClusterConfig {
        max_levels: 42,
        ..small_config(2)
    };

    let job = harness.service.submit("acme", Some(config));
    let finished = wait_for_terminal(&harness.service, "acme", &job.job_id).await;

    assert_eq!(finished.status, BuildStatus::Failed);
    let result = finished.result.unwrap();
    assert_eq!(result.error_code.as_deref(), Some("INVALID_CONFIG"));
    assert_eq!(Some(finished.message), result.error_message);
}

#[tokio::test]
async fn test_file_store_round_trip_through_build() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStore::new(dir.path()));
    let mut records = group("a", [0.0, 0.0, 0.0], 12);
    records.extend(group("b", [10.0, 0.0, 0.0], 12));
    records.extend(group("noise", [20.0, 0.0, 0.0], 3));
    store.import_records("acme", &records).await.unwrap();

    let service = TaxonomyService::new(
        store.clone(),
        store.clone(),
        Arc::new(RecordingLabeler::default()),
    )
    .with_reducer(Arc::new(IdentityReducer::default()))
    .with_discoverer(Arc::new(AxisDiscoverer::default()))
    .with_defaults(small_config(1));

    let result = service.build("acme", None).await;
    assert_eq!(result.status, BuildStatus::Completed);
    assert_eq!(result.total_records, 27);
    assert_eq!(result.clustered_records, 24);
    assert_eq!(result.noise_records, 3);

    // A fresh handle sees what the build persisted
    let reopened = FileStore::new(dir.path());
    let topics = reopened.list_topics("acme").await.unwrap();
    assert_eq!(topics.len(), 2);
    let assignments = reopened.assignments("acme").await.unwrap();
    assert_eq!(assignments.len(), 24);
    assert!(!assignments.contains_key(&RecordId::from("noise-0")));
    assert!(
        assignments
            .values()
            .all(|a| topics.iter().any(|t| t.id == a.topic_id))
    );
}
