//! Shared fakes for integration tests.
//!
//! The scripted reducer and discoverer make cluster membership a function of
//! the record coordinates, so every test controls the tree it expects.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use taxonomist::clustering::{DiscoveryParams, Labeling, ReductionParams};
use taxonomist::labeling::{LabelContext, Labeler, TopicLabel};
use taxonomist::store::StoredRecord;
use taxonomist::{
    ClusterConfig, ClusterDiscoverer, ClusteringError, DimensionReducer, LabelError,
    LabelResult, MemoryStore, NewTopic, RecordBatch, RecordId, RecordSource, StoreError,
    StoreResult, TaxonomyService, Topic, TopicId, TopicStore,
};
use tokio::sync::Notify;

/// Coordinates the scripted discoverer groups on. Later coordinates are jitter.
pub const GROUP_AXES: usize = 3;

/// A record at `groups` (one value per grouping axis) with a little jitter.
pub fn grouped_record(id: &str, groups: [f32; GROUP_AXES], jitter: f32) -> StoredRecord {
    StoredRecord {
        id: RecordId::from(id),
        text: format!("record {id} about group {groups:?}"),
        embedding: vec![groups[0], groups[1], groups[2], jitter],
        created_at: None,
    }
}

/// `count` records sharing `groups`, ids prefixed with `prefix`.
pub fn group(prefix: &str, groups: [f32; GROUP_AXES], count: usize) -> Vec<StoredRecord> {
    (0..count)
        .map(|i| grouped_record(&format!("{prefix}-{i}"), groups, (i % 5) as f32 * 0.01))
        .collect()
}

/// Passes vectors through unchanged and remembers every population it saw.
#[derive(Default)]
pub struct IdentityReducer {
    pub calls: AtomicUsize,
    pub populations: Mutex<Vec<usize>>,
}

impl DimensionReducer for IdentityReducer {
    fn reduce(
        &self,
        vectors: &[Vec<f32>],
        _params: &ReductionParams,
    ) -> Result<Vec<Vec<f32>>, ClusteringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.populations.lock().push(vectors.len());
        Ok(vectors.to_vec())
    }
}

/// Groups points by the first grouping axis whose values differ.
///
/// Groups smaller than `min_cluster_size` are noise. Labels follow first
/// appearance. Members get probability 0.5.
#[derive(Default)]
pub struct AxisDiscoverer {
    pub calls: AtomicUsize,
    pub populations: Mutex<Vec<usize>>,
    pub params: Mutex<Vec<DiscoveryParams>>,
    /// Populations of this size fail with a worker error
    pub fail_on_population: Mutex<HashSet<usize>>,
}

impl AxisDiscoverer {
    pub fn failing_on(population: usize) -> Self {
        let discoverer = Self::default();
        discoverer.fail_on_population.lock().insert(population);
        discoverer
    }
}

impl ClusterDiscoverer for AxisDiscoverer {
    fn discover(
        &self,
        points: &[Vec<f32>],
        params: &DiscoveryParams,
    ) -> Result<Labeling, ClusteringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.populations.lock().push(points.len());
        self.params.lock().push(*params);
        if self.fail_on_population.lock().contains(&points.len()) {
            return Err(ClusteringError::Worker("scripted failure".to_string()));
        }

        let axis = (0..GROUP_AXES).find(|&axis| {
            points
                .iter()
                .any(|p| (p[axis] - points[0][axis]).abs() > f32::EPSILON)
        });
        let Some(axis) = axis else {
            return Ok(Labeling::all_noise(points.len()));
        };

        let keys: Vec<i64> = points.iter().map(|p| p[axis].round() as i64).collect();
        let mut sizes: BTreeMap<i64, usize> = BTreeMap::new();
        for key in &keys {
            *sizes.entry(*key).or_default() += 1;
        }

        let mut order: Vec<i64> = Vec::new();
        let mut labeling = Labeling::all_noise(points.len());
        for (i, key) in keys.iter().enumerate() {
            if sizes[key] < params.min_cluster_size {
                continue;
            }
            let label = match order.iter().position(|k| k == key) {
                Some(label) => label,
                None => {
                    order.push(*key);
                    order.len() - 1
                }
            };
            labeling.labels[i] = Some(label);
            labeling.probabilities[i] = 0.5;
        }
        Ok(labeling)
    }
}

/// One labeler call as observed by [`RecordingLabeler`].
#[derive(Debug, Clone, PartialEq)]
pub struct LabelCall {
    pub texts: usize,
    pub cluster_size: usize,
    pub level: u32,
    pub parent_title: Option<String>,
    pub ancestors: Vec<String>,
}

/// Names topics `L<level>-<n>` and records the context of every call.
#[derive(Default)]
pub struct RecordingLabeler {
    pub calls: Mutex<Vec<LabelCall>>,
    pub fail_labels: AtomicBool,
    pub fail_embeddings: AtomicBool,
}

impl RecordingLabeler {
    pub fn failing() -> Self {
        let labeler = Self::default();
        labeler.fail_labels.store(true, Ordering::SeqCst);
        labeler
    }
}

#[async_trait]
impl Labeler for RecordingLabeler {
    async fn label(&self, texts: &[String], context: &LabelContext<'_>) -> LabelResult<TopicLabel> {
        let mut calls = self.calls.lock();
        calls.push(LabelCall {
            texts: texts.len(),
            cluster_size: context.cluster_size,
            level: context.level,
            parent_title: context.parent_title.map(str::to_string),
            ancestors: context.ancestors.to_vec(),
        });
        if self.fail_labels.load(Ordering::SeqCst) {
            return Err(LabelError::Request("scripted failure".to_string()));
        }
        let n = calls.len();
        Ok(TopicLabel::new(
            format!("L{}-{n}", context.level),
            format!("{} items", context.cluster_size),
        ))
    }

    async fn embed(&self, text: &str) -> LabelResult<Vec<f32>> {
        if self.fail_embeddings.load(Ordering::SeqCst) {
            return Err(LabelError::Embedding("scripted failure".to_string()));
        }
        Ok(vec![text.len() as f32, 1.0])
    }
}

/// Blocks its first label call until released.
#[derive(Default)]
pub struct GatedLabeler {
    pub started: Notify,
    pub release: Notify,
    gated: AtomicBool,
}

#[async_trait]
impl Labeler for GatedLabeler {
    async fn label(&self, _texts: &[String], context: &LabelContext<'_>) -> LabelResult<TopicLabel> {
        if !self.gated.swap(true, Ordering::SeqCst) {
            self.started.notify_one();
            self.release.notified().await;
        }
        Ok(TopicLabel::new(format!("Gated {}", context.cluster_size), ""))
    }

    async fn embed(&self, _text: &str) -> LabelResult<Vec<f32>> {
        Err(LabelError::NotConfigured {
            reason: "no embeddings".to_string(),
        })
    }
}

/// Never answers within any reasonable timeout.
pub struct StallingLabeler;

#[async_trait]
impl Labeler for StallingLabeler {
    async fn label(&self, _texts: &[String], _context: &LabelContext<'_>) -> LabelResult<TopicLabel> {
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        Ok(TopicLabel::new("late", ""))
    }

    async fn embed(&self, _text: &str) -> LabelResult<Vec<f32>> {
        Ok(Vec::new())
    }
}

/// Record source whose loads always fail.
pub struct FailingSource;

#[async_trait]
impl RecordSource for FailingSource {
    async fn load_records(&self, _tenant: &str, _limit: usize) -> StoreResult<RecordBatch> {
        Err(StoreError::General("source unavailable".to_string()))
    }
}

/// Memory store that fails `save_topic` after `saves_allowed` successes.
pub struct FlakyStore {
    pub inner: MemoryStore,
    pub saves_allowed: usize,
    saves: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: MemoryStore, saves_allowed: usize) -> Self {
        Self {
            inner,
            saves_allowed,
            saves: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TopicStore for FlakyStore {
    async fn clear_all_topics(&self, tenant: &str) -> StoreResult<u64> {
        self.inner.clear_all_topics(tenant).await
    }

    async fn save_topic(&self, tenant: &str, topic: NewTopic) -> StoreResult<TopicId> {
        if self.saves.fetch_add(1, Ordering::SeqCst) >= self.saves_allowed {
            return Err(StoreError::General("disk full".to_string()));
        }
        self.inner.save_topic(tenant, topic).await
    }

    async fn update_record_topic(
        &self,
        tenant: &str,
        record_id: &RecordId,
        topic_id: TopicId,
        confidence: f32,
    ) -> StoreResult<()> {
        self.inner
            .update_record_topic(tenant, record_id, topic_id, confidence)
            .await
    }

    async fn list_topics(&self, tenant: &str) -> StoreResult<Vec<Topic>> {
        self.inner.list_topics(tenant).await
    }
}

/// Memory store that takes `delay` to assign each record.
pub struct SlowAssignStore {
    pub inner: MemoryStore,
    pub delay: std::time::Duration,
}

#[async_trait]
impl TopicStore for SlowAssignStore {
    async fn clear_all_topics(&self, tenant: &str) -> StoreResult<u64> {
        self.inner.clear_all_topics(tenant).await
    }

    async fn save_topic(&self, tenant: &str, topic: NewTopic) -> StoreResult<TopicId> {
        self.inner.save_topic(tenant, topic).await
    }

    async fn update_record_topic(
        &self,
        tenant: &str,
        record_id: &RecordId,
        topic_id: TopicId,
        confidence: f32,
    ) -> StoreResult<()> {
        tokio::time::sleep(self.delay).await;
        self.inner
            .update_record_topic(tenant, record_id, topic_id, confidence)
            .await
    }

    async fn list_topics(&self, tenant: &str) -> StoreResult<Vec<Topic>> {
        self.inner.list_topics(tenant).await
    }
}

/// Cluster config with small, explicit thresholds for scripted trees.
///
/// Discovery needs 5 members at every level; subdividing needs 20 at level 1
/// and 10 below it.
pub fn small_config(max_levels: u32) -> ClusterConfig {
    let mut config = ClusterConfig {
        max_levels,
        ..ClusterConfig::default()
    };
    config.level_hdbscan_min_cluster_sizes =
        (1..=4).map(|level| (level.to_string(), 5)).collect();
    config.level_min_cluster_sizes = [("1".to_string(), 20), ("2".to_string(), 10), ("3".to_string(), 10)]
        .into_iter()
        .collect();
    config
}

/// Service over a memory store with scripted reduction and discovery.
pub struct Harness {
    pub store: MemoryStore,
    pub reducer: Arc<IdentityReducer>,
    pub discoverer: Arc<AxisDiscoverer>,
    pub labeler: Arc<RecordingLabeler>,
    pub service: TaxonomyService,
}

impl Harness {
    pub fn new(config: ClusterConfig) -> Self {
        Self::with_parts(config, AxisDiscoverer::default(), RecordingLabeler::default())
    }

    pub fn with_parts(
        config: ClusterConfig,
        discoverer: AxisDiscoverer,
        labeler: RecordingLabeler,
    ) -> Self {
        let store = MemoryStore::new();
        let reducer = Arc::new(IdentityReducer::default());
        let discoverer = Arc::new(discoverer);
        let labeler = Arc::new(labeler);
        let service = TaxonomyService::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            labeler.clone(),
        )
        .with_reducer(reducer.clone())
        .with_discoverer(discoverer.clone())
        .with_defaults(config);

        Self {
            store,
            reducer,
            discoverer,
            labeler,
            service,
        }
    }

    pub fn insert(&self, tenant: &str, records: Vec<StoredRecord>) {
        self.store
            .insert_records(tenant, records)
            .expect("valid tenant");
    }
}
