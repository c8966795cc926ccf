//! Recursive hierarchical clustering.
//!
//! Each call clusters one population at one level, labels and persists every
//! cluster it finds, and recurses into clusters large enough to subdivide.
//! The tree is built depth-first; within a level, clusters are handled in
//! discovery order. A failing branch yields no topics but never stops its
//! siblings. Only store failures and cancellation end the whole build.
//!
//! Cancellation takes effect between steps. Saving a topic and assigning its
//! members is one step: once started it runs to completion.

use super::levels::LevelParams;
use crate::clustering::{
    Cluster, ClusterDiscoverer, ClusteringResult, DimensionReducer, closest_to_centroid,
    discover_clusters, reduce_vectors,
};
use crate::config::{ClusterConfig, ConfidenceMode, MIN_POPULATION};
use crate::error::{BuildError, ClusteringError, LabelError, StoreError};
use crate::labeling::{LabelContext, Labeler, fallback_label};
use crate::store::TopicStore;
use crate::types::{NewTopic, RecordBatch, RecordId, TopicId, TopicResult};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives `(fraction, message)` as level-1 clusters complete.
pub type ProgressFn = Arc<dyn Fn(f32, String) + Send + Sync>;

/// One node's working set.
#[derive(Debug, Clone)]
pub struct LevelInput {
    pub batch: RecordBatch,
    pub parent_id: Option<TopicId>,
    pub parent_title: Option<String>,
    /// Titles from the root to the parent's parent
    pub ancestors: Vec<String>,
    pub level: u32,
}

impl LevelInput {
    /// The root call: the full batch at level 1.
    pub fn root(batch: RecordBatch) -> Self {
        Self {
            batch,
            parent_id: None,
            parent_title: None,
            ancestors: Vec::new(),
            level: 1,
        }
    }

    /// Input for a child of the topic `(topic_id, title)` created from this input.
    fn child(&self, batch: RecordBatch, topic_id: TopicId, title: &str) -> Self {
        let mut ancestors = self.ancestors.clone();
        if let Some(parent_title) = &self.parent_title {
            ancestors.push(parent_title.clone());
        }
        Self {
            batch,
            parent_id: Some(topic_id),
            parent_title: Some(title.to_string()),
            ancestors,
            level: self.level + 1,
        }
    }
}

/// Drives one build over a tenant's records.
pub struct Orchestrator {
    config: ClusterConfig,
    reducer: Arc<dyn DimensionReducer>,
    discoverer: Arc<dyn ClusterDiscoverer>,
    labeler: Arc<dyn Labeler>,
    store: Arc<dyn TopicStore>,
    cancel: CancellationToken,
    progress: Option<ProgressFn>,
}

impl Orchestrator {
    pub fn new(
        config: ClusterConfig,
        reducer: Arc<dyn DimensionReducer>,
        discoverer: Arc<dyn ClusterDiscoverer>,
        labeler: Arc<dyn Labeler>,
        store: Arc<dyn TopicStore>,
    ) -> Self {
        Self {
            config,
            reducer,
            discoverer,
            labeler,
            store,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Build the whole tree for `batch`.
    ///
    /// Returns every created topic, parents before their children.
    pub async fn run(&self, tenant: &str, batch: RecordBatch) -> Result<Vec<TopicResult>, BuildError> {
        self.build_level(tenant, LevelInput::root(batch)).await
    }

    fn check_cancelled(&self) -> Result<(), BuildError> {
        if self.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        Ok(())
    }

    /// Await `step` unless the build is cancelled first.
    async fn until_cancelled<T>(&self, step: impl Future<Output = T>) -> Result<T, BuildError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(BuildError::Cancelled),
            value = step => Ok(value),
        }
    }

    /// Cluster one population and recurse into its large clusters.
    pub fn build_level<'a>(
        &'a self,
        tenant: &'a str,
        input: LevelInput,
    ) -> BoxFuture<'a, Result<Vec<TopicResult>, BuildError>> {
        async move {
            self.check_cancelled()?;
            let level = input.level;
            let population = input.batch.len();
            if level > self.config.max_levels || population < MIN_POPULATION {
                debug!(tenant, level, population, "Branch below clustering threshold");
                return Ok(Vec::new());
            }

            let input_dim = input.batch.embeddings.first().map_or(0, Vec::len);
            let params = LevelParams::resolve(&self.config, level, population, input_dim);

            let (input, clustered) = self
                .until_cancelled(self.cluster_population(input, params))
                .await?;
            let (reduced, clustering) = match clustered {
                Ok(found) => found,
                Err(e) => {
                    warn!(tenant, level, population, error = %e, "Clustering failed, skipping branch");
                    return Ok(Vec::new());
                }
            };

            info!(
                tenant,
                level,
                population,
                clusters = clustering.num_clusters(),
                noise = clustering.noise_indices.len(),
                "Level clustered"
            );
            if clustering.num_clusters() == 0 {
                return Ok(Vec::new());
            }

            let total_clusters = clustering.num_clusters();
            let mut results = Vec::new();
            for (position, cluster) in clustering.clusters.iter().enumerate() {
                self.check_cancelled()?;

                let representatives =
                    closest_to_centroid(cluster, &reduced, self.config.representative_count);
                let texts: Vec<String> = representatives.into_iter().map(|r| r.text).collect();
                let context = LabelContext {
                    cluster_size: cluster.size,
                    level,
                    parent_title: input.parent_title.as_deref(),
                    ancestors: &input.ancestors,
                };

                let label = match self
                    .until_cancelled(self.labeler.label(&texts, &context))
                    .await?
                {
                    Ok(label) => label,
                    Err(e) => {
                        warn!(tenant, level, size = cluster.size, error = %e, "Labeling failed, using fallback label");
                        fallback_label(cluster.size)
                    }
                };
                let embedding = match self
                    .until_cancelled(self.labeler.embed(&label.title))
                    .await?
                {
                    Ok(embedding) => Some(embedding),
                    Err(LabelError::NotConfigured { .. }) => None,
                    Err(e) => {
                        warn!(tenant, title = %label.title, error = %e, "Title embedding failed");
                        None
                    }
                };

                self.check_cancelled()?;
                let new_topic = NewTopic {
                    title: label.title.clone(),
                    description: label.description.clone(),
                    level,
                    parent_id: input.parent_id,
                    cluster_size: cluster.size,
                    avg_distance: cluster.avg_distance,
                    embedding,
                };
                let members = self.member_confidences(cluster, &clustering);
                let topic_id = self.persist_topic(tenant, new_topic, members).await?;

                info!(tenant, level, size = cluster.size, title = %label.title, "Topic created");
                results.push(TopicResult {
                    topic_id,
                    title: label.title.clone(),
                    description: label.description,
                    level,
                    parent_id: input.parent_id,
                    cluster_size: cluster.size,
                    avg_distance: cluster.avg_distance,
                });

                if params.should_subdivide(self.config.max_levels, cluster.size, population) {
                    let child_batch = input.batch.select(&cluster.member_indices);
                    let child = input.child(child_batch, topic_id, &label.title);
                    results.extend(self.build_level(tenant, child).await?);
                }

                if level == 1 {
                    self.report_progress(position + 1, total_clusters, &label.title);
                }
            }

            Ok(results)
        }
        .boxed()
    }

    /// Save a topic and assign its members.
    ///
    /// Runs on its own task, so the pair completes even if the build future
    /// is dropped while waiting on it.
    async fn persist_topic(
        &self,
        tenant: &str,
        topic: NewTopic,
        members: Vec<(RecordId, f32)>,
    ) -> Result<TopicId, BuildError> {
        let store = Arc::clone(&self.store);
        let tenant = tenant.to_string();
        let title = topic.title.clone();
        let task_title = title.clone();

        let task = tokio::spawn(async move {
            let topic_id = store
                .save_topic(&tenant, topic)
                .await
                .map_err(|source| BuildError::SaveTopic {
                    title: task_title.clone(),
                    source,
                })?;
            store
                .assign_records(&tenant, topic_id, &members)
                .await
                .map_err(|source| BuildError::AssignRecords {
                    title: task_title,
                    source,
                })?;
            Ok(topic_id)
        });

        task.await.map_err(|e| BuildError::SaveTopic {
            title,
            source: StoreError::General(e.to_string()),
        })?
    }

    /// Reduce then discover on a blocking worker.
    ///
    /// The input is handed back so the caller keeps ownership of the batch.
    async fn cluster_population(
        &self,
        input: LevelInput,
        params: LevelParams,
    ) -> (LevelInput, Result<(Vec<Vec<f32>>, ClusteringResult), ClusteringError>) {
        let reducer = Arc::clone(&self.reducer);
        let discoverer = Arc::clone(&self.discoverer);
        // Kept aside in case the worker panics and takes the batch with it
        let fallback = LevelInput {
            batch: RecordBatch::default(),
            parent_id: input.parent_id,
            parent_title: input.parent_title.clone(),
            ancestors: input.ancestors.clone(),
            level: input.level,
        };

        let joined = tokio::task::spawn_blocking(move || {
            let outcome = reduce_vectors(reducer.as_ref(), &input.batch.embeddings, &params.reduction)
                .and_then(|reduced| {
                    let clustering = discover_clusters(
                        discoverer.as_ref(),
                        &reduced,
                        &input.batch.ids,
                        &input.batch.texts,
                        &params.discovery,
                    )?;
                    Ok((reduced, clustering))
                });
            (input, outcome)
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(e) => (fallback, Err(ClusteringError::from(e))),
        }
    }

    fn member_confidences(
        &self,
        cluster: &Cluster,
        clustering: &ClusteringResult,
    ) -> Vec<(RecordId, f32)> {
        let heuristic = cluster.confidence();
        cluster
            .member_indices
            .iter()
            .zip(&cluster.member_ids)
            .map(|(&index, id)| {
                let confidence = match self.config.confidence_mode {
                    ConfidenceMode::CentroidDistance => heuristic,
                    ConfidenceMode::MembershipProbability => clustering
                        .probabilities
                        .get(index)
                        .copied()
                        .unwrap_or(heuristic),
                };
                (id.clone(), confidence)
            })
            .collect()
    }

    fn report_progress(&self, done: usize, total: usize, title: &str) {
        if let Some(progress) = &self.progress {
            let fraction = done as f32 / total.max(1) as f32;
            progress(fraction, format!("Built topic {done}/{total}: {title}"));
        }
    }
}
