//! Tenant-level build entry points.

use super::jobs::JobRegistry;
use super::orchestrator::{Orchestrator, ProgressFn};
use crate::clustering::{ClusterDiscoverer, DimensionReducer, HdbscanDiscoverer, UmapReducer};
use crate::config::ClusterConfig;
use crate::error::BuildError;
use crate::labeling::Labeler;
use crate::store::{RecordSource, TopicStore};
use crate::types::{BuildResult, BuildStatus, JobStatus, Topic, TopicResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How long a timed-out build may take to reach its next step.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

type RunningBuilds = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Runs builds for any number of tenants, one at a time per tenant.
///
/// Clones share the job registry, the per-tenant guards and the shutdown
/// token.
#[derive(Clone)]
pub struct TaxonomyService {
    source: Arc<dyn RecordSource>,
    store: Arc<dyn TopicStore>,
    labeler: Arc<dyn Labeler>,
    reducer: Arc<dyn DimensionReducer>,
    discoverer: Arc<dyn ClusterDiscoverer>,
    defaults: ClusterConfig,
    build_timeout: Option<Duration>,
    cancel_grace: Duration,
    /// Guards of tenants with a build in flight
    running: RunningBuilds,
    jobs: JobRegistry,
    shutdown: CancellationToken,
}

impl TaxonomyService {
    pub fn new(
        source: Arc<dyn RecordSource>,
        store: Arc<dyn TopicStore>,
        labeler: Arc<dyn Labeler>,
    ) -> Self {
        Self {
            source,
            store,
            labeler,
            reducer: Arc::new(UmapReducer::new()),
            discoverer: Arc::new(HdbscanDiscoverer::new()),
            defaults: ClusterConfig::default(),
            build_timeout: None,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            running: Arc::new(DashMap::new()),
            jobs: JobRegistry::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_reducer(mut self, reducer: Arc<dyn DimensionReducer>) -> Self {
        self.reducer = reducer;
        self
    }

    pub fn with_discoverer(mut self, discoverer: Arc<dyn ClusterDiscoverer>) -> Self {
        self.discoverer = discoverer;
        self
    }

    /// Configuration used when a build request carries none.
    pub fn with_defaults(mut self, defaults: ClusterConfig) -> Self {
        self.defaults = defaults;
        self
    }

    /// Abort builds that run longer than `timeout`. `None` disables the limit.
    pub fn with_build_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.build_timeout = timeout;
        self
    }

    /// Time a build gets after its deadline to stop at a step boundary.
    ///
    /// A build still running after that is dropped. Topic writes already in
    /// progress finish regardless.
    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Builds observe this token and stop at their next step once it fires.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn defaults(&self) -> &ClusterConfig {
        &self.defaults
    }

    pub fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    /// Topics currently stored for `tenant`.
    pub async fn topics(&self, tenant: &str) -> Result<Vec<Topic>, crate::error::StoreError> {
        self.store.list_topics(tenant).await
    }

    /// Rebuild the taxonomy of `tenant` and wait for the outcome.
    ///
    /// Never fails: every error is reported as a [`BuildStatus::Failed`] result.
    pub async fn build(&self, tenant: &str, config: Option<ClusterConfig>) -> BuildResult {
        let job_id = Uuid::new_v4().to_string();
        self.build_job(tenant, &job_id, config, None).await
    }

    /// Start a build in the background and return its pending status.
    pub fn submit(&self, tenant: &str, config: Option<ClusterConfig>) -> JobStatus {
        let job = self.jobs.create(tenant);
        let service = self.clone();
        let tenant = tenant.to_string();
        let job_id = job.job_id.clone();

        tokio::spawn(async move {
            service.jobs.set_running(&job_id);
            let registry = service.jobs.clone();
            let progress_job = job_id.clone();
            let progress: ProgressFn = Arc::new(move |fraction, message| {
                registry.set_progress(&progress_job, fraction, message);
            });
            let result = service
                .build_job(&tenant, &job_id, config, Some(progress))
                .await;
            service.jobs.finish(&job_id, result);
        });

        job
    }

    async fn build_job(
        &self,
        tenant: &str,
        job_id: &str,
        config: Option<ClusterConfig>,
        progress: Option<ProgressFn>,
    ) -> BuildResult {
        let started_at = Utc::now();
        let config = config.unwrap_or_else(|| self.defaults.clone());
        info!(tenant, job_id, max_levels = config.max_levels, "Build started");

        match self
            .guarded_build(tenant, job_id, config, progress, started_at)
            .await
        {
            Ok(result) => {
                info!(
                    tenant,
                    job_id,
                    total = result.total_records,
                    clustered = result.clustered_records,
                    noise = result.noise_records,
                    topics = result.topics.len(),
                    "Build completed"
                );
                result
            }
            Err(e) => {
                error!(tenant, job_id, code = %e.status_code(), error = %e, "Build failed");
                BuildResult::failed(tenant, job_id, started_at, &e)
            }
        }
    }

    async fn guarded_build(
        &self,
        tenant: &str,
        job_id: &str,
        config: ClusterConfig,
        progress: Option<ProgressFn>,
        started_at: DateTime<Utc>,
    ) -> Result<BuildResult, BuildError> {
        config.validate()?;

        let _slot = TenantSlot::acquire(&self.running, tenant)?;

        let cancel = self.shutdown.child_token();
        let run = self.run_build(tenant, job_id, config, progress, started_at, cancel.clone());
        let Some(limit) = self.build_timeout else {
            return run.await;
        };
        tokio::pin!(run);

        tokio::select! {
            result = &mut run => result,
            () = tokio::time::sleep(limit) => {
                warn!(tenant, job_id, "Build deadline reached, stopping at the next step");
                cancel.cancel();
                let timed_out = BuildError::TimedOut {
                    secs: limit.as_secs(),
                };
                match tokio::time::timeout(self.cancel_grace, &mut run).await {
                    Ok(Err(BuildError::Cancelled)) | Err(_) => Err(timed_out),
                    Ok(other) => other,
                }
            }
        }
    }

    async fn run_build(
        &self,
        tenant: &str,
        job_id: &str,
        config: ClusterConfig,
        progress: Option<ProgressFn>,
        started_at: DateTime<Utc>,
        cancel: CancellationToken,
    ) -> Result<BuildResult, BuildError> {
        // Load before clearing so a failed load keeps the previous taxonomy
        let batch = self
            .source
            .load_records(tenant, config.max_embeddings)
            .await
            .map_err(|source| BuildError::LoadRecords {
                tenant: tenant.to_string(),
                source,
            })?;
        info!(tenant, records = batch.len(), "Records loaded");

        let cleared = self
            .store
            .clear_all_topics(tenant)
            .await
            .map_err(|source| BuildError::ClearTopics {
                tenant: tenant.to_string(),
                source,
            })?;
        info!(tenant, cleared, "Existing topics cleared");

        let total_records = batch.len();
        let topics = if batch.is_empty() {
            Vec::new()
        } else {
            let mut orchestrator = Orchestrator::new(
                config,
                Arc::clone(&self.reducer),
                Arc::clone(&self.discoverer),
                Arc::clone(&self.labeler),
                Arc::clone(&self.store),
            )
            .with_cancellation(cancel);
            if let Some(progress) = progress {
                orchestrator = orchestrator.with_progress(progress);
            }
            orchestrator.run(tenant, batch).await?
        };

        Ok(summarize(tenant, job_id, total_records, topics, started_at))
    }
}

/// Exclusive build slot of one tenant.
///
/// Dropping the slot releases the lock and removes the tenant's entry when
/// no other caller is waiting on it.
struct TenantSlot<'a> {
    running: &'a DashMap<String, Arc<Mutex<()>>>,
    tenant: String,
    permit: Option<OwnedMutexGuard<()>>,
}

impl<'a> TenantSlot<'a> {
    fn acquire(running: &'a DashMap<String, Arc<Mutex<()>>>, tenant: &str) -> Result<Self, BuildError> {
        let lock = Arc::clone(
            running
                .entry(tenant.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let permit = lock
            .try_lock_owned()
            .map_err(|_| BuildError::AlreadyRunning {
                tenant: tenant.to_string(),
            })?;
        Ok(Self {
            running,
            tenant: tenant.to_string(),
            permit: Some(permit),
        })
    }
}

impl Drop for TenantSlot<'_> {
    fn drop(&mut self) {
        self.permit.take();
        self.running
            .remove_if(&self.tenant, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Completed result from the flat topic list of a build.
///
/// Level-1 topics partition the clustered records, so their sizes add up to
/// the clustered count.
fn summarize(
    tenant: &str,
    job_id: &str,
    total_records: usize,
    topics: Vec<TopicResult>,
    started_at: DateTime<Utc>,
) -> BuildResult {
    let roots = topics.iter().filter(|t| t.level == 1);
    let num_clusters = roots.clone().count();
    let clustered_records: usize = roots.map(|t| t.cluster_size).sum();

    BuildResult {
        tenant_id: tenant.to_string(),
        job_id: job_id.to_string(),
        status: BuildStatus::Completed,
        total_records,
        clustered_records,
        noise_records: total_records.saturating_sub(clustered_records),
        num_clusters,
        topics,
        started_at,
        completed_at: Some(Utc::now()),
        error_code: None,
        error_message: None,
    }
}
