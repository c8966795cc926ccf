//! In-process registry of submitted builds.

use crate::types::{BuildResult, BuildStatus, JobStatus};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

/// Jobs kept before the oldest finished ones are evicted.
pub const DEFAULT_JOB_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<String, JobStatus>,
    /// Job ids in submission order
    order: VecDeque<String>,
    latest: HashMap<String, String>,
}

/// Tracks build jobs by id and the latest job of each tenant.
///
/// Every state transition is one write-locked update, so readers never see
/// a job between states.
#[derive(Debug, Clone)]
pub struct JobRegistry {
    inner: Arc<RwLock<Inner>>,
    capacity: usize,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_JOB_CAPACITY)
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            capacity: capacity.max(1),
        }
    }

    /// Register a pending job and return its status.
    pub fn create(&self, tenant: &str) -> JobStatus {
        let status = JobStatus {
            job_id: Uuid::new_v4().to_string(),
            tenant_id: tenant.to_string(),
            status: BuildStatus::Pending,
            progress: 0.0,
            message: "Queued".to_string(),
            result: None,
        };

        let mut inner = self.inner.write();
        inner.order.push_back(status.job_id.clone());
        inner.latest.insert(tenant.to_string(), status.job_id.clone());
        inner.jobs.insert(status.job_id.clone(), status.clone());
        Self::evict(&mut inner, self.capacity);
        status
    }

    pub fn set_running(&self, job_id: &str) {
        self.update(job_id, |job| {
            job.status = BuildStatus::Running;
            job.message = "Building taxonomy".to_string();
        });
    }

    /// Record progress of a running job. Terminal jobs are left alone.
    pub fn set_progress(&self, job_id: &str, progress: f32, message: String) {
        self.update(job_id, |job| {
            if !job.status.is_terminal() {
                job.progress = progress.clamp(0.0, 1.0);
                job.message = message;
            }
        });
    }

    /// Move a job to the terminal status carried by `result`.
    pub fn finish(&self, job_id: &str, result: BuildResult) {
        self.update(job_id, |job| {
            job.status = result.status;
            job.progress = 1.0;
            job.message = match &result.error_message {
                Some(message) => message.clone(),
                None => format!("Created {} topics", result.topics.len()),
            };
            job.result = Some(result);
        });
    }

    /// The job with `job_id`, if it belongs to `tenant`.
    pub fn get(&self, tenant: &str, job_id: &str) -> Option<JobStatus> {
        self.inner
            .read()
            .jobs
            .get(job_id)
            .filter(|job| job.tenant_id == tenant)
            .cloned()
    }

    /// Most recently submitted job of `tenant`.
    pub fn latest(&self, tenant: &str) -> Option<JobStatus> {
        let inner = self.inner.read();
        inner
            .latest
            .get(tenant)
            .and_then(|job_id| inner.jobs.get(job_id))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, job_id: &str, apply: impl FnOnce(&mut JobStatus)) {
        if let Some(job) = self.inner.write().jobs.get_mut(job_id) {
            apply(job);
        }
    }

    /// Drop the oldest finished jobs until the registry fits its capacity.
    /// Unfinished jobs are never evicted.
    fn evict(inner: &mut Inner, capacity: usize) {
        let mut index = 0;
        while inner.jobs.len() > capacity && index < inner.order.len() {
            let terminal = inner
                .jobs
                .get(&inner.order[index])
                .is_none_or(|job| job.status.is_terminal());
            if !terminal {
                index += 1;
                continue;
            }
            if let Some(job_id) = inner.order.remove(index) {
                if let Some(job) = inner.jobs.remove(&job_id) {
                    if inner.latest.get(&job.tenant_id) == Some(&job_id) {
                        inner.latest.remove(&job.tenant_id);
                    }
                }
            }
        }
    }
}
