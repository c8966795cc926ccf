//! Core domain types shared by the store, orchestrator and surfaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of a source record, opaque to the taxonomy builder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of a persisted topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicId(Uuid);

impl TopicId {
    /// Allocate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TopicId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One input item: an embedding with the text it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub embedding: Vec<f32>,
    pub text: String,
}

/// The working population of one build, as parallel columns.
///
/// Column order is the record order used for every index handed around
/// during clustering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    pub ids: Vec<RecordId>,
    pub embeddings: Vec<Vec<f32>>,
    pub texts: Vec<String>,
}

impl RecordBatch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Gather the rows at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            ids: indices.iter().map(|&i| self.ids[i].clone()).collect(),
            embeddings: indices.iter().map(|&i| self.embeddings[i].clone()).collect(),
            texts: indices.iter().map(|&i| self.texts[i].clone()).collect(),
        }
    }
}

impl FromIterator<Record> for RecordBatch {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut batch = RecordBatch::default();
        for record in iter {
            batch.ids.push(record.id);
            batch.embeddings.push(record.embedding);
            batch.texts.push(record.text);
        }
        batch
    }
}

/// Topic fields supplied by the orchestrator when persisting a cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTopic {
    pub title: String,
    pub description: String,
    pub level: u32,
    pub parent_id: Option<TopicId>,
    pub cluster_size: usize,
    pub avg_distance: f32,
    pub embedding: Option<Vec<f32>>,
}

/// A persisted node of the taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: TopicId,
    pub tenant_id: String,
    pub title: String,
    pub description: String,
    pub level: u32,
    pub parent_id: Option<TopicId>,
    pub cluster_size: usize,
    pub avg_distance: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl Topic {
    pub fn from_new(id: TopicId, tenant_id: &str, topic: NewTopic) -> Self {
        Self {
            id,
            tenant_id: tenant_id.to_string(),
            title: topic.title,
            description: topic.description,
            level: topic.level,
            parent_id: topic.parent_id,
            cluster_size: topic.cluster_size,
            avg_distance: topic.avg_distance,
            embedding: topic.embedding,
            created_at: Utc::now(),
        }
    }
}

/// A topic as reported in a build result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicResult {
    pub topic_id: TopicId,
    pub title: String,
    pub description: String,
    pub level: u32,
    pub parent_id: Option<TopicId>,
    pub cluster_size: usize,
    pub avg_distance: f32,
}

/// Lifecycle of a build job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl BuildStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one build. Always carries a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResult {
    pub tenant_id: String,
    pub job_id: String,
    pub status: BuildStatus,
    pub total_records: usize,
    /// Records assigned to at least one topic
    pub clustered_records: usize,
    pub noise_records: usize,
    /// Level-1 topics
    pub num_clusters: usize,
    pub topics: Vec<TopicResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl BuildResult {
    /// A failed result with zero counts.
    pub fn failed(
        tenant_id: &str,
        job_id: &str,
        started_at: DateTime<Utc>,
        error: &crate::error::BuildError,
    ) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            job_id: job_id.to_string(),
            status: BuildStatus::Failed,
            total_records: 0,
            clustered_records: 0,
            noise_records: 0,
            num_clusters: 0,
            topics: Vec::new(),
            started_at,
            completed_at: Some(Utc::now()),
            error_code: Some(error.status_code()),
            error_message: Some(error.to_string()),
        }
    }
}

/// Progress snapshot of a submitted build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub tenant_id: String,
    pub status: BuildStatus,
    /// 0.0 to 1.0
    pub progress: f32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<BuildResult>,
}
