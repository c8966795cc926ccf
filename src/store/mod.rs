//! Record sources and topic persistence.
//!
//! [`RecordSource`] supplies the batch a build clusters; [`TopicStore`]
//! receives the resulting topics and record assignments. Both are keyed by
//! tenant. [`MemoryStore`] and [`FileStore`] implement both traits.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::{StoreError, StoreResult};
use crate::types::{NewTopic, Record, RecordBatch, RecordId, Topic, TopicId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record as imported, before it is reduced to a [`RecordBatch`] row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub text: String,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl From<Record> for StoredRecord {
    fn from(record: Record) -> Self {
        Self {
            id: record.id,
            text: record.text,
            embedding: record.embedding,
            created_at: Some(Utc::now()),
        }
    }
}

/// The deepest topic a record was assigned to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub topic_id: TopicId,
    pub confidence: f32,
}

/// Loads the records a build works on.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Up to `limit` records with a non-empty embedding and text, newest first.
    async fn load_records(&self, tenant: &str, limit: usize) -> StoreResult<RecordBatch>;
}

/// Durable home of a tenant's taxonomy.
#[async_trait]
pub trait TopicStore: Send + Sync {
    /// Remove every topic and record assignment of the tenant.
    ///
    /// Returns the number of topics removed.
    async fn clear_all_topics(&self, tenant: &str) -> StoreResult<u64>;

    /// Persist a topic and return its new identifier.
    async fn save_topic(&self, tenant: &str, topic: NewTopic) -> StoreResult<TopicId>;

    /// Point a record at a topic. Later calls for the same record win.
    async fn update_record_topic(
        &self,
        tenant: &str,
        record_id: &RecordId,
        topic_id: TopicId,
        confidence: f32,
    ) -> StoreResult<()>;

    /// Assign every `(record, confidence)` pair to `topic_id`.
    ///
    /// Stores with expensive writes override this to batch the update.
    async fn assign_records(
        &self,
        tenant: &str,
        topic_id: TopicId,
        members: &[(RecordId, f32)],
    ) -> StoreResult<()> {
        for (record_id, confidence) in members {
            self.update_record_topic(tenant, record_id, topic_id, *confidence)
                .await?;
        }
        Ok(())
    }

    /// All topics of the tenant in creation order.
    async fn list_topics(&self, tenant: &str) -> StoreResult<Vec<Topic>>;
}

/// Reject tenant identifiers that are unsafe as file names.
pub fn validate_tenant(tenant: &str) -> StoreResult<()> {
    let valid = !tenant.is_empty()
        && tenant.len() <= 128
        && tenant
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTenant(tenant.to_string()))
    }
}

/// Usable records, newest first, capped at `limit`.
///
/// Records without a timestamp count as older than any timestamped record;
/// among equals the later one in `records` is newer.
pub(crate) fn newest_first(records: &[StoredRecord], limit: usize) -> RecordBatch {
    let mut usable: Vec<(usize, &StoredRecord)> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.embedding.is_empty() && !r.text.trim().is_empty())
        .collect();
    usable.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at).then(b.0.cmp(&a.0)));
    usable
        .into_iter()
        .take(limit)
        .map(|(_, r)| Record {
            id: r.id.clone(),
            embedding: r.embedding.clone(),
            text: r.text.clone(),
        })
        .collect()
}
