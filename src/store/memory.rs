use super::{Assignment, RecordSource, StoredRecord, TopicStore, newest_first, validate_tenant};
use crate::error::{StoreError, StoreResult};
use crate::types::{NewTopic, RecordBatch, RecordId, Topic, TopicId};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// In-process store for records, topics and assignments.
///
/// Clones share the same underlying maps.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<String, Vec<StoredRecord>>>,
    topics: Arc<DashMap<String, Vec<Topic>>>,
    assignments: Arc<DashMap<String, HashMap<RecordId, Assignment>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_records(
        &self,
        tenant: &str,
        records: impl IntoIterator<Item = StoredRecord>,
    ) -> StoreResult<usize> {
        validate_tenant(tenant)?;
        let mut entry = self.records.entry(tenant.to_string()).or_default();
        let before = entry.len();
        entry.extend(records);
        Ok(entry.len() - before)
    }

    pub fn record_count(&self, tenant: &str) -> usize {
        self.records.get(tenant).map(|r| r.len()).unwrap_or_default()
    }

    pub fn assignment(&self, tenant: &str, record_id: &RecordId) -> Option<Assignment> {
        self.assignments
            .get(tenant)
            .and_then(|a| a.get(record_id).copied())
    }

    pub fn assignments(&self, tenant: &str) -> HashMap<RecordId, Assignment> {
        self.assignments
            .get(tenant)
            .map(|a| a.clone())
            .unwrap_or_default()
    }

    fn has_topic(&self, tenant: &str, topic_id: TopicId) -> bool {
        self.topics
            .get(tenant)
            .is_some_and(|topics| topics.iter().any(|t| t.id == topic_id))
    }
}

#[async_trait]
impl RecordSource for MemoryStore {
    async fn load_records(&self, tenant: &str, limit: usize) -> StoreResult<RecordBatch> {
        validate_tenant(tenant)?;
        Ok(self
            .records
            .get(tenant)
            .map(|records| newest_first(&records, limit))
            .unwrap_or_default())
    }
}

#[async_trait]
impl TopicStore for MemoryStore {
    async fn clear_all_topics(&self, tenant: &str) -> StoreResult<u64> {
        validate_tenant(tenant)?;
        self.assignments.remove(tenant);
        let removed = self
            .topics
            .remove(tenant)
            .map(|(_, topics)| topics.len() as u64)
            .unwrap_or_default();
        Ok(removed)
    }

    async fn save_topic(&self, tenant: &str, topic: NewTopic) -> StoreResult<TopicId> {
        validate_tenant(tenant)?;
        let id = TopicId::new();
        self.topics
            .entry(tenant.to_string())
            .or_default()
            .push(Topic::from_new(id, tenant, topic));
        Ok(id)
    }

    async fn update_record_topic(
        &self,
        tenant: &str,
        record_id: &RecordId,
        topic_id: TopicId,
        confidence: f32,
    ) -> StoreResult<()> {
        self.assign_records(tenant, topic_id, &[(record_id.clone(), confidence)])
            .await
    }

    async fn assign_records(
        &self,
        tenant: &str,
        topic_id: TopicId,
        members: &[(RecordId, f32)],
    ) -> StoreResult<()> {
        validate_tenant(tenant)?;
        if !self.has_topic(tenant, topic_id) {
            return Err(StoreError::TopicNotFound {
                tenant: tenant.to_string(),
                topic_id: topic_id.to_string(),
            });
        }
        let mut assignments = self.assignments.entry(tenant.to_string()).or_default();
        for (record_id, confidence) in members {
            assignments.insert(
                record_id.clone(),
                Assignment {
                    topic_id,
                    confidence: *confidence,
                },
            );
        }
        Ok(())
    }

    async fn list_topics(&self, tenant: &str) -> StoreResult<Vec<Topic>> {
        validate_tenant(tenant)?;
        Ok(self
            .topics
            .get(tenant)
            .map(|t| t.clone())
            .unwrap_or_default())
    }
}
