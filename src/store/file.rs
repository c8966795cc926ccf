//! JSON file store.
//!
//! Layout under the data directory, one directory per tenant:
//! - `records.jsonl`: imported records, one JSON object per line
//! - `topics.json`: the current taxonomy
//! - `assignments.json`: record id to deepest topic and confidence
//!
//! Writes go to a temporary sibling and are renamed into place. Operations
//! on one tenant are serialized; different tenants proceed independently.

use super::{Assignment, RecordSource, StoredRecord, TopicStore, newest_first, validate_tenant};
use crate::error::{StoreError, StoreResult};
use crate::types::{NewTopic, RecordBatch, RecordId, Topic, TopicId};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const RECORDS_FILE: &str = "records.jsonl";
const TOPICS_FILE: &str = "topics.json";
const ASSIGNMENTS_FILE: &str = "assignments.json";

/// Persists tenants as JSON documents on disk.
#[derive(Clone, Debug)]
pub struct FileStore {
    root: PathBuf,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn tenant_dir(&self, tenant: &str) -> StoreResult<PathBuf> {
        validate_tenant(tenant)?;
        Ok(self.root.join(tenant))
    }

    fn lock_for(&self, tenant: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(tenant.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Append records to the tenant's record file.
    pub async fn import_records(&self, tenant: &str, records: &[StoredRecord]) -> StoreResult<usize> {
        let dir = self.tenant_dir(tenant)?;
        let lock = self.lock_for(tenant);
        let _guard = lock.lock().await;

        create_dir(&dir).await?;
        let path = dir.join(RECORDS_FILE);
        let mut buffer = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buffer, record).map_err(|e| StoreError::Corrupted {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            buffer.push(b'\n');
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        file.write_all(&buffer)
            .await
            .map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        file.flush()
            .await
            .map_err(|source| StoreError::Write { path, source })?;
        Ok(records.len())
    }

    /// Record assignments of a tenant.
    pub async fn assignments(&self, tenant: &str) -> StoreResult<BTreeMap<RecordId, Assignment>> {
        let dir = self.tenant_dir(tenant)?;
        read_json_or_default(&dir.join(ASSIGNMENTS_FILE)).await
    }

    async fn read_records(&self, dir: &Path) -> StoreResult<Vec<StoredRecord>> {
        let path = dir.join(RECORDS_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(number, line)| {
                serde_json::from_str(line).map_err(|e| StoreError::Corrupted {
                    path: path.clone(),
                    reason: format!("line {}: {e}", number + 1),
                })
            })
            .collect()
    }
}

async fn create_dir(dir: &Path) -> StoreResult<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| StoreError::Write {
            path: dir.to_path_buf(),
            source,
        })
}

async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> StoreResult<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupted {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(source) => Err(StoreError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Write `value` next to `path` and rename it into place.
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::Corrupted {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|source| StoreError::Write {
            path: tmp.clone(),
            source,
        })?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl RecordSource for FileStore {
    async fn load_records(&self, tenant: &str, limit: usize) -> StoreResult<RecordBatch> {
        let dir = self.tenant_dir(tenant)?;
        let lock = self.lock_for(tenant);
        let _guard = lock.lock().await;
        let records = self.read_records(&dir).await?;
        Ok(newest_first(&records, limit))
    }
}

#[async_trait]
impl TopicStore for FileStore {
    async fn clear_all_topics(&self, tenant: &str) -> StoreResult<u64> {
        let dir = self.tenant_dir(tenant)?;
        let lock = self.lock_for(tenant);
        let _guard = lock.lock().await;

        let topics: Vec<Topic> = read_json_or_default(&dir.join(TOPICS_FILE)).await?;
        write_json_atomic(
            &dir.join(ASSIGNMENTS_FILE),
            &BTreeMap::<RecordId, Assignment>::new(),
        )
        .await?;
        write_json_atomic(&dir.join(TOPICS_FILE), &Vec::<Topic>::new()).await?;
        Ok(topics.len() as u64)
    }

    async fn save_topic(&self, tenant: &str, topic: NewTopic) -> StoreResult<TopicId> {
        let dir = self.tenant_dir(tenant)?;
        let lock = self.lock_for(tenant);
        let _guard = lock.lock().await;

        let path = dir.join(TOPICS_FILE);
        let mut topics: Vec<Topic> = read_json_or_default(&path).await?;
        let id = TopicId::new();
        topics.push(Topic::from_new(id, tenant, topic));
        write_json_atomic(&path, &topics).await?;
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
        let dir = self.tenant_dir(tenant)?;
        let lock = self.lock_for(tenant);
        let _guard = lock.lock().await;

        let topics: Vec<Topic> = read_json_or_default(&dir.join(TOPICS_FILE)).await?;
        if !topics.iter().any(|t| t.id == topic_id) {
            return Err(StoreError::TopicNotFound {
                tenant: tenant.to_string(),
                topic_id: topic_id.to_string(),
            });
        }

        let path = dir.join(ASSIGNMENTS_FILE);
        let mut assignments: BTreeMap<RecordId, Assignment> = read_json_or_default(&path).await?;
        for (record_id, confidence) in members {
            assignments.insert(
                record_id.clone(),
                Assignment {
                    topic_id,
                    confidence: *confidence,
                },
            );
        }
        write_json_atomic(&path, &assignments).await
    }

    async fn list_topics(&self, tenant: &str) -> StoreResult<Vec<Topic>> {
        let dir = self.tenant_dir(tenant)?;
        let lock = self.lock_for(tenant);
        let _guard = lock.lock().await;
        read_json_or_default(&dir.join(TOPICS_FILE)).await
    }
}
