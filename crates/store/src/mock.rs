//! In-memory persistence sink for testing.

use crate::error::{ErrorKind, Result};
use crate::models::{Batch, CacheRecord, CheckpointRecord, FileRecord, FolderRecord, RecordKind};
use crate::sink::PersistenceSink;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// In-memory persistence sink for testing.
///
/// Everything is kept in maps behind [`RwLock`]s so all trait methods work on
/// `&self`. Failures can be injected per record id or per concern, and every
/// `upsert_batch` call is recorded so tests can assert on batch sizes.
///
/// # Examples
///
/// ```
/// use rove_store::{Batch, MockSink, PersistenceSink};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let sink = MockSink::default();
/// sink.upsert_batch(&Batch::Folders(vec![])).await.unwrap();
/// assert_eq!(sink.upsert_calls().await.len(), 1);
/// # }
/// ```
#[derive(Default)]
pub struct MockSink {
    folders: RwLock<BTreeMap<String, FolderRecord>>,
    files: RwLock<BTreeMap<String, FileRecord>>,
    checkpoints: RwLock<BTreeMap<(String, String), CheckpointRecord>>,
    cache: RwLock<HashMap<String, CacheRecord>>,
    calls: RwLock<Vec<(RecordKind, usize)>>,
    failing_ids: RwLock<HashSet<String>>,
    fail_records: AtomicBool,
    fail_checkpoints: AtomicBool,
    fail_cache: AtomicBool,
    checkpoint_writes: AtomicU64,
}

impl MockSink {
    /// Any batch containing one of these ids fails as a whole, and so does
    /// the single-record retry for that id.
    pub async fn fail_on_ids(&self, ids: impl IntoIterator<Item = impl Into<String>>) {
        self.failing_ids.write().await.extend(ids.into_iter().map(Into::into));
    }

    /// Make every record upsert fail, as if the database had gone away.
    pub fn set_fail_records(&self, fail: bool) {
        self.fail_records.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_checkpoints(&self, fail: bool) {
        self.fail_checkpoints.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_cache(&self, fail: bool) {
        self.fail_cache.store(fail, Ordering::SeqCst);
    }

    /// Every `upsert_batch` call made so far, as `(kind, batch length)`.
    pub async fn upsert_calls(&self) -> Vec<(RecordKind, usize)> {
        self.calls.read().await.clone()
    }

    pub async fn folder_count(&self) -> usize {
        self.folders.read().await.len()
    }

    pub async fn file_count(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn folder(&self, id: &str) -> Option<FolderRecord> {
        self.folders.read().await.get(id).cloned()
    }

    pub async fn file(&self, id: &str) -> Option<FileRecord> {
        self.files.read().await.get(id).cloned()
    }

    /// Number of checkpoint rows written (each record of a batch counts once).
    pub fn checkpoint_writes(&self) -> u64 {
        self.checkpoint_writes.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceSink for MockSink {
    fn name(&self) -> &str {
        "mock"
    }

    async fn upsert_batch(&self, batch: &Batch) -> Result<u64> {
        self.calls.write().await.push((batch.kind(), batch.len()));
        self.check(&self.fail_records)?;
        {
            let failing = self.failing_ids.read().await;
            if batch.ids().iter().any(|id| failing.contains(*id)) {
                exn::bail!(ErrorKind::Database);
            }
        }
        match batch {
            Batch::Folders(records) => {
                let mut folders = self.folders.write().await;
                for record in records {
                    folders.insert(record.id.clone(), record.clone());
                }
            },
            Batch::Files(records) => {
                let mut files = self.files.write().await;
                for record in records {
                    files.insert(record.id.clone(), record.clone());
                }
            },
        }
        Ok(batch.len() as u64)
    }

    async fn get_checkpoint(&self, run_id: &str, checkpoint_type: &str) -> Result<Option<CheckpointRecord>> {
        self.check(&self.fail_checkpoints)?;
        let key = (run_id.to_string(), checkpoint_type.to_string());
        Ok(self.checkpoints.read().await.get(&key).cloned())
    }

    async fn save_checkpoint(&self, record: &CheckpointRecord) -> Result<()> {
        self.check(&self.fail_checkpoints)?;
        let key = (record.run_id.clone(), record.checkpoint_type.clone());
        self.checkpoints.write().await.insert(key, record.clone());
        self.checkpoint_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_checkpoints(&self, run_id: &str, prefix: &str) -> Result<Vec<CheckpointRecord>> {
        self.check(&self.fail_checkpoints)?;
        Ok(self
            .checkpoints
            .read()
            .await
            .iter()
            .filter(|((run, kind), _)| run == run_id && kind.starts_with(prefix))
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn delete_checkpoints_before(&self, cutoff: OffsetDateTime) -> Result<u64> {
        self.check(&self.fail_checkpoints)?;
        let mut checkpoints = self.checkpoints.write().await;
        let before = checkpoints.len();
        checkpoints.retain(|_, record| record.saved_at >= cutoff);
        Ok((before - checkpoints.len()) as u64)
    }

    async fn get_cache_entry(&self, key: &str) -> Result<Option<CacheRecord>> {
        self.check(&self.fail_cache)?;
        Ok(self.cache.read().await.get(key).cloned())
    }

    async fn set_cache_entry(&self, key: &str, value: &Value, expires_at: Option<OffsetDateTime>) -> Result<()> {
        self.check(&self.fail_cache)?;
        let record = CacheRecord {
            key: key.to_string(),
            value: value.clone(),
            expires_at,
            created_at: OffsetDateTime::now_utc(),
        };
        self.cache.write().await.insert(key.to_string(), record);
        Ok(())
    }

    async fn delete_cache_entry(&self, key: &str) -> Result<bool> {
        self.check(&self.fail_cache)?;
        Ok(self.cache.write().await.remove(key).is_some())
    }

    async fn clear_cache(&self) -> Result<u64> {
        self.check(&self.fail_cache)?;
        let mut cache = self.cache.write().await;
        let removed = cache.len() as u64;
        cache.clear();
        Ok(removed)
    }

    async fn purge_expired_cache_entries(&self, now: OffsetDateTime) -> Result<u64> {
        self.check(&self.fail_cache)?;
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, record| !record.is_expired_at(now));
        Ok((before - cache.len()) as u64)
    }
}
