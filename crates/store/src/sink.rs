//! The persistence seam between discovery and storage.

use crate::error::Result;
use crate::models::{Batch, CacheRecord, CheckpointRecord};
use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;

/// Everything discovery needs to make progress durable.
///
/// Implementations must make [`upsert_batch`](Self::upsert_batch) idempotent:
/// records are keyed on their id, so persisting the same record twice leaves
/// exactly one row. Checkpoints are keyed on `(run_id, checkpoint_type)` and
/// cache entries on their (already namespaced) key; both overwrite on save.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Name of the sink (used for logging only).
    fn name(&self) -> &str;

    /// Insert-or-update every record in the batch.
    ///
    /// Returns the number of records saved. A failure means none of the batch
    /// should be assumed persisted; callers fall back to one record at a time.
    async fn upsert_batch(&self, batch: &Batch) -> Result<u64>;

    async fn get_checkpoint(&self, run_id: &str, checkpoint_type: &str) -> Result<Option<CheckpointRecord>>;

    async fn save_checkpoint(&self, record: &CheckpointRecord) -> Result<()>;

    /// Save several checkpoints at once.
    ///
    /// The default implementation saves them one after another; SQLite
    /// overrides this with a single transaction.
    async fn save_checkpoints(&self, records: &[CheckpointRecord]) -> Result<u64> {
        for record in records {
            self.save_checkpoint(record).await?;
        }
        Ok(records.len() as u64)
    }

    /// List every checkpoint of a run whose type starts with `prefix`.
    async fn list_checkpoints(&self, run_id: &str, prefix: &str) -> Result<Vec<CheckpointRecord>>;

    /// Retention sweep: remove every checkpoint saved before `cutoff`.
    async fn delete_checkpoints_before(&self, cutoff: OffsetDateTime) -> Result<u64>;

    /// Fetch a cache entry, expired or not. Expiry is the caller's concern.
    async fn get_cache_entry(&self, key: &str) -> Result<Option<CacheRecord>>;

    async fn set_cache_entry(&self, key: &str, value: &Value, expires_at: Option<OffsetDateTime>) -> Result<()>;

    /// Returns `true` if an entry was removed.
    async fn delete_cache_entry(&self, key: &str) -> Result<bool>;

    /// Remove every cache entry, returning how many were removed.
    async fn clear_cache(&self) -> Result<u64>;

    /// Remove cache entries whose expiry is at or before `now`.
    async fn purge_expired_cache_entries(&self, now: OffsetDateTime) -> Result<u64>;
}
