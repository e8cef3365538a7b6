//! SQLite-backed persistence sink.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{Batch, CacheRecord, CheckpointRecord, FileRecord, FolderRecord, RecordKind};
use crate::rows::{CacheRow, CheckpointRow, FileRow, FolderRow, to_unix, to_unix_millis};
use crate::sink::PersistenceSink;
use async_trait::async_trait;
use exn::ResultExt;
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;

/// Repository for discovered records, checkpoints and persistent cache
/// entries in the audit database.
///
/// Every write is an upsert: records on their remote id, checkpoints on
/// `(run_id, checkpoint_type)`, cache entries on their key. Re-running
/// discovery over an unchanged tree therefore leaves the row counts alone.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn upsert_folder(conn: &mut SqliteConnection, folder: &FolderRecord) -> Result<()> {
        let row = FolderRow::from(folder);
        sqlx::query(include_str!("../queries/upsert_folder.sql"))
            .bind(row.id)
            .bind(row.site_id)
            .bind(row.library_id)
            .bind(row.parent_id)
            .bind(row.name)
            .bind(row.path)
            .bind(row.depth)
            .bind(row.has_unique_permissions)
            .bind(row.created_at)
            .bind(row.modified_at)
            .bind(row.discovered_at)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn upsert_file(conn: &mut SqliteConnection, file: &FileRecord) -> Result<()> {
        let row = FileRow::try_from(file)?;
        sqlx::query(include_str!("../queries/upsert_file.sql"))
            .bind(row.id)
            .bind(row.site_id)
            .bind(row.library_id)
            .bind(row.folder_id)
            .bind(row.name)
            .bind(row.path)
            .bind(row.size)
            .bind(row.content_type)
            .bind(row.has_unique_permissions)
            .bind(row.created_at)
            .bind(row.modified_at)
            .bind(row.discovered_at)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn upsert_checkpoint(conn: &mut SqliteConnection, record: &CheckpointRecord) -> Result<()> {
        let row = CheckpointRow::try_from(record)?;
        sqlx::query(include_str!("../queries/upsert_checkpoint.sql"))
            .bind(row.run_id)
            .bind(row.checkpoint_type)
            .bind(row.version)
            .bind(row.payload)
            .bind(row.saved_at)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Records
    // =========================================================================

    pub async fn get_folder(&self, id: impl AsRef<str>) -> Result<Option<FolderRecord>> {
        let row: Option<FolderRow> = sqlx::query_as(include_str!("../queries/get_folder.sql"))
            .bind(id.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(FolderRecord::try_from).transpose()
    }

    pub async fn get_file(&self, id: impl AsRef<str>) -> Result<Option<FileRecord>> {
        let row: Option<FileRow> = sqlx::query_as(include_str!("../queries/get_file.sql"))
            .bind(id.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(FileRecord::try_from).transpose()
    }

    /// Count the rows stored for a record kind.
    pub async fn count(&self, kind: RecordKind) -> Result<u64> {
        let query = match kind {
            RecordKind::Folder => include_str!("../queries/count_folders.sql"),
            RecordKind::File => include_str!("../queries/count_files.sql"),
        };
        let count: i64 = sqlx::query_scalar(query).fetch_one(&self.pool).await.or_raise(|| ErrorKind::Database)?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("row count"))
    }
}

#[async_trait]
impl PersistenceSink for Repository {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn upsert_batch(&self, batch: &Batch) -> Result<u64> {
        // One transaction per batch: either the whole batch lands or none of
        // it does, which is what the per-record fallback relies on.
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        match batch {
            Batch::Folders(folders) => {
                for folder in folders {
                    Self::upsert_folder(&mut tx, folder).await?;
                }
            },
            Batch::Files(files) => {
                for file in files {
                    Self::upsert_file(&mut tx, file).await?;
                }
            },
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(batch.len() as u64)
    }

    async fn get_checkpoint(&self, run_id: &str, checkpoint_type: &str) -> Result<Option<CheckpointRecord>> {
        let row: Option<CheckpointRow> = sqlx::query_as(include_str!("../queries/get_checkpoint.sql"))
            .bind(run_id)
            .bind(checkpoint_type)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CheckpointRecord::try_from).transpose()
    }

    async fn save_checkpoint(&self, record: &CheckpointRecord) -> Result<()> {
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        Self::upsert_checkpoint(&mut conn, record).await
    }

    async fn save_checkpoints(&self, records: &[CheckpointRecord]) -> Result<u64> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        for record in records {
            Self::upsert_checkpoint(&mut tx, record).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(records.len() as u64)
    }

    async fn list_checkpoints(&self, run_id: &str, prefix: &str) -> Result<Vec<CheckpointRecord>> {
        let rows: Vec<CheckpointRow> = sqlx::query_as(include_str!("../queries/list_checkpoints.sql"))
            .bind(run_id)
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(CheckpointRecord::try_from).collect()
    }

    async fn delete_checkpoints_before(&self, cutoff: OffsetDateTime) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/delete_checkpoints_before.sql"))
            .bind(to_unix(cutoff))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    async fn get_cache_entry(&self, key: &str) -> Result<Option<CacheRecord>> {
        let row: Option<CacheRow> = sqlx::query_as(include_str!("../queries/get_cache_entry.sql"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(CacheRecord::try_from).transpose()
    }

    async fn set_cache_entry(&self, key: &str, value: &Value, expires_at: Option<OffsetDateTime>) -> Result<()> {
        let value = serde_json::to_string(value).or_raise(|| ErrorKind::InvalidData("cache value"))?;
        let expires_at = expires_at.map(to_unix_millis).transpose()?;
        sqlx::query(include_str!("../queries/upsert_cache_entry.sql"))
            .bind(key)
            .bind(value)
            .bind(expires_at)
            .bind(to_unix(OffsetDateTime::now_utc()))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    async fn delete_cache_entry(&self, key: &str) -> Result<bool> {
        let result = sqlx::query(include_str!("../queries/delete_cache_entry.sql"))
            .bind(key)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_cache(&self) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/clear_cache.sql"))
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }

    async fn purge_expired_cache_entries(&self, now: OffsetDateTime) -> Result<u64> {
        let result = sqlx::query(include_str!("../queries/purge_expired_cache_entries.sql"))
            .bind(to_unix_millis(now)?)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::Duration;

    fn folder(id: &str, name: &str) -> FolderRecord {
        FolderRecord {
            id: id.to_string(),
            site_id: "site-1".to_string(),
            library_id: "lib-1".to_string(),
            parent_id: None,
            name: name.to_string(),
            path: format!("/{name}"),
            depth: 1,
            has_unique_permissions: false,
            created_at: None,
            modified_at: None,
            discovered_at: OffsetDateTime::now_utc(),
        }
    }

    fn file(id: &str, size: u64) -> FileRecord {
        FileRecord {
            id: id.to_string(),
            site_id: "site-1".to_string(),
            library_id: "lib-1".to_string(),
            folder_id: Some("folder-1".to_string()),
            name: format!("{id}.docx"),
            path: format!("/Finance/{id}.docx"),
            size,
            content_type: Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document".to_string()),
            has_unique_permissions: false,
            created_at: None,
            modified_at: None,
            discovered_at: OffsetDateTime::now_utc(),
        }
    }

    async fn repo() -> Repository {
        let db = Database::connect_in_memory().await.unwrap();
        Repository::from(&db)
    }

    #[tokio::test]
    async fn test_upsert_batch_is_idempotent() {
        let repo = repo().await;
        let batch = Batch::Folders(vec![folder("a", "Finance"), folder("b", "Legal")]);
        assert_eq!(repo.upsert_batch(&batch).await.unwrap(), 2);
        assert_eq!(repo.upsert_batch(&batch).await.unwrap(), 2);
        assert_eq!(repo.count(RecordKind::Folder).await.unwrap(), 2);
        assert_eq!(repo.count(RecordKind::File).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upsert_updates_existing_row() {
        let repo = repo().await;
        repo.upsert_batch(&Batch::Files(vec![file("x", 10)])).await.unwrap();
        repo.upsert_batch(&Batch::Files(vec![file("x", 20)])).await.unwrap();
        let stored = repo.get_file("x").await.unwrap().unwrap();
        assert_eq!(stored.size, 20);
        assert_eq!(repo.count(RecordKind::File).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_checkpoint_overwrites() {
        let repo = repo().await;
        let first = CheckpointRecord::new("run-1", "discovery_progress_s1", 1, json!({"folders_count": 1}));
        repo.save_checkpoint(&first).await.unwrap();
        let second = CheckpointRecord::new("run-1", "discovery_progress_s1", 1, json!({"folders_count": 7}));
        repo.save_checkpoint(&second).await.unwrap();
        let stored = repo.get_checkpoint("run-1", "discovery_progress_s1").await.unwrap().unwrap();
        assert_eq!(stored.payload, json!({"folders_count": 7}));
        assert!(repo.get_checkpoint("run-2", "discovery_progress_s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_checkpoints_by_prefix() {
        let repo = repo().await;
        let records = vec![
            CheckpointRecord::new("run-1", "discovery_progress_s1", 1, json!({})),
            CheckpointRecord::new("run-1", "discovery_progress_s1_l1", 1, json!({})),
            CheckpointRecord::new("run-1", "discoveryXprogressXs2", 1, json!({})),
            CheckpointRecord::new("run-1", "discovery_complete", 1, json!({})),
            CheckpointRecord::new("run-2", "discovery_progress_s1", 1, json!({})),
        ];
        assert_eq!(repo.save_checkpoints(&records).await.unwrap(), 5);
        let listed = repo.list_checkpoints("run-1", "discovery_progress_").await.unwrap();
        let types: Vec<_> = listed.iter().map(|r| r.checkpoint_type.as_str()).collect();
        // Underscores are literal, not wildcards.
        assert_eq!(types, vec!["discovery_progress_s1", "discovery_progress_s1_l1"]);
    }

    #[tokio::test]
    async fn test_delete_checkpoints_before() {
        let repo = repo().await;
        let mut old = CheckpointRecord::new("run-1", "old", 1, json!({}));
        old.saved_at = OffsetDateTime::now_utc() - Duration::days(40);
        repo.save_checkpoint(&old).await.unwrap();
        repo.save_checkpoint(&CheckpointRecord::new("run-1", "new", 1, json!({}))).await.unwrap();
        let deleted = repo.delete_checkpoints_before(OffsetDateTime::now_utc() - Duration::days(30)).await.unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.get_checkpoint("run-1", "new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_cache_entries() {
        let repo = repo().await;
        let now = OffsetDateTime::now_utc();
        repo.set_cache_entry("ns:live", &json!([1, 2, 3]), Some(now + Duration::hours(1))).await.unwrap();
        repo.set_cache_entry("ns:stale", &json!("old"), Some(now - Duration::seconds(5))).await.unwrap();
        repo.set_cache_entry("ns:forever", &json!(null), None).await.unwrap();

        let live = repo.get_cache_entry("ns:live").await.unwrap().unwrap();
        assert_eq!(live.value, json!([1, 2, 3]));
        assert!(!live.is_expired_at(now));

        assert_eq!(repo.purge_expired_cache_entries(now).await.unwrap(), 1);
        assert!(repo.get_cache_entry("ns:stale").await.unwrap().is_none());

        assert!(repo.delete_cache_entry("ns:live").await.unwrap());
        assert!(!repo.delete_cache_entry("ns:live").await.unwrap());
        assert_eq!(repo.clear_cache().await.unwrap(), 1);
    }
}
