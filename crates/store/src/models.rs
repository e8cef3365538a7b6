//! Persisted models.
//!
//! These are the flattened shapes that leave the traversal engine and land in
//! the sink. They carry no behaviour beyond small conveniences; conversion to
//! and from database rows lives in `rows`.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

/// Which table a record belongs to.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    #[display("folder")]
    Folder,
    #[display("file")]
    File,
}

/// A folder discovered inside a document library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderRecord {
    /// Remote identifier, unique across all folders.
    pub id: String,
    pub site_id: String,
    pub library_id: String,
    /// `None` for folders directly under the library root.
    pub parent_id: Option<String>,
    pub name: String,
    pub path: String,
    /// Distance from the library root (root children are depth 1).
    pub depth: u32,
    pub has_unique_permissions: bool,
    pub created_at: Option<OffsetDateTime>,
    pub modified_at: Option<OffsetDateTime>,
    pub discovered_at: OffsetDateTime,
}

/// A file discovered inside a document library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Remote identifier, unique across all files.
    pub id: String,
    pub site_id: String,
    pub library_id: String,
    /// Containing folder; `None` when the file sits in the library root.
    pub folder_id: Option<String>,
    pub name: String,
    pub path: String,
    /// Size in bytes
    pub size: u64,
    pub content_type: Option<String>,
    pub has_unique_permissions: bool,
    pub created_at: Option<OffsetDateTime>,
    pub modified_at: Option<OffsetDateTime>,
    pub discovered_at: OffsetDateTime,
}

/// An ordered buffer of records of a single kind awaiting persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Batch {
    Folders(Vec<FolderRecord>),
    Files(Vec<FileRecord>),
}
impl Batch {
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Folders(_) => RecordKind::Folder,
            Self::Files(_) => RecordKind::File,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Folders(records) => records.len(),
            Self::Files(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifiers of every record in the batch, in order.
    pub fn ids(&self) -> Vec<&str> {
        match self {
            Self::Folders(records) => records.iter().map(|r| r.id.as_str()).collect(),
            Self::Files(records) => records.iter().map(|r| r.id.as_str()).collect(),
        }
    }

    /// Split the batch into one single-record batch per record.
    ///
    /// Used as the fallback when a whole batch fails to persist: each record
    /// gets its own chance so one bad row doesn't take the rest down with it.
    pub fn into_singles(self) -> Vec<Batch> {
        match self {
            Self::Folders(records) => records.into_iter().map(|r| Self::Folders(vec![r])).collect(),
            Self::Files(records) => records.into_iter().map(|r| Self::Files(vec![r])).collect(),
        }
    }
}

/// A named progress snapshot for a run.
///
/// Unique per `(run_id, checkpoint_type)`; saving again overwrites.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointRecord {
    pub run_id: String,
    pub checkpoint_type: String,
    /// Schema version of `payload`, so stale payload shapes can be detected.
    pub version: u32,
    pub payload: Value,
    pub saved_at: OffsetDateTime,
}
impl CheckpointRecord {
    pub fn new(run_id: impl Into<String>, checkpoint_type: impl Into<String>, version: u32, payload: Value) -> Self {
        Self {
            run_id: run_id.into(),
            checkpoint_type: checkpoint_type.into(),
            version,
            payload,
            saved_at: OffsetDateTime::now_utc(),
        }
    }
}

/// A cache entry as stored in the persistent tier.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRecord {
    pub key: String,
    pub value: Value,
    pub expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}
impl CacheRecord {
    /// An entry whose expiry has passed is absent, even if still stored.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn folder(id: &str) -> FolderRecord {
        FolderRecord {
            id: id.to_string(),
            site_id: "site".to_string(),
            library_id: "lib".to_string(),
            parent_id: None,
            name: id.to_string(),
            path: format!("/{id}"),
            depth: 1,
            has_unique_permissions: false,
            created_at: None,
            modified_at: None,
            discovered_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_batch_into_singles_preserves_order() {
        let batch = Batch::Folders(vec![folder("a"), folder("b"), folder("c")]);
        assert_eq!(batch.kind(), RecordKind::Folder);
        assert_eq!(batch.ids(), vec!["a", "b", "c"]);
        let singles = batch.into_singles();
        assert_eq!(singles.len(), 3);
        assert_eq!(singles[1].ids(), vec!["b"]);
    }

    #[test]
    fn test_cache_record_expiry() {
        let now = OffsetDateTime::now_utc();
        let mut record = CacheRecord {
            key: "k".to_string(),
            value: Value::Null,
            expires_at: None,
            created_at: now,
        };
        assert!(!record.is_expired_at(now));
        record.expires_at = Some(now - Duration::seconds(1));
        assert!(record.is_expired_at(now));
        record.expires_at = Some(now + Duration::seconds(1));
        assert!(!record.is_expired_at(now));
    }
}
