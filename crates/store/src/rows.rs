//! Database row shapes and their conversions to/from models.
//!
//! SQLite has no unsigned integers or timestamps, so everything numeric goes
//! through checked conversions and timestamps are stored as Unix seconds
//! (milliseconds for cache expiry).

use crate::error::{Error, ErrorKind, Result};
use crate::models::{CacheRecord, CheckpointRecord, FileRecord, FolderRecord};
use exn::ResultExt;
use time::OffsetDateTime;

pub(crate) fn to_unix(datetime: OffsetDateTime) -> i64 {
    datetime.unix_timestamp()
}

pub(crate) fn from_unix(seconds: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(seconds).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

pub(crate) fn to_unix_millis(datetime: OffsetDateTime) -> Result<i64> {
    i64::try_from(datetime.unix_timestamp_nanos() / 1_000_000).or_raise(|| ErrorKind::InvalidData("timestamp"))
}

pub(crate) fn from_unix_millis(millis: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .or_raise(|| ErrorKind::InvalidData("timestamp"))
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FolderRow {
    pub id: String,
    pub site_id: String,
    pub library_id: String,
    pub parent_id: Option<String>,
    pub name: String,
    pub path: String,
    pub depth: i64,
    pub has_unique_permissions: bool,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub discovered_at: i64,
}
impl From<&FolderRecord> for FolderRow {
    fn from(folder: &FolderRecord) -> Self {
        Self {
            id: folder.id.clone(),
            site_id: folder.site_id.clone(),
            library_id: folder.library_id.clone(),
            parent_id: folder.parent_id.clone(),
            name: folder.name.clone(),
            path: folder.path.clone(),
            depth: i64::from(folder.depth),
            has_unique_permissions: folder.has_unique_permissions,
            created_at: folder.created_at.map(to_unix),
            modified_at: folder.modified_at.map(to_unix),
            discovered_at: to_unix(folder.discovered_at),
        }
    }
}
impl TryFrom<FolderRow> for FolderRecord {
    type Error = Error;
    fn try_from(row: FolderRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            site_id: row.site_id,
            library_id: row.library_id,
            parent_id: row.parent_id,
            name: row.name,
            path: row.path,
            depth: u32::try_from(row.depth).or_raise(|| ErrorKind::InvalidData("folder depth"))?,
            has_unique_permissions: row.has_unique_permissions,
            created_at: row.created_at.map(from_unix).transpose()?,
            modified_at: row.modified_at.map(from_unix).transpose()?,
            discovered_at: from_unix(row.discovered_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct FileRow {
    pub id: String,
    pub site_id: String,
    pub library_id: String,
    pub folder_id: Option<String>,
    pub name: String,
    pub path: String,
    pub size: i64,
    pub content_type: Option<String>,
    pub has_unique_permissions: bool,
    pub created_at: Option<i64>,
    pub modified_at: Option<i64>,
    pub discovered_at: i64,
}
impl TryFrom<&FileRecord> for FileRow {
    type Error = Error;
    fn try_from(file: &FileRecord) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            id: file.id.clone(),
            site_id: file.site_id.clone(),
            library_id: file.library_id.clone(),
            folder_id: file.folder_id.clone(),
            name: file.name.clone(),
            path: file.path.clone(),
            size: i64::try_from(file.size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            content_type: file.content_type.clone(),
            has_unique_permissions: file.has_unique_permissions,
            created_at: file.created_at.map(to_unix),
            modified_at: file.modified_at.map(to_unix),
            discovered_at: to_unix(file.discovered_at),
        })
    }
}
impl TryFrom<FileRow> for FileRecord {
    type Error = Error;
    fn try_from(row: FileRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            site_id: row.site_id,
            library_id: row.library_id,
            folder_id: row.folder_id,
            name: row.name,
            path: row.path,
            size: u64::try_from(row.size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            content_type: row.content_type,
            has_unique_permissions: row.has_unique_permissions,
            created_at: row.created_at.map(from_unix).transpose()?,
            modified_at: row.modified_at.map(from_unix).transpose()?,
            discovered_at: from_unix(row.discovered_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CheckpointRow {
    pub run_id: String,
    pub checkpoint_type: String,
    pub version: i64,
    pub payload: String,
    pub saved_at: i64,
}
impl TryFrom<&CheckpointRecord> for CheckpointRow {
    type Error = Error;
    fn try_from(record: &CheckpointRecord) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            run_id: record.run_id.clone(),
            checkpoint_type: record.checkpoint_type.clone(),
            version: i64::from(record.version),
            payload: serde_json::to_string(&record.payload).or_raise(|| ErrorKind::InvalidData("checkpoint payload"))?,
            saved_at: to_unix(record.saved_at),
        })
    }
}
impl TryFrom<CheckpointRow> for CheckpointRecord {
    type Error = Error;
    fn try_from(row: CheckpointRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            run_id: row.run_id,
            checkpoint_type: row.checkpoint_type,
            version: u32::try_from(row.version).or_raise(|| ErrorKind::InvalidData("checkpoint version"))?,
            payload: serde_json::from_str(&row.payload).or_raise(|| ErrorKind::InvalidData("checkpoint payload"))?,
            saved_at: from_unix(row.saved_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CacheRow {
    pub key: String,
    pub value: String,
    pub expires_at: Option<i64>,
    pub created_at: i64,
}
impl TryFrom<CacheRow> for CacheRecord {
    type Error = Error;
    fn try_from(row: CacheRow) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            key: row.key,
            value: serde_json::from_str(&row.value).or_raise(|| ErrorKind::InvalidData("cache value"))?,
            expires_at: row.expires_at.map(from_unix_millis).transpose()?,
            created_at: from_unix(row.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_folder_row_round_trip_strips_nanoseconds() {
        let discovered = OffsetDateTime::now_utc();
        let folder = FolderRecord {
            id: "01ABC".to_string(),
            site_id: "contoso.sharepoint.com,1,2".to_string(),
            library_id: "b!docs".to_string(),
            parent_id: Some("01ROOT".to_string()),
            name: "Finance".to_string(),
            path: "/Shared Documents/Finance".to_string(),
            depth: 2,
            has_unique_permissions: true,
            created_at: None,
            modified_at: Some(discovered),
            discovered_at: discovered,
        };
        let row = FolderRow::from(&folder);
        assert_eq!(row.depth, 2);
        let model = FolderRecord::try_from(row).unwrap();
        // Converting to a Unix timestamp (measured in seconds) inherently strips the nanoseconds component.
        assert_eq!(model.discovered_at, discovered.replace_nanosecond(0).unwrap());
        assert!(model.has_unique_permissions);
    }

    #[test]
    fn test_negative_file_size_is_rejected() {
        let row = FileRow {
            id: "f".to_string(),
            site_id: "s".to_string(),
            library_id: "l".to_string(),
            folder_id: None,
            name: "report.xlsx".to_string(),
            path: "/report.xlsx".to_string(),
            size: -1,
            content_type: None,
            has_unique_permissions: false,
            created_at: None,
            modified_at: None,
            discovered_at: 0,
        };
        let err = FileRecord::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("file size")));
    }

    #[test]
    fn test_checkpoint_row_parses_payload() {
        let row = CheckpointRow {
            run_id: "run-1".to_string(),
            checkpoint_type: "discovery_complete".to_string(),
            version: 1,
            payload: r#"{"folders_count":3}"#.to_string(),
            saved_at: 1_700_000_000,
        };
        let record = CheckpointRecord::try_from(row).unwrap();
        assert_eq!(record.payload, json!({"folders_count": 3}));
        assert_eq!(record.version, 1);
    }

    #[test]
    fn test_cache_expiry_keeps_milliseconds() {
        let expires = from_unix_millis(1_700_000_000_123).unwrap();
        assert_eq!(to_unix_millis(expires).unwrap(), 1_700_000_000_123);
    }
}
