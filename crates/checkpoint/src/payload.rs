//! Payloads written by discovery, and the summary rebuilt from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use time::OffsetDateTime;

/// Prefix shared by every progress checkpoint of a run.
pub const PROGRESS_PREFIX: &str = "discovery_progress_";
/// Checkpoint type marking a run as finished.
pub const COMPLETE_KEY: &str = "discovery_complete";

/// `discovery_progress_<site>` or `discovery_progress_<site>_<library>`.
pub fn progress_key(site_id: &str, library_id: Option<&str>) -> String {
    match library_id {
        Some(library_id) => format!("{PROGRESS_PREFIX}{site_id}_{library_id}"),
        None => format!("{PROGRESS_PREFIX}{site_id}"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgressStatus {
    InProgress,
    Completed,
}

/// How far discovery of one site, or one library within it, has got.
///
/// `library_id` is `None` for the site-level record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryProgress {
    pub site_id: String,
    pub library_id: Option<String>,
    pub folders_count: u64,
    pub files_count: u64,
    pub failed_nodes: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub status: ProgressStatus,
}

impl DiscoveryProgress {
    pub fn started(site_id: impl Into<String>, library_id: Option<String>) -> Self {
        Self {
            site_id: site_id.into(),
            library_id,
            folders_count: 0,
            files_count: 0,
            failed_nodes: 0,
            started_at: OffsetDateTime::now_utc(),
            completed_at: None,
            status: ProgressStatus::InProgress,
        }
    }

    pub fn key(&self) -> String {
        progress_key(&self.site_id, self.library_id.as_deref())
    }

    pub fn complete(&mut self) {
        self.status = ProgressStatus::Completed;
        self.completed_at = Some(OffsetDateTime::now_utc());
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProgressStatus::Completed
    }
}

/// Payload of the run-level [`COMPLETE_KEY`] checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryComplete {
    pub run_id: String,
    pub sites: u64,
    pub libraries: u64,
    pub folders_count: u64,
    pub files_count: u64,
    pub failed_nodes: u64,
    pub failed_records: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

/// What a previous attempt at a run got done.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoverySummary {
    pub completed_sites: BTreeSet<String>,
    pub in_progress_sites: BTreeSet<String>,
    /// `(site_id, library_id)` pairs.
    pub completed_libraries: BTreeSet<(String, String)>,
    pub in_progress_libraries: BTreeSet<(String, String)>,
    /// Totals across library-level progress records.
    pub folders: u64,
    pub files: u64,
    pub failed_nodes: u64,
    pub complete: Option<DiscoveryComplete>,
}

impl RecoverySummary {
    /// Fold one progress record into the summary.
    pub(crate) fn record(&mut self, progress: DiscoveryProgress) {
        let completed = progress.is_completed();
        match progress.library_id {
            Some(library_id) => {
                let key = (progress.site_id, library_id);
                self.folders += progress.folders_count;
                self.files += progress.files_count;
                self.failed_nodes += progress.failed_nodes;
                if completed {
                    self.in_progress_libraries.remove(&key);
                    self.completed_libraries.insert(key);
                } else if !self.completed_libraries.contains(&key) {
                    self.in_progress_libraries.insert(key);
                }
            },
            None if completed => {
                self.in_progress_sites.remove(&progress.site_id);
                self.completed_sites.insert(progress.site_id);
            },
            None => {
                if !self.completed_sites.contains(&progress.site_id) {
                    self.in_progress_sites.insert(progress.site_id);
                }
            },
        }
    }

    pub fn is_library_completed(&self, site_id: &str, library_id: &str) -> bool {
        self.completed_libraries
            .contains(&(site_id.to_string(), library_id.to_string()))
    }

    pub fn is_site_completed(&self, site_id: &str) -> bool {
        self.completed_sites.contains(site_id)
    }

    /// Whether the run finished and wrote its [`COMPLETE_KEY`] checkpoint.
    pub fn is_complete(&self) -> bool {
        self.complete.is_some()
    }

    /// Whether there is anything at all to resume from.
    pub fn is_empty(&self) -> bool {
        self.completed_sites.is_empty()
            && self.in_progress_sites.is_empty()
            && self.completed_libraries.is_empty()
            && self.in_progress_libraries.is_empty()
            && self.complete.is_none()
    }
}
