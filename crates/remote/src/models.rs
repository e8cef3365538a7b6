//! Shapes returned by the remote tree.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A site collection in the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    pub url: String,
}

impl Site {
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), url: url.into() }
    }
}

/// A document library (drive) inside a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    pub id: String,
    pub site_id: String,
    pub name: String,
    /// Identifier of the library's root folder; traversal starts here.
    pub root_folder_id: String,
}

impl Library {
    pub fn new(
        id: impl Into<String>,
        site_id: impl Into<String>,
        name: impl Into<String>,
        root_folder_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            site_id: site_id.into(),
            name: name.into(),
            root_folder_id: root_folder_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Folder,
    File,
}

/// One child returned by a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItem {
    pub id: String,
    pub name: String,
    pub kind: ItemKind,
    /// Path relative to the library root, e.g. `/Finance/2024/q1.xlsx`.
    pub path: String,
    /// Size in bytes (zero for folders).
    pub size: u64,
    pub content_type: Option<String>,
    /// `true` when the item breaks permission inheritance from its parent.
    pub has_unique_permissions: bool,
    pub created_at: Option<OffsetDateTime>,
    pub modified_at: Option<OffsetDateTime>,
}

impl RemoteItem {
    pub fn folder(id: impl Into<String>, name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind: ItemKind::Folder,
            path: path.into(),
            size: 0,
            content_type: None,
            has_unique_permissions: false,
            created_at: None,
            modified_at: None,
        }
    }

    pub fn file(id: impl Into<String>, name: impl Into<String>, path: impl Into<String>, size: u64) -> Self {
        Self {
            size,
            kind: ItemKind::File,
            ..Self::folder(id, name, path)
        }
    }

    pub fn with_unique_permissions(mut self) -> Self {
        self.has_unique_permissions = true;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_timestamps(mut self, created_at: OffsetDateTime, modified_at: OffsetDateTime) -> Self {
        self.created_at = Some(created_at);
        self.modified_at = Some(modified_at);
        self
    }

    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }
}

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Page {
    pub items: Vec<RemoteItem>,
    /// Opaque continuation token; `None` on the last page.
    pub next_page_token: Option<String>,
}
