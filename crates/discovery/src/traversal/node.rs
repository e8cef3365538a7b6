use rove_remote::RemoteItem;
use rove_store::{FileRecord, FolderRecord};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// The root folder of a library. Never recorded itself.
    FolderRoot,
    Folder,
    File,
}

/// A unit of work on the traversal queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalNode {
    pub id: String,
    pub kind: NodeKind,
    pub parent_id: Option<String>,
    pub path: String,
    /// Distance from the library root (the root is 0).
    pub depth: u32,
}

impl TraversalNode {
    pub fn root(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::FolderRoot,
            parent_id: None,
            path: "/".to_string(),
            depth: 0,
        }
    }

    pub fn is_root(&self) -> bool {
        self.kind == NodeKind::FolderRoot
    }

    /// Parent id to store on records of this node's children.
    ///
    /// Children of the library root have no parent folder record.
    fn record_parent(&self) -> Option<String> {
        (!self.is_root()).then(|| self.id.clone())
    }
}

/// The site and library a traversal runs inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub site_id: String,
    pub library_id: String,
}

impl Scope {
    pub fn new(site_id: impl Into<String>, library_id: impl Into<String>) -> Self {
        Self { site_id: site_id.into(), library_id: library_id.into() }
    }
}

/// A listed child, converted into the record that will be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Discovered {
    Folder(FolderRecord),
    File(FileRecord),
}

/// Classify one child of `parent`.
///
/// Folders also yield the node that would expand them.
pub(crate) fn classify(
    item: RemoteItem,
    parent: &TraversalNode,
    scope: &Scope,
    now: OffsetDateTime,
) -> (Discovered, Option<TraversalNode>) {
    let depth = parent.depth + 1;
    if item.is_folder() {
        let node = TraversalNode {
            id: item.id.clone(),
            kind: NodeKind::Folder,
            parent_id: Some(parent.id.clone()),
            path: item.path.clone(),
            depth,
        };
        let record = FolderRecord {
            id: item.id,
            site_id: scope.site_id.clone(),
            library_id: scope.library_id.clone(),
            parent_id: parent.record_parent(),
            name: item.name,
            path: item.path,
            depth,
            has_unique_permissions: item.has_unique_permissions,
            created_at: item.created_at,
            modified_at: item.modified_at,
            discovered_at: now,
        };
        (Discovered::Folder(record), Some(node))
    } else {
        let record = FileRecord {
            id: item.id,
            site_id: scope.site_id.clone(),
            library_id: scope.library_id.clone(),
            folder_id: parent.record_parent(),
            name: item.name,
            path: item.path,
            size: item.size,
            content_type: item.content_type,
            has_unique_permissions: item.has_unique_permissions,
            created_at: item.created_at,
            modified_at: item.modified_at,
            discovered_at: now,
        };
        (Discovered::File(record), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        Scope::new("s1", "l1")
    }

    #[test]
    fn test_root_children_have_no_parent_record() {
        let root = TraversalNode::root("root");
        let (discovered, node) = classify(RemoteItem::folder("f1", "Finance", "/Finance"), &root, &scope(), OffsetDateTime::UNIX_EPOCH);
        let Discovered::Folder(record) = discovered else {
            panic!("expected a folder record");
        };
        assert_eq!(record.parent_id, None);
        assert_eq!(record.depth, 1);
        assert_eq!((record.site_id.as_str(), record.library_id.as_str()), ("s1", "l1"));

        let node = node.unwrap();
        assert_eq!(node.kind, NodeKind::Folder);
        assert_eq!(node.parent_id.as_deref(), Some("root"));
        assert_eq!(node.depth, 1);
    }

    #[test]
    fn test_nested_file_points_at_folder() {
        let folder = TraversalNode {
            id: "f1".to_string(),
            kind: NodeKind::Folder,
            parent_id: Some("root".to_string()),
            path: "/Finance".to_string(),
            depth: 1,
        };
        let item = RemoteItem::file("x1", "q1.xlsx", "/Finance/q1.xlsx", 2048)
            .with_content_type("application/vnd.ms-excel")
            .with_unique_permissions();
        let (discovered, node) = classify(item, &folder, &scope(), OffsetDateTime::UNIX_EPOCH);
        assert!(node.is_none());
        let Discovered::File(record) = discovered else {
            panic!("expected a file record");
        };
        assert_eq!(record.folder_id.as_deref(), Some("f1"));
        assert_eq!(record.size, 2048);
        assert!(record.has_unique_permissions);
        assert_eq!(record.content_type.as_deref(), Some("application/vnd.ms-excel"));
    }
}
