use super::node::TraversalNode;
use async_trait::async_trait;

/// Hooks called by a running traversal.
///
/// Every method has a no-op default, so observers only implement what they
/// need. Hooks are awaited inline: keep them short.
#[async_trait]
pub trait TraversalObserver: Send + Sync {
    /// A batch was written. Deltas count records actually persisted.
    async fn on_batch_persisted(&self, _folders: u64, _files: u64) {}

    /// Listing a node failed; the node and its subtree are skipped.
    async fn on_node_failed(&self, _node: &TraversalNode, _error: &rove_remote::error::Error) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TraversalObserver for NoopObserver {}
