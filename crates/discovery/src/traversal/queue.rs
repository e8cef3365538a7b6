//! Work-list with backpressure.
//!
//! Nodes are normally expanded breadth-first. Once the backlog reaches its
//! limit the queue starts handing out the newest (deepest) nodes instead,
//! which finish subtrees and shrink the backlog, until it drops back under
//! the limit.

use super::node::TraversalNode;
use std::collections::VecDeque;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueStats {
    pub(crate) enqueued: u64,
    pub(crate) dequeued: u64,
    /// Times the queue switched into newest-first mode.
    pub(crate) backpressure_events: u64,
    pub(crate) peak: usize,
}

pub(crate) struct WorkQueue {
    nodes: VecDeque<TraversalNode>,
    limit: usize,
    newest_first: bool,
    stats: QueueStats,
}

impl WorkQueue {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            nodes: VecDeque::new(),
            limit: limit.max(1),
            newest_first: false,
            stats: QueueStats::default(),
        }
    }

    pub(crate) fn push(&mut self, node: TraversalNode) {
        self.nodes.push_back(node);
        self.stats.enqueued += 1;
        self.stats.peak = self.stats.peak.max(self.nodes.len());
    }

    pub(crate) fn pop(&mut self) -> Option<TraversalNode> {
        if self.nodes.len() >= self.limit {
            if !self.newest_first {
                self.newest_first = true;
                self.stats.backpressure_events += 1;
                tracing::debug!(queued = self.nodes.len(), "queue backpressure, expanding newest nodes first");
            }
        } else {
            self.newest_first = false;
        }
        let node = if self.newest_first { self.nodes.pop_back() } else { self.nodes.pop_front() };
        if node.is_some() {
            self.stats.dequeued += 1;
        }
        node
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn stats(&self) -> QueueStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traversal::node::NodeKind;

    fn node(id: &str) -> TraversalNode {
        TraversalNode {
            id: id.to_string(),
            kind: NodeKind::Folder,
            parent_id: None,
            path: format!("/{id}"),
            depth: 1,
        }
    }

    fn ids(queue: &mut WorkQueue) -> Vec<String> {
        std::iter::from_fn(|| queue.pop()).map(|node| node.id).collect()
    }

    #[test]
    fn test_fifo_below_limit() {
        let mut queue = WorkQueue::new(10);
        for id in ["a", "b", "c"] {
            queue.push(node(id));
        }
        assert_eq!(ids(&mut queue), ["a", "b", "c"]);
        assert_eq!(queue.stats().backpressure_events, 0);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_newest_first_at_limit() {
        let mut queue = WorkQueue::new(3);
        for id in ["a", "b", "c", "d"] {
            queue.push(node(id));
        }
        // 4 queued: newest first until below 3, then oldest first again.
        assert_eq!(ids(&mut queue), ["d", "c", "a", "b"]);
        let stats = queue.stats();
        assert_eq!(stats.backpressure_events, 1);
        assert_eq!(stats.peak, 4);
        assert_eq!((stats.enqueued, stats.dequeued), (4, 4));
    }

    #[test]
    fn test_each_switch_is_counted() {
        let mut queue = WorkQueue::new(2);
        queue.push(node("a"));
        queue.push(node("b"));
        assert_eq!(queue.pop().map(|n| n.id).as_deref(), Some("b"));
        assert_eq!(queue.pop().map(|n| n.id).as_deref(), Some("a"));
        queue.push(node("c"));
        queue.push(node("d"));
        assert_eq!(queue.pop().map(|n| n.id).as_deref(), Some("d"));
        assert_eq!(queue.stats().backpressure_events, 2);
        assert_eq!(queue.len(), 1);
    }
}
