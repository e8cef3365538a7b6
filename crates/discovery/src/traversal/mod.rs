//! Traversal Queue Engine
//!
//! Expands one library's folder tree breadth-first from its root:
//! - A single dispatcher owns the work-list and keeps up to `concurrency`
//!   listings in flight. Each listing also holds a permit from a semaphore
//!   that may be shared with other engines, bounding total load on the remote
//!   service.
//! - Every listed child becomes a folder or file record and is sent to the
//!   [`BatchWriter`](writer::BatchWriter), which persists them in batches.
//! - Folders shallower than `max_depth` are queued for expansion; folders at
//!   the limit are recorded but never listed.
//!
//! A node whose listing fails is skipped along with its subtree; the rest of
//! the traversal carries on. Only losing persistence entirely ends a run
//! early.

mod node;
mod observer;
mod queue;
mod writer;

pub use self::node::{NodeKind, Scope, TraversalNode};
pub use self::observer::{NoopObserver, TraversalObserver};
use self::queue::WorkQueue;
use self::writer::BatchWriter;
use crate::error::{ErrorKind, Result};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use rove_remote::{RemoteItem, SourceHandle};
use rove_store::SinkHandle;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraversalOptions {
    /// Deepest folder level that is recorded; folders at this depth are not listed.
    pub max_depth: u32,
    /// Listings in flight at once.
    pub concurrency: usize,
    /// Items requested per listing page.
    pub page_size: u32,
    /// Records per persisted batch.
    pub batch_size: usize,
    /// Backlog size at which the queue switches to newest-first.
    pub max_queue_depth: usize,
    /// Batches in a row that may persist nothing before giving up.
    pub max_consecutive_batch_failures: u32,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            max_depth: 10,
            concurrency: 50,
            page_size: 200,
            batch_size: 100,
            max_queue_depth: 10_000,
            max_consecutive_batch_failures: 3,
        }
    }
}

impl From<&rove_config::DiscoveryConfig> for TraversalOptions {
    fn from(config: &rove_config::DiscoveryConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            concurrency: config.concurrency,
            page_size: config.page_size,
            batch_size: config.batch_size,
            max_queue_depth: config.max_queue_depth,
            max_consecutive_batch_failures: config.max_consecutive_batch_failures,
        }
    }
}

/// What a traversal did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalReport {
    /// Folder records persisted.
    pub folders: u64,
    /// File records persisted.
    pub files: u64,
    /// Nodes whose children were listed (successfully or not).
    pub fetches: u64,
    pub failed_nodes: u64,
    /// Batches rejected as a whole (their records were retried one by one).
    pub failed_batches: u64,
    /// Records that could not be persisted even on their own.
    pub failed_records: u64,
    /// Folders recorded at `max_depth` whose children were never listed.
    pub truncated_nodes: u64,
    pub backpressure_events: u64,
    /// Stopped early because the cancellation token fired.
    pub cancelled: bool,
}

#[derive(Default)]
struct DispatchReport {
    fetches: u64,
    failed_nodes: u64,
    truncated_nodes: u64,
    backpressure_events: u64,
    cancelled: bool,
}

pub struct TraversalEngine {
    source: SourceHandle,
    sink: SinkHandle,
    options: TraversalOptions,
    limiter: Arc<Semaphore>,
}

impl TraversalEngine {
    pub fn new(source: SourceHandle, sink: SinkHandle, options: TraversalOptions) -> Self {
        let limiter = Arc::new(Semaphore::new(options.concurrency.max(1)));
        Self { source, sink, options, limiter }
    }

    /// Share a listing limiter with other engines.
    pub fn with_limiter(mut self, limiter: Arc<Semaphore>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn options(&self) -> &TraversalOptions {
        &self.options
    }

    /// Traverse everything below `root`.
    ///
    /// Cancelling `cancel` stops new listings from starting; listings already
    /// in flight finish and everything gathered so far is persisted before
    /// returning with `cancelled` set. Fails only with
    /// [`ErrorKind::PersistenceUnavailable`].
    #[instrument(skip_all, fields(site = %scope.site_id, library = %scope.library_id, root = %root.id))]
    pub async fn run(
        &self,
        scope: &Scope,
        root: TraversalNode,
        observer: &dyn TraversalObserver,
        cancel: &CancellationToken,
    ) -> Result<TraversalReport> {
        let (tx, rx) = mpsc::channel(self.options.batch_size.max(1) * 2);
        let abort = CancellationToken::new();
        let writer = BatchWriter::new(
            self.sink.as_ref(),
            observer,
            self.options.batch_size,
            self.options.max_consecutive_batch_failures,
        );
        let (dispatched, written) = tokio::join!(
            self.dispatch(scope, root, observer, tx, cancel, &abort),
            writer.run(rx, &abort),
        );

        let report = TraversalReport {
            folders: written.folders,
            files: written.files,
            fetches: dispatched.fetches,
            failed_nodes: dispatched.failed_nodes,
            failed_batches: written.failed_batches,
            failed_records: written.failed_records,
            truncated_nodes: dispatched.truncated_nodes,
            backpressure_events: dispatched.backpressure_events,
            cancelled: dispatched.cancelled,
        };
        if written.unavailable {
            tracing::error!(?report, "traversal aborted, persistence unavailable");
            exn::bail!(ErrorKind::PersistenceUnavailable);
        }
        tracing::info!(
            folders = report.folders,
            files = report.files,
            failed_nodes = report.failed_nodes,
            failed_records = report.failed_records,
            cancelled = report.cancelled,
            "traversal finished",
        );
        Ok(report)
    }

    async fn dispatch(
        &self,
        scope: &Scope,
        root: TraversalNode,
        observer: &dyn TraversalObserver,
        records: mpsc::Sender<node::Discovered>,
        cancel: &CancellationToken,
        abort: &CancellationToken,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut queue = WorkQueue::new(self.options.max_queue_depth);
        let mut in_flight = FuturesUnordered::new();
        let mut stopping = false;
        queue.push(root);

        loop {
            if !stopping && (cancel.is_cancelled() || abort.is_cancelled()) {
                stopping = true;
                report.cancelled = cancel.is_cancelled();
                tracing::debug!(queued = queue.len(), in_flight = in_flight.len(), "traversal stopping");
            }
            while !stopping && in_flight.len() < self.options.concurrency.max(1) {
                let Some(node) = queue.pop() else {
                    break;
                };
                if node.depth >= self.options.max_depth {
                    report.truncated_nodes += 1;
                    continue;
                }
                report.fetches += 1;
                in_flight.push(self.expand(node));
            }

            let Some((parent, listing)) = in_flight.next().await else {
                break;
            };
            let items = match listing {
                Ok(items) => items,
                Err(e) => {
                    report.failed_nodes += 1;
                    tracing::warn!(node = %parent.id, path = %parent.path, error = ?e, "listing failed, skipping subtree");
                    observer.on_node_failed(&parent, &e).await;
                    continue;
                },
            };
            let now = OffsetDateTime::now_utc();
            for item in items {
                let (record, child) = node::classify(item, &parent, scope, now);
                if let Some(child) = child {
                    if child.depth < self.options.max_depth {
                        queue.push(child);
                    } else {
                        report.truncated_nodes += 1;
                    }
                }
                if records.send(record).await.is_err() {
                    // The writer has given up; nothing more will be persisted.
                    stopping = true;
                    break;
                }
            }
        }

        report.backpressure_events = queue.stats().backpressure_events;
        report
    }

    /// List every page of a node's children under a limiter permit.
    async fn expand(&self, node: TraversalNode) -> (TraversalNode, rove_remote::error::Result<Vec<RemoteItem>>) {
        // The limiter is never closed, so acquiring only waits.
        let _permit = self.limiter.acquire().await.ok();
        let listing = self.source.list_children(&node.id, self.options.page_size).await;
        (node, listing)
    }
}
