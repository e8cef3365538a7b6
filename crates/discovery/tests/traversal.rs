use async_trait::async_trait;
use rove_discovery::error::ErrorKind;
use rove_discovery::{NoopObserver, Scope, TraversalEngine, TraversalNode, TraversalObserver, TraversalOptions};
use rove_remote::{MockTree, RemoteItem};
use rove_store::{MockSink, RecordKind};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

fn folders(prefix: &str, count: usize) -> Vec<RemoteItem> {
    (0..count)
        .map(|i| RemoteItem::folder(format!("{prefix}{i}"), format!("{prefix}{i}"), format!("/{prefix}{i}")))
        .collect()
}

fn files(prefix: &str, count: usize) -> Vec<RemoteItem> {
    (0..count)
        .map(|i| RemoteItem::file(format!("{prefix}{i}"), format!("{prefix}{i}.txt"), format!("/{prefix}{i}.txt"), 10))
        .collect()
}

fn engine(tree: &Arc<MockTree>, sink: &Arc<MockSink>, options: TraversalOptions) -> TraversalEngine {
    TraversalEngine::new(tree.clone(), sink.clone(), options)
}

fn scope() -> Scope {
    Scope::new("site", "library")
}

#[derive(Default)]
struct Recorder {
    folders: AtomicU64,
    files: AtomicU64,
    batches: AtomicU64,
    failed: AtomicU64,
}

#[async_trait]
impl TraversalObserver for Recorder {
    async fn on_batch_persisted(&self, folders: u64, files: u64) {
        self.folders.fetch_add(folders, Ordering::SeqCst);
        self.files.fetch_add(files, Ordering::SeqCst);
        self.batches.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_node_failed(&self, _node: &TraversalNode, _error: &rove_remote::error::Error) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_batches_flush_at_threshold_then_remainder() {
    let tree = Arc::new(MockTree::default().with_children("root", folders("d", 250)));
    let sink = Arc::new(MockSink::default());
    let observer = Recorder::default();

    let report = engine(&tree, &sink, TraversalOptions::default())
        .run(&scope(), TraversalNode::root("root"), &observer, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        sink.upsert_calls().await,
        [(RecordKind::Folder, 100), (RecordKind::Folder, 100), (RecordKind::Folder, 50)]
    );
    assert_eq!(report.folders, 250);
    assert_eq!(report.fetches, 251);
    assert_eq!(observer.folders.load(Ordering::SeqCst), 250);
    assert_eq!(observer.batches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_depth_cap_records_but_does_not_expand() {
    let tree = Arc::new(
        MockTree::default()
            .with_children("root", [RemoteItem::folder("a", "a", "/a")])
            .with_children("a", [RemoteItem::folder("b", "b", "/a/b")])
            .with_children("b", [RemoteItem::folder("c", "c", "/a/b/c")]),
    );
    let sink = Arc::new(MockSink::default());
    let options = TraversalOptions { max_depth: 2, ..TraversalOptions::default() };

    let report = engine(&tree, &sink, options)
        .run(&scope(), TraversalNode::root("root"), &NoopObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.folders, 2);
    assert_eq!(report.truncated_nodes, 1);
    assert_eq!(sink.folder("b").await.map(|folder| folder.depth), Some(2));
    assert!(sink.folder("c").await.is_none());
    assert_eq!(tree.fetched_nodes().await, HashSet::from(["root".to_string(), "a".to_string()]));
    assert_eq!(tree.fetch_count("a").await, 1);
}

#[tokio::test]
async fn test_failed_node_is_isolated() {
    let mut tree = MockTree::default().with_children("root", folders("d", 5));
    for i in 0..5 {
        tree = tree.with_children(format!("d{i}"), files(&format!("x{i}-"), 1));
    }
    let tree = Arc::new(tree.with_failure("d2", rove_remote::error::ErrorKind::Fatal("gone".to_string())));
    let sink = Arc::new(MockSink::default());
    let observer = Recorder::default();

    let report = engine(&tree, &sink, TraversalOptions::default())
        .run(&scope(), TraversalNode::root("root"), &observer, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.folders, 5);
    assert_eq!(report.files, 4);
    assert_eq!(report.failed_nodes, 1);
    assert_eq!(observer.failed.load(Ordering::SeqCst), 1);
    assert_eq!(sink.file_count().await, 4);
    assert!(sink.file("x2-0").await.is_none());
}

#[tokio::test]
async fn test_every_page_is_drained() {
    let tree = Arc::new(MockTree::default().with_children("root", files("f", 450)));
    let sink = Arc::new(MockSink::default());

    let report = engine(&tree, &sink, TraversalOptions::default())
        .run(&scope(), TraversalNode::root("root"), &NoopObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.files, 450);
    assert_eq!(tree.fetch_count("root").await, 3);
    assert_eq!(report.fetches, 1);
}

#[tokio::test]
async fn test_records_carry_hierarchy() {
    let tree = Arc::new(
        MockTree::default()
            .with_children("root", [RemoteItem::folder("a", "a", "/a").with_unique_permissions()])
            .with_children("a", [RemoteItem::file("f", "f.txt", "/a/f.txt", 99)]),
    );
    let sink = Arc::new(MockSink::default());

    engine(&tree, &sink, TraversalOptions::default())
        .run(&scope(), TraversalNode::root("root"), &NoopObserver, &CancellationToken::new())
        .await
        .unwrap();

    let folder = sink.folder("a").await.unwrap();
    assert_eq!(folder.parent_id, None);
    assert_eq!((folder.site_id.as_str(), folder.library_id.as_str()), ("site", "library"));
    assert!(folder.has_unique_permissions);
    let file = sink.file("f").await.unwrap();
    assert_eq!(file.folder_id.as_deref(), Some("a"));
    assert_eq!(file.size, 99);
}

#[tokio::test]
async fn test_backpressure_still_visits_everything() {
    let mut tree = MockTree::default().with_children("root", folders("d", 6));
    for i in 0..6 {
        tree = tree.with_children(format!("d{i}"), folders(&format!("e{i}-"), 2));
    }
    let tree = Arc::new(tree);
    let sink = Arc::new(MockSink::default());
    let options = TraversalOptions { concurrency: 1, max_queue_depth: 3, ..TraversalOptions::default() };

    let report = engine(&tree, &sink, options)
        .run(&scope(), TraversalNode::root("root"), &NoopObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.backpressure_events >= 1);
    assert_eq!(report.folders, 18);
    assert_eq!(report.fetches, 19);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let tree = Arc::new(MockTree::default().with_children("root", folders("d", 3)));
    let sink = Arc::new(MockSink::default());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = engine(&tree, &sink, TraversalOptions::default())
        .run(&scope(), TraversalNode::root("root"), &NoopObserver, &cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(tree.total_fetches().await, 0);
    assert!(sink.upsert_calls().await.is_empty());
}

#[tokio::test]
async fn test_lost_persistence_aborts() {
    let tree = Arc::new(MockTree::default().with_children("root", files("f", 1000)));
    let sink = Arc::new(MockSink::default());
    sink.set_fail_records(true);
    let options = TraversalOptions { batch_size: 10, ..TraversalOptions::default() };

    let err = engine(&tree, &sink, options)
        .run(&scope(), TraversalNode::root("root"), &NoopObserver, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(&*err, ErrorKind::PersistenceUnavailable));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_shared_limiter() {
    let tree = Arc::new(MockTree::default().with_children("root", folders("d", 10)));
    let sink = Arc::new(MockSink::default());
    let limiter = Arc::new(tokio::sync::Semaphore::new(2));

    let report = engine(&tree, &sink, TraversalOptions::default())
        .with_limiter(limiter.clone())
        .run(&scope(), TraversalNode::root("root"), &NoopObserver, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.fetches, 11);
    // Every permit was handed back.
    assert_eq!(limiter.available_permits(), 2);
}
