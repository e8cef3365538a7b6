//! Turns traversal events into progress checkpoints.

use crate::traversal::{TraversalNode, TraversalObserver};
use async_trait::async_trait;
use rove_checkpoint::{CheckpointManager, DiscoveryProgress};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct State {
    progress: DiscoveryProgress,
    unsaved: u64,
    last_save: Instant,
}

/// Observer that keeps one library's [`DiscoveryProgress`] up to date and
/// saves it (buffered) every `every_items` records or `every` elapsed,
/// whichever comes first.
pub(crate) struct ProgressTracker {
    run_id: String,
    checkpoints: CheckpointManager,
    every_items: u64,
    every: Duration,
    state: Mutex<State>,
    root_failed: AtomicBool,
}

impl ProgressTracker {
    pub(crate) fn new(
        run_id: impl Into<String>,
        checkpoints: CheckpointManager,
        progress: DiscoveryProgress,
        every_items: u64,
        every: Duration,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            checkpoints,
            every_items: every_items.max(1),
            every,
            state: Mutex::new(State { progress, unsaved: 0, last_save: Instant::now() }),
            root_failed: AtomicBool::new(false),
        }
    }

    /// Whether the library's root folder itself could not be listed.
    pub(crate) fn root_failed(&self) -> bool {
        self.root_failed.load(Ordering::SeqCst)
    }

    /// Save the current progress, buffered unless `immediate`.
    pub(crate) async fn save(&self, immediate: bool) -> rove_checkpoint::error::Result<DiscoveryProgress> {
        let mut state = self.state.lock().await;
        self.write(&mut state, immediate).await?;
        Ok(state.progress.clone())
    }

    /// Mark the library completed and save immediately.
    pub(crate) async fn complete(&self) -> rove_checkpoint::error::Result<DiscoveryProgress> {
        let mut state = self.state.lock().await;
        state.progress.complete();
        self.write(&mut state, true).await?;
        Ok(state.progress.clone())
    }

    async fn write(&self, state: &mut State, immediate: bool) -> rove_checkpoint::error::Result<()> {
        let key = state.progress.key();
        self.checkpoints
            .save_as(&self.run_id, &key, &state.progress, immediate)
            .await?;
        state.unsaved = 0;
        state.last_save = Instant::now();
        Ok(())
    }
}

#[async_trait]
impl TraversalObserver for ProgressTracker {
    async fn on_batch_persisted(&self, folders: u64, files: u64) {
        let mut state = self.state.lock().await;
        state.progress.folders_count += folders;
        state.progress.files_count += files;
        state.unsaved += folders + files;
        if state.unsaved >= self.every_items || state.last_save.elapsed() >= self.every {
            if let Err(e) = self.write(&mut state, false).await {
                tracing::warn!(run_id = %self.run_id, error = ?e, "could not buffer progress checkpoint");
            }
        }
    }

    async fn on_node_failed(&self, node: &TraversalNode, _error: &rove_remote::error::Error) {
        if node.is_root() {
            self.root_failed.store(true, Ordering::SeqCst);
        }
        self.state.lock().await.progress.failed_nodes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rove_checkpoint::CheckpointConfig;
    use rove_store::MockSink;
    use std::sync::Arc;

    fn tracker(every_items: u64) -> (ProgressTracker, CheckpointManager) {
        let checkpoints = CheckpointManager::new(Arc::new(MockSink::default()), CheckpointConfig::default());
        let progress = DiscoveryProgress::started("s1", Some("l1".to_string()));
        let tracker = ProgressTracker::new("run", checkpoints.clone(), progress, every_items, Duration::from_secs(60));
        (tracker, checkpoints)
    }

    async fn saved(checkpoints: &CheckpointManager) -> Option<DiscoveryProgress> {
        checkpoints.restore_as("run", "discovery_progress_s1_l1").await.unwrap()
    }

    #[tokio::test]
    async fn test_saves_every_n_items() {
        let (tracker, checkpoints) = tracker(100);
        tracker.on_batch_persisted(60, 0).await;
        assert!(saved(&checkpoints).await.is_none());
        tracker.on_batch_persisted(0, 40).await;
        let progress = saved(&checkpoints).await.unwrap();
        assert_eq!((progress.folders_count, progress.files_count), (60, 40));
        assert_eq!(checkpoints.stats().await.pending, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saves_after_interval() {
        let (tracker, checkpoints) = tracker(100);
        tokio::time::sleep(Duration::from_secs(61)).await;
        tracker.on_batch_persisted(1, 0).await;
        assert_eq!(saved(&checkpoints).await.map(|p| p.folders_count), Some(1));
    }

    #[tokio::test]
    async fn test_complete_is_immediate() {
        let (tracker, checkpoints) = tracker(100);
        tracker.on_batch_persisted(3, 4).await;
        let progress = tracker.complete().await.unwrap();
        assert!(progress.is_completed());
        assert!(progress.completed_at.is_some());
        let stats = checkpoints.stats().await;
        assert_eq!((stats.pending, stats.immediate_saves), (0, 1));
    }

    #[tokio::test]
    async fn test_root_failure_is_flagged() {
        let (tracker, _) = tracker(100);
        let error = exn::Exn::from(rove_remote::error::ErrorKind::NotFound("root".to_string()));
        tracker.on_node_failed(&TraversalNode::root("root"), &error).await;
        assert!(tracker.root_failed());
        let progress = tracker.save(false).await.unwrap();
        assert_eq!(progress.failed_nodes, 1);
    }
}
