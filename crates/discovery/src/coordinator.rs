//! Discovery Coordinator
//!
//! Drives a whole run: enumerates sites and libraries, skips what a previous
//! attempt already finished, traverses the rest, and leaves behind the
//! checkpoints needed to pick up again after a crash.

use crate::error::{ErrorKind, Result};
use crate::progress::ProgressTracker;
use crate::traversal::{Scope, TraversalEngine, TraversalNode, TraversalOptions, TraversalReport};
use exn::ResultExt;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use rove_cache::CacheManager;
use rove_checkpoint::{COMPLETE_KEY, CheckpointManager, DiscoveryComplete, DiscoveryProgress, RecoverySummary, progress_key};
use rove_remote::{Library, Site, SourceHandle};
use rove_store::SinkHandle;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub traversal: TraversalOptions,
    /// Libraries traversed at once (they share one listing limiter).
    pub library_concurrency: usize,
    /// Buffer a progress checkpoint after this many persisted records...
    pub checkpoint_every_items: u64,
    /// ...or after this long, whichever comes first.
    pub checkpoint_every: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            traversal: TraversalOptions::default(),
            library_concurrency: 4,
            checkpoint_every_items: 100,
            checkpoint_every: Duration::from_secs(60),
        }
    }
}

impl From<&rove_config::DiscoveryConfig> for DiscoveryOptions {
    fn from(config: &rove_config::DiscoveryConfig) -> Self {
        Self {
            traversal: TraversalOptions::from(config),
            library_concurrency: config.library_concurrency,
            checkpoint_every_items: config.checkpoint_every_items,
            checkpoint_every: config.checkpoint_every(),
        }
    }
}

/// Totals for one invocation of [`DiscoveryCoordinator::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub run_id: String,
    pub sites: u64,
    pub libraries: u64,
    /// Libraries already completed by an earlier attempt.
    pub skipped_libraries: u64,
    /// Libraries whose root folder could not be listed.
    pub failed_libraries: u64,
    /// Sites whose libraries could not be listed.
    pub failed_sites: u64,
    pub folders: u64,
    pub files: u64,
    pub failed_nodes: u64,
    pub failed_batches: u64,
    pub failed_records: u64,
    pub cancelled: bool,
}

impl DiscoverySummary {
    fn absorb(&mut self, report: &TraversalReport) {
        self.folders += report.folders;
        self.files += report.files;
        self.failed_nodes += report.failed_nodes;
        self.failed_batches += report.failed_batches;
        self.failed_records += report.failed_records;
    }

    /// Every site and library was discovered (now or by an earlier attempt).
    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.failed_libraries == 0 && self.failed_sites == 0
    }
}

enum LibraryOutcome {
    Skipped,
    NotStarted,
    Completed(TraversalReport),
    Cancelled(TraversalReport),
    RootFailed(TraversalReport),
}

pub struct DiscoveryCoordinator {
    run_id: String,
    source: SourceHandle,
    sink: SinkHandle,
    cache: CacheManager,
    checkpoints: CheckpointManager,
    options: DiscoveryOptions,
}

impl DiscoveryCoordinator {
    pub fn new(
        run_id: impl Into<String>,
        source: SourceHandle,
        sink: SinkHandle,
        cache: CacheManager,
        checkpoints: CheckpointManager,
        options: DiscoveryOptions,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            source,
            sink,
            cache: cache.with_namespace(format!("{}:discovery", cache.namespace())),
            checkpoints,
            options,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Discover every site and library not already completed under this run id.
    ///
    /// The checkpoint flush loop runs for the duration of the call and is
    /// stopped, with a final flush, however the call ends.
    #[instrument(skip(self, cancel), fields(run_id = %self.run_id, source = self.source.name()))]
    pub async fn run(&self, cancel: CancellationToken) -> Result<DiscoverySummary> {
        self.checkpoints.start();
        let result = self.discover(&cancel).await;
        let stopped = self.checkpoints.stop().await;
        match (result, stopped) {
            (Ok(summary), Ok(_)) => Ok(summary),
            (Ok(_), Err(e)) => Err(e).or_raise(|| ErrorKind::Checkpoint),
            (Err(e), Err(stop)) => {
                tracing::error!(error = ?stop, "final checkpoint flush failed");
                Err(e)
            },
            (Err(e), Ok(_)) => Err(e),
        }
    }

    async fn discover(&self, cancel: &CancellationToken) -> Result<DiscoverySummary> {
        let recovery = self
            .checkpoints
            .recovery_summary(&self.run_id)
            .await
            .or_raise(|| ErrorKind::Checkpoint)?;
        if let Some(complete) = &recovery.complete {
            tracing::info!(completed_at = %complete.completed_at, "run already complete, nothing to do");
            return Ok(DiscoverySummary {
                run_id: self.run_id.clone(),
                sites: complete.sites,
                libraries: complete.libraries,
                skipped_libraries: complete.libraries,
                ..DiscoverySummary::default()
            });
        }
        if !recovery.is_empty() {
            tracing::info!(
                completed_libraries = recovery.completed_libraries.len(),
                in_progress_libraries = recovery.in_progress_libraries.len(),
                "resuming run",
            );
        }

        let mut summary = DiscoverySummary { run_id: self.run_id.clone(), ..DiscoverySummary::default() };
        let limiter = Arc::new(Semaphore::new(self.options.traversal.concurrency.max(1)));
        let sites = self.list_sites().await?;
        summary.sites = sites.len() as u64;

        for site in &sites {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            let libraries = match self.list_libraries(site).await {
                Ok(libraries) => libraries,
                Err(e) => {
                    summary.failed_sites += 1;
                    tracing::warn!(site = %site.id, error = ?e, "could not list libraries, skipping site");
                    continue;
                },
            };
            summary.libraries += libraries.len() as u64;

            let mut waiting = libraries.iter();
            let mut in_flight = FuturesUnordered::new();
            let mut outcomes = Vec::with_capacity(libraries.len());
            loop {
                while in_flight.len() < self.options.library_concurrency.max(1) {
                    let Some(library) = waiting.next() else {
                        break;
                    };
                    in_flight.push(self.discover_library(site, library, &recovery, &limiter, cancel));
                }
                let Some(outcome) = in_flight.next().await else {
                    break;
                };
                outcomes.push(outcome);
            }

            let mut site_complete = true;
            for outcome in outcomes {
                match outcome? {
                    LibraryOutcome::Skipped => summary.skipped_libraries += 1,
                    LibraryOutcome::Completed(report) => summary.absorb(&report),
                    LibraryOutcome::NotStarted => {
                        site_complete = false;
                        summary.cancelled = true;
                    },
                    LibraryOutcome::Cancelled(report) => {
                        site_complete = false;
                        summary.cancelled = true;
                        summary.absorb(&report);
                    },
                    LibraryOutcome::RootFailed(report) => {
                        site_complete = false;
                        summary.failed_libraries += 1;
                        summary.absorb(&report);
                    },
                }
            }
            if site_complete && !recovery.is_site_completed(&site.id) {
                self.complete_site(site, &libraries).await?;
            }
        }

        if summary.is_complete() {
            self.complete_run(&summary).await?;
        }
        tracing::info!(
            sites = summary.sites,
            libraries = summary.libraries,
            skipped = summary.skipped_libraries,
            folders = summary.folders,
            files = summary.files,
            failed_nodes = summary.failed_nodes,
            cancelled = summary.cancelled,
            "discovery finished",
        );
        Ok(summary)
    }

    async fn list_sites(&self) -> Result<Vec<Site>> {
        self.cache
            .get_or_compute("sites", None, || self.source.list_sites())
            .await
            .or_raise(|| ErrorKind::Remote)
    }

    async fn list_libraries(&self, site: &Site) -> rove_remote::error::Result<Vec<Library>> {
        let key = format!("libraries:{}", site.id);
        self.cache
            .get_or_compute(&key, None, || self.source.list_libraries(&site.id))
            .await
    }

    #[instrument(skip_all, fields(site = %site.id, library = %library.id))]
    async fn discover_library(
        &self,
        site: &Site,
        library: &Library,
        recovery: &RecoverySummary,
        limiter: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> Result<LibraryOutcome> {
        if recovery.is_library_completed(&site.id, &library.id) {
            tracing::info!("library already completed, skipping");
            return Ok(LibraryOutcome::Skipped);
        }
        if cancel.is_cancelled() {
            return Ok(LibraryOutcome::NotStarted);
        }

        let tracker = ProgressTracker::new(
            self.run_id.clone(),
            self.checkpoints.clone(),
            DiscoveryProgress::started(site.id.clone(), Some(library.id.clone())),
            self.options.checkpoint_every_items,
            self.options.checkpoint_every,
        );
        tracker.save(false).await.or_raise(|| ErrorKind::Checkpoint)?;

        let engine = TraversalEngine::new(self.source.clone(), self.sink.clone(), self.options.traversal.clone())
            .with_limiter(Arc::clone(limiter));
        let scope = Scope::new(site.id.clone(), library.id.clone());
        let report = match engine
            .run(&scope, TraversalNode::root(library.root_folder_id.clone()), &tracker, cancel)
            .await
        {
            Ok(report) => report,
            Err(e) => {
                // Records may be unreachable while checkpoints are not.
                if let Err(save) = tracker.save(true).await {
                    tracing::warn!(error = ?save, "could not save progress after traversal failure");
                }
                return Err(e);
            },
        };

        if tracker.root_failed() {
            tracing::warn!("library root could not be listed");
            tracker.save(true).await.or_raise(|| ErrorKind::Checkpoint)?;
            return Ok(LibraryOutcome::RootFailed(report));
        }
        if report.cancelled {
            tracker.save(true).await.or_raise(|| ErrorKind::Checkpoint)?;
            return Ok(LibraryOutcome::Cancelled(report));
        }
        tracker.complete().await.or_raise(|| ErrorKind::Checkpoint)?;
        Ok(LibraryOutcome::Completed(report))
    }

    /// Save the site-level progress once all of its libraries are done.
    async fn complete_site(&self, site: &Site, libraries: &[Library]) -> Result<()> {
        let mut progress = DiscoveryProgress::started(site.id.clone(), None);
        for library in libraries {
            let key = progress_key(&site.id, Some(&library.id));
            let restored = self
                .checkpoints
                .restore_as::<DiscoveryProgress>(&self.run_id, &key)
                .await
                .or_raise(|| ErrorKind::Checkpoint)?;
            if let Some(library_progress) = restored {
                progress.started_at = progress.started_at.min(library_progress.started_at);
                progress.folders_count += library_progress.folders_count;
                progress.files_count += library_progress.files_count;
                progress.failed_nodes += library_progress.failed_nodes;
            }
        }
        progress.complete();
        self.checkpoints
            .save_as(&self.run_id, &progress.key(), &progress, true)
            .await
            .or_raise(|| ErrorKind::Checkpoint)?;
        tracing::info!(site = %site.id, folders = progress.folders_count, files = progress.files_count, "site completed");
        Ok(())
    }

    async fn complete_run(&self, summary: &DiscoverySummary) -> Result<()> {
        let recovered = self
            .checkpoints
            .recovery_summary(&self.run_id)
            .await
            .or_raise(|| ErrorKind::Checkpoint)?;
        let complete = DiscoveryComplete {
            run_id: self.run_id.clone(),
            sites: summary.sites,
            libraries: summary.libraries,
            folders_count: recovered.folders,
            files_count: recovered.files,
            failed_nodes: recovered.failed_nodes,
            failed_records: summary.failed_records,
            completed_at: OffsetDateTime::now_utc(),
        };
        self.checkpoints
            .save_as(&self.run_id, COMPLETE_KEY, &complete, true)
            .await
            .or_raise(|| ErrorKind::Checkpoint)
    }
}
