use crate::coordinator::{DiscoveryCoordinator, DiscoveryOptions};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use rove_cache::{CacheManager, CacheOptions, SinkTier};
use rove_checkpoint::{CheckpointConfig, CheckpointManager};
use rove_config::Config;
use rove_remote::SourceHandle;
use rove_store::{Database, Repository, SinkHandle};
use std::sync::Arc;

/// Everything a discovery run needs, built once from configuration.
///
/// Components are plain values owned here and handed out by reference or
/// cheap clone; there is no global state.
///
/// # Examples
///
/// ```no_run
/// use rove_config::Config;
/// use rove_discovery::Session;
/// # use rove_remote::SourceHandle;
/// # async fn example(source: SourceHandle) -> rove_discovery::error::Result<()> {
/// let session = Session::open(&Config::load().unwrap()).await?;
/// let summary = session
///     .coordinator("2025-06-nightly", source)
///     .run(tokio_util::sync::CancellationToken::new())
///     .await?;
/// println!("{} folders, {} files", summary.folders, summary.files);
/// session.close().await;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    database: Database,
    sink: SinkHandle,
    cache: CacheManager,
    checkpoints: CheckpointManager,
    options: DiscoveryOptions,
}

impl Session {
    pub async fn open(config: &Config) -> Result<Self> {
        config.validate().or_raise(|| ErrorKind::Config)?;

        let database = if config.database.in_memory {
            Database::connect_in_memory().await
        } else {
            if let Some(parent) = config.database.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Store)?;
            }
            Database::connect(&config.database.path).await
        }
        .or_raise(|| ErrorKind::Store)?;
        let sink: SinkHandle = Arc::new(Repository::from(&database));

        let cache_options = CacheOptions {
            namespace: config.cache.namespace.clone(),
            max_size: config.cache.max_size,
            default_ttl: Some(config.cache.default_ttl()),
            tier_timeout: config.cache.tier_timeout(),
        };
        let mut cache = CacheManager::builder(cache_options);
        if config.cache.persistent {
            cache = cache.with_persistent(Arc::new(SinkTier::new(sink.clone())));
        }

        let checkpoints = CheckpointManager::new(
            sink.clone(),
            CheckpointConfig {
                flush_interval: config.checkpoint.flush_interval(),
                batch_size: config.checkpoint.batch_size,
                retention: config.checkpoint.retention(),
            },
        );

        tracing::info!(
            database = %config.database.path.display(),
            in_memory = config.database.in_memory,
            "session opened",
        );
        Ok(Self {
            database,
            sink,
            cache: cache.build(),
            checkpoints,
            options: DiscoveryOptions::from(&config.discovery),
        })
    }

    /// A coordinator for one run over `source`.
    pub fn coordinator(&self, run_id: impl Into<String>, source: SourceHandle) -> DiscoveryCoordinator {
        DiscoveryCoordinator::new(
            run_id,
            source,
            self.sink.clone(),
            self.cache.clone(),
            self.checkpoints.clone(),
            self.options.clone(),
        )
    }

    pub fn sink(&self) -> &SinkHandle {
        &self.sink
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Flush anything still buffered and close the database.
    pub async fn close(self) {
        if let Err(e) = self.checkpoints.stop().await {
            tracing::error!(error = ?e, "could not flush checkpoints on close");
        }
        self.cache.close();
        self.database.close().await;
    }
}
