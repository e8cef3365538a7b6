use crate::CHECKPOINT_SCHEMA_VERSION;
use crate::error::{ErrorKind, Result};
use crate::payload::{COMPLETE_KEY, DiscoveryComplete, DiscoveryProgress, PROGRESS_PREFIX, RecoverySummary};
use exn::ResultExt;
use rove_store::{CheckpointRecord, SinkHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// How often the background loop flushes buffered saves.
    pub flush_interval: Duration,
    /// Checkpoints written per sink call; this many pending keys also
    /// triggers an early flush.
    pub batch_size: usize,
    /// Age past which [`CheckpointManager::cleanup`] removes checkpoints.
    pub retention: Duration,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(30),
            batch_size: 50,
            retention: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    pub saves: u64,
    pub immediate_saves: u64,
    pub flushes: u64,
    pub flushed_entries: u64,
    pub flush_errors: u64,
    pub pending: usize,
}

type Key = (String, String);

fn key(run_id: &str, checkpoint_type: &str) -> Key {
    (run_id.to_string(), checkpoint_type.to_string())
}

struct Buffered {
    record: CheckpointRecord,
    /// Bumped on every buffered save, so a flush can tell whether the value
    /// it wrote is still the latest.
    seq: u64,
}

#[derive(Default)]
struct State {
    pending: HashMap<Key, Buffered>,
    /// Values known to match the sink.
    cache: HashMap<Key, CheckpointRecord>,
    seq: u64,
}

#[derive(Default)]
struct Counters {
    saves: AtomicU64,
    immediate_saves: AtomicU64,
    flushes: AtomicU64,
    flushed_entries: AtomicU64,
    flush_errors: AtomicU64,
}

/// The flush loop and how many callers currently need it.
#[derive(Default)]
struct FlushLoop {
    holders: usize,
    running: Option<(CancellationToken, JoinHandle<()>)>,
}

struct Inner {
    sink: SinkHandle,
    config: CheckpointConfig,
    state: Mutex<State>,
    /// Serialises sink writes, so an older value can never land after a newer one.
    write_lock: Mutex<()>,
    wake: Notify,
    flush_loop: std::sync::Mutex<FlushLoop>,
    counters: Counters,
}

/// Buffered checkpoint store with a background flush loop.
///
/// Cloning is cheap; clones share the buffer and the loop.
///
/// # Examples
///
/// ```
/// use rove_checkpoint::{CheckpointConfig, CheckpointManager};
/// use rove_store::{Database, Repository};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let db = Database::connect_in_memory().await.unwrap();
/// let checkpoints = CheckpointManager::new(Arc::new(Repository::from(&db)), CheckpointConfig::default());
/// checkpoints.start();
/// checkpoints.save("run-1", "cursor", json!({"page": 3}), false).await.unwrap();
/// checkpoints.stop().await.unwrap();
///
/// assert_eq!(checkpoints.restore("run-1", "cursor").await.unwrap(), Some(json!({"page": 3})));
/// # }
/// ```
#[derive(Clone)]
pub struct CheckpointManager {
    inner: Arc<Inner>,
}

impl CheckpointManager {
    pub fn new(sink: SinkHandle, config: CheckpointConfig) -> Self {
        let config = CheckpointConfig { batch_size: config.batch_size.max(1), ..config };
        Self {
            inner: Arc::new(Inner {
                sink,
                config,
                state: Mutex::new(State::default()),
                write_lock: Mutex::new(()),
                wake: Notify::new(),
                flush_loop: std::sync::Mutex::new(FlushLoop::default()),
                counters: Counters::default(),
            }),
        }
    }

    /// Start the background flush loop, or join it if already running.
    ///
    /// Every `start()` is paired with a [`stop()`](Self::stop); the loop runs
    /// until the last holder stops, so concurrent runs sharing one manager
    /// keep flushing while any of them is still going.
    pub fn start(&self) {
        let mut flush_loop = self.inner.flush_loop.lock().unwrap_or_else(PoisonError::into_inner);
        flush_loop.holders += 1;
        if flush_loop.running.is_some() {
            tracing::debug!(holders = flush_loop.holders, "checkpoint flush loop already running");
            return;
        }
        let cancel = CancellationToken::new();
        let inner = Arc::clone(&self.inner);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let interval = inner.config.flush_interval;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(interval) => {},
                    () = inner.wake.notified() => tracing::trace!("early checkpoint flush"),
                }
                if let Err(e) = inner.flush().await {
                    tracing::warn!(error = ?e, "checkpoint flush failed, entries stay pending");
                }
            }
        });
        tracing::debug!(interval = ?self.inner.config.flush_interval, "checkpoint flush loop started");
        flush_loop.running = Some((cancel, handle));
    }

    /// Release one [`start()`](Self::start) and write out everything still
    /// pending. The loop itself ends when its last holder stops.
    ///
    /// Returns how many checkpoints the flush wrote. Safe to call without a
    /// prior `start()`.
    pub async fn stop(&self) -> Result<usize> {
        let running = {
            let mut flush_loop = self.inner.flush_loop.lock().unwrap_or_else(PoisonError::into_inner);
            flush_loop.holders = flush_loop.holders.saturating_sub(1);
            if flush_loop.holders == 0 { flush_loop.running.take() } else { None }
        };
        if let Some((cancel, handle)) = running {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::error!(error = ?e, "checkpoint flush loop ended abnormally");
            }
        }
        let flushed = self.inner.flush().await?;
        tracing::debug!(flushed, "checkpoint manager stopped");
        Ok(flushed)
    }

    /// Save a payload under `(run_id, checkpoint_type)`.
    ///
    /// Immediate saves are written before returning and replace any pending
    /// value for the key. Buffered saves cannot fail here; if a later flush
    /// fails they stay pending for the next cycle.
    pub async fn save(&self, run_id: &str, checkpoint_type: &str, payload: Value, immediate: bool) -> Result<()> {
        let record = CheckpointRecord::new(run_id, checkpoint_type, CHECKPOINT_SCHEMA_VERSION, payload);
        self.inner.counters.saves.fetch_add(1, Ordering::Relaxed);
        if immediate {
            return self.inner.save_now(record).await;
        }
        let pending = {
            let mut state = self.inner.state.lock().await;
            let key = key(run_id, checkpoint_type);
            state.seq += 1;
            let seq = state.seq;
            state.cache.remove(&key);
            state.pending.insert(key, Buffered { record, seq });
            state.pending.len()
        };
        if pending >= self.inner.config.batch_size {
            self.inner.wake.notify_one();
        }
        Ok(())
    }

    /// Typed [`save()`](Self::save).
    pub async fn save_as<T: Serialize>(&self, run_id: &str, checkpoint_type: &str, payload: &T, immediate: bool) -> Result<()> {
        let payload = serde_json::to_value(payload).or_raise(|| ErrorKind::Serialization)?;
        self.save(run_id, checkpoint_type, payload, immediate).await
    }

    /// Latest payload for a key: in-process cache, then pending buffer, then sink.
    pub async fn restore(&self, run_id: &str, checkpoint_type: &str) -> Result<Option<Value>> {
        let key = key(run_id, checkpoint_type);
        let local = {
            let state = self.inner.state.lock().await;
            state
                .cache
                .get(&key)
                .or_else(|| state.pending.get(&key).map(|buffered| &buffered.record))
                .cloned()
        };
        let record = match local {
            Some(record) => Some(record),
            None => {
                let stored = self
                    .inner
                    .sink
                    .get_checkpoint(run_id, checkpoint_type)
                    .await
                    .or_raise(|| ErrorKind::Persistence)?;
                if let Some(record) = &stored {
                    let mut state = self.inner.state.lock().await;
                    // A save may have raced the read; only cache if nothing newer is known.
                    if !state.cache.contains_key(&key) && !state.pending.contains_key(&key) {
                        state.cache.insert(key, record.clone());
                    }
                }
                stored
            },
        };
        Ok(record.and_then(current_version))
    }

    /// Typed [`restore()`](Self::restore).
    pub async fn restore_as<T: DeserializeOwned>(&self, run_id: &str, checkpoint_type: &str) -> Result<Option<T>> {
        match self.restore(run_id, checkpoint_type).await? {
            Some(payload) => Ok(Some(serde_json::from_value(payload).or_raise(|| ErrorKind::Serialization)?)),
            None => Ok(None),
        }
    }

    /// Write out every pending checkpoint now.
    pub async fn flush(&self) -> Result<usize> {
        self.inner.flush().await
    }

    /// Remove checkpoints older than `retention` (the configured retention if `None`).
    pub async fn cleanup(&self, retention: Option<Duration>) -> Result<u64> {
        let retention = retention.unwrap_or(self.inner.config.retention);
        let cutoff = OffsetDateTime::now_utc() - retention;
        let removed = self
            .inner
            .sink
            .delete_checkpoints_before(cutoff)
            .await
            .or_raise(|| ErrorKind::Persistence)?;
        self.inner
            .state
            .lock()
            .await
            .cache
            .retain(|_, record| record.saved_at >= cutoff);
        tracing::info!(removed, ?retention, "checkpoint retention sweep");
        Ok(removed)
    }

    /// Rebuild what a previous attempt at `run_id` achieved from its progress
    /// checkpoints, including ones not yet flushed.
    #[instrument(skip(self))]
    pub async fn recovery_summary(&self, run_id: &str) -> Result<RecoverySummary> {
        let stored = self
            .inner
            .sink
            .list_checkpoints(run_id, PROGRESS_PREFIX)
            .await
            .or_raise(|| ErrorKind::Persistence)?;
        let mut latest: HashMap<String, CheckpointRecord> = stored
            .into_iter()
            .map(|record| (record.checkpoint_type.clone(), record))
            .collect();
        {
            let state = self.inner.state.lock().await;
            let is_progress = |(run, ty): &&Key| run == run_id && ty.starts_with(PROGRESS_PREFIX);
            for (key, record) in state.cache.iter().filter(|(key, _)| is_progress(key)) {
                latest.insert(key.1.clone(), record.clone());
            }
            for (key, buffered) in state.pending.iter().filter(|(key, _)| is_progress(key)) {
                latest.insert(key.1.clone(), buffered.record.clone());
            }
        }

        let mut summary = RecoverySummary::default();
        for (checkpoint_type, record) in latest {
            let Some(payload) = current_version(record) else {
                continue;
            };
            match serde_json::from_value::<DiscoveryProgress>(payload) {
                Ok(progress) => summary.record(progress),
                Err(e) => tracing::warn!(%checkpoint_type, error = %e, "ignoring unreadable progress checkpoint"),
            }
        }
        summary.complete = match self.restore_as::<DiscoveryComplete>(run_id, COMPLETE_KEY).await {
            Ok(complete) => complete,
            Err(e) if matches!(&*e, ErrorKind::Serialization) => {
                tracing::warn!(error = ?e, "ignoring unreadable completion checkpoint");
                None
            },
            Err(e) => return Err(e),
        };
        tracing::debug!(
            completed_libraries = summary.completed_libraries.len(),
            in_progress_libraries = summary.in_progress_libraries.len(),
            complete = summary.is_complete(),
            "recovery summary built",
        );
        Ok(summary)
    }

    pub async fn stats(&self) -> CheckpointStats {
        let counters = &self.inner.counters;
        CheckpointStats {
            saves: counters.saves.load(Ordering::Relaxed),
            immediate_saves: counters.immediate_saves.load(Ordering::Relaxed),
            flushes: counters.flushes.load(Ordering::Relaxed),
            flushed_entries: counters.flushed_entries.load(Ordering::Relaxed),
            flush_errors: counters.flush_errors.load(Ordering::Relaxed),
            pending: self.inner.state.lock().await.pending.len(),
        }
    }
}

fn current_version(record: CheckpointRecord) -> Option<Value> {
    if record.version == CHECKPOINT_SCHEMA_VERSION {
        return Some(record.payload);
    }
    tracing::warn!(
        run_id = %record.run_id,
        checkpoint_type = %record.checkpoint_type,
        version = record.version,
        expected = CHECKPOINT_SCHEMA_VERSION,
        "ignoring checkpoint written under another schema version",
    );
    None
}

impl Inner {
    async fn save_now(&self, record: CheckpointRecord) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let key = key(&record.run_id, &record.checkpoint_type);
        self.sink.save_checkpoint(&record).await.or_raise(|| ErrorKind::Persistence)?;
        {
            let mut state = self.state.lock().await;
            state.pending.remove(&key);
            state.cache.insert(key, record);
        }
        self.counters.immediate_saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Write a snapshot of the pending buffer in chunks of `batch_size`.
    ///
    /// Entries re-buffered while their chunk was in flight stay pending.
    async fn flush(&self) -> Result<usize> {
        let _write = self.write_lock.lock().await;
        let snapshot: Vec<(Key, CheckpointRecord, u64)> = {
            let state = self.state.lock().await;
            state
                .pending
                .iter()
                .map(|(key, buffered)| (key.clone(), buffered.record.clone(), buffered.seq))
                .collect()
        };
        if snapshot.is_empty() {
            return Ok(0);
        }

        let mut flushed = 0;
        for chunk in snapshot.chunks(self.config.batch_size) {
            let records: Vec<CheckpointRecord> = chunk.iter().map(|(_, record, _)| record.clone()).collect();
            if let Err(e) = self.sink.save_checkpoints(&records).await {
                self.counters.flush_errors.fetch_add(1, Ordering::Relaxed);
                return Err(e).or_raise(|| ErrorKind::Persistence);
            }
            let mut state = self.state.lock().await;
            for (key, record, seq) in chunk {
                if state.pending.get(key).is_some_and(|buffered| buffered.seq == *seq) {
                    state.pending.remove(key);
                    state.cache.insert(key.clone(), record.clone());
                }
            }
            flushed += chunk.len();
        }
        self.counters.flushes.fetch_add(1, Ordering::Relaxed);
        self.counters.flushed_entries.fetch_add(flushed as u64, Ordering::Relaxed);
        tracing::debug!(flushed, "checkpoints flushed");
        Ok(flushed)
    }
}
