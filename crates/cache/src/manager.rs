use crate::TierHandle;
use crate::error::{ErrorKind, Result};
use crate::memory::{Lookup, MemoryTier};
use crate::stats::{CacheStats, Counters, TierCounters};
use exn::ResultExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Fast-tier capacity and expiry defaults.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Prefix applied to every key, separated by `:`.
    pub namespace: String,
    /// Maximum number of entries held in-process.
    pub max_size: usize,
    /// Lifetime applied when `set` is called without one; `None` never expires.
    pub default_ttl: Option<Duration>,
    /// Longest a single call to a slower tier may take before it counts as failed.
    pub tier_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            namespace: "rove".to_string(),
            max_size: 10_000,
            default_ttl: Some(Duration::from_secs(3600)),
            tier_timeout: Duration::from_secs(5),
        }
    }
}

/// Assembles a [`CacheManager`] with its optional slower tiers.
pub struct CacheBuilder {
    options: CacheOptions,
    secondary: Option<TierHandle>,
    persistent: Option<TierHandle>,
}

impl CacheBuilder {
    pub fn with_secondary(mut self, tier: TierHandle) -> Self {
        self.secondary = Some(tier);
        self
    }

    pub fn with_persistent(mut self, tier: TierHandle) -> Self {
        self.persistent = Some(tier);
        self
    }

    pub fn build(self) -> CacheManager {
        tracing::debug!(
            namespace = %self.options.namespace,
            max_size = self.options.max_size,
            secondary = self.secondary.as_ref().map(|tier| tier.name()),
            persistent = self.persistent.as_ref().map(|tier| tier.name()),
            "cache initialised",
        );
        CacheManager {
            namespace: self.options.namespace,
            inner: Arc::new(Inner {
                memory: Mutex::new(MemoryTier::new(self.options.max_size)),
                secondary: self.secondary,
                persistent: self.persistent,
                default_ttl: self.options.default_ttl,
                tier_timeout: self.options.tier_timeout,
                counters: Counters::default(),
            }),
        }
    }
}

struct Inner {
    memory: Mutex<MemoryTier>,
    secondary: Option<TierHandle>,
    persistent: Option<TierHandle>,
    default_ttl: Option<Duration>,
    tier_timeout: Duration,
    counters: Counters,
}

/// Shared handle to a layered cache.
///
/// Cloning is cheap and every clone sees the same entries. Reads go fast
/// tier, then secondary, then persistent; a hit in a slower tier is copied
/// into the faster ones with whatever lifetime it had left. Writes land in
/// the fast tier first, then in every configured slower tier. Failures and
/// timeouts of slower tiers are logged and counted, never surfaced.
///
/// # Examples
///
/// ```
/// use rove_cache::{CacheManager, CacheOptions};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = CacheManager::builder(CacheOptions::default()).build();
/// cache.set("sites", json!(["s1", "s2"]), None).await;
/// assert_eq!(cache.get("sites").await, Some(json!(["s1", "s2"])));
///
/// let graph = cache.with_namespace("graph");
/// assert_eq!(graph.get("sites").await, None);
/// # }
/// ```
#[derive(Clone)]
pub struct CacheManager {
    namespace: String,
    inner: Arc<Inner>,
}

impl CacheManager {
    pub fn builder(options: CacheOptions) -> CacheBuilder {
        CacheBuilder { options, secondary: None, persistent: None }
    }

    /// A handle over the same tiers whose keys live under a different namespace.
    pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), inner: Arc::clone(&self.inner) }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Stable key for a lookup described by several parts (e.g. an endpoint
    /// and its query parameters).
    pub fn key_for(parts: &[&str]) -> String {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        }
        hasher.finalize().to_hex().to_string()
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}:{}", self.namespace, key)
    }

    fn memory(&self) -> MutexGuard<'_, MemoryTier> {
        self.inner.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tiers(&self) -> impl Iterator<Item = (&TierHandle, &TierCounters)> {
        let counters = &self.inner.counters;
        self.inner
            .secondary
            .iter()
            .map(move |tier| (tier, &counters.secondary))
            .chain(self.inner.persistent.iter().map(move |tier| (tier, &counters.persistent)))
    }

    async fn bounded<T>(&self, tier: &TierHandle, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.inner.tier_timeout, call).await {
            Ok(result) => result,
            Err(_) => exn::bail!(ErrorKind::Backend(format!("{} timed out", tier.name()))),
        }
    }

    /// Look a key up in every tier, fastest first.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let key = self.full_key(key);
        let counters = &self.inner.counters;

        let lookup = self.memory().get(&key, Instant::now());
        match lookup {
            Lookup::Hit(value) => {
                Counters::bump(&counters.memory.hits, 1);
                Counters::bump(&counters.hits, 1);
                return Some(value);
            },
            Lookup::Expired => {
                Counters::bump(&counters.expired, 1);
                Counters::bump(&counters.memory.misses, 1);
            },
            Lookup::Miss => Counters::bump(&counters.memory.misses, 1),
        }

        let mut missed: Vec<&TierHandle> = Vec::new();
        for (tier, tier_counters) in self.tiers() {
            match self.bounded(tier, tier.get(&key)).await {
                Ok(Some(entry)) if !entry.is_expired() => {
                    Counters::bump(&tier_counters.hits, 1);
                    Counters::bump(&counters.hits, 1);
                    tracing::trace!(tier = tier.name(), %key, "cache hit in slower tier");
                    for faster in missed {
                        if let Err(e) = self.bounded(faster, faster.set(&key, &entry.value, entry.ttl)).await {
                            Counters::bump(&counters.secondary.errors, 1);
                            tracing::warn!(tier = faster.name(), %key, error = ?e, "cache backfill failed");
                        }
                    }
                    let evicted = self.memory().insert(&key, entry.value.clone(), entry.ttl, Instant::now());
                    Counters::bump(&counters.evictions, evicted as u64);
                    return Some(entry.value);
                },
                Ok(_) => {
                    Counters::bump(&tier_counters.misses, 1);
                    missed.push(tier);
                },
                Err(e) => {
                    Counters::bump(&tier_counters.errors, 1);
                    tracing::warn!(tier = tier.name(), %key, error = ?e, "cache tier read failed");
                },
            }
        }

        Counters::bump(&counters.misses, 1);
        None
    }

    /// Typed [`get()`](Self::get).
    ///
    /// A value that no longer deserializes into `T` is an error rather than a
    /// miss, so schema drift is noticed.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await {
            Some(value) => Ok(Some(serde_json::from_value(value).or_raise(|| ErrorKind::Serialization)?)),
            None => Ok(None),
        }
    }

    /// Store a value in the fast tier, then in every slower tier.
    ///
    /// `ttl` falls back to the configured default lifetime.
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let key = self.full_key(key);
        let ttl = ttl.or(self.inner.default_ttl);
        let counters = &self.inner.counters;
        Counters::bump(&counters.sets, 1);

        let evicted = self.memory().insert(&key, value.clone(), ttl, Instant::now());
        Counters::bump(&counters.evictions, evicted as u64);
        for (tier, tier_counters) in self.tiers() {
            if let Err(e) = self.bounded(tier, tier.set(&key, &value, ttl)).await {
                Counters::bump(&tier_counters.errors, 1);
                tracing::warn!(tier = tier.name(), %key, error = ?e, "cache tier write failed");
            }
        }
    }

    /// Typed [`set()`](Self::set).
    pub async fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let value = serde_json::to_value(value).or_raise(|| ErrorKind::Serialization)?;
        self.set(key, value, ttl).await;
        Ok(())
    }

    /// Return the cached value, or compute, cache and return it.
    ///
    /// Errors from `compute` are passed through untouched and nothing is
    /// cached. A cached value of the wrong shape is recomputed.
    pub async fn get_or_compute<T, E, F, Fut>(&self, key: &str, ttl: Option<Duration>, compute: F) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
    {
        match self.get_as::<T>(key).await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {},
            Err(e) => tracing::warn!(namespace = %self.namespace, key, error = ?e, "discarding unreadable cached value"),
        }
        let value = compute().await?;
        if let Err(e) = self.set_as(key, &value, ttl).await {
            tracing::warn!(namespace = %self.namespace, key, error = ?e, "computed value could not be cached");
        }
        Ok(value)
    }

    /// Remove a key from every tier.
    ///
    /// Returns `true` if at least one tier held it.
    pub async fn delete(&self, key: &str) -> bool {
        let key = self.full_key(key);
        let mut removed = self.memory().remove(&key);
        for (tier, tier_counters) in self.tiers() {
            match self.bounded(tier, tier.delete(&key)).await {
                Ok(found) => removed |= found,
                Err(e) => {
                    Counters::bump(&tier_counters.errors, 1);
                    tracing::warn!(tier = tier.name(), %key, error = ?e, "cache tier delete failed");
                },
            }
        }
        if removed {
            Counters::bump(&self.inner.counters.deletes, 1);
        }
        removed
    }

    /// Empty every tier, across all namespaces.
    ///
    /// Returns `true` if anything was removed from at least one tier.
    pub async fn clear(&self) -> bool {
        let mut removed = self.memory().clear() > 0;
        for (tier, tier_counters) in self.tiers() {
            match self.bounded(tier, tier.clear()).await {
                Ok(count) => removed |= count > 0,
                Err(e) => {
                    Counters::bump(&tier_counters.errors, 1);
                    tracing::warn!(tier = tier.name(), error = ?e, "cache tier clear failed");
                },
            }
        }
        tracing::debug!(removed, "cache cleared");
        removed
    }

    /// Drop expired entries from the fast tier.
    pub fn purge_expired(&self) -> usize {
        let purged = self.memory().purge_expired(Instant::now());
        Counters::bump(&self.inner.counters.expired, purged as u64);
        purged
    }

    /// Entries currently held by the fast tier (all namespaces).
    pub fn len(&self) -> usize {
        self.memory().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.len();
        self.inner
            .counters
            .snapshot(entries, self.inner.secondary.is_some(), self.inner.persistent.is_some())
    }

    /// Log final statistics and release the fast tier's memory.
    ///
    /// Slower tiers keep their entries; that is what they are for.
    pub fn close(&self) {
        let stats = self.stats();
        tracing::info!(
            hits = stats.hits,
            misses = stats.misses,
            hit_rate = stats.hit_rate(),
            evictions = stats.evictions,
            "cache closed",
        );
        self.memory().clear();
    }
}
