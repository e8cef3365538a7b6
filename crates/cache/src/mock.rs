//! In-memory secondary tier for testing.

use crate::error::{ErrorKind, Result};
use crate::tier::{CacheTier, TierEntry};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// In-memory cache tier for testing.
///
/// Expiry follows the tokio clock, so tests running with a paused clock can
/// advance time deterministically. Failures can be toggled at any point to
/// simulate the backing service going away.
///
/// # Examples
///
/// ```
/// use rove_cache::{CacheTier, MockTier};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let tier = MockTier::with_name("shared");
/// tier.set("ns:k", &json!(1), None).await.unwrap();
/// assert_eq!(tier.len().await, 1);
/// # }
/// ```
pub struct MockTier {
    name: String,
    entries: RwLock<HashMap<String, (Value, Option<Instant>)>>,
    failing: AtomicBool,
    stalled: AtomicBool,
    gets: AtomicU64,
    sets: AtomicU64,
}

impl Default for MockTier {
    fn default() -> Self {
        Self::with_name("mock")
    }
}

impl MockTier {
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
            failing: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            gets: AtomicU64::new(0),
            sets: AtomicU64::new(0),
        }
    }

    /// Make every operation fail until switched back.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make every operation hang until switched back (calls already hung
    /// stay hung).
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn gets(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Raw value for a (namespaced) key, ignoring expiry.
    pub async fn peek(&self, key: &str) -> Option<Value> {
        self.entries.read().await.get(key).map(|(value, _)| value.clone())
    }

    async fn check(&self) -> Result<()> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Backend(self.name.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheTier for MockTier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<TierEntry>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check().await?;
        let now = Instant::now();
        let entries = self.entries.read().await;
        Ok(entries.get(key).and_then(|(value, expires_at)| match expires_at {
            Some(expires_at) if *expires_at <= now => None,
            Some(expires_at) => Some(TierEntry::new(value.clone(), Some(expires_at.duration_since(now)))),
            None => Some(TierEntry::new(value.clone(), None)),
        }))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check().await?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.write().await.insert(key.to_string(), (value.clone(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check().await?;
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn clear(&self) -> Result<u64> {
        self.check().await?;
        let mut entries = self.entries.write().await;
        let removed = entries.len() as u64;
        entries.clear();
        Ok(removed)
    }
}
