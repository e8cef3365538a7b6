use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use rove_store::SinkHandle;
use serde_json::Value;
use std::time::Duration;
use time::OffsetDateTime;

/// A value read from a slower tier.
#[derive(Debug, Clone, PartialEq)]
pub struct TierEntry {
    pub value: Value,
    /// Remaining lifetime; `None` means the entry never expires.
    pub ttl: Option<Duration>,
}

impl TierEntry {
    pub fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self { value, ttl }
    }

    pub fn is_expired(&self) -> bool {
        self.ttl.is_some_and(|ttl| ttl.is_zero())
    }
}

/// A cache tier slower than the in-process one.
///
/// Keys arrive already namespaced. Implementations should report expired
/// entries as absent; the manager also treats a zero remaining TTL as absent.
#[async_trait]
pub trait CacheTier: Send + Sync {
    /// Name of the tier (used for logging and stats only).
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<TierEntry>>;

    /// Store a value, expiring after `ttl` if given.
    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<()>;

    /// Returns `true` if an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry, returning how many were removed.
    async fn clear(&self) -> Result<u64>;
}

/// The persistent tier: cache entries stored through a [`PersistenceSink`](rove_store::PersistenceSink).
pub struct SinkTier {
    sink: SinkHandle,
}

impl SinkTier {
    pub fn new(sink: SinkHandle) -> Self {
        Self { sink }
    }

    /// Remove entries that expired at or before now.
    pub async fn purge_expired(&self) -> Result<u64> {
        self.sink
            .purge_expired_cache_entries(OffsetDateTime::now_utc())
            .await
            .or_raise(|| ErrorKind::Backend(self.name().to_string()))
    }
}

#[async_trait]
impl CacheTier for SinkTier {
    fn name(&self) -> &str {
        "persistent"
    }

    async fn get(&self, key: &str) -> Result<Option<TierEntry>> {
        let record = self
            .sink
            .get_cache_entry(key)
            .await
            .or_raise(|| ErrorKind::Backend(self.name().to_string()))?;
        let Some(record) = record else {
            return Ok(None);
        };
        let now = OffsetDateTime::now_utc();
        if record.is_expired_at(now) {
            return Ok(None);
        }
        let ttl = record
            .expires_at
            .map(|expires_at| Duration::try_from(expires_at - now).unwrap_or_default());
        Ok(Some(TierEntry::new(record.value, ttl)))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| OffsetDateTime::now_utc() + ttl);
        self.sink
            .set_cache_entry(key, value, expires_at)
            .await
            .or_raise(|| ErrorKind::Backend(self.name().to_string()))
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.sink
            .delete_cache_entry(key)
            .await
            .or_raise(|| ErrorKind::Backend(self.name().to_string()))
    }

    async fn clear(&self) -> Result<u64> {
        self.sink
            .clear_cache()
            .await
            .or_raise(|| ErrorKind::Backend(self.name().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rove_store::{MockSink, PersistenceSink};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sink_tier_round_trip_with_ttl() {
        let tier = SinkTier::new(Arc::new(MockSink::default()));
        tier.set("ns:k", &json!({"a": 1}), Some(Duration::from_secs(3600))).await.unwrap();
        let entry = tier.get("ns:k").await.unwrap().unwrap();
        assert_eq!(entry.value, json!({"a": 1}));
        let remaining = entry.ttl.unwrap();
        assert!(remaining <= Duration::from_secs(3600));
        assert!(remaining > Duration::from_secs(3500));
    }

    #[tokio::test]
    async fn test_sink_tier_hides_expired_entries() {
        let sink = Arc::new(MockSink::default());
        sink.set_cache_entry("ns:old", &json!(1), Some(OffsetDateTime::now_utc() - time::Duration::seconds(5)))
            .await
            .unwrap();
        let tier = SinkTier::new(sink);
        assert!(tier.get("ns:old").await.unwrap().is_none());
        assert_eq!(tier.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sink_tier_failure_is_backend_error() {
        let sink = Arc::new(MockSink::default());
        sink.set_fail_cache(true);
        let tier = SinkTier::new(sink);
        let err = tier.get("ns:k").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Backend(name) if name == "persistent"));
        assert!(err.is_retryable());
    }
}
