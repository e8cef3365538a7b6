//! The fast, in-process tier.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::time::Instant;

struct Slot {
    value: Value,
    expires_at: Option<Instant>,
    /// Position in the recency order; larger is more recent.
    tick: u64,
}

pub(crate) enum Lookup {
    Hit(Value),
    /// Present but past its expiry; removed by the lookup.
    Expired,
    Miss,
}

/// Strict LRU map with per-entry expiry.
///
/// Recency is a monotonically increasing tick per key; `order` maps ticks
/// back to keys so the least recently used key is always the first entry.
/// Not synchronised: the manager wraps it in a single coarse lock.
pub(crate) struct MemoryTier {
    max_size: usize,
    entries: HashMap<String, Slot>,
    order: BTreeMap<u64, String>,
    tick: u64,
}

impl MemoryTier {
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            max_size: max_size.max(1),
            entries: HashMap::new(),
            order: BTreeMap::new(),
            tick: 0,
        }
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &str) {
        let tick = self.next_tick();
        if let Some(slot) = self.entries.get_mut(key) {
            self.order.remove(&slot.tick);
            slot.tick = tick;
            self.order.insert(tick, key.to_string());
        }
    }

    pub(crate) fn get(&mut self, key: &str, now: Instant) -> Lookup {
        let Some(slot) = self.entries.get(key) else {
            return Lookup::Miss;
        };
        if slot.expires_at.is_some_and(|expires| expires <= now) {
            self.remove(key);
            return Lookup::Expired;
        }
        let value = slot.value.clone();
        self.touch(key);
        Lookup::Hit(value)
    }

    /// Insert or update a key, making it the most recently used.
    ///
    /// Returns how many other keys were evicted to stay within capacity.
    pub(crate) fn insert(&mut self, key: &str, value: Value, ttl: Option<Duration>, now: Instant) -> usize {
        let expires_at = ttl.map(|ttl| now + ttl);
        let tick = self.next_tick();
        if let Some(previous) = self.entries.insert(key.to_string(), Slot { value, expires_at, tick }) {
            self.order.remove(&previous.tick);
        }
        self.order.insert(tick, key.to_string());
        let mut evicted = 0;
        while self.entries.len() > self.max_size {
            let Some((_, oldest)) = self.order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted += 1;
        }
        evicted
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(slot) => {
                self.order.remove(&slot.tick);
                true
            },
            None => false,
        }
    }

    pub(crate) fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        self.order.clear();
        removed
    }

    /// Drop every expired entry, returning how many were dropped.
    pub(crate) fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, slot)| slot.expires_at.is_some_and(|expires| expires <= now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn present(tier: &mut MemoryTier, key: &str, now: Instant) -> bool {
        matches!(tier.get(key, now), Lookup::Hit(_))
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        let now = Instant::now();
        let mut tier = MemoryTier::new(3);
        tier.insert("a", json!(1), None, now);
        tier.insert("b", json!(2), None, now);
        tier.insert("c", json!(3), None, now);
        assert!(present(&mut tier, "a", now));
        assert_eq!(tier.insert("d", json!(4), None, now), 1);
        assert!(!present(&mut tier, "b", now));
        assert!(present(&mut tier, "a", now));
        assert!(present(&mut tier, "c", now));
        assert!(present(&mut tier, "d", now));
        assert_eq!(tier.len(), 3);
    }

    #[test]
    fn test_update_moves_to_most_recent() {
        let now = Instant::now();
        let mut tier = MemoryTier::new(2);
        tier.insert("a", json!(1), None, now);
        tier.insert("b", json!(2), None, now);
        tier.insert("a", json!(10), None, now);
        tier.insert("c", json!(3), None, now);
        assert!(!present(&mut tier, "b", now));
        match tier.get("a", now) {
            Lookup::Hit(value) => assert_eq!(value, json!(10)),
            _ => panic!("expected a hit for updated key"),
        }
    }

    #[test]
    fn test_expired_entry_is_absent_and_removed() {
        let now = Instant::now();
        let mut tier = MemoryTier::new(10);
        tier.insert("k", json!("v"), Some(Duration::from_secs(1)), now);
        assert!(present(&mut tier, "k", now + Duration::from_millis(500)));
        assert!(matches!(tier.get("k", now + Duration::from_secs(1)), Lookup::Expired));
        assert_eq!(tier.len(), 0);
        assert!(matches!(tier.get("k", now + Duration::from_secs(1)), Lookup::Miss));
    }

    #[test]
    fn test_purge_expired() {
        let now = Instant::now();
        let mut tier = MemoryTier::new(10);
        tier.insert("short", json!(1), Some(Duration::from_secs(1)), now);
        tier.insert("long", json!(2), Some(Duration::from_secs(60)), now);
        tier.insert("forever", json!(3), None, now);
        assert_eq!(tier.purge_expired(now + Duration::from_secs(2)), 1);
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let now = Instant::now();
        let mut tier = MemoryTier::new(0);
        tier.insert("a", json!(1), None, now);
        assert_eq!(tier.len(), 1);
    }
}
