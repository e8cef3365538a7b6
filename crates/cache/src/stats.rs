use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub(crate) struct TierCounters {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) errors: AtomicU64,
}

impl TierCounters {
    fn snapshot(&self) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Default)]
pub(crate) struct Counters {
    pub(crate) memory: TierCounters,
    pub(crate) secondary: TierCounters,
    pub(crate) persistent: TierCounters,
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) sets: AtomicU64,
    pub(crate) deletes: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) expired: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, entries: usize, has_secondary: bool, has_persistent: bool) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            entries,
            memory: self.memory.snapshot(),
            secondary: has_secondary.then(|| self.secondary.snapshot()),
            persistent: has_persistent.then(|| self.persistent.snapshot()),
        }
    }
}

/// Lookup counters for a single tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

impl TierStats {
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.misses)
    }
}

/// Point-in-time snapshot of cache activity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheStats {
    /// Lookups answered by any tier.
    pub hits: u64,
    /// Lookups no tier could answer.
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Entries pushed out of the fast tier by capacity.
    pub evictions: u64,
    /// Entries found in the fast tier past their expiry.
    pub expired: u64,
    /// Entries currently held by the fast tier.
    pub entries: usize,
    pub memory: TierStats,
    pub secondary: Option<TierStats>,
    pub persistent: Option<TierStats>,
}

impl CacheStats {
    /// Fraction of lookups answered by any tier, `0.0` before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.misses)
    }
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 { 0.0 } else { hits as f64 / total as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, 0.0)]
    #[case(3, 1, 0.75)]
    #[case(0, 5, 0.0)]
    #[case(2, 0, 1.0)]
    fn test_hit_rate(#[case] hits: u64, #[case] misses: u64, #[case] expected: f64) {
        let stats = CacheStats { hits, misses, ..CacheStats::default() };
        assert!((stats.hit_rate() - expected).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snapshot_omits_absent_tiers() {
        let counters = Counters::default();
        Counters::bump(&counters.persistent.hits, 2);
        let stats = counters.snapshot(4, false, true);
        assert!(stats.secondary.is_none());
        assert_eq!(stats.persistent.map(|tier| tier.hits), Some(2));
        assert_eq!(stats.entries, 4);
    }
}
