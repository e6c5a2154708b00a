//! Time source and TTL bookkeeping for alert suppression.
//!
//! Suppression windows are measured against an injected [`Clock`], so
//! tests can crank time forward instead of sleeping.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};

/// Milliseconds since the Unix epoch, injectable for tests.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Hand-cranked clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Keys with expiry deadlines. Not synchronized; callers hold it
/// inside their own lock.
#[derive(Debug, Clone)]
pub struct TtlCache<K> {
    entries: HashMap<K, i64>,
    ttl_ms: u64,
}

impl<K: Eq + Hash> TtlCache<K> {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            ttl_ms,
        }
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Change the TTL for future inserts. Existing deadlines keep the
    /// TTL they were recorded under.
    pub fn set_ttl(&mut self, ttl_ms: u64) {
        self.ttl_ms = ttl_ms;
    }

    /// Is `key` still live at `now_ms`?
    pub fn contains(&self, key: &K, now_ms: i64) -> bool {
        self.entries
            .get(key)
            .map_or(false, |&deadline| now_ms < deadline)
    }

    /// Record `key` as seen at `now_ms`, resetting its deadline.
    pub fn insert(&mut self, key: K, now_ms: i64) {
        self.entries.insert(key, now_ms + self.ttl_ms as i64);
    }

    pub fn remove(&mut self, key: &K) {
        self.entries.remove(key);
    }

    /// Drop entries whose deadline has passed; returns how many went.
    pub fn purge_expired(&mut self, now_ms: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, &mut deadline| now_ms < deadline);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_expire_after_the_ttl() {
        let clock = ManualClock::new(1_000);
        let mut cache = TtlCache::new(5_000);

        assert!(!cache.contains(&"k", clock.now_ms()));
        cache.insert("k", clock.now_ms());
        assert!(cache.contains(&"k", clock.now_ms()));

        clock.advance(4_999);
        assert!(cache.contains(&"k", clock.now_ms()));
        clock.advance(1);
        assert!(!cache.contains(&"k", clock.now_ms()));
    }

    #[test]
    fn reinsert_resets_the_deadline() {
        let clock = ManualClock::new(0);
        let mut cache = TtlCache::new(1_000);
        cache.insert("k", clock.now_ms());
        clock.advance(900);
        cache.insert("k", clock.now_ms());
        clock.advance(900);
        assert!(cache.contains(&"k", clock.now_ms()));
    }

    #[test]
    fn purge_removes_only_expired_entries() {
        let clock = ManualClock::new(0);
        let mut cache = TtlCache::new(1_000);
        cache.insert("old", clock.now_ms());
        clock.advance(600);
        cache.insert("new", clock.now_ms());
        clock.advance(600);

        let removed = cache.purge_expired(clock.now_ms());
        assert_eq!(removed, 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&"new", clock.now_ms()));
    }

    #[test]
    fn ttl_change_applies_to_later_inserts() {
        let clock = ManualClock::new(0);
        let mut cache = TtlCache::new(1_000);
        cache.insert("short", clock.now_ms());
        cache.set_ttl(10_000);
        cache.insert("long", clock.now_ms());

        clock.advance(2_000);
        assert!(!cache.contains(&"short", clock.now_ms()));
        assert!(cache.contains(&"long", clock.now_ms()));
    }

    #[test]
    fn manual_clock_advances_and_sets() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now_ms(), 100);
        clock.advance(50);
        assert_eq!(clock.now_ms(), 150);
        clock.set(10);
        assert_eq!(clock.now_ms(), 10);
    }
}
