use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A single-lock, concurrency-safe TTL key set with periodic pruning.
///
/// Backs the SIN dedup store (`signal_id`, §4.1) and the IAF webhook
/// signature/nonce cache (§4.2). Both need the same shape: "have I seen
/// this key within the last N hours/seconds" with eviction of stale
/// entries. A single mutex is enough here — the core's concurrency model
/// (§5) only requires concurrent-safe access, not lock-free reads.
pub struct TtlKeySet<K: Eq + Hash + Clone> {
    entries: Mutex<HashMap<K, Instant>>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone> TtlKeySet<K> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns true if `key` was already present (and not expired).
    /// Inserts/refreshes `key` as a side effect either way, per the "lookup
    /// then insert on first observation" idiom used at SIN dedup stage 5
    /// and IAF's signature cache stage 5.
    pub fn check_and_insert(&self, key: K) -> bool {
        let now = Instant::now();
        let mut guard = self.entries.lock().expect("ttl key set mutex poisoned");
        if guard.len() > 10_000 {
            guard.retain(|_, inserted| now.duration_since(*inserted) < self.ttl);
        }
        match guard.get(&key) {
            Some(inserted) if now.duration_since(*inserted) < self.ttl => true,
            _ => {
                guard.insert(key, now);
                false
            }
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        let now = Instant::now();
        let guard = self.entries.lock().expect("ttl key set mutex poisoned");
        matches!(guard.get(key), Some(inserted) if now.duration_since(*inserted) < self.ttl)
    }

    pub fn insert(&self, key: K) {
        let mut guard = self.entries.lock().expect("ttl key set mutex poisoned");
        guard.insert(key, Instant::now());
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("ttl key set mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sliding-window counter used by ANC's per-alert / per-(tenant,target)
/// rate limits (§4.3 fatigue control).
pub struct SlidingWindowCounter<K: Eq + Hash + Clone> {
    entries: Mutex<HashMap<K, Vec<Instant>>>,
}

impl<K: Eq + Hash + Clone> Default for SlidingWindowCounter<K> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> SlidingWindowCounter<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one event for `key` now if it would not exceed `max` within
    /// `window`. Returns whether it was allowed.
    pub fn try_record(&self, key: K, max: u32, window: Duration) -> bool {
        let now = Instant::now();
        let mut guard = self.entries.lock().expect("sliding window mutex poisoned");
        let entry = guard.entry(key).or_default();
        entry.retain(|t| now.duration_since(*t) < window);
        if entry.len() as u32 >= max {
            return false;
        }
        entry.push(now);
        true
    }

    pub fn count(&self, key: &K, window: Duration) -> u32 {
        let now = Instant::now();
        let guard = self.entries.lock().expect("sliding window mutex poisoned");
        guard
            .get(key)
            .map(|v| v.iter().filter(|t| now.duration_since(**t) < window).count() as u32)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_key_set_detects_duplicate_within_window() {
        let set = TtlKeySet::new(Duration::from_secs(3600));
        assert!(!set.check_and_insert("s1".to_string()));
        assert!(set.check_and_insert("s1".to_string()));
    }

    #[test]
    fn ttl_key_set_expires_after_ttl() {
        let set = TtlKeySet::new(Duration::from_millis(10));
        assert!(!set.check_and_insert("s1".to_string()));
        std::thread::sleep(Duration::from_millis(30));
        assert!(!set.check_and_insert("s1".to_string()));
    }

    #[test]
    fn sliding_window_blocks_past_max() {
        let counter: SlidingWindowCounter<String> = SlidingWindowCounter::new();
        let window = Duration::from_secs(60);
        assert!(counter.try_record("a".to_string(), 2, window));
        assert!(counter.try_record("a".to_string(), 2, window));
        assert!(!counter.try_record("a".to_string(), 2, window));
    }
}
