//! Bounded TTL cache for keys known to exist.
//!
//! Strictly a positive cache: absence is never cached, because a blob can
//! appear at any moment, but on well-configured backends an observed blob
//! does not disappear. Shared by the existence-caching decorator and the
//! queued replicator's dedup set.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

struct CacheState {
    entries: HashMap<String, Instant>,
    // Insertion order; the front is always the oldest entry.
    order: VecDeque<(String, Instant)>,
}

/// Remembers keys observed to exist, for a bounded time.
pub struct ExistenceCache {
    ttl: Duration,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl ExistenceCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    /// Whether `key` was inserted less than one TTL ago.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        let state = self.state.lock();
        state.entries.get(key).is_some_and(|expires_at| *expires_at > now)
    }

    /// Record that `key` exists right now.
    pub fn insert(&self, key: String) {
        let now = Instant::now();
        let expires_at = now + self.ttl;
        let mut state = self.state.lock();
        Self::prune(&mut state, now);
        while state.entries.len() >= self.capacity && Self::evict_oldest(&mut state) {}
        state.entries.insert(key.clone(), expires_at);
        state.order.push_back((key, expires_at));
    }

    /// Drop expired entries from the front of the queue.
    ///
    /// A key refreshed after being queued has a newer deadline in `entries`;
    /// its stale queue records are discarded without touching the entry.
    fn prune(state: &mut CacheState, now: Instant) {
        while let Some((key, queued_deadline)) = state.order.front() {
            if *queued_deadline > now {
                break;
            }
            let (key, queued_deadline) = (key.clone(), *queued_deadline);
            state.order.pop_front();
            if state.entries.get(&key) == Some(&queued_deadline) {
                state.entries.remove(&key);
            }
        }
    }

    /// Evict the oldest live entry; returns false when nothing can be
    /// evicted.
    fn evict_oldest(state: &mut CacheState) -> bool {
        while let Some((key, queued_deadline)) = state.order.pop_front() {
            if state.entries.get(&key) == Some(&queued_deadline) {
                state.entries.remove(&key);
                return true;
            }
            // Stale record for a refreshed key; keep scanning.
        }
        false
    }
}
