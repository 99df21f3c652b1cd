//! Keyed trailing-edge debouncing.
//!
//! Each trigger of a key (re)starts that key's quiet period. The key fires
//! once, from [`Debouncer::poll`], after a full period passes without a new
//! trigger. Bursts of register changes therefore collapse into one action.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Pending actions keyed by `K`.
#[derive(Debug, Clone)]
pub struct Debouncer<K: Ord> {
    delay: Duration,
    pending: BTreeMap<K, Instant>,
}

impl<K: Ord + Clone> Debouncer<K> {
    /// Creates a debouncer with the given quiet period.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: BTreeMap::new(),
        }
    }

    /// Quiet period.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Schedules `key` to fire one quiet period after `now`, replacing any
    /// pending deadline. Returns `true` if the key was already pending.
    pub fn trigger(&mut self, key: K, now: Instant) -> bool {
        self.pending.insert(key, now + self.delay).is_some()
    }

    /// Drops a pending key.
    pub fn cancel(&mut self, key: &K) -> bool {
        self.pending.remove(key).is_some()
    }

    /// Whether `key` is waiting to fire.
    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().min().copied()
    }

    /// Removes and returns every key whose deadline has passed, earliest first.
    pub fn poll(&mut self, now: Instant) -> Vec<K> {
        let mut due: Vec<(Instant, K)> = self
            .pending
            .iter()
            .filter(|(_, &at)| at <= now)
            .map(|(k, &at)| (at, k.clone()))
            .collect();
        due.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        for (_, key) in &due {
            self.pending.remove(key);
        }
        due.into_iter().map(|(_, k)| k).collect()
    }

    /// Number of pending keys.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
