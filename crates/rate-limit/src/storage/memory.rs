//! Process-local key-value store with lazy expiry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use crate::clock::Clock;

/// Expired entries are swept from the map once every this many writes.
const SWEEP_EVERY_WRITES: u64 = 1024;

struct Entry {
    value: String,
    expires_at_ms: Option<u64>,
}

impl Entry {
    fn new(value: String, ttl: Option<Duration>, now_ms: u64) -> Self {
        Self {
            value,
            expires_at_ms: ttl.map(|ttl| now_ms.saturating_add(ttl.as_millis() as u64)),
        }
    }

    // Same rule as Redis: a key is still visible at the exact millisecond it expires.
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|expires_at| now_ms > expires_at)
    }
}

/// In-process key-value store used when the shared store is unreachable.
///
/// Entries expire lazily: an expired entry is invisible to reads and is
/// removed either when read or by a periodic sweep. Nothing here is shared
/// with other gateway instances.
pub struct LocalStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
    writes: AtomicU64,
}

impl LocalStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            writes: AtomicU64::new(0),
        }
    }

    /// Read a value, treating expired entries as absent.
    pub fn get(&self, key: &str) -> Option<String> {
        let now = self.clock.now_ms();

        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        // The read guard is released before touching the shard again.
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }

        None
    }

    /// Write a value, replacing any previous one.
    pub fn set(&self, key: &str, value: String, ttl: Option<Duration>) {
        let now = self.clock.now_ms();
        self.entries.insert(key.to_string(), Entry::new(value, ttl, now));
        self.after_write(now);
    }

    /// Increment a counter that starts a fresh `window` when absent or expired.
    pub fn increment(&self, key: &str, window: Duration) -> u64 {
        let now = self.clock.now_ms();

        let count = {
            let mut entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new("0".to_string(), Some(window), now));

            if entry.is_expired(now) {
                *entry = Entry::new("0".to_string(), Some(window), now);
            }

            let count = entry.value.parse::<u64>().unwrap_or(0) + 1;
            entry.value = count.to_string();

            count
        };

        self.after_write(now);
        count
    }

    /// Local time, in milliseconds since the Unix epoch.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired entry.
    pub fn purge_expired(&self) {
        let now = self.clock.now_ms();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    fn after_write(&self, now: u64) {
        let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;

        if writes % SWEEP_EVERY_WRITES == 0 {
            self.entries.retain(|_, entry| !entry.is_expired(now));
        }
    }
}
