//! Bounded in-memory version cache with per-entry TTL and LRU eviction
//!
//! Entries are kept in an [`IndexMap`] whose order is recency order: the
//! front holds the least recently used entry and is the eviction target.
//! Both `get` hits and `set` move an entry to the back. Expired entries are
//! removed lazily on `get`/`has` (and eagerly by [`VersionCache::prune`]).

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::duration_ms;
use crate::version::types::VersionInfo;

/// A cached [`VersionInfo`] together with its lifetime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub value: VersionInfo,
    pub cached_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub ttl: Duration,
}

impl CacheEntry {
    fn expires_at(&self) -> DateTime<Utc> {
        TimeDelta::from_std(self.ttl)
            .ok()
            .and_then(|ttl| self.cached_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// An entry is live iff `now < cached_at + ttl`
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }
}

/// Hit/miss counters and sizing of the cache
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

struct CacheState {
    entries: IndexMap<String, CacheEntry>,
    max_size: usize,
    default_ttl: Duration,
    hits: u64,
    misses: u64,
}

impl CacheState {
    fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            entries: IndexMap::new(),
            max_size: max_size.max(1),
            default_ttl,
            hits: 0,
            misses: 0,
        }
    }

    /// Returns the index of a live entry, removing it first if it has expired
    fn live_index(&mut self, key: &str, now: DateTime<Utc>) -> Option<usize> {
        let index = self.entries.get_index_of(key)?;
        let live = self
            .entries
            .get_index(index)
            .is_some_and(|(_, entry)| entry.is_live(now));

        if live {
            Some(index)
        } else {
            self.entries.shift_remove_index(index);
            debug!("Expired cache entry removed: {}", key);
            None
        }
    }

    fn insert(&mut self, entry: CacheEntry) {
        self.entries.shift_remove(&entry.key);

        while self.entries.len() >= self.max_size {
            match self.entries.shift_remove_index(0) {
                Some((evicted, _)) => debug!("Evicted least recently used entry: {}", evicted),
                None => break,
            }
        }

        self.entries.insert(entry.key.clone(), entry);
    }
}

pub struct VersionCache {
    state: Mutex<CacheState>,
}

impl VersionCache {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::new(max_size, default_ttl)),
        }
    }

    /// Recovers from poisoning: every mutation leaves the state consistent.
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<VersionInfo> {
        let mut state = self.lock();

        let Some(index) = state.live_index(key, Utc::now()) else {
            state.misses += 1;
            return None;
        };

        state.hits += 1;
        let last = state.entries.len() - 1;
        state.entries.move_index(index, last);
        state
            .entries
            .get_index(last)
            .map(|(_, entry)| entry.value.clone())
    }

    /// Stores `value` under `key` with `ttl`, or the default TTL when `None`
    pub fn set(&self, key: &str, value: VersionInfo, ttl: Option<Duration>) {
        let mut state = self.lock();
        let ttl = ttl.unwrap_or(state.default_ttl);
        state.insert(CacheEntry {
            key: key.to_string(),
            value,
            cached_at: Utc::now(),
            ttl,
        });
    }

    /// Whether a live entry exists. Does not touch recency or statistics.
    pub fn has(&self, key: &str) -> bool {
        self.lock().live_index(key, Utc::now()).is_some()
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.lock().entries.shift_remove(key).is_some();
        if removed {
            debug!("Invalidated cache entry: {}", key);
        }
        removed
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    /// Eagerly removes every expired entry, returning how many were removed
    pub fn prune(&self) -> usize {
        let now = Utc::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_live(now));
        let removed = before - state.entries.len();
        if removed > 0 {
            debug!("Pruned {} expired cache entries", removed);
        }
        removed
    }

    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn max_size(&self) -> usize {
        self.lock().max_size
    }

    pub fn default_ttl(&self) -> Duration {
        self.lock().default_ttl
    }

    /// Keys of live entries that expire within `within` from now
    pub fn get_expiring_soon(&self, within: Duration) -> Vec<String> {
        let now = Utc::now();
        let horizon = TimeDelta::from_std(within)
            .ok()
            .and_then(|within| now.checked_add_signed(within))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.lock()
            .entries
            .values()
            .filter(|entry| entry.is_live(now) && entry.expires_at() <= horizon)
            .map(|entry| entry.key.clone())
            .collect()
    }

    /// Restarts the lifetime of an existing entry with `new_ttl`.
    ///
    /// Returns false if the entry is absent or already expired.
    pub fn refresh(&self, key: &str, new_ttl: Duration) -> bool {
        let now = Utc::now();
        let mut state = self.lock();
        let Some(index) = state.live_index(key, now) else {
            return false;
        };

        if let Some((_, entry)) = state.entries.get_index_mut(index) {
            entry.cached_at = now;
            entry.ttl = new_ttl;
        }
        true
    }

    pub fn get_time_to_expiry(&self, key: &str) -> Option<Duration> {
        let now = Utc::now();
        let mut state = self.lock();
        let index = state.live_index(key, now)?;
        let (_, entry) = state.entries.get_index(index)?;
        (entry.expires_at() - now).to_std().ok()
    }

    /// Looks up every key, returning only the ones present
    pub fn batch_get<S: AsRef<str>>(&self, keys: &[S]) -> HashMap<String, VersionInfo> {
        keys.iter()
            .filter_map(|key| {
                let key = key.as_ref();
                self.get(key).map(|info| (key.to_string(), info))
            })
            .collect()
    }

    pub fn batch_set<I>(&self, entries: I, ttl: Option<Duration>)
    where
        I: IntoIterator<Item = (String, VersionInfo)>,
    {
        let now = Utc::now();
        let mut state = self.lock();
        let ttl = ttl.unwrap_or(state.default_ttl);
        for (key, value) in entries {
            state.insert(CacheEntry {
                key,
                value,
                cached_at: now,
                ttl,
            });
        }
    }

    /// Snapshot of all entries, least recently used first
    pub fn export(&self) -> Vec<CacheEntry> {
        self.lock().entries.values().cloned().collect()
    }

    /// Replaces the current contents with `entries`.
    ///
    /// Entries are replayed in order, so an exported snapshot keeps its
    /// recency order. Already expired entries are skipped.
    pub fn import(&self, entries: Vec<CacheEntry>) {
        let now = Utc::now();
        let mut state = self.lock();
        state.entries.clear();
        for entry in entries.into_iter().filter(|entry| entry.is_live(now)) {
            state.insert(entry);
        }
        debug!("Imported {} cache entries", state.entries.len());
    }

    /// Drops every entry and adopts a new size/TTL policy.
    ///
    /// Hit/miss counters survive; use [`VersionCache::reset_stats`] to clear them.
    pub fn rebuild(&self, max_size: usize, default_ttl: Duration) {
        let mut state = self.lock();
        let (hits, misses) = (state.hits, state.misses);
        *state = CacheState::new(max_size, default_ttl);
        state.hits = hits;
        state.misses = misses;
        debug!(
            "Cache rebuilt with max_size={} default_ttl={:?}",
            state.max_size, default_ttl
        );
    }

    pub fn get_stats(&self) -> CacheStats {
        let state = self.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            size: state.entries.len(),
            max_size: state.max_size,
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                state.hits as f64 / lookups as f64
            },
        }
    }

    pub fn reset_stats(&self) {
        let mut state = self.lock();
        state.hits = 0;
        state.misses = 0;
    }
}
