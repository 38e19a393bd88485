//! Bounded cache with optional TTL
//!
//! Wraps an [`LruStore`] behind a single mutex. When a TTL is configured the
//! expiry check runs first and only live entries reach the LRU store.

use std::hash::Hash;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::lru::LruStore;
use super::CacheConfig;

/// Point-in-time cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped to make room for new keys
    pub evictions: u64,
    /// Entries dropped because they outlived the TTL
    pub expirations: u64,
    pub size: usize,
    pub max_size: usize,
    /// hits / (hits + misses), 0 when nothing was read
    pub hit_rate: f64,
    /// size / max_size
    pub utilization: f64,
    /// Mean entry age in seconds (TTL caches only)
    pub avg_age_secs: Option<f64>,
    /// Oldest entry age in seconds (TTL caches only)
    pub max_age_secs: Option<f64>,
}

struct CacheState<K, V> {
    store: LruStore<K, V>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// Thread-safe LRU cache with optional time-to-live expiration
pub struct BoundedCache<K, V> {
    ttl: Option<Duration>,
    state: Mutex<CacheState<K, V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a plain LRU cache without expiry
    pub fn new(max_size: usize) -> Self {
        Self {
            ttl: None,
            state: Mutex::new(CacheState {
                store: LruStore::new(max_size),
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
        }
    }

    /// Create an LRU cache whose entries expire `ttl` after their last write
    pub fn with_ttl(max_size: usize, ttl: Duration) -> Self {
        let mut cache = Self::new(max_size);
        cache.ttl = Some(ttl);
        cache
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        match config.ttl_seconds {
            Some(secs) => Self::with_ttl(config.max_size, Duration::from_secs(secs)),
            None => Self::new(config.max_size),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn max_size(&self) -> usize {
        self.state.lock().store.max_size()
    }

    /// Get an entry, promoting it to most recently used.
    ///
    /// Expired entries are dropped and reported as misses.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();

        if self.expire_if_stale(&mut state, key) {
            state.misses += 1;
            return None;
        }

        match state.store.get(key).map(|e| e.value.clone()) {
            Some(value) => {
                state.hits += 1;
                Some(value)
            }
            None => {
                state.misses += 1;
                None
            }
        }
    }

    /// Read an entry without promoting it or touching the hit counters
    pub fn peek(&self, key: &K) -> Option<V> {
        let state = self.state.lock();
        state
            .store
            .peek(key)
            .filter(|e| !self.is_stale(e.age()))
            .map(|e| e.value.clone())
    }

    /// Insert or overwrite an entry, evicting the least recently used one at capacity
    pub fn set(&self, key: K, value: V) {
        let mut state = self.state.lock();
        if let Some(evicted) = state.store.insert(key, value) {
            state.evictions += 1;
            trace!(
                age_ms = evicted.age().as_millis() as u64,
                "Evicted least recently used cache entry"
            );
        }
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// The lock is not held while `load` runs, so two callers racing on the
    /// same key may both load it; the later write wins.
    pub fn get_or_try_insert_with<E, F>(&self, key: K, load: F) -> std::result::Result<V, E>
    where
        F: FnOnce() -> std::result::Result<V, E>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = load()?;
        self.set(key, value.clone());
        Ok(value)
    }

    /// Remove an entry. Returns whether a live entry was removed.
    pub fn delete(&self, key: &K) -> bool {
        let mut state = self.state.lock();
        match state.store.remove(key) {
            Some(entry) => !self.is_stale(entry.age()),
            None => false,
        }
    }

    pub fn clear(&self) {
        self.state.lock().store.clear();
    }

    pub fn contains(&self, key: &K) -> bool {
        let state = self.state.lock();
        state
            .store
            .peek(key)
            .map(|e| !self.is_stale(e.age()))
            .unwrap_or(false)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let mut state = self.state.lock();
        self.prune_locked(&mut state);
        state.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Vec<K> {
        let mut state = self.state.lock();
        self.prune_locked(&mut state);
        state.store.keys()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn prune_expired(&self) -> usize {
        let mut state = self.state.lock();
        self.prune_locked(&mut state)
    }

    /// Statistics over live entries; expired ones are pruned first
    pub fn stats(&self) -> CacheStats {
        let mut state = self.state.lock();
        self.prune_locked(&mut state);
        let total = state.hits + state.misses;
        let size = state.store.len();
        let max_size = state.store.max_size();

        let (avg_age_secs, max_age_secs) = if self.ttl.is_some() {
            let ages: Vec<f64> = state
                .store
                .entries()
                .map(|e| e.age().as_secs_f64())
                .collect();
            if ages.is_empty() {
                (Some(0.0), Some(0.0))
            } else {
                let avg = ages.iter().sum::<f64>() / ages.len() as f64;
                let max = ages.iter().cloned().fold(0.0, f64::max);
                (Some(avg), Some(max))
            }
        } else {
            (None, None)
        };

        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            expirations: state.expirations,
            size,
            max_size,
            hit_rate: if total > 0 {
                state.hits as f64 / total as f64
            } else {
                0.0
            },
            utilization: size as f64 / max_size as f64,
            avg_age_secs,
            max_age_secs,
        }
    }

    fn prune_locked(&self, state: &mut CacheState<K, V>) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let stale: Vec<K> = state
            .store
            .entries()
            .filter(|e| e.is_expired(ttl))
            .map(|e| e.key.clone())
            .collect();
        for key in &stale {
            state.store.remove(key);
        }
        state.expirations += stale.len() as u64;
        stale.len()
    }

    fn is_stale(&self, age: Duration) -> bool {
        self.ttl.map(|ttl| age > ttl).unwrap_or(false)
    }

    fn expire_if_stale(&self, state: &mut CacheState<K, V>, key: &K) -> bool {
        let stale = state
            .store
            .peek(key)
            .map(|e| self.is_stale(e.age()))
            .unwrap_or(false);
        if stale {
            state.store.remove(key);
            state.expirations += 1;
        }
        stale
    }
}
