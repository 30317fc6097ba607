//! Reference-counted resource cache.
//!
//! [`RefCountedCache`] is the foundation of every cache in the engine: the
//! page cache, the data item cache and the MVCC entry cache all instantiate
//! it with their own [`CacheBacking`].
//!
//! # Protocol
//! - `acquire(key)` returns the cached value and bumps its reference count,
//!   loading it through the backing on a miss.
//! - `release(key)` drops one reference; the last release evicts the value
//!   through the backing (write-back) and forgets it.
//! - `shutdown()` evicts everything regardless of reference counts.
//!
//! Loads and evictions run outside the internal mutex. While a key is being
//! loaded or evicted it is marked in flight, and other callers asking for
//! the same key wait on a condition variable and retry from the top.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::Ordering;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::buffer::CacheStats;
use crate::common::{Error, Result};

/// Load and write-back hooks for one kind of cached resource.
pub trait CacheBacking<T>: Send + Sync {
    /// Produce the value for a key that is not cached.
    fn load(&self, key: u64) -> Result<T>;

    /// Write back a value whose last reference was released.
    fn evict(&self, key: u64, value: T) -> Result<()>;
}

struct CacheEntry<T> {
    value: T,
    refs: usize,
}

struct CacheState<T> {
    entries: HashMap<u64, CacheEntry<T>>,
    /// Keys currently being loaded or evicted.
    in_flight: HashSet<u64>,
}

impl<T> CacheState<T> {
    #[inline]
    fn occupied(&self) -> usize {
        self.entries.len() + self.in_flight.len()
    }
}

/// A keyed cache with reference counting and pluggable load/evict hooks.
///
/// # Thread Safety
/// - `state`: `Mutex` over the bookkeeping maps only
/// - `settled`: `Condvar` signalled whenever an in-flight key settles
/// - `backing`: called without holding `state`
pub struct RefCountedCache<T, B> {
    backing: B,
    state: Mutex<CacheState<T>>,
    settled: Condvar,
    /// Maximum resident entries; 0 means unbounded.
    capacity: usize,
    stats: CacheStats,
}

impl<T: Clone, B: CacheBacking<T>> RefCountedCache<T, B> {
    /// Create a cache holding at most `capacity` entries (0 = unbounded).
    pub fn new(capacity: usize, backing: B) -> Self {
        Self {
            backing,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                in_flight: HashSet::new(),
            }),
            settled: Condvar::new(),
            capacity,
            stats: CacheStats::new(),
        }
    }

    /// Get a reference to `key`, loading it on a miss.
    ///
    /// # Errors
    /// - `Error::CacheFull` if the cache is bounded and every slot is taken
    /// - Any error from the backing's `load`; bookkeeping is rolled back
    pub fn acquire(&self, key: u64) -> Result<T> {
        let mut state = self.state.lock();
        loop {
            if state.in_flight.contains(&key) {
                self.settled.wait(&mut state);
                continue;
            }

            if let Some(entry) = state.entries.get_mut(&key) {
                entry.refs += 1;
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.value.clone());
            }

            if self.capacity > 0 && state.occupied() >= self.capacity {
                return Err(Error::CacheFull);
            }

            state.in_flight.insert(key);
            break;
        }
        drop(state);

        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        let loaded = self.backing.load(key);

        let mut state = self.state.lock();
        state.in_flight.remove(&key);
        if let Ok(value) = &loaded {
            state.entries.insert(
                key,
                CacheEntry {
                    value: value.clone(),
                    refs: 1,
                },
            );
        }
        drop(state);
        self.settled.notify_all();

        loaded
    }

    /// Drop one reference to `key`. The last reference evicts it.
    ///
    /// # Errors
    /// Any error from the backing's `evict`. The entry is forgotten either way.
    pub fn release(&self, key: u64) -> Result<()> {
        let mut state = self.state.lock();

        let Some(entry) = state.entries.get_mut(&key) else {
            warn!(key, "cache.release.not_cached");
            return Ok(());
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            return Ok(());
        }

        let Some(entry) = state.entries.remove(&key) else {
            return Ok(());
        };
        state.in_flight.insert(key);
        drop(state);

        self.stats.evictions.fetch_add(1, Ordering::Relaxed);
        let result = self.backing.evict(key, entry.value);

        self.state.lock().in_flight.remove(&key);
        self.settled.notify_all();

        result
    }

    /// Evict every cached entry, ignoring reference counts.
    ///
    /// All entries are evicted even if some evictions fail; the first error
    /// is returned.
    pub fn shutdown(&self) -> Result<()> {
        let drained: Vec<(u64, T)> = {
            let mut state = self.state.lock();
            state
                .entries
                .drain()
                .map(|(key, entry)| (key, entry.value))
                .collect()
        };

        let mut first_err = None;
        for (key, value) in drained {
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            if let Err(err) = self.backing.evict(key, value) {
                first_err.get_or_insert(err);
            }
        }
        self.settled.notify_all();

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Current reference count of `key`, or None if it is not cached.
    pub fn ref_count(&self, key: u64) -> Option<usize> {
        self.state.lock().entries.get(&key).map(|entry| entry.refs)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries (0 = unbounded).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// The load/evict hooks.
    pub fn backing(&self) -> &B {
        &self.backing
    }
}
