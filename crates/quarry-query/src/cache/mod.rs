//! Compiled query cache.
//!
//! Entries are keyed by query shape and live in two keyspaces, one per
//! execution mode. Each key maps to a shared once-cell: the first caller
//! compiles while concurrent callers for the same key wait on the cell and
//! then read the same delegate. A failed compile leaves the cell empty so the
//! next caller retries.

mod filter_key;
mod query_key;

pub use filter_key::QueryFilterCacheKey;
pub use query_key::QueryCacheKey;

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::convert::Infallible;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Execution mode a delegate was compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyspace {
    Sync,
    Async,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

impl CacheStats {
    /// Fraction of lookups served without compiling
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Thread-safe cache of compiled query delegates.
pub struct CompiledQueryCache<K, D> {
    entries: DashMap<(Keyspace, K), Arc<OnceCell<D>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<K, D> Default for CompiledQueryCache<K, D>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl<K, D> std::fmt::Debug for CompiledQueryCache<K, D>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledQueryCache")
            .field("entries", &self.entries.len())
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K, D> CompiledQueryCache<K, D>
where
    K: Eq + Hash,
    D: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Delegate for synchronous execution of `key`, compiling it on first use
    pub fn get_or_add_query<F>(&self, key: K, compile: F) -> D
    where
        F: FnOnce() -> D,
    {
        self.get_or_add(Keyspace::Sync, key, compile)
    }

    /// Delegate for asynchronous execution of `key`, compiling it on first use
    pub fn get_or_add_async_query<F>(&self, key: K, compile: F) -> D
    where
        F: FnOnce() -> D,
    {
        self.get_or_add(Keyspace::Async, key, compile)
    }

    pub fn try_get_or_add_query<F, E>(&self, key: K, compile: F) -> Result<D, E>
    where
        F: FnOnce() -> Result<D, E>,
    {
        self.try_get_or_add(Keyspace::Sync, key, compile)
    }

    pub fn try_get_or_add_async_query<F, E>(&self, key: K, compile: F) -> Result<D, E>
    where
        F: FnOnce() -> Result<D, E>,
    {
        self.try_get_or_add(Keyspace::Async, key, compile)
    }

    pub fn get_or_add<F>(&self, keyspace: Keyspace, key: K, compile: F) -> D
    where
        F: FnOnce() -> D,
    {
        match self.try_get_or_add(keyspace, key, || Ok::<_, Infallible>(compile())) {
            Ok(delegate) => delegate,
            Err(never) => match never {},
        }
    }

    pub fn try_get_or_add<F, E>(&self, keyspace: Keyspace, key: K, compile: F) -> Result<D, E>
    where
        F: FnOnce() -> Result<D, E>,
    {
        // Clone the cell out so the shard lock is not held while compiling
        let cell = {
            let entry = self.entries.entry((keyspace, key)).or_default();
            Arc::clone(entry.value())
        };

        if let Some(delegate) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(delegate.clone());
        }

        let mut compiled = false;
        let delegate = cell.get_or_try_init(|| {
            compiled = true;
            compile()
        })?;
        if compiled {
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(?keyspace, "compiled query cache miss");
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(delegate.clone())
    }

    /// Cached delegate for `key`, without compiling
    pub fn get(&self, keyspace: Keyspace, key: &K) -> Option<D>
    where
        K: Clone,
    {
        self.entries
            .get(&(keyspace, key.clone()))
            .and_then(|entry| entry.value().get().cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}
