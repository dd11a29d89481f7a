//! Short-lived cache for the cheapest, most repeated read queries.
//!
//! Entries expire after a fixed TTL and the whole cache is dropped whenever a
//! scan commits. A value computed under an older generation is returned to
//! its caller but never stored, so a read racing a scan cannot reinsert
//! pre-scan data after the invalidation.

use anyhow::Result;
use moka::sync::Cache;
use serde::Serialize;
use std::any::Any;
use std::fmt::{Display, Write as _};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);
const MAX_ENTRIES: u64 = 10_000;
const NONE_SENTINEL: &str = "<none>";

type Entry = (u64, Arc<dyn Any + Send + Sync>);

/// Operation name plus every argument, `<none>` standing in for an absent
/// filter, so distinct argument tuples never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(operation: &str) -> Self {
        Self(operation.to_string())
    }

    pub fn arg(mut self, value: impl Display) -> Self {
        let _ = write!(self.0, "\u{1f}{value}");
        self
    }

    pub fn opt_arg(self, value: Option<impl Display>) -> Self {
        match value {
            Some(value) => self.arg(value),
            None => self.arg(NONE_SENTINEL),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub generation: u64,
    pub entries: u64,
}

pub struct QueryCache {
    entries: Option<Cache<CacheKey, Entry>>,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let entries = Cache::builder()
            .max_capacity(MAX_ENTRIES)
            .time_to_live(ttl)
            .build();
        Self {
            entries: Some(entries),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Every lookup computes; nothing is stored.
    pub fn disabled() -> Self {
        Self {
            entries: None,
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached value for `key` or computes, stores and returns it.
    /// Errors are never cached. Concurrent misses on one key may compute
    /// twice.
    pub fn get_or_compute<T, F>(&self, key: CacheKey, compute: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Result<T>,
    {
        let generation = self.generation.load(Ordering::SeqCst);
        if let Some(entries) = &self.entries {
            if let Some((stored_generation, value)) = entries.get(&key) {
                if stored_generation == generation {
                    if let Some(value) = value.downcast_ref::<T>() {
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(value.clone());
                    }
                }
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = compute()?;
        if let Some(entries) = &self.entries {
            if self.generation.load(Ordering::SeqCst) == generation {
                entries.insert(key, (generation, Arc::new(value.clone())));
            } else {
                debug!("cache: dropped {} computed before invalidation", key.as_str());
            }
        }
        Ok(value)
    }

    /// Drops every entry. Called once per committed scan.
    pub fn invalidate_all(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(entries) = &self.entries {
            entries.invalidate_all();
        }
        debug!("cache invalidated (generation {generation})");
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            generation: self.generation.load(Ordering::SeqCst),
            entries: self
                .entries
                .as_ref()
                .map(|entries| entries.entry_count())
                .unwrap_or(0),
        }
    }
}
