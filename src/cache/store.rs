//! TTL-bounded response store.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::client::request::Response;
use crate::observability::events::{Event, NoopSink, SharedSink};
use crate::observability::metrics;

/// Longest lifetime an entry can have; longer TTLs are clamped to it.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// A cached value with its expiry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub default_ttl_secs: u64,
}

/// A thread-safe TTL cache keyed by canonical request keys.
#[derive(Clone)]
pub struct ResponseCache<V = Response> {
    entries: Arc<DashMap<String, CacheEntry<V>>>,
    max_entries: usize,
    default_ttl: Duration,
    sink: SharedSink,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self::with_sink(max_entries, default_ttl, Arc::new(NoopSink))
    }

    pub fn with_sink(max_entries: usize, default_ttl: Duration, sink: SharedSink) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            max_entries: max_entries.max(1),
            default_ttl,
            sink,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a fresh entry. Expired entries are removed on the way.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let fresh = self
            .entries
            .get(key)
            .and_then(|entry| entry.is_fresh(now).then(|| entry.value.clone()));

        match fresh {
            Some(value) => {
                self.sink.emit(&Event::CacheHit { key: key.to_string() });
                Some(value)
            }
            None => {
                if self
                    .entries
                    .remove_if(key, |_, entry| !entry.is_fresh(now))
                    .is_some()
                {
                    metrics::record_cache_size(self.entries.len());
                }
                self.sink.emit(&Event::CacheMiss { key: key.to_string() });
                None
            }
        }
    }

    /// Store a value for `ttl`, at most [`MAX_TTL`]. A zero TTL stores nothing.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        let expires_at = Instant::now() + ttl.min(MAX_TTL);
        self.entries.insert(key.into(), CacheEntry { value, expires_at });

        if self.entries.len() > self.max_entries {
            self.sweep();
            while self.entries.len() > self.max_entries {
                if !self.evict_soonest_expiring() {
                    break;
                }
            }
        }
        metrics::record_cache_size(self.entries.len());
    }

    fn evict_soonest_expiring(&self) -> bool {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key().clone());

        match victim {
            Some(key) => {
                tracing::debug!(key = %key, "Evicting cache entry over size bound");
                self.entries.remove(&key).is_some()
            }
            None => false,
        }
    }

    /// Remove every entry whose key starts with `prefix`. Returns the count removed.
    pub fn invalidate(&self, prefix: &str) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let keep = !key.starts_with(prefix);
            if !keep {
                removed += 1;
            }
            keep
        });
        metrics::record_cache_size(self.entries.len());
        tracing::info!(prefix = %prefix, removed = removed, "Cache invalidated");
        removed
    }

    /// Drop expired entries. Returns the count removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.is_fresh(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            metrics::record_cache_size(self.entries.len());
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            max_entries: self.max_entries,
            default_ttl_secs: self.default_ttl.as_secs(),
        }
    }
}
