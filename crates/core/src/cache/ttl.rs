use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use super::key::{CacheKey, CacheScope};
use crate::config::CacheConfig;
use crate::metrics;

/// Result of a cache lookup.
///
/// `Miss` is distinct from a cached empty value: `Hit(None)` or `Hit(vec![])`
/// are legitimate cached answers.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<V> {
    Hit(V),
    Miss,
}

impl<V> Lookup<V> {
    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }

    pub fn into_option(self) -> Option<V> {
        match self {
            Lookup::Hit(v) => Some(v),
            Lookup::Miss => None,
        }
    }
}

/// Expiry and sweep tuning.
#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    pub default_ttl: Duration,
    pub sweep_every: u64,
    pub sweep_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            default_ttl: Duration::from_secs(config.ttl_secs.max(1)),
            sweep_every: config.sweep_every.max(1),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
        }
    }
}

/// Hit/miss counters and current size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

impl CacheStats {
    /// Hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }

    pub fn merge(self, other: CacheStats) -> CacheStats {
        CacheStats {
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
            size: self.size + other.size,
        }
    }
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct Inner<V> {
    entries: HashMap<CacheKey, Entry<V>>,
    hits: u64,
    misses: u64,
    accesses_since_sweep: u64,
    last_sweep: Instant,
}

/// Key/value store with per-entry expiry.
///
/// Expiry is lazy on read, plus a sweep of all expired entries every
/// `sweep_every` accesses or `sweep_interval`, whichever comes first. The map
/// sits behind a mutex so parallel sub-scans may share one instance; a
/// poisoned lock degrades to a miss instead of panicking.
pub struct TtlCache<V> {
    name: &'static str,
    settings: CacheSettings,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(name: &'static str, settings: CacheSettings) -> Self {
        Self {
            name,
            settings,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
                accesses_since_sweep: 0,
                last_sweep: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> Option<MutexGuard<'_, Inner<V>>> {
        match self.inner.lock() {
            Ok(guard) => Some(guard),
            Err(_) => {
                warn!(cache = self.name, "cache lock poisoned, treating as miss");
                None
            }
        }
    }

    pub fn get(&self, key: &CacheKey) -> Lookup<V> {
        let Some(mut inner) = self.lock() else {
            return Lookup::Miss;
        };

        inner.accesses_since_sweep += 1;
        if inner.accesses_since_sweep >= self.settings.sweep_every
            || inner.last_sweep.elapsed() >= self.settings.sweep_interval
        {
            Self::sweep_locked(self.name, &mut inner);
        }

        let now = Instant::now();
        let lookup = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => Lookup::Hit(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                debug!(cache = self.name, %key, "cache expired");
                Lookup::Miss
            }
            None => Lookup::Miss,
        };

        if lookup.is_hit() {
            inner.hits += 1;
            metrics::CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
            debug!(cache = self.name, %key, "cache hit");
        } else {
            inner.misses += 1;
            metrics::CACHE_LOOKUPS.with_label_values(&["miss"]).inc();
            debug!(cache = self.name, %key, "cache miss");
        }
        lookup
    }

    /// Store a value; `ttl` defaults to the configured TTL. A zero TTL is
    /// ignored since the entry would be born expired.
    pub fn set(&self, key: CacheKey, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.settings.default_ttl);
        if ttl.is_zero() {
            debug!(cache = self.name, %key, "refusing to cache with zero ttl");
            return;
        }
        let Some(mut inner) = self.lock() else {
            return;
        };
        inner.entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.lock()
            .map(|mut inner| inner.entries.remove(key).is_some())
            .unwrap_or(false)
    }

    /// Drop every entry belonging to `scope`. Returns the number removed.
    pub fn invalidate_scope(&self, scope: &CacheScope) -> usize {
        let Some(mut inner) = self.lock() else {
            return 0;
        };
        let before = inner.entries.len();
        inner.entries.retain(|key, _| key.scope() != scope);
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!(cache = self.name, %scope, removed, "cache scope invalidated");
        }
        removed
    }

    pub fn clear(&self) {
        if let Some(mut inner) = self.lock() {
            inner.entries.clear();
        }
    }

    /// Remove all expired entries now.
    pub fn sweep_expired(&self) -> usize {
        self.lock()
            .map(|mut inner| Self::sweep_locked(self.name, &mut inner))
            .unwrap_or(0)
    }

    fn sweep_locked(name: &str, inner: &mut Inner<V>) -> usize {
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.expires_at > now);
        inner.accesses_since_sweep = 0;
        inner.last_sweep = now;
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!(cache = name, removed, "cache sweep removed expired entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock()
            .map(|inner| CacheStats {
                hits: inner.hits,
                misses: inner.misses,
                size: inner.entries.len(),
            })
            .unwrap_or_default()
    }

    /// Return the cached value or compute and store it.
    pub fn get_or_insert_with(&self, key: CacheKey, compute: impl FnOnce() -> V) -> V {
        if let Lookup::Hit(value) = self.get(&key) {
            return value;
        }
        let value = compute();
        self.set(key, value.clone(), None);
        value
    }
}

/// Read-through wrapper around a fallible async call.
///
/// Successful results are cached under `key`; errors are returned as-is and
/// never cached, so the next caller retries.
pub async fn cached_call<V, E, F, Fut>(cache: &TtlCache<V>, key: CacheKey, call: F) -> Result<V, E>
where
    V: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    if let Lookup::Hit(value) = cache.get(&key) {
        return Ok(value);
    }
    let value = call().await?;
    cache.set(key, value.clone(), None);
    Ok(value)
}
