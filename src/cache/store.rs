//! Cache store: the front door the dispatcher talks to.

use super::backend::{
    CacheBackend, CacheEntry, CacheResult, EntrySummary, MemoryCache, NullCache, PutStatus,
};
use super::file::FileCache;
use super::key::CacheKey;
use crate::types::GeneratedValue;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Serialized values larger than this are not stored.
    pub max_entry_size: usize,
    /// Entries held in memory (the whole cache when `dir` is unset).
    pub hot_entries: usize,
    /// Persistent directory. `None` keeps the cache in memory only.
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entry_size: 10 * 1024 * 1024,
            hot_entries: 1024,
            dir: None,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
    pub fn with_max_entry_size(mut self, bytes: usize) -> Self {
        self.max_entry_size = bytes;
        self
    }
    pub fn with_hot_entries(mut self, entries: usize) -> Self {
        self.hot_entries = entries;
        self
    }
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub skipped: u64,
    pub invalidations: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    skipped: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Shared key/value store mapping [`CacheKey`] to [`GeneratedValue`].
///
/// Safe to share across tasks behind an `Arc`. Storage failures come back as
/// [`CacheError`](super::CacheError), never as a miss; deciding what to do about them is the
/// caller's business.
pub struct CacheStore {
    config: CacheConfig,
    backend: Arc<dyn CacheBackend>,
    stats: AtomicStats,
}

impl CacheStore {
    pub fn new(config: CacheConfig, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            config,
            backend,
            stats: AtomicStats::default(),
        }
    }

    /// In-memory store holding at most `max_entries`.
    pub fn memory(max_entries: usize) -> Self {
        let config = CacheConfig::new().with_hot_entries(max_entries);
        Self::new(config, Arc::new(MemoryCache::new(max_entries)))
    }

    /// A store that never holds anything.
    pub fn disabled() -> Self {
        Self::new(CacheConfig::new().with_enabled(false), Arc::new(NullCache::new()))
    }

    /// Build the backend the config describes.
    pub async fn open(config: CacheConfig) -> CacheResult<Self> {
        let backend: Arc<dyn CacheBackend> = match (&config.enabled, &config.dir) {
            (false, _) => Arc::new(NullCache::new()),
            (true, Some(dir)) => Arc::new(FileCache::open(dir, config.hot_entries).await?),
            (true, None) => Arc::new(MemoryCache::new(config.hot_entries)),
        };
        tracing::debug!(backend = backend.name(), "cache store opened");
        Ok(Self::new(config, backend))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn get(&self, key: &CacheKey) -> CacheResult<Option<GeneratedValue>> {
        Ok(self.get_entry(key).await?.map(|entry| entry.value.clone()))
    }

    pub async fn get_entry(&self, key: &CacheKey) -> CacheResult<Option<Arc<CacheEntry>>> {
        if !self.config.enabled {
            return Ok(None);
        }
        match self.backend.get(key).await {
            Ok(Some(entry)) => {
                AtomicStats::bump(&self.stats.hits, 1);
                Ok(Some(entry))
            }
            Ok(None) => {
                AtomicStats::bump(&self.stats.misses, 1);
                Ok(None)
            }
            Err(e) => {
                AtomicStats::bump(&self.stats.errors, 1);
                Err(e)
            }
        }
    }

    /// Store `value` under `key`, replacing any previous entry as a whole.
    pub async fn put(
        &self,
        key: CacheKey,
        value: GeneratedValue,
        model_id: &str,
    ) -> CacheResult<PutStatus> {
        if !self.config.enabled {
            return Ok(PutStatus::Skipped);
        }
        let size = serde_json::to_vec(&value)
            .map_err(|source| super::CacheError::Serialization {
                key: key.to_hex(),
                source,
            })?
            .len();
        if size > self.config.max_entry_size {
            tracing::debug!(
                %key,
                size,
                limit = self.config.max_entry_size,
                "value too large to cache"
            );
            AtomicStats::bump(&self.stats.skipped, 1);
            return Ok(PutStatus::Skipped);
        }
        match self.backend.put(CacheEntry::new(key, value, model_id)).await {
            Ok(status) => {
                if matches!(status, PutStatus::Inserted | PutStatus::Replaced) {
                    AtomicStats::bump(&self.stats.stores, 1);
                }
                Ok(status)
            }
            Err(e) => {
                AtomicStats::bump(&self.stats.errors, 1);
                Err(e)
            }
        }
    }

    pub async fn invalidate(&self, key: &CacheKey) -> CacheResult<bool> {
        let removed = self.track(self.backend.invalidate(key).await)?;
        if removed {
            AtomicStats::bump(&self.stats.invalidations, 1);
        }
        Ok(removed)
    }

    /// Drop every entry produced by `model_id`.
    pub async fn invalidate_model(&self, model_id: &str) -> CacheResult<usize> {
        let removed = self.track(self.backend.invalidate_model(model_id).await)?;
        AtomicStats::bump(&self.stats.invalidations, removed as u64);
        Ok(removed)
    }

    /// Drop entries written more than `age` ago.
    pub async fn prune_older_than(&self, age: Duration) -> CacheResult<usize> {
        let age = chrono::Duration::from_std(age).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(age)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);
        let removed = self.track(self.backend.prune_older_than(cutoff).await)?;
        AtomicStats::bump(&self.stats.invalidations, removed as u64);
        Ok(removed)
    }

    pub async fn clear(&self) -> CacheResult<()> {
        self.track(self.backend.clear().await)
    }

    pub async fn len(&self) -> CacheResult<usize> {
        self.track(self.backend.len().await)
    }

    pub async fn is_empty(&self) -> CacheResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Newest first.
    pub async fn entries(&self) -> CacheResult<Vec<EntrySummary>> {
        self.track(self.backend.entries().await)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn track<T>(&self, result: CacheResult<T>) -> CacheResult<T> {
        if result.is_err() {
            AtomicStats::bump(&self.stats.errors, 1);
        }
        result
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish()
    }
}
