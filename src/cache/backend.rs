//! Cache backend implementations.

use super::error::CacheError;
use super::key::CacheKey;
use crate::types::GeneratedValue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// A stored result. Never mutated once written; replaced only as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: GeneratedValue,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: CacheKey, value: GeneratedValue, model_id: impl Into<String>) -> Self {
        Self {
            key,
            value,
            model_id: model_id.into(),
            created_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> EntrySummary {
        EntrySummary {
            key: self.key,
            model_id: self.model_id.clone(),
            created_at: self.created_at,
        }
    }

    /// Same stored content, ignoring when it was written.
    pub fn same_content(&self, other: &CacheEntry) -> bool {
        self.key == other.key && self.model_id == other.model_id && self.value == other.value
    }
}

/// Listing row for [`CacheBackend::entries`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub key: CacheKey,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutStatus {
    Inserted,
    Replaced,
    /// Identical content was already stored; nothing was written.
    Unchanged,
    /// Refused by the store (caching disabled or value over the size limit).
    Skipped,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Arc<CacheEntry>>>;
    async fn put(&self, entry: CacheEntry) -> CacheResult<PutStatus>;
    async fn invalidate(&self, key: &CacheKey) -> CacheResult<bool>;
    async fn invalidate_model(&self, model_id: &str) -> CacheResult<usize>;
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> CacheResult<usize>;
    async fn clear(&self) -> CacheResult<()>;
    async fn len(&self) -> CacheResult<usize>;
    /// Newest first.
    async fn entries(&self) -> CacheResult<Vec<EntrySummary>>;
    fn name(&self) -> &'static str;
}

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn newest_first(mut rows: Vec<EntrySummary>) -> Vec<EntrySummary> {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.key.cmp(&b.key)));
    rows
}

struct Slot {
    entry: Arc<CacheEntry>,
    last_accessed: AtomicU64,
}

/// Bounded in-memory cache with least-recently-used eviction.
///
/// Lookups take the read lock only; recency is an atomic tick per slot, so concurrent
/// lookups never wait on each other. Replacing an entry swaps the whole `Arc`.
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, Slot>>,
    max_entries: usize,
    clock: AtomicU64,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            clock: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        let entries = read_lock(&self.entries);
        entries.get(key).map(|slot| {
            slot.last_accessed.store(self.tick(), Ordering::Relaxed);
            slot.entry.clone()
        })
    }

    pub fn insert(&self, entry: Arc<CacheEntry>) -> PutStatus {
        let mut entries = write_lock(&self.entries);
        let now = self.tick();
        if let Some(slot) = entries.get_mut(&entry.key) {
            if slot.entry.same_content(&entry) {
                slot.last_accessed.store(now, Ordering::Relaxed);
                return PutStatus::Unchanged;
            }
            slot.entry = entry;
            slot.last_accessed.store(now, Ordering::Relaxed);
            return PutStatus::Replaced;
        }
        self.evict_if_needed(&mut entries);
        entries.insert(
            entry.key,
            Slot {
                entry,
                last_accessed: AtomicU64::new(now),
            },
        );
        PutStatus::Inserted
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        write_lock(&self.entries).remove(key).is_some()
    }

    pub(crate) fn retain(&self, mut keep: impl FnMut(&CacheEntry) -> bool) -> usize {
        let mut entries = write_lock(&self.entries);
        let before = entries.len();
        entries.retain(|_, slot| keep(&slot.entry));
        before - entries.len()
    }

    pub(crate) fn clear_all(&self) {
        write_lock(&self.entries).clear();
    }

    pub fn count(&self) -> usize {
        read_lock(&self.entries).len()
    }

    fn evict_if_needed(&self, entries: &mut HashMap<CacheKey, Slot>) {
        while entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, s)| s.last_accessed.load(Ordering::Relaxed))
                .map(|(k, _)| *k);
            if let Some(k) = oldest {
                entries.remove(&k);
            } else {
                break;
            }
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Arc<CacheEntry>>> {
        Ok(self.lookup(key))
    }
    async fn put(&self, entry: CacheEntry) -> CacheResult<PutStatus> {
        Ok(self.insert(Arc::new(entry)))
    }
    async fn invalidate(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.remove(key))
    }
    async fn invalidate_model(&self, model_id: &str) -> CacheResult<usize> {
        Ok(self.retain(|e| e.model_id != model_id))
    }
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> CacheResult<usize> {
        Ok(self.retain(|e| e.created_at >= cutoff))
    }
    async fn clear(&self) -> CacheResult<()> {
        self.clear_all();
        Ok(())
    }
    async fn len(&self) -> CacheResult<usize> {
        Ok(self.count())
    }
    async fn entries(&self) -> CacheResult<Vec<EntrySummary>> {
        let rows = read_lock(&self.entries)
            .values()
            .map(|s| s.entry.summary())
            .collect();
        Ok(newest_first(rows))
    }
    fn name(&self) -> &'static str {
        "memory"
    }
}

pub struct NullCache;
impl NullCache {
    pub fn new() -> Self {
        Self
    }
}
impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn get(&self, _: &CacheKey) -> CacheResult<Option<Arc<CacheEntry>>> {
        Ok(None)
    }
    async fn put(&self, _: CacheEntry) -> CacheResult<PutStatus> {
        Ok(PutStatus::Skipped)
    }
    async fn invalidate(&self, _: &CacheKey) -> CacheResult<bool> {
        Ok(false)
    }
    async fn invalidate_model(&self, _: &str) -> CacheResult<usize> {
        Ok(0)
    }
    async fn prune_older_than(&self, _: DateTime<Utc>) -> CacheResult<usize> {
        Ok(0)
    }
    async fn clear(&self) -> CacheResult<()> {
        Ok(())
    }
    async fn len(&self) -> CacheResult<usize> {
        Ok(0)
    }
    async fn entries(&self) -> CacheResult<Vec<EntrySummary>> {
        Ok(Vec::new())
    }
    fn name(&self) -> &'static str {
        "null"
    }
}
