//! Persistent cache backend: one JSON file per entry under a sharded directory.
//!
//! Layout: `<root>/objects/<shard>/<key>.json`. The `key → path` index is built from file names on
//! first access, so opening a large store costs one directory walk and no value reads. Values are
//! read on demand and kept in a bounded [`MemoryCache`] hot layer.

use super::backend::{
    newest_first, read_lock, write_lock, CacheBackend, CacheEntry, CacheResult, EntrySummary,
    MemoryCache, PutStatus,
};
use super::error::CacheError;
use super::key::CacheKey;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::fs;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

const ENTRY_EXT: &str = "json";
const TEMP_MARKER: &str = ".tmp.";

#[derive(Debug, Clone)]
struct IndexRecord {
    path: PathBuf,
    /// Bumped on every write; readers only populate the hot layer if it is unchanged.
    generation: u64,
}

pub struct FileCache {
    root: PathBuf,
    index: RwLock<HashMap<CacheKey, IndexRecord>>,
    hydrated: OnceCell<()>,
    hot: MemoryCache,
    generation: AtomicU64,
    // Serializes rename + index update so disk and memory agree on the last writer.
    write_gate: Mutex<()>,
}

impl FileCache {
    /// Open (or create) a store rooted at `dir`. The index is hydrated lazily.
    pub async fn open(dir: impl Into<PathBuf>, hot_entries: usize) -> CacheResult<Self> {
        let root = dir.into();
        let objects = root.join("objects");
        fs::create_dir_all(&objects)
            .await
            .map_err(|e| CacheError::io(&objects, "create cache directory", e))?;
        Ok(Self {
            root,
            index: RwLock::new(HashMap::new()),
            hydrated: OnceCell::new(),
            hot: MemoryCache::new(hot_entries),
            generation: AtomicU64::new(0),
            write_gate: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn objects_dir(&self) -> PathBuf {
        self.root.join("objects")
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.objects_dir()
            .join(key.shard())
            .join(format!("{}.{}", key.to_hex(), ENTRY_EXT))
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn ensure_index(&self) -> CacheResult<()> {
        self.hydrated.get_or_try_init(|| self.hydrate()).await?;
        Ok(())
    }

    async fn hydrate(&self) -> CacheResult<()> {
        let objects = self.objects_dir();
        let mut found = HashMap::new();
        let mut shards = match fs::read_dir(&objects).await {
            Ok(rd) => rd,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&objects)
                    .await
                    .map_err(|e| CacheError::io(&objects, "create cache directory", e))?;
                return Ok(());
            }
            Err(e) => return Err(CacheError::io(&objects, "scan cache directory", e)),
        };

        let mut stray = 0usize;
        while let Some(shard) = shards
            .next_entry()
            .await
            .map_err(|e| CacheError::io(&objects, "scan cache directory", e))?
        {
            let shard_path = shard.path();
            let is_dir = shard.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }
            let mut files = fs::read_dir(&shard_path)
                .await
                .map_err(|e| CacheError::io(&shard_path, "scan cache shard", e))?;
            while let Some(file) = files
                .next_entry()
                .await
                .map_err(|e| CacheError::io(&shard_path, "scan cache shard", e))?
            {
                let path = file.path();
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };
                if name.contains(TEMP_MARKER) {
                    // Interrupted write from an earlier process; the live file is untouched.
                    let _ = fs::remove_file(&path).await;
                    stray += 1;
                    continue;
                }
                let Some(stem) = name.strip_suffix(".json") else {
                    continue;
                };
                match stem.parse::<CacheKey>() {
                    Ok(key) => {
                        found.insert(key, IndexRecord { path, generation: 0 });
                    }
                    Err(_) => debug!(
                        file = %path.display(),
                        "ignoring unrecognized file in cache directory"
                    ),
                }
            }
        }

        debug!(root = %self.root.display(), entries = found.len(), stray, "cache index hydrated");
        {
            let mut index = write_lock(&self.index);
            for (key, record) in found {
                index.entry(key).or_insert(record);
            }
        }
        Ok(())
    }

    async fn read_entry(&self, key: &CacheKey, path: &Path) -> CacheResult<Option<CacheEntry>> {
        let bytes = match fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(path, "read cache entry", e)),
        };
        let entry: CacheEntry =
            serde_json::from_slice(&bytes).map_err(|source| CacheError::Corrupt {
                key: key.to_hex(),
                source,
            })?;
        if entry.key != *key {
            return Err(CacheError::Unavailable(format!(
                "entry at {} is keyed {} not {}",
                path.display(),
                entry.key,
                key
            )));
        }
        Ok(Some(entry))
    }

    /// Hot layer first, then disk. Does not populate the hot layer.
    async fn peek(&self, key: &CacheKey) -> CacheResult<Option<Arc<CacheEntry>>> {
        if let Some(hit) = self.hot.lookup(key) {
            return Ok(Some(hit));
        }
        let record = read_lock(&self.index).get(key).cloned();
        match record {
            Some(r) => Ok(self.read_entry(key, &r.path).await?.map(Arc::new)),
            None => Ok(None),
        }
    }

    async fn remove_key(&self, key: &CacheKey) -> CacheResult<bool> {
        let _gate = self.write_gate.lock().await;
        let removed = {
            let mut index = write_lock(&self.index);
            self.hot.remove(key);
            index.remove(key)
        };
        match removed {
            Some(record) => match fs::remove_file(&record.path).await {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
                Err(e) => Err(CacheError::io(&record.path, "remove cache entry", e)),
            },
            None => Ok(false),
        }
    }

    /// Remove every entry matching `predicate`. Unreadable entries are skipped with a warning.
    async fn remove_where(&self, predicate: impl Fn(&CacheEntry) -> bool) -> CacheResult<usize> {
        self.ensure_index().await?;
        let keys: Vec<CacheKey> = read_lock(&self.index).keys().copied().collect();
        let mut removed = 0;
        for key in keys {
            match self.peek(&key).await {
                Ok(Some(entry)) if predicate(entry.as_ref()) => {
                    if self.remove_key(&key).await? {
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(%key, error = %e, "skipping unreadable cache entry"),
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl CacheBackend for FileCache {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<Arc<CacheEntry>>> {
        self.ensure_index().await?;
        if let Some(hit) = self.hot.lookup(key) {
            return Ok(Some(hit));
        }
        let record = read_lock(&self.index).get(key).cloned();
        let Some(record) = record else {
            return Ok(None);
        };
        let Some(entry) = self.read_entry(key, &record.path).await? else {
            return Ok(None);
        };
        let entry = Arc::new(entry);
        {
            let index = read_lock(&self.index);
            if index.get(key).map(|r| r.generation) == Some(record.generation) {
                self.hot.insert(entry.clone());
            }
        }
        Ok(Some(entry))
    }

    async fn put(&self, entry: CacheEntry) -> CacheResult<PutStatus> {
        self.ensure_index().await?;
        let key = entry.key;
        if let Some(existing) = self.peek(&key).await? {
            if existing.same_content(&entry) {
                return Ok(PutStatus::Unchanged);
            }
        }

        let bytes = serde_json::to_vec(&entry).map_err(|source| CacheError::Serialization {
            key: key.to_hex(),
            source,
        })?;
        let path = self.entry_path(&key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::io(parent, "create cache shard", e))?;
        }
        let temp = path.with_extension(format!(
            "{}{}{}",
            ENTRY_EXT,
            TEMP_MARKER,
            uuid::Uuid::new_v4()
        ));
        fs::write(&temp, &bytes)
            .await
            .map_err(|e| CacheError::io(&temp, "write cache entry", e))?;

        let _gate = self.write_gate.lock().await;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(CacheError::io(&path, "atomic rename", e));
        }
        let generation = self.next_generation();
        let previous = {
            let mut index = write_lock(&self.index);
            let previous = index.insert(key, IndexRecord { path, generation });
            self.hot.insert(Arc::new(entry));
            previous
        };
        Ok(if previous.is_some() {
            PutStatus::Replaced
        } else {
            PutStatus::Inserted
        })
    }

    async fn invalidate(&self, key: &CacheKey) -> CacheResult<bool> {
        self.ensure_index().await?;
        self.remove_key(key).await
    }

    async fn invalidate_model(&self, model_id: &str) -> CacheResult<usize> {
        self.remove_where(|e| e.model_id == model_id).await
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> CacheResult<usize> {
        self.remove_where(|e| e.created_at < cutoff).await
    }

    async fn clear(&self) -> CacheResult<()> {
        self.ensure_index().await?;
        let _gate = self.write_gate.lock().await;
        {
            let mut index = write_lock(&self.index);
            index.clear();
            self.hot.clear_all();
        }
        let objects = self.objects_dir();
        match fs::remove_dir_all(&objects).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&objects, "clear cache directory", e)),
        }
        fs::create_dir_all(&objects)
            .await
            .map_err(|e| CacheError::io(&objects, "create cache directory", e))
    }

    async fn len(&self) -> CacheResult<usize> {
        self.ensure_index().await?;
        Ok(read_lock(&self.index).len())
    }

    async fn entries(&self) -> CacheResult<Vec<EntrySummary>> {
        self.ensure_index().await?;
        let keys: Vec<CacheKey> = read_lock(&self.index).keys().copied().collect();
        let mut rows = Vec::with_capacity(keys.len());
        for key in keys {
            match self.peek(&key).await {
                Ok(Some(entry)) => rows.push(entry.summary()),
                Ok(None) => {}
                Err(e) => warn!(%key, error = %e, "skipping unreadable cache entry"),
            }
        }
        Ok(newest_first(rows))
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeneratedValue, MediaPayload};

    fn key(b: u8) -> CacheKey {
        CacheKey::from_bytes([b; 32])
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = FileCache::open(dir.path(), 8).await.unwrap();
            cache
                .put(CacheEntry::new(key(1), GeneratedValue::text("hello"), "m"))
                .await
                .unwrap();
            cache
                .put(CacheEntry::new(
                    key(2),
                    GeneratedValue::Audio(MediaPayload::new("audio/wav", vec![1, 2, 3])),
                    "tts",
                ))
                .await
                .unwrap();
        }
        let reopened = FileCache::open(dir.path(), 8).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 2);
        let audio = reopened.get(&key(2)).await.unwrap().unwrap();
        assert_eq!(
            audio.value,
            GeneratedValue::Audio(MediaPayload::new("audio/wav", vec![1, 2, 3]))
        );
        assert_eq!(audio.model_id, "tts");
    }

    #[tokio::test]
    async fn test_layout_is_sharded_json() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path(), 8).await.unwrap();
        cache
            .put(CacheEntry::new(key(0xab), GeneratedValue::text("x"), "m"))
            .await
            .unwrap();
        let expected = dir
            .path()
            .join("objects")
            .join("ab")
            .join(format!("{}.json", key(0xab).to_hex()));
        assert!(expected.is_file());
    }

    #[tokio::test]
    async fn test_hydration_removes_stray_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("objects").join("01");
        std::fs::create_dir_all(&shard).unwrap();
        let stray = shard.join(format!("{}.json.tmp.deadbeef", key(1).to_hex()));
        std::fs::write(&stray, b"{partial").unwrap();

        let cache = FileCache::open(dir.path(), 8).await.unwrap();
        assert_eq!(cache.len().await.unwrap(), 0);
        assert!(!stray.exists());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_an_error_not_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let k = key(7);
        let shard = dir.path().join("objects").join(k.shard());
        std::fs::create_dir_all(&shard).unwrap();
        std::fs::write(shard.join(format!("{}.json", k.to_hex())), b"not json").unwrap();

        let cache = FileCache::open(dir.path(), 8).await.unwrap();
        let err = cache.get(&k).await.unwrap_err();
        assert!(matches!(err, CacheError::Corrupt { .. }));
        assert!(cache.get(&key(8)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identical_put_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path(), 8).await.unwrap();
        let k = key(3);
        assert_eq!(
            cache.put(CacheEntry::new(k, GeneratedValue::text("v"), "m")).await.unwrap(),
            PutStatus::Inserted
        );
        let path = cache.entry_path(&k);
        let before = std::fs::read(&path).unwrap();
        assert_eq!(
            cache.put(CacheEntry::new(k, GeneratedValue::text("v"), "m")).await.unwrap(),
            PutStatus::Unchanged
        );
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(
            cache.put(CacheEntry::new(k, GeneratedValue::text("w"), "m")).await.unwrap(),
            PutStatus::Replaced
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_get_never_sees_a_partial_put() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(FileCache::open(dir.path(), 1).await.unwrap());
        let k = key(9);
        let left = GeneratedValue::text("a".repeat(200 * 1024));
        let right = GeneratedValue::text("b".repeat(200 * 1024));
        let other = key(10);
        cache
            .put(CacheEntry::new(k, left.clone(), "m"))
            .await
            .unwrap();
        cache
            .put(CacheEntry::new(other, GeneratedValue::text("other"), "m"))
            .await
            .unwrap();

        let writer = {
            let cache = cache.clone();
            let (left, right) = (left.clone(), right.clone());
            tokio::spawn(async move {
                for i in 0..50 {
                    let value = if i % 2 == 0 { right.clone() } else { left.clone() };
                    cache.put(CacheEntry::new(k, value, "m")).await.unwrap();
                }
            })
        };

        let mut reads = 0usize;
        loop {
            let done = writer.is_finished();
            // Evict `k` from the one-slot hot tier so the next read goes to disk.
            cache.get(&other).await.unwrap().unwrap();
            let entry = cache
                .get(&k)
                .await
                .expect("read failed during a concurrent write")
                .expect("entry vanished during a concurrent write");
            assert!(entry.value == left || entry.value == right, "torn read");
            reads += 1;
            if done {
                break;
            }
        }
        writer.await.unwrap();
        assert!(reads > 0);
        assert_eq!(cache.get(&k).await.unwrap().unwrap().value, left);
    }

    #[tokio::test]
    async fn test_bulk_invalidate_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::open(dir.path(), 1).await.unwrap();
        for (b, model) in [(1, "a/x"), (2, "a/x"), (3, "b/y")] {
            cache
                .put(CacheEntry::new(key(b), GeneratedValue::text("v"), model))
                .await
                .unwrap();
        }
        assert_eq!(cache.invalidate_model("a/x").await.unwrap(), 2);
        assert_eq!(cache.len().await.unwrap(), 1);
        let rows = cache.entries().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].model_id, "b/y");

        cache.clear().await.unwrap();
        assert_eq!(cache.len().await.unwrap(), 0);
        let reopened = FileCache::open(dir.path(), 1).await.unwrap();
        assert_eq!(reopened.len().await.unwrap(), 0);
    }
}
