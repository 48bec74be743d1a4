//! 结果缓存模块：以规范化请求的内容地址为键，存储生成结果。
//!
//! # Result Cache
//!
//! A shared store mapping [`CacheKey`] (a SHA-256 content address of a
//! [`CanonicalRequest`](crate::types::CanonicalRequest)) to the
//! [`GeneratedValue`](crate::types::GeneratedValue) a provider produced for it.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheStore`] | Store front with statistics and size limits |
//! | [`CacheConfig`] | Enable flag, entry size limit, hot-set size, directory |
//! | [`CacheBackend`] | Trait for storage backends |
//! | [`MemoryCache`] | Bounded in-memory LRU backend |
//! | [`FileCache`] | Persistent one-file-per-entry backend with a hot memory layer |
//! | [`NullCache`] | Backend that stores nothing |
//! | [`CacheKey`] | Deterministic key derivation |
//!
//! ## Guarantees
//!
//! - Entries are replaced as a whole; a reader sees the old value or the new one.
//! - A storage failure is a [`CacheError`], never a miss.
//! - Keys are stable across processes, so a persistent store is reusable between runs.
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_dispatch::cache::{CacheKey, CacheStore};
//! use ai_lib_dispatch::types::{GeneratedValue, GenerationRequest};
//!
//! # tokio_test::block_on(async {
//! let store = CacheStore::memory(100);
//! let req = GenerationRequest::text("openai/gpt-4o-mini", "hello").normalize().unwrap();
//! let key = CacheKey::derive(&req);
//! store.put(key, GeneratedValue::text("HELLO"), req.model_id()).await.unwrap();
//! assert_eq!(store.get(&key).await.unwrap(), Some(GeneratedValue::text("HELLO")));
//! # });
//! ```

mod backend;
mod error;
mod file;
mod key;
mod store;

pub use backend::{
    CacheBackend, CacheEntry, CacheResult, EntrySummary, MemoryCache, NullCache, PutStatus,
};
pub use error::CacheError;
pub use file::FileCache;
pub use key::{CacheKey, ParseKeyError};
pub use store::{CacheConfig, CacheStats, CacheStore};
