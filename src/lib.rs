//! # ai-lib-dispatch
//!
//! 面向多厂商 AI 生成请求的确定性缓存与有界并发调度运行时。
//!
//! Cached, bounded-concurrency dispatch of generation requests across interchangeable
//! providers.
//!
//! ## Overview
//!
//! Callers describe what they want as a [`GenerationRequest`]. Normalization turns it into an
//! immutable [`CanonicalRequest`], from which a stable content-addressed [`CacheKey`] is derived.
//! The [`Dispatcher`] answers from the [`CacheStore`] when it can and calls the injected
//! [`Provider`] when it cannot. The [`ExecutionEngine`] drives many requests through the
//! dispatcher under a concurrency ceiling and publishes progress events as it goes.
//!
//! ## Core Properties
//!
//! - **Deterministic keys**: equal normalized requests give equal keys, across processes
//! - **Bounded concurrency**: an admission gate caps in-flight requests per batch
//! - **Positional outcomes**: outcome *i* answers request *i*; failures stay in their slot
//! - **No silent loss**: canceled requests come back as `Failure(kind = canceled)`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_lib_dispatch::{CacheStore, ExecutionEngine, GenerationRequest, Provider};
//! use std::sync::Arc;
//!
//! # async fn demo(provider: Arc<dyn Provider>) -> ai_lib_dispatch::Result<()> {
//! let cache = Arc::new(CacheStore::memory(1000));
//! let engine = ExecutionEngine::builder()
//!     .cache(cache)
//!     .provider(provider)
//!     .build()?;
//!
//! let report = engine
//!     .run_requests(vec![GenerationRequest::text("openai/gpt-4o-mini", "Hello")], None)
//!     .await;
//! println!("{} succeeded", report.summary.succeeded);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`types`] | Requests, canonical form, outcomes, progress events |
//! | [`cache`] | Cache keys, store and backends (memory, file, null) |
//! | [`provider`] | Provider capability trait and prefix router |
//! | [`dispatcher`] | Single-request cache-then-provider execution |
//! | [`batch`] | Execution engine, admission gate, cancellation, reports |
//! | [`progress`] | Progress sinks and the lazy event stream |
//! | [`config`] | Engine and runtime configuration (code, YAML, env) |

pub mod batch;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod progress;
pub mod provider;
pub mod types;

// Re-export main types for convenience
pub use batch::{BatchReport, BatchSummary, CancelHandle, EngineBuilder, ExecutionEngine};
pub use cache::{CacheConfig, CacheError, CacheKey, CacheStore};
pub use config::{EngineConfig, RuntimeConfig};
pub use dispatcher::{Dispatched, Dispatcher, OutcomeSource};
pub use progress::{ProgressSink, ProgressStream};
pub use provider::{Provider, ProviderError, ProviderRouter};
pub use types::{
    CanonicalRequest, EventType, Failure, FailureKind, GeneratedValue, GenerationOptions,
    GenerationRequest, Outcome, ProgressEvent, RequestKind,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
