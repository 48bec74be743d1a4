//! Shared fixtures for integration tests.
#![allow(dead_code)]

use ai_lib_dispatch::cache::{
    CacheBackend, CacheEntry, CacheError, CacheKey, CacheResult, EntrySummary, PutStatus,
};
use ai_lib_dispatch::types::{CanonicalRequest, GeneratedValue};
use ai_lib_dispatch::{GenerationRequest, Provider, ProviderError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn text(payload: &str) -> CanonicalRequest {
    GenerationRequest::text("mock/upper", payload).normalize().unwrap()
}

type LatencyFn = dyn Fn(&CanonicalRequest) -> Duration + Send + Sync;

/// Uppercases the payload. Records call counts and the concurrent-call high-water mark.
pub struct MockProvider {
    latency: Box<LatencyFn>,
    fail_on: HashSet<String>,
    honor_cancel: bool,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    high_water: AtomicUsize,
}

impl MockProvider {
    pub fn upper() -> Self {
        Self {
            latency: Box::new(|_| Duration::ZERO),
            fail_on: HashSet::new(),
            honor_cancel: false,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            high_water: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.with_latency(move |_| delay)
    }

    pub fn with_latency(
        mut self,
        f: impl Fn(&CanonicalRequest) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.latency = Box::new(f);
        self
    }

    /// Fail with a provider error whenever the payload equals `payload`.
    pub fn failing_on(mut self, payload: &str) -> Self {
        self.fail_on.insert(payload.to_string());
        self
    }

    /// Return `Canceled` as soon as the token fires instead of finishing the delay.
    pub fn honoring_cancel(mut self) -> Self {
        self.honor_cancel = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn high_water(&self) -> usize {
        self.high_water.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(
        &self,
        req: &CanonicalRequest,
        cancel: &CancellationToken,
    ) -> Result<GeneratedValue, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.high_water.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = (self.latency)(req);
        if self.honor_cancel {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(ProviderError::Canceled),
            }
        } else {
            tokio::time::sleep(delay).await;
        }

        if self.fail_on.contains(req.payload()) {
            return Err(ProviderError::failed(format!("forced failure for {}", req.payload())));
        }
        Ok(GeneratedValue::text(req.payload().to_uppercase()))
    }
}

/// Cache backend whose every operation fails.
pub struct BrokenBackend;

fn broken() -> CacheError {
    CacheError::Unavailable("disk on fire".into())
}

#[async_trait]
impl CacheBackend for BrokenBackend {
    async fn get(&self, _: &CacheKey) -> CacheResult<Option<Arc<CacheEntry>>> {
        Err(broken())
    }
    async fn put(&self, _: CacheEntry) -> CacheResult<PutStatus> {
        Err(broken())
    }
    async fn invalidate(&self, _: &CacheKey) -> CacheResult<bool> {
        Err(broken())
    }
    async fn invalidate_model(&self, _: &str) -> CacheResult<usize> {
        Err(broken())
    }
    async fn prune_older_than(&self, _: DateTime<Utc>) -> CacheResult<usize> {
        Err(broken())
    }
    async fn clear(&self) -> CacheResult<()> {
        Err(broken())
    }
    async fn len(&self) -> CacheResult<usize> {
        Err(broken())
    }
    async fn entries(&self) -> CacheResult<Vec<EntrySummary>> {
        Err(broken())
    }
    fn name(&self) -> &'static str {
        "broken"
    }
}
