//! 单请求调度：先查缓存，未命中时调用 Provider 并写回成功结果。
//!
//! [`Dispatcher`] executes one [`CanonicalRequest`]. It makes at most one provider call and at most
//! one cache write per request, never caches failures and never retries.

use crate::cache::{CacheKey, CacheStore};
use crate::provider::{Provider, ProviderError};
use crate::types::{CanonicalRequest, Failure, FailureKind, GeneratedValue, Outcome};
use crate::ErrorContext;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Where a dispatched outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeSource {
    Cache,
    Provider,
    /// Settled without a lookup or a provider call (rejected up front).
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub outcome: Outcome,
    pub source: OutcomeSource,
}

impl Dispatched {
    pub fn cached(&self) -> bool {
        self.source == OutcomeSource::Cache
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    cache: Arc<CacheStore>,
    provider: Arc<dyn Provider>,
    cancel_grace: Option<Duration>,
}

impl Dispatcher {
    pub fn new(cache: Arc<CacheStore>, provider: Arc<dyn Provider>) -> Self {
        Self {
            cache,
            provider,
            cancel_grace: None,
        }
    }

    /// Stop waiting for a provider call this long after cancellation and report it canceled.
    pub fn with_cancel_grace(mut self, grace: Option<Duration>) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Execute without a cancellation signal.
    pub async fn execute(&self, request: &CanonicalRequest) -> Outcome {
        self.dispatch(request, &CancellationToken::new()).await.outcome
    }

    pub async fn dispatch(
        &self,
        request: &CanonicalRequest,
        cancel: &CancellationToken,
    ) -> Dispatched {
        if !self.provider.supports(request.kind()) {
            let failure = Failure::validation(format!(
                "provider '{}' does not support {} requests",
                self.provider.name(),
                request.kind()
            ))
            .with_context(
                ErrorContext::new()
                    .with_field_path("kind")
                    .with_source(self.provider.name()),
            );
            return Dispatched {
                outcome: Outcome::Failure(failure),
                source: OutcomeSource::Skipped,
            };
        }

        let key = CacheKey::derive(request);
        match self.cache.get(&key).await {
            Ok(Some(value)) => {
                debug!(%key, model = request.model_id(), "cache hit");
                return Dispatched {
                    outcome: Outcome::Success(value),
                    source: OutcomeSource::Cache,
                };
            }
            Ok(None) => debug!(%key, model = request.model_id(), "cache miss"),
            Err(e) => warn!(%key, error = %e, "cache lookup failed, calling provider"),
        }

        let outcome = match self.call_provider(request, cancel).await {
            Ok(value) => {
                self.store(key, &value, request.model_id()).await;
                Outcome::Success(value)
            }
            Err(e) => {
                debug!(%key, error = %e, "provider call failed");
                Outcome::Failure(self.provider_failure(&e, request))
            }
        };
        Dispatched {
            outcome,
            source: OutcomeSource::Provider,
        }
    }

    async fn call_provider(
        &self,
        request: &CanonicalRequest,
        cancel: &CancellationToken,
    ) -> Result<GeneratedValue, ProviderError> {
        let call = self.provider.generate(request, cancel);
        let Some(grace) = self.cancel_grace else {
            return call.await;
        };
        tokio::pin!(call);
        tokio::select! {
            biased;
            result = &mut call => result,
            _ = async {
                cancel.cancelled().await;
                tokio::time::sleep(grace).await;
            } => {
                warn!(
                    model = request.model_id(),
                    ?grace,
                    "provider call abandoned after cancellation"
                );
                Err(ProviderError::Canceled)
            }
        }
    }

    async fn store(&self, key: CacheKey, value: &GeneratedValue, model_id: &str) {
        match self.cache.put(key, value.clone(), model_id).await {
            Ok(status) => debug!(%key, ?status, "cache write"),
            Err(e) => warn!(%key, error = %e, "cache write failed"),
        }
    }

    fn provider_failure(&self, err: &ProviderError, request: &CanonicalRequest) -> Failure {
        let kind = err.failure_kind();
        let mut context = ErrorContext::new().with_source(self.provider.name());
        if kind == FailureKind::Provider {
            context = context.with_details(format!(
                "model={} retryable={}",
                request.model_id(),
                err.is_retryable()
            ));
        }
        Failure::new(kind, err.to_string()).with_context(context)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("provider", &self.provider.name())
            .field("cache", &self.cache)
            .field("cancel_grace", &self.cancel_grace)
            .finish()
    }
}
