//! Execution engine.

use super::cancel::CancelHandle;
use super::gate::AdmissionGate;
use super::report::{BatchReport, BatchSummary};
use crate::cache::CacheStore;
use crate::config::EngineConfig;
use crate::dispatcher::{Dispatched, Dispatcher, OutcomeSource};
use crate::progress::{ProgressHub, ProgressSink, ProgressStream};
use crate::provider::Provider;
use crate::types::{
    request, CanonicalRequest, Failure, FailureKind, GenerationRequest, Outcome, ProgressEvent,
};
use crate::{Error, ErrorContext, Result};
use arc_swap::ArcSwap;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// A batch entry: either ready to dispatch or already known to be invalid.
enum Item {
    Ready(CanonicalRequest),
    Invalid {
        model_id: String,
        preview: String,
        failure: Failure,
    },
}

impl Item {
    fn model_id(&self) -> &str {
        match self {
            Item::Ready(req) => req.model_id(),
            Item::Invalid { model_id, .. } => model_id,
        }
    }

    fn preview(&self, max_chars: usize) -> String {
        match self {
            Item::Ready(req) => req.preview(max_chars),
            Item::Invalid { preview, .. } => preview.clone(),
        }
    }
}

struct Settled {
    outcome: Outcome,
    cached: bool,
}

/// Per-run state shared by the item futures of one batch.
struct Run<'a> {
    id: Uuid,
    gate: AdmissionGate,
    dispatcher: Dispatcher,
    cancel: &'a CancelHandle,
    preview_chars: usize,
}

/// Drives requests through the [`Dispatcher`] under a concurrency ceiling.
///
/// Output order always matches input order. A failing request only fails its own slot, and
/// cancellation marks every request that did not finish as `canceled` instead of dropping it.
pub struct ExecutionEngine {
    dispatcher: Dispatcher,
    config: ArcSwap<EngineConfig>,
    progress: ProgressHub,
}

impl ExecutionEngine {
    /// Engine with default configuration and no sinks.
    pub fn new(cache: Arc<CacheStore>, provider: Arc<dyn Provider>) -> Self {
        let config = EngineConfig::default();
        Self {
            dispatcher: Dispatcher::new(cache, provider),
            progress: ProgressHub::new(config.event_capacity),
            config: ArcSwap::from_pointee(config),
        }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Current configuration. A running batch keeps the one it started with.
    pub fn config(&self) -> Arc<EngineConfig> {
        self.config.load_full()
    }

    /// Swap in new defaults for subsequent runs. `event_capacity` only applies at build time.
    pub fn update_config(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        self.config.store(Arc::new(config));
        Ok(())
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        self.dispatcher.cache()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Lazy view of every event published from now on.
    pub fn subscribe(&self) -> ProgressStream {
        self.progress.subscribe()
    }

    /// Execute a single request, emitting `started` and a terminal event around it.
    pub async fn run_one(&self, request: &CanonicalRequest) -> Outcome {
        let config = self.config.load_full();
        let run_id = Uuid::new_v4();
        let cancel = CancelHandle::new();
        let item_start = Instant::now();
        self.progress.emit(ProgressEvent::Started {
            run_id,
            request_id: 0,
            model_id: request.model_id().to_string(),
            preview: request.preview(config.preview_chars),
            timestamp: Utc::now(),
        });
        let dispatched = self.dispatcher.dispatch(request, cancel.token()).await;
        let settled = Settled {
            cached: dispatched.cached(),
            outcome: dispatched.outcome,
        };
        self.emit_terminal(run_id, 0, &settled, Some(item_start.elapsed()));
        settled.outcome
    }

    pub async fn run_many(
        &self,
        requests: Vec<CanonicalRequest>,
        limit: Option<usize>,
    ) -> BatchReport {
        self.run_many_with_cancel(requests, limit, &CancelHandle::new())
            .await
    }

    pub async fn run_many_with_cancel(
        &self,
        requests: Vec<CanonicalRequest>,
        limit: Option<usize>,
        cancel: &CancelHandle,
    ) -> BatchReport {
        let items = requests.into_iter().map(Item::Ready).collect();
        self.run_batch(items, limit, cancel).await
    }

    /// Normalize and run caller requests. Malformed entries fail in place as `validation_error`.
    pub async fn run_requests(
        &self,
        requests: Vec<GenerationRequest>,
        limit: Option<usize>,
    ) -> BatchReport {
        self.run_requests_with_cancel(requests, limit, &CancelHandle::new())
            .await
    }

    pub async fn run_requests_with_cancel(
        &self,
        requests: Vec<GenerationRequest>,
        limit: Option<usize>,
        cancel: &CancelHandle,
    ) -> BatchReport {
        let preview_chars = self.config.load().preview_chars;
        let items = requests
            .into_iter()
            .map(|req| match req.normalize() {
                Ok(canonical) => Item::Ready(canonical),
                Err(e) => Item::Invalid {
                    model_id: req.model_id.trim().to_string(),
                    preview: request::preview(req.payload.trim(), preview_chars),
                    failure: Failure::from(e),
                },
            })
            .collect();
        self.run_batch(items, limit, cancel).await
    }

    async fn run_batch(
        &self,
        items: Vec<Item>,
        limit: Option<usize>,
        cancel: &CancelHandle,
    ) -> BatchReport {
        let config = self.config.load_full();
        let limit = config.resolve_limit(limit);
        let total = items.len();
        let run = Run {
            id: Uuid::new_v4(),
            gate: AdmissionGate::new(limit),
            dispatcher: self.dispatcher.clone().with_cancel_grace(config.cancel_grace),
            cancel,
            preview_chars: config.preview_chars,
        };
        let started = Instant::now();

        info!(run_id = %run.id, total, limit, "batch started");
        self.progress.emit(ProgressEvent::BatchStart {
            run_id: run.id,
            total,
            concurrency_limit: limit,
            timestamp: Utc::now(),
        });

        let settled = join_all(
            items
                .into_iter()
                .enumerate()
                .map(|(index, item)| self.run_item(&run, index, item)),
        )
        .await;

        let mut summary = BatchSummary {
            total,
            peak_in_flight: run.gate.peak(),
            ..Default::default()
        };
        let mut outcomes = Vec::with_capacity(total);
        for s in settled {
            match s.outcome.failure_kind() {
                None => {
                    summary.succeeded += 1;
                    if s.cached {
                        summary.cache_hits += 1;
                    }
                }
                Some(FailureKind::Canceled) => summary.canceled += 1,
                Some(_) => summary.failed += 1,
            }
            outcomes.push(s.outcome);
        }
        summary.elapsed = started.elapsed();

        let canceled = cancel.is_canceled();
        if canceled {
            warn!(run_id = %run.id, canceled = summary.canceled, total, "batch canceled");
        }
        info!(
            run_id = %run.id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            canceled = summary.canceled,
            cache_hits = summary.cache_hits,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "batch finished"
        );
        self.progress.emit(ProgressEvent::BatchComplete {
            run_id: run.id,
            timestamp: Utc::now(),
            succeeded: summary.succeeded,
            failed: summary.failed,
            canceled: summary.canceled,
            elapsed: summary.elapsed,
        });

        BatchReport {
            run_id: run.id,
            outcomes,
            summary,
            canceled,
        }
    }

    async fn run_item(&self, run: &Run<'_>, index: usize, item: Item) -> Settled {
        // Held until the terminal event is out, so the gate bounds started-but-unsettled requests.
        let admission = run.gate.admit().await;
        let item_start = Instant::now();
        self.progress.emit(ProgressEvent::Started {
            run_id: run.id,
            request_id: index,
            model_id: item.model_id().to_string(),
            preview: item.preview(run.preview_chars),
            timestamp: Utc::now(),
        });

        let (settled, dispatched) = match (&admission, item) {
            (Err(e), _) => (settled_failure(gate_failure(e)), false),
            (Ok(_), _) if run.cancel.is_canceled() => (settled_failure(Failure::canceled()), false),
            (Ok(_), Item::Invalid { failure, .. }) => (settled_failure(failure), false),
            (Ok(_), Item::Ready(req)) => {
                let Dispatched { outcome, source } =
                    run.dispatcher.dispatch(&req, run.cancel.token()).await;
                let cached = source == OutcomeSource::Cache;
                (Settled { outcome, cached }, true)
            }
        };

        let duration = dispatched.then(|| item_start.elapsed());
        self.emit_terminal(run.id, index, &settled, duration);
        drop(admission);
        settled
    }

    fn emit_terminal(
        &self,
        run_id: Uuid,
        index: usize,
        settled: &Settled,
        duration: Option<Duration>,
    ) {
        let timestamp = Utc::now();
        let event = match &settled.outcome {
            Outcome::Success(_) => ProgressEvent::Complete {
                run_id,
                request_id: index,
                timestamp,
                duration: duration.unwrap_or_default(),
                cached: settled.cached,
            },
            Outcome::Failure(f) if f.kind == FailureKind::Canceled => ProgressEvent::Canceled {
                run_id,
                request_id: index,
                timestamp,
                duration,
            },
            Outcome::Failure(f) => ProgressEvent::Failed {
                run_id,
                request_id: index,
                timestamp,
                duration: duration.unwrap_or_default(),
                kind: f.kind,
                error: f.to_string(),
            },
        };
        self.progress.emit(event);
    }
}

fn settled_failure(failure: Failure) -> Settled {
    Settled {
        outcome: Outcome::Failure(failure),
        cached: false,
    }
}

/// A gate that stops admitting has halted the run for this request.
fn gate_failure(err: &Error) -> Failure {
    Failure::new(FailureKind::Canceled, err.message())
        .with_context(ErrorContext::new().with_source("admission"))
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("dispatcher", &self.dispatcher)
            .field("config", &self.config.load())
            .field("progress", &self.progress)
            .finish()
    }
}

/// Builder for [`ExecutionEngine`].
#[derive(Default)]
pub struct EngineBuilder {
    cache: Option<Arc<CacheStore>>,
    provider: Option<Arc<dyn Provider>>,
    config: EngineConfig,
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a store with other engines or dispatchers. Defaults to a fresh in-memory store.
    pub fn cache(mut self, cache: Arc<CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn build(self) -> Result<ExecutionEngine> {
        self.config.validate()?;
        let provider = self.provider.ok_or_else(|| {
            Error::configuration_with_context(
                "execution engine needs a provider",
                ErrorContext::new().with_field_path("provider"),
            )
        })?;
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(CacheStore::memory(1024)));
        let progress = self
            .sinks
            .into_iter()
            .fold(ProgressHub::new(self.config.event_capacity), ProgressHub::with_sink);
        Ok(ExecutionEngine {
            dispatcher: Dispatcher::new(cache, provider),
            config: ArcSwap::from_pointee(self.config),
            progress,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::InMemoryProgressSink;
    use crate::provider::ProviderError;
    use crate::types::{EventType, GeneratedValue};
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    struct Upper;

    #[async_trait]
    impl Provider for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        async fn generate(
            &self,
            req: &CanonicalRequest,
            _: &CancellationToken,
        ) -> std::result::Result<GeneratedValue, ProviderError> {
            Ok(GeneratedValue::text(req.payload().to_uppercase()))
        }
    }

    /// Always answers with the configured error.
    struct Erroring(ProviderError);

    #[async_trait]
    impl Provider for Erroring {
        fn name(&self) -> &str {
            "erroring"
        }
        async fn generate(
            &self,
            _: &CanonicalRequest,
            _: &CancellationToken,
        ) -> std::result::Result<GeneratedValue, ProviderError> {
            Err(self.0.clone())
        }
    }

    fn engine(sink: Arc<InMemoryProgressSink>) -> ExecutionEngine {
        engine_with(Arc::new(Upper), sink)
    }

    fn engine_with(
        provider: Arc<dyn Provider>,
        sink: Arc<InMemoryProgressSink>,
    ) -> ExecutionEngine {
        ExecutionEngine::builder()
            .provider(provider)
            .sink(sink)
            .build()
            .unwrap()
    }

    fn req(payload: &str) -> CanonicalRequest {
        GenerationRequest::text("test/upper", payload).normalize().unwrap()
    }

    #[tokio::test]
    async fn test_run_one_emits_started_then_complete() {
        let sink = Arc::new(InMemoryProgressSink::default());
        let e = engine(sink.clone());
        let out = e.run_one(&req("hi")).await;
        assert_eq!(out, Outcome::Success(GeneratedValue::text("HI")));
        assert_eq!(sink.event_types(), vec![EventType::Started, EventType::Complete]);
    }

    #[tokio::test]
    async fn test_run_one_emits_started_then_failed() {
        let sink = Arc::new(InMemoryProgressSink::default());
        let provider = Arc::new(Erroring(ProviderError::failed("upstream 500")));
        let e = engine_with(provider, sink.clone());
        let out = e.run_one(&req("hi")).await;
        assert_eq!(out.failure_kind(), Some(FailureKind::Provider));
        assert_eq!(sink.event_types(), vec![EventType::Started, EventType::Failed]);
        match &sink.events()[1] {
            ProgressEvent::Failed { kind, request_id, .. } => {
                assert_eq!(*kind, FailureKind::Provider);
                assert_eq!(*request_id, 0);
            }
            other => panic!("unexpected terminal event {:?}", other),
        }
        assert!(e.cache().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_run_one_provider_cancel_is_a_canceled_event() {
        let sink = Arc::new(InMemoryProgressSink::default());
        let e = engine_with(Arc::new(Erroring(ProviderError::Canceled)), sink.clone());
        let out = e.run_one(&req("hi")).await;
        assert!(out.is_canceled());
        assert_eq!(sink.event_types(), vec![EventType::Started, EventType::Canceled]);
    }

    #[test]
    fn test_closed_gate_reports_canceled() {
        let failure = gate_failure(&Error::runtime("admission gate closed"));
        assert_eq!(failure.kind, FailureKind::Canceled);
        assert_eq!(failure.context.source.as_deref(), Some("admission"));
    }

    #[tokio::test]
    async fn test_empty_batch_still_reports() {
        let sink = Arc::new(InMemoryProgressSink::default());
        let report = engine(sink.clone()).run_many(Vec::new(), None).await;
        assert!(report.is_empty());
        assert_eq!(sink.event_types(), vec![EventType::BatchStart, EventType::BatchComplete]);
    }

    #[tokio::test]
    async fn test_repeat_request_counts_as_cache_hit() {
        let e = engine(Arc::new(InMemoryProgressSink::default()));
        e.run_one(&req("x")).await;
        let report = e.run_many(vec![req("x"), req("y")], Some(1)).await;
        assert_eq!(report.summary.cache_hits, 1);
        assert_eq!(report.summary.succeeded, 2);
    }

    #[tokio::test]
    async fn test_pre_canceled_batch_still_starts_each_request() {
        let sink = Arc::new(InMemoryProgressSink::default());
        let e = engine(sink.clone());
        let cancel = CancelHandle::new();
        cancel.cancel();
        let report = e
            .run_many_with_cancel(vec![req("a"), req("b")], Some(1), &cancel)
            .await;
        assert!(report.outcomes.iter().all(Outcome::is_canceled));
        assert_eq!(sink.count(EventType::Started), 2);
        assert_eq!(sink.count(EventType::Canceled), 2);
        assert!(report.into_result().is_err());
    }

    #[test]
    fn test_builder_requires_provider() {
        let err = ExecutionEngine::builder().build().unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_update_config_validates() {
        let e = engine(Arc::new(InMemoryProgressSink::default()));
        assert!(e.update_config(EngineConfig::new().with_max_concurrency(0)).is_err());
        e.update_config(EngineConfig::new().with_default_concurrency(2)).unwrap();
        assert_eq!(e.config().default_concurrency, 2);
    }
}
