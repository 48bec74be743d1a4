//! Built-in progress sinks.

use super::ProgressSink;
use crate::types::{EventType, ProgressEvent};
use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn on_event(&self, _: &ProgressEvent) {}
}

/// Keeps the most recent events in memory. Mostly for tests.
#[derive(Debug)]
pub struct InMemoryProgressSink {
    events: RwLock<VecDeque<ProgressEvent>>,
    max_events: usize,
}

impl InMemoryProgressSink {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            max_events: max_events.max(1),
        }
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn events_for(&self, request_id: usize) -> Vec<ProgressEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.request_id() == Some(request_id))
            .cloned()
            .collect()
    }

    pub fn event_types(&self) -> Vec<EventType> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(ProgressEvent::event_type)
            .collect()
    }

    pub fn count(&self, event_type: EventType) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryProgressSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

impl ProgressSink for InMemoryProgressSink {
    fn on_event(&self, event: &ProgressEvent) {
        let mut events = self.events.write().unwrap_or_else(PoisonError::into_inner);
        if events.len() == self.max_events {
            events.pop_front();
        }
        events.push_back(event.clone());
    }
}

/// Renders events as `tracing` log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::BatchStart {
                run_id,
                total,
                concurrency_limit,
                ..
            } => tracing::info!(%run_id, total, concurrency_limit, "batch started"),
            ProgressEvent::Started {
                run_id,
                request_id,
                model_id,
                preview,
                ..
            } => tracing::debug!(
                %run_id,
                index = request_id,
                model = %model_id,
                %preview,
                "request started"
            ),
            ProgressEvent::Complete {
                run_id,
                request_id,
                duration,
                cached,
                ..
            } => tracing::info!(%run_id, index = request_id, ?duration, cached, "request complete"),
            ProgressEvent::Failed {
                run_id,
                request_id,
                duration,
                kind,
                error,
                ..
            } => tracing::warn!(
                %run_id,
                index = request_id,
                ?duration,
                %kind,
                %error,
                "request failed"
            ),
            ProgressEvent::Canceled {
                run_id, request_id, ..
            } => tracing::info!(%run_id, index = request_id, "request canceled"),
            ProgressEvent::BatchComplete {
                run_id,
                succeeded,
                failed,
                canceled,
                elapsed,
                ..
            } => tracing::info!(%run_id, succeeded, failed, canceled, ?elapsed, "batch complete"),
        }
    }
}
