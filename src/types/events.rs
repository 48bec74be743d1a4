//! Progress events emitted by the execution engine.

use crate::types::outcome::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Discriminant of a [`ProgressEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Started,
    Complete,
    Failed,
    Canceled,
    BatchStart,
    BatchComplete,
}

impl EventType {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::Complete | EventType::Failed | EventType::Canceled)
    }
}

/// Unified progress event enum.
///
/// Events of one request are ordered (`Started` precedes its terminal event); events of different
/// requests interleave arbitrarily.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ProgressEvent {
    BatchStart {
        run_id: Uuid,
        total: usize,
        concurrency_limit: usize,
        timestamp: DateTime<Utc>,
    },

    Started {
        run_id: Uuid,
        request_id: usize,
        model_id: String,
        /// First characters of the payload
        preview: String,
        timestamp: DateTime<Utc>,
    },

    Complete {
        run_id: Uuid,
        request_id: usize,
        timestamp: DateTime<Utc>,
        duration: Duration,
        /// Served from the cache without a provider call
        cached: bool,
    },

    Failed {
        run_id: Uuid,
        request_id: usize,
        timestamp: DateTime<Utc>,
        duration: Duration,
        kind: FailureKind,
        error: String,
    },

    Canceled {
        run_id: Uuid,
        request_id: usize,
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration: Option<Duration>,
    },

    BatchComplete {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
        succeeded: usize,
        failed: usize,
        canceled: usize,
        elapsed: Duration,
    },
}

impl ProgressEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            ProgressEvent::BatchStart { .. } => EventType::BatchStart,
            ProgressEvent::Started { .. } => EventType::Started,
            ProgressEvent::Complete { .. } => EventType::Complete,
            ProgressEvent::Failed { .. } => EventType::Failed,
            ProgressEvent::Canceled { .. } => EventType::Canceled,
            ProgressEvent::BatchComplete { .. } => EventType::BatchComplete,
        }
    }

    pub fn run_id(&self) -> Uuid {
        match self {
            ProgressEvent::BatchStart { run_id, .. }
            | ProgressEvent::Started { run_id, .. }
            | ProgressEvent::Complete { run_id, .. }
            | ProgressEvent::Failed { run_id, .. }
            | ProgressEvent::Canceled { run_id, .. }
            | ProgressEvent::BatchComplete { run_id, .. } => *run_id,
        }
    }

    /// Index of the request within its run, `None` for batch-level events.
    pub fn request_id(&self) -> Option<usize> {
        match self {
            ProgressEvent::Started { request_id, .. }
            | ProgressEvent::Complete { request_id, .. }
            | ProgressEvent::Failed { request_id, .. }
            | ProgressEvent::Canceled { request_id, .. } => Some(*request_id),
            ProgressEvent::BatchStart { .. } | ProgressEvent::BatchComplete { .. } => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            ProgressEvent::BatchStart { timestamp, .. }
            | ProgressEvent::Started { timestamp, .. }
            | ProgressEvent::Complete { timestamp, .. }
            | ProgressEvent::Failed { timestamp, .. }
            | ProgressEvent::Canceled { timestamp, .. }
            | ProgressEvent::BatchComplete { timestamp, .. } => *timestamp,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            ProgressEvent::Complete { duration, .. } | ProgressEvent::Failed { duration, .. } => {
                Some(*duration)
            }
            ProgressEvent::Canceled { duration, .. } => *duration,
            ProgressEvent::BatchComplete { elapsed, .. } => Some(*elapsed),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ProgressEvent::Failed { error, .. } => Some(error),
            _ => None,
        }
    }
}
