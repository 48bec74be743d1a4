//! 进度事件模块：执行引擎产生的惰性事件流，可被零个或多个订阅者消费。
//!
//! # Progress
//!
//! The engine publishes every [`ProgressEvent`] to a [`ProgressHub`]. Consumers attach either as
//!
//! - a [`ProgressSink`], called synchronously for each event (closures qualify), or
//! - a [`ProgressStream`] obtained from [`ProgressHub::subscribe`], pulled at the consumer's pace.
//!
//! With no subscribers and no sinks, publishing is a no-op. Rendering is entirely up to the
//! consumer; [`TracingProgressSink`] is the plain log-line rendering.
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_dispatch::progress::{InMemoryProgressSink, ProgressHub};
//! use std::sync::Arc;
//!
//! let memory = Arc::new(InMemoryProgressSink::new(100));
//! let hub = ProgressHub::new(16).with_sink(memory.clone());
//! assert_eq!(hub.sink_count(), 1);
//! ```

mod sinks;

pub use sinks::{InMemoryProgressSink, NoopProgressSink, TracingProgressSink};

use crate::types::ProgressEvent;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

/// Pull-based view of the event sequence. Ends when the publishing engine is dropped.
pub type ProgressStream = Pin<Box<dyn Stream<Item = ProgressEvent> + Send>>;

/// Push-based event consumer. Called inline by the engine, so keep it cheap.
pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_event(&self, event: &ProgressEvent) {
        self(event)
    }
}

/// Fan-out point between the engine and its observers.
pub struct ProgressHub {
    sender: broadcast::Sender<ProgressEvent>,
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl ProgressHub {
    /// `capacity` bounds how far a stream subscriber may fall behind before it skips events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Events published from now on. Lagging subscribers skip what they missed.
    pub fn subscribe(&self) -> ProgressStream {
        BroadcastStream::new(self.sender.subscribe())
            .filter_map(|item| async move {
                match item {
                    Ok(event) => Some(event),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "progress subscriber lagged, events dropped");
                        None
                    }
                }
            })
            .boxed()
    }

    pub fn emit(&self, event: ProgressEvent) {
        for sink in &self.sinks {
            sink.on_event(&event);
        }
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for ProgressHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressHub")
            .field("sinks", &self.sinks.len())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}
