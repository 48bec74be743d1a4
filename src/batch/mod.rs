//! 批量执行模块：在并发上限内调度请求，保持输出顺序并隔离单项失败。
//!
//! # Batch Execution
//!
//! [`ExecutionEngine`] runs one request or an ordered batch of requests through the
//! [`Dispatcher`](crate::dispatcher::Dispatcher).
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ExecutionEngine`] | Single-request and batch execution with progress events |
//! | [`EngineBuilder`] | Wires cache, provider, config and progress sinks |
//! | [`AdmissionGate`] | FIFO counting gate bounding in-flight requests |
//! | [`CancelHandle`] | Cooperative cancellation signal |
//! | [`BatchReport`] | Positional outcomes plus a [`BatchSummary`] |
//!
//! ## Guarantees
//!
//! - Outcome *i* belongs to request *i*, whatever order they finish in.
//! - No more than `concurrency_limit` requests are between `started` and their terminal event.
//! - A failure stays in its own slot; the rest of the batch keeps going.
//! - After cancellation nothing new reaches the provider. Requests that did not finish get
//!   `Failure(kind = canceled)`, and the report is flagged `canceled`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ai_lib_dispatch::batch::ExecutionEngine;
//! use ai_lib_dispatch::provider::Provider;
//! use ai_lib_dispatch::types::GenerationRequest;
//! use std::sync::Arc;
//!
//! # async fn demo(provider: Arc<dyn Provider>) -> ai_lib_dispatch::Result<()> {
//! let engine = ExecutionEngine::builder().provider(provider).build()?;
//! let requests = vec![
//!     GenerationRequest::text("openai/gpt-4o-mini", "a"),
//!     GenerationRequest::text("openai/gpt-4o-mini", "b"),
//! ];
//! let report = engine.run_requests(requests, Some(2)).await;
//! for outcome in report.into_result()? {
//!     println!("{:?}", outcome);
//! }
//! # Ok(())
//! # }
//! ```

mod cancel;
mod executor;
mod gate;
mod report;

pub use cancel::CancelHandle;
pub use executor::{EngineBuilder, ExecutionEngine};
pub use gate::{Admission, AdmissionGate, InflightSnapshot};
pub use report::{BatchReport, BatchSummary};
