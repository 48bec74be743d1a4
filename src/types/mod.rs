//! 类型系统模块：定义请求规范化、结果与进度事件的核心数据类型。
//!
//! # Types Module
//!
//! Core data types shared by the cache, dispatcher and execution engine.
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`GenerationRequest`] | Caller-facing request with typed per-kind options |
//! | [`CanonicalRequest`] | Normalized, immutable request used for caching and dispatch |
//! | [`GeneratedValue`] | Successful result (text, image, audio or structured JSON) |
//! | [`Outcome`] | Tagged success/failure of one request |
//! | [`ProgressEvent`] | Lifecycle event emitted during execution |
//!
//! ## Submodules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`request`] | Request options, validation and canonicalization |
//! | [`outcome`] | Generated values, outcomes and the failure taxonomy |
//! | [`events`] | Progress event variants |
//!
//! ## Example
//!
//! ```rust
//! use ai_lib_dispatch::types::{GenerationOptions, GenerationRequest, TextOptions};
//!
//! let req = GenerationRequest::text("openai/gpt-4o-mini", "  Explain borrowing ")
//!     .with_options(GenerationOptions::Text(TextOptions::new().with_temperature(0.2)));
//! let canonical = req.normalize().unwrap();
//! assert_eq!(canonical.payload(), "Explain borrowing");
//! ```

pub mod events;
pub mod outcome;
pub mod request;

pub use events::{EventType, ProgressEvent};
pub use outcome::{Failure, FailureKind, GeneratedValue, MediaPayload, Outcome};
pub use request::{
    AudioFormat, AudioOptions, CanonicalRequest, GenerationOptions, GenerationRequest,
    ImageOptions, ParamValue, RequestKind, TextOptions,
};
