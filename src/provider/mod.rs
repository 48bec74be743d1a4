//! 生成能力抽象层：将具体厂商的调用封装在 trait 之后，核心只依赖此边界。
//!
//! The provider capability is the only component that talks to a backend. Wire formats,
//! authentication and retries all live behind [`Provider::generate`].

mod router;

pub use router::ProviderRouter;

use crate::types::{CanonicalRequest, FailureKind, GeneratedValue, RequestKind};
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Failure reported by a provider. Never cached.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// The provider cannot serve this request as written.
    #[error("request rejected: {message}")]
    Rejected { message: String },

    #[error("provider call failed: {message}")]
    Failed { message: String, retryable: bool },

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
    },

    /// The call observed cancellation and stopped.
    #[error("provider call canceled")]
    Canceled,
}

impl ProviderError {
    pub fn rejected(message: impl Into<String>) -> Self {
        ProviderError::Rejected {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        ProviderError::Failed {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        ProviderError::Failed {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ProviderError::Rejected { .. } => FailureKind::Validation,
            ProviderError::Failed { .. } | ProviderError::RateLimited { .. } => {
                FailureKind::Provider
            }
            ProviderError::Canceled => FailureKind::Canceled,
        }
    }

    /// Whether a caller could reasonably resubmit later.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Failed { retryable, .. } => *retryable,
            ProviderError::RateLimited { .. } => true,
            ProviderError::Rejected { .. } | ProviderError::Canceled => false,
        }
    }
}

/// Backend that turns a [`CanonicalRequest`] into a [`GeneratedValue`].
///
/// `cancel` fires when the surrounding batch is canceled. Implementations should return
/// [`ProviderError::Canceled`] promptly once it does; the engine may stop waiting for them
/// after its grace period either way.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Kinds this provider can produce. Checked before the cache is consulted.
    fn supports(&self, _kind: RequestKind) -> bool {
        true
    }

    async fn generate(
        &self,
        request: &CanonicalRequest,
        cancel: &CancellationToken,
    ) -> Result<GeneratedValue, ProviderError>;
}
