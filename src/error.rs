use crate::cache::CacheError;
use crate::provider::ProviderError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error
    /// (e.g., "options.temperature", "engine.max_concurrency")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Source of the error (e.g., "normalize", "dispatcher", "provider:openai")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.field_path.is_none() && self.details.is_none() && self.source.is_none()
    }
}

impl std::fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_context(self))
    }
}

/// Unified error type for the dispatch runtime.
///
/// Per-request failures never surface as this type across a batch boundary; they are folded into
/// [`crate::Outcome::Failure`]. `Error` is what construction, configuration and direct cache
/// administration return.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::runtime_with_context(msg, ErrorContext::new())
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Plain message without the context suffix.
    pub fn message(&self) -> String {
        match self {
            Error::Configuration { message, .. }
            | Error::Validation { message, .. }
            | Error::Runtime { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = Error::validation_with_context(
            "temperature out of range",
            ErrorContext::new()
                .with_field_path("options.temperature")
                .with_details("expected 0..=2, got 3.5"),
        );
        let s = err.to_string();
        assert!(s.starts_with("Validation error: temperature out of range"));
        assert!(s.contains("field: options.temperature"));
        assert!(s.contains("details: expected 0..=2, got 3.5"));
        assert_eq!(err.message(), "temperature out of range");
    }

    #[test]
    fn test_display_without_context() {
        let err = Error::runtime("batch canceled");
        assert_eq!(err.to_string(), "Runtime error: batch canceled");
        assert!(err.context().is_some_and(|c| c.is_empty()));
    }
}
