//! Generated values and per-request outcomes.

use crate::{Error, ErrorContext};
use base64::Engine as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Binary media produced by image or audio generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub mime_type: String,
    #[serde(serialize_with = "encode_base64", deserialize_with = "decode_base64")]
    pub data: Vec<u8>,
}

impl MediaPayload {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

fn encode_base64<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(data))
}

fn decode_base64<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    let raw = String::deserialize(d)?;
    base64::engine::general_purpose::STANDARD
        .decode(raw.as_bytes())
        .map_err(serde::de::Error::custom)
}

/// A successful provider result, in the form stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GeneratedValue {
    Text(String),
    Image(MediaPayload),
    Audio(MediaPayload),
    Structured(serde_json::Value),
}

impl GeneratedValue {
    pub fn text(s: impl Into<String>) -> Self {
        GeneratedValue::Text(s.into())
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            GeneratedValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for GeneratedValue {
    fn from(s: String) -> Self {
        GeneratedValue::Text(s)
    }
}

impl From<&str> for GeneratedValue {
    fn from(s: &str) -> Self {
        GeneratedValue::Text(s.to_string())
    }
}

/// Failure taxonomy for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed or unsupported request; fix it, do not resubmit as-is.
    #[serde(rename = "validation_error")]
    Validation,
    /// Provider capability failed (rate limit, API fault).
    #[serde(rename = "provider_error")]
    Provider,
    /// Cache store unavailable.
    #[serde(rename = "cache_error")]
    Cache,
    /// Batch canceled before this request completed.
    Canceled,
}

impl FailureKind {
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::Provider => "provider_error",
            Self::Cache => "cache_error",
            Self::Canceled => "canceled",
        }
    }

    /// Whether resubmitting the same request unchanged may succeed.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(self, Self::Provider | Self::Cache | Self::Canceled)
    }

    /// Failures are never written to the cache.
    #[inline]
    pub fn cacheable(&self) -> bool {
        false
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "ErrorContext::is_empty")]
    pub context: ErrorContext,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    pub fn provider(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Provider, message)
    }

    pub fn canceled() -> Self {
        Self::new(FailureKind::Canceled, "request canceled before completion")
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}{}", self.kind, self.message, self.context)
    }
}

impl From<Error> for Failure {
    fn from(err: Error) -> Self {
        let kind = match &err {
            Error::Validation { .. } | Error::Configuration { .. } => FailureKind::Validation,
            Error::Cache(_) | Error::Io(_) => FailureKind::Cache,
            Error::Provider(p) => p.failure_kind(),
            _ => FailureKind::Provider,
        };
        let context = err.context().cloned().unwrap_or_default();
        Failure {
            kind,
            message: err.message(),
            context,
        }
    }
}

/// Result of attempting exactly one request. There are no partial outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum Outcome {
    Success(GeneratedValue),
    Failure(Failure),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn value(&self) -> Option<&GeneratedValue> {
        match self {
            Outcome::Success(v) => Some(v),
            Outcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(f) => Some(f),
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure().map(|f| f.kind)
    }

    pub fn is_canceled(&self) -> bool {
        self.failure_kind() == Some(FailureKind::Canceled)
    }

    pub fn into_result(self) -> std::result::Result<GeneratedValue, Failure> {
        match self {
            Outcome::Success(v) => Ok(v),
            Outcome::Failure(f) => Err(f),
        }
    }
}

impl From<std::result::Result<GeneratedValue, Failure>> for Outcome {
    fn from(r: std::result::Result<GeneratedValue, Failure>) -> Self {
        match r {
            Ok(v) => Outcome::Success(v),
            Err(f) => Outcome::Failure(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_payload_is_base64_on_the_wire() {
        let value = GeneratedValue::Image(MediaPayload::new("image/png", vec![0u8, 159, 146, 150]));
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json["type"], "image");
        assert_eq!(json["data"]["data"], "AJ+Slg==");
        let back: GeneratedValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_failure_kind_names() {
        assert_eq!(FailureKind::Validation.name(), "validation_error");
        assert_eq!(
            serde_json::to_string(&FailureKind::Provider).unwrap(),
            "\"provider_error\""
        );
        assert_eq!(serde_json::to_string(&FailureKind::Canceled).unwrap(), "\"canceled\"");
        assert!(!FailureKind::Validation.retryable());
        assert!(FailureKind::Provider.retryable());
        assert!(!FailureKind::Provider.cacheable());
    }

    #[test]
    fn test_failure_from_validation_error_keeps_context() {
        let err = Error::validation_with_context(
            "payload must not be empty",
            ErrorContext::new().with_field_path("payload"),
        );
        let failure = Failure::from(err);
        assert_eq!(failure.kind, FailureKind::Validation);
        assert_eq!(failure.message, "payload must not be empty");
        assert_eq!(failure.context.field_path.as_deref(), Some("payload"));
        assert_eq!(
            failure.to_string(),
            "validation_error: payload must not be empty (field: payload)"
        );
    }

    #[test]
    fn test_outcome_accessors() {
        let ok = Outcome::Success("A".into());
        assert!(ok.is_success());
        assert_eq!(ok.value().and_then(|v| v.as_text()), Some("A"));
        let canceled = Outcome::Failure(Failure::canceled());
        assert!(canceled.is_canceled());
        assert!(canceled.into_result().is_err());
    }
}
