//! Prefix-based routing across several providers.
//!
//! Model ids use the `"provider/model"` form (e.g. `"openai/gpt-4o"`); the part before the first
//! `/` selects the backend. Ids without a prefix, or with an unregistered one, go to the fallback
//! when there is one.

use super::{Provider, ProviderError};
use crate::types::{CanonicalRequest, GeneratedValue, RequestKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct ProviderRouter {
    routes: HashMap<String, Arc<dyn Provider>>,
    fallback: Option<Arc<dyn Provider>>,
}

impl ProviderRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `prefix/...` model ids to `provider`. Re-registering a prefix replaces it.
    pub fn register(mut self, prefix: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.routes.insert(prefix.into(), provider);
        self
    }

    pub fn with_fallback(mut self, provider: Arc<dyn Provider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    pub fn prefixes(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        out.sort_unstable();
        out
    }

    pub fn resolve(&self, model_id: &str) -> Option<&Arc<dyn Provider>> {
        model_id
            .split_once('/')
            .and_then(|(prefix, _)| self.routes.get(prefix))
            .or(self.fallback.as_ref())
    }
}

#[async_trait]
impl Provider for ProviderRouter {
    fn name(&self) -> &str {
        "router"
    }

    fn supports(&self, kind: RequestKind) -> bool {
        self.routes
            .values()
            .chain(self.fallback.iter())
            .any(|p| p.supports(kind))
    }

    async fn generate(
        &self,
        request: &CanonicalRequest,
        cancel: &CancellationToken,
    ) -> Result<GeneratedValue, ProviderError> {
        let provider = self.resolve(request.model_id()).ok_or_else(|| {
            ProviderError::rejected(format!(
                "no provider registered for model '{}'",
                request.model_id()
            ))
        })?;
        if !provider.supports(request.kind()) {
            return Err(ProviderError::rejected(format!(
                "provider '{}' does not support {} requests",
                provider.name(),
                request.kind().as_str()
            )));
        }
        tracing::trace!(provider = provider.name(), model = request.model_id(), "routed request");
        provider.generate(request, cancel).await
    }
}
