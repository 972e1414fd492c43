//! Provider HTTP clients — assumed-external collaborators per spec §1,
//! modeled here as a small tagged trait so the rest of the engine depends
//! only on `generateText`/`generateStructured`/deferred-job primitives.

#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "google")]
pub mod google;
#[cfg(feature = "anthropic")]
pub mod anthropic;
#[cfg(feature = "xai")]
pub mod xai;

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Options threaded through to a provider call (spec §4.3 step 1-2).
#[derive(Debug, Clone, Default)]
pub struct GenerateOpts {
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
    pub temperature: Option<f32>,
    pub max_completion_tokens: Option<u32>,
    pub timeout: Option<Duration>,
}

/// Transport/HTTP-level failure, independent of the JSON-RPC taxonomy —
/// `sync_engine`/`async_engine` map these onto `GatewayError` (spec §7).
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("unsupported structured output format")]
    UnsupportedFormat,
    #[error("{0}")]
    Other(String),
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::Http { status, .. } if *status == 429 || (500..600).contains(status)
        )
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        None
    }
}

/// A completed or in-flight deferred job, as surfaced by a provider that
/// implements spec §4.4's "deferred-completion endpoint".
#[derive(Debug, Clone)]
pub enum DeferredStatus {
    Queued,
    InProgress,
    Completed {
        text: String,
        raw: Value,
        usage: Option<Value>,
    },
    Failed(String),
    Cancelled,
    Expired,
}

/// Unified interface for LLM providers (OpenAI, Google, Anthropic, xAI).
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Plain text-generation call.
    async fn generate_text(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerateOpts,
    ) -> Result<String, UpstreamError>;

    /// Schema-constrained call; `schema` is a JSON Schema object.
    async fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        schema: &Value,
        opts: &GenerateOpts,
    ) -> Result<Value, UpstreamError>;

    /// True for providers offering a deferred-completion endpoint
    /// (OpenAI's "responses" API today — spec §4.4).
    fn supports_deferred(&self) -> bool {
        false
    }

    /// Open a deferred job; returns the provider-assigned response id.
    async fn start_deferred(
        &self,
        _model: &str,
        _input: &[Value],
        _opts: &GenerateOpts,
    ) -> Result<(String, DeferredStatus), UpstreamError> {
        Err(UpstreamError::Other(
            "provider does not support deferred completion".to_string(),
        ))
    }

    /// Poll a previously opened deferred job.
    async fn poll_deferred(&self, _provider_response_id: &str) -> Result<DeferredStatus, UpstreamError> {
        Err(UpstreamError::Other(
            "provider does not support deferred completion".to_string(),
        ))
    }
}

/// Builds the provider client for a binding, once, at registry-construction
/// time (spec §4.1 "Provider Binding ... created once at startup").
pub fn build(binding: &crate::registry::ProviderBinding) -> std::sync::Arc<dyn Provider> {
    match binding.provider {
        #[cfg(feature = "openai")]
        crate::registry::Provider::Openai => {
            std::sync::Arc::new(openai::OpenAiProvider::new(binding.api_key.clone()))
        }
        #[cfg(feature = "google")]
        crate::registry::Provider::Google => {
            std::sync::Arc::new(google::GoogleProvider::new(binding.api_key.clone()))
        }
        #[cfg(feature = "anthropic")]
        crate::registry::Provider::Anthropic => {
            std::sync::Arc::new(anthropic::AnthropicProvider::new(binding.api_key.clone()))
        }
        #[cfg(feature = "xai")]
        crate::registry::Provider::Xai => {
            std::sync::Arc::new(xai::XaiProvider::new(binding.api_key.clone()))
        }
        #[allow(unreachable_patterns)]
        _ => panic!("no client compiled in for provider {:?}", binding.provider),
    }
}
