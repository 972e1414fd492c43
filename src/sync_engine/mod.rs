//! Sync Engine — single-shot advice (spec §4.3).

pub mod retry;
pub mod schema;

use crate::capability_cache::{CapabilityCache, Lookup};
use crate::concurrency::ConcurrencyLimiter;
use crate::providers::{GenerateOpts, Provider as ProviderClient, UpstreamError};
use crate::registry::{ModelClass, ModelRegistry, Provider};
use crate::rpc::error::GatewayError;
use schema::{response_schema, probe_prompt, StructuredResponse};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const MAX_ITERATIONS: u32 = 3;

#[derive(Debug, Clone, Default)]
pub struct AdviceOpts {
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
    pub additional_context: Option<String>,
    pub temperature: Option<f32>,
    pub max_completion_tokens: Option<u32>,
    pub iteration: u32,
}

impl AdviceOpts {
    pub fn iteration_or_default(&self) -> u32 {
        if self.iteration == 0 {
            1
        } else {
            self.iteration
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AdviceMeta {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_request: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_mode: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct AdviceResult {
    pub text: String,
    pub meta: AdviceMeta,
}

/// The raw outcome of `run_structured_or_text`, before a caller decides
/// how to interpret the JSON it asked for.
#[derive(Debug, Clone)]
pub enum StructuredOrText {
    Structured(serde_json::Value),
    Text(String),
    MaxIterations,
}

pub struct SyncEngine {
    registry: Arc<ModelRegistry>,
    limiter: Arc<ConcurrencyLimiter>,
    cache: Arc<CapabilityCache>,
    clients: HashMap<Provider, Arc<dyn ProviderClient>>,
}

impl SyncEngine {
    pub fn new(
        registry: Arc<ModelRegistry>,
        limiter: Arc<ConcurrencyLimiter>,
        cache: Arc<CapabilityCache>,
        clients: HashMap<Provider, Arc<dyn ProviderClient>>,
    ) -> Self {
        Self {
            registry,
            limiter,
            cache,
            clients,
        }
    }

    fn client_for(&self, provider: Provider) -> Result<&Arc<dyn ProviderClient>, GatewayError> {
        self.clients
            .get(&provider)
            .ok_or_else(|| GatewayError::internal(format!("no client for provider {provider}")))
    }

    pub async fn advise(
        &self,
        model_id: &str,
        prompt: &str,
        opts: AdviceOpts,
    ) -> Result<AdviceResult, GatewayError> {
        match self.run_structured_or_text(model_id, prompt, &response_schema(), opts).await? {
            StructuredOrText::Structured(value) => {
                let parsed: StructuredResponse = serde_json::from_value(value)
                    .map_err(|_| GatewayError::provider_error("malformed structured response"))?;
                Ok(structured_to_result(parsed))
            }
            StructuredOrText::Text(text) => Ok(AdviceResult {
                text,
                meta: AdviceMeta {
                    status: "complete".to_string(),
                    confidence: None,
                    context_request: None,
                    fallback_mode: Some(true),
                },
            }),
            StructuredOrText::MaxIterations => Ok(AdviceResult {
                text: "Max iterations reached; returning without calling upstream.".to_string(),
                meta: AdviceMeta {
                    status: "complete".to_string(),
                    confidence: None,
                    context_request: None,
                    fallback_mode: Some(true),
                },
            }),
        }
    }

    /// The §4.3 algorithm, parametrized over the schema sent upstream:
    /// capability probing, class-based timeouts, retries, and
    /// provider-scoped concurrency, independent of how the caller
    /// interprets the resulting JSON. Shared by `advise` (the `advice`
    /// tool's own schema) and the `idiom` tool (its own schema).
    pub async fn run_structured_or_text(
        &self,
        model_id: &str,
        prompt: &str,
        schema: &Value,
        opts: AdviceOpts,
    ) -> Result<StructuredOrText, GatewayError> {
        if prompt.is_empty() {
            return Err(GatewayError::invalid_params("prompt cannot be empty"));
        }
        if model_id.is_empty() {
            return Err(GatewayError::invalid_params("model cannot be empty"));
        }

        let descriptor = self.registry.resolve(model_id)?;
        let iteration = opts.iteration_or_default();
        if iteration > MAX_ITERATIONS {
            return Ok(StructuredOrText::MaxIterations);
        }

        let class = descriptor.class();
        let (probe_ms, structured_ms, overall_ms) = class.timeouts_ms();

        let full_prompt = match &opts.additional_context {
            Some(ctx) if !ctx.is_empty() => {
                format!("{prompt}\n\nAdditional Context Provided:\n{ctx}")
            }
            _ => prompt.to_string(),
        };

        let reasoning_effort = if descriptor.reasoning {
            opts.reasoning_effort
                .clone()
                .or_else(|| descriptor.defaults.reasoning_effort.map(|e| format!("{e:?}").to_lowercase()))
        } else {
            None
        };
        let verbosity = opts.verbosity.clone().or_else(|| {
            descriptor
                .defaults
                .verbosity
                .map(|v| format!("{v:?}").to_lowercase())
        });

        let provider = descriptor.id.provider;
        let client = self.client_for(provider)?.clone();

        let _permit = self.limiter.acquire(provider).await;

        let supports_structured = self
            .determine_structured_support(&client, model_id, descriptor.structured_output, class, probe_ms)
            .await;

        if supports_structured {
            let opts_struct = GenerateOpts {
                reasoning_effort: reasoning_effort.clone(),
                verbosity: verbosity.clone(),
                temperature: opts.temperature,
                max_completion_tokens: opts.max_completion_tokens,
                timeout: Some(Duration::from_millis(structured_ms)),
            };

            let structured_result = retry::with_retry(|| {
                client.generate_structured(&descriptor.id.name, &full_prompt, schema, &opts_struct)
            })
            .await;

            match structured_result {
                Ok(value) => return Ok(StructuredOrText::Structured(value)),
                Err(UpstreamError::UnsupportedFormat) | Err(UpstreamError::Timeout) => {
                    self.cache.invalidate_to_false(model_id).await;
                    // fall through to text mode for this call only
                }
                Err(err) => return Err(map_upstream_error(err)),
            }
        }

        let opts_text = GenerateOpts {
            reasoning_effort,
            verbosity,
            temperature: opts.temperature,
            max_completion_tokens: opts.max_completion_tokens,
            timeout: Some(Duration::from_millis(overall_ms)),
        };

        let text = retry::with_retry(|| client.generate_text(&descriptor.id.name, &full_prompt, &opts_text))
            .await
            .map_err(map_upstream_error)?;

        Ok(StructuredOrText::Text(text))
    }

    /// Step 4: consult the cache; probe at most once per model id, with
    /// any in-flight probe shared across concurrent callers.
    async fn determine_structured_support(
        &self,
        client: &Arc<dyn ProviderClient>,
        model_id: &str,
        static_default: bool,
        class: ModelClass,
        probe_timeout_ms: u64,
    ) -> bool {
        loop {
            match self.cache.lookup(model_id).await {
                Lookup::Cached(value) => return value,
                Lookup::BecomeProbeOwner => {
                    let model_name = model_id.split_once(':').map(|(_, n)| n).unwrap_or(model_id);
                    let opts = GenerateOpts {
                        timeout: Some(Duration::from_millis(probe_timeout_ms)),
                        ..Default::default()
                    };
                    let result = client
                        .generate_structured(model_name, probe_prompt(), &response_schema(), &opts)
                        .await;
                    let _ = class; // class reserved for future per-class probe tuning
                    let value = result.is_ok();
                    self.cache.resolve_probe(model_id, value).await;
                    return if value { true } else { static_default };
                }
                Lookup::WaitForProbe(notify) => {
                    notify.notified().await;
                    continue;
                }
            }
        }
    }
}

fn structured_to_result(parsed: StructuredResponse) -> AdviceResult {
    use schema::ResponseType::*;
    let status = match parsed.response_type {
        Complete => "complete",
        NeedsContext => "needs_context",
        Continue => "continue",
    };
    let context_request = parsed
        .context_needed
        .map(|items| {
            serde_json::json!(items
                .iter()
                .map(|c| serde_json::json!({
                    "type": format!("{:?}", c.kind).to_lowercase(),
                    "description": c.description,
                }))
                .collect::<Vec<_>>())
        });
    AdviceResult {
        text: parsed.response,
        meta: AdviceMeta {
            status: status.to_string(),
            confidence: parsed.confidence,
            context_request,
            fallback_mode: None,
        },
    }
}

fn map_upstream_error(err: UpstreamError) -> GatewayError {
    match err {
        UpstreamError::Http { status: 401, .. } => GatewayError::auth_error("upstream authentication failed"),
        UpstreamError::Http { status, body } if status == 429 => {
            GatewayError::rate_limit(parse_retry_after(&body))
        }
        UpstreamError::Http { status, body } => {
            GatewayError::provider_error(format!("upstream HTTP {status}: {body}"))
        }
        UpstreamError::Timeout => GatewayError::provider_error("request timed out"),
        UpstreamError::Network(msg) => GatewayError::provider_error(msg),
        UpstreamError::UnsupportedFormat => {
            GatewayError::provider_error("upstream does not support structured output")
        }
        UpstreamError::Other(msg) => GatewayError::provider_error(msg),
    }
}

fn parse_retry_after(_body: &str) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProviderBinding;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn iteration_default_is_one() {
        let opts = AdviceOpts::default();
        assert_eq!(opts.iteration_or_default(), 1);
    }

    #[test]
    fn iteration_four_would_short_circuit() {
        assert!(4 > MAX_ITERATIONS);
    }

    /// A `Provider` double distinguishing the capability probe (its prompt
    /// is always `probe_prompt()`) from the real structured call, so tests
    /// can drive the probe and the call it gates independently.
    struct FakeProvider {
        probe_supported: bool,
        structured_fails: bool,
        text_response: String,
        probe_calls: AtomicUsize,
        structured_calls: AtomicUsize,
        text_calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(probe_supported: bool, structured_fails: bool) -> Self {
            Self {
                probe_supported,
                structured_fails,
                text_response: "fallback text reply".to_string(),
                probe_calls: AtomicUsize::new(0),
                structured_calls: AtomicUsize::new(0),
                text_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProviderClient for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn generate_text(&self, _model: &str, _prompt: &str, _opts: &GenerateOpts) -> Result<String, UpstreamError> {
            self.text_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.text_response.clone())
        }

        async fn generate_structured(
            &self,
            _model: &str,
            prompt: &str,
            _schema: &Value,
            _opts: &GenerateOpts,
        ) -> Result<Value, UpstreamError> {
            if prompt == probe_prompt() {
                self.probe_calls.fetch_add(1, Ordering::SeqCst);
                // A real probe call would be quick but not instant;
                // give a concurrent caller a chance to observe the
                // in-flight slot before this one resolves it.
                tokio::time::sleep(Duration::from_millis(30)).await;
                if self.probe_supported {
                    Ok(serde_json::json!({ "response_type": "complete", "response": "ack" }))
                } else {
                    Err(UpstreamError::UnsupportedFormat)
                }
            } else {
                self.structured_calls.fetch_add(1, Ordering::SeqCst);
                if self.structured_fails {
                    Err(UpstreamError::UnsupportedFormat)
                } else {
                    Ok(serde_json::json!({ "response_type": "complete", "response": "structured ok" }))
                }
            }
        }
    }

    fn engine_with(provider: Arc<FakeProvider>) -> SyncEngine {
        let mut bindings = HashMap::new();
        bindings.insert(
            Provider::Openai,
            ProviderBinding {
                provider: Provider::Openai,
                api_key: "key".to_string(),
                base_url: None,
            },
        );
        let registry = Arc::new(ModelRegistry::new(bindings));
        let limiter = Arc::new(ConcurrencyLimiter::new());
        let cache = Arc::new(CapabilityCache::new());
        let mut clients: HashMap<Provider, Arc<dyn ProviderClient>> = HashMap::new();
        clients.insert(Provider::Openai, provider);
        SyncEngine::new(registry, limiter, cache, clients)
    }

    #[tokio::test]
    async fn structured_call_falls_back_to_text_on_unsupported_format() {
        let provider = Arc::new(FakeProvider::new(true, true));
        let engine = engine_with(provider.clone());

        let result = engine
            .run_structured_or_text("openai:gpt-5", "what should I use", &response_schema(), AdviceOpts::default())
            .await
            .unwrap();

        match result {
            StructuredOrText::Text(text) => assert_eq!(text, "fallback text reply"),
            other => panic!("expected a text fallback, got {other:?}"),
        }
        assert_eq!(provider.probe_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.structured_calls.load(Ordering::SeqCst), 1);
        assert_eq!(provider.text_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn structured_call_succeeds_when_provider_supports_it() {
        let provider = Arc::new(FakeProvider::new(true, false));
        let engine = engine_with(provider.clone());

        let result = engine
            .run_structured_or_text("openai:gpt-5", "what should I use", &response_schema(), AdviceOpts::default())
            .await
            .unwrap();

        assert!(matches!(result, StructuredOrText::Structured(_)));
        assert_eq!(provider.text_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_single_probe() {
        let provider = Arc::new(FakeProvider::new(true, false));
        let engine = Arc::new(engine_with(provider.clone()));

        let first_engine = engine.clone();
        let second_engine = engine.clone();
        let (first, second) = tokio::join!(
            first_engine.run_structured_or_text(
                "openai:gpt-5",
                "first caller prompt",
                &response_schema(),
                AdviceOpts::default(),
            ),
            second_engine.run_structured_or_text(
                "openai:gpt-5",
                "second caller prompt",
                &response_schema(),
                AdviceOpts::default(),
            ),
        );

        assert!(matches!(first.unwrap(), StructuredOrText::Structured(_)));
        assert!(matches!(second.unwrap(), StructuredOrText::Structured(_)));
        assert_eq!(
            provider.probe_calls.load(Ordering::SeqCst),
            1,
            "only one of the two concurrent callers should have probed"
        );
        assert_eq!(provider.structured_calls.load(Ordering::SeqCst), 2);
    }
}
