//! OpenAI provider: chat-completions (sync text/structured) and the
//! "responses" deferred-completion endpoint (spec §4.4), following the
//! request/response shapes the teacher's `llm/openai.rs` already uses for
//! OpenAI's chat-completions API.

use super::{DeferredStatus, GenerateOpts, Provider, UpstreamError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const OPENAI_CHAT_BASE: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_RESPONSES_BASE: &str = "https://api.openai.com/v1/responses";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    fn apply_reasoning(&self, model: &str, opts: &GenerateOpts, body: &mut serde_json::Map<String, Value>) {
        if crate::registry::ModelClass::classify(model) == crate::registry::ModelClass::Reasoning {
            if let Some(effort) = &opts.reasoning_effort {
                body.insert("reasoning_effort".to_string(), Value::String(effort.clone()));
            }
            if model.starts_with("gpt-5") {
                if let Some(verbosity) = &opts.verbosity {
                    body.insert("verbosity".to_string(), Value::String(verbosity.clone()));
                }
            }
        }
    }

    async fn send_timed(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Option<std::time::Duration>,
    ) -> Result<reqwest::Response, UpstreamError> {
        let fut = request.send();
        let response = match timeout {
            Some(d) => tokio::time::timeout(d, fut)
                .await
                .map_err(|_| UpstreamError::Timeout)?,
            None => fut.await,
        }
        .map_err(|e| UpstreamError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Http { status, body });
        }
        Ok(response)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn generate_text(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerateOpts,
    ) -> Result<String, UpstreamError> {
        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), Value::String(model.to_string()));
        body.insert(
            "messages".to_string(),
            serde_json::json!([{ "role": "user", "content": prompt }]),
        );
        if let Some(t) = opts.temperature {
            body.insert("temperature".to_string(), serde_json::json!(t));
        }
        if let Some(m) = opts.max_completion_tokens {
            body.insert("max_completion_tokens".to_string(), serde_json::json!(m));
        }
        self.apply_reasoning(model, opts, &mut body);

        let request = self
            .client
            .post(OPENAI_CHAT_BASE)
            .bearer_auth(&self.api_key)
            .json(&Value::Object(body));

        let response = self.send_timed(request, opts.timeout).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Other(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| UpstreamError::Other("missing choices[0].message.content".to_string()))
    }

    async fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        schema: &Value,
        opts: &GenerateOpts,
    ) -> Result<Value, UpstreamError> {
        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), Value::String(model.to_string()));
        body.insert(
            "messages".to_string(),
            serde_json::json!([{ "role": "user", "content": prompt }]),
        );
        body.insert(
            "response_format".to_string(),
            serde_json::json!({
                "type": "json_schema",
                "json_schema": { "name": "advice_response", "schema": schema, "strict": true }
            }),
        );
        self.apply_reasoning(model, opts, &mut body);

        let request = self
            .client
            .post(OPENAI_CHAT_BASE)
            .bearer_auth(&self.api_key)
            .json(&Value::Object(body));

        let response = self.send_timed(request, opts.timeout).await?;
        if response.status().as_u16() == 400 {
            return Err(UpstreamError::UnsupportedFormat);
        }
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Other(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| UpstreamError::Other("missing choices[0].message.content".to_string()))?;

        serde_json::from_str(&content).map_err(|_| UpstreamError::UnsupportedFormat)
    }

    fn supports_deferred(&self) -> bool {
        true
    }

    async fn start_deferred(
        &self,
        model: &str,
        input: &[Value],
        opts: &GenerateOpts,
    ) -> Result<(String, DeferredStatus), UpstreamError> {
        let mut body = serde_json::Map::new();
        body.insert("model".to_string(), Value::String(model.to_string()));
        body.insert("input".to_string(), Value::Array(input.to_vec()));
        body.insert("background".to_string(), Value::Bool(true));
        self.apply_reasoning(model, opts, &mut body);

        let request = self
            .client
            .post(OPENAI_RESPONSES_BASE)
            .bearer_auth(&self.api_key)
            .json(&Value::Object(body));

        let response = self.send_timed(request, opts.timeout).await?;
        let parsed: ResponsesPayload = response
            .json()
            .await
            .map_err(|e| UpstreamError::Other(e.to_string()))?;

        let status = deferred_status_of(&parsed);
        Ok((parsed.id, status))
    }

    async fn poll_deferred(&self, provider_response_id: &str) -> Result<DeferredStatus, UpstreamError> {
        let url = format!("{OPENAI_RESPONSES_BASE}/{provider_response_id}");
        let request = self.client.get(url).bearer_auth(&self.api_key);
        let response = self.send_timed(request, None).await?;
        let parsed: ResponsesPayload = response
            .json()
            .await
            .map_err(|e| UpstreamError::Other(e.to_string()))?;
        Ok(deferred_status_of(&parsed))
    }
}

#[derive(Deserialize)]
struct ResponsesPayload {
    id: String,
    status: String,
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    usage: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

fn deferred_status_of(payload: &ResponsesPayload) -> DeferredStatus {
    match payload.status.as_str() {
        "completed" => DeferredStatus::Completed {
            text: payload.output_text.clone().unwrap_or_default(),
            raw: serde_json::json!({ "id": payload.id, "status": payload.status }),
            usage: payload.usage.clone(),
        },
        "failed" => DeferredStatus::Failed(
            payload
                .error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "upstream job failed".to_string()),
        ),
        "cancelled" => DeferredStatus::Cancelled,
        "expired" => DeferredStatus::Expired,
        "in_progress" => DeferredStatus::InProgress,
        _ => DeferredStatus::Queued,
    }
}
