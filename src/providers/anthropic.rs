//! Anthropic provider (messages API), grounded in the teacher's
//! `llm/anthropic.rs` request shape but collapsed to a single blocking
//! call per spec §1 (no client-facing streaming).

use super::{GenerateOpts, Provider, UpstreamError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const ANTHROPIC_BASE: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    async fn send(
        &self,
        body: Value,
        timeout: Option<std::time::Duration>,
    ) -> Result<MessagesResponse, UpstreamError> {
        let request = self
            .client
            .post(ANTHROPIC_BASE)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);

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

        response
            .json()
            .await
            .map_err(|e| UpstreamError::Other(e.to_string()))
    }
}

#[derive(Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn generate_text(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerateOpts,
    ) -> Result<String, UpstreamError> {
        let body = serde_json::json!({
            "model": model,
            "max_tokens": opts.max_completion_tokens.unwrap_or(4096),
            "messages": [AnthropicMessage { role: "user", content: prompt }],
        });
        let parsed = self.send(body, opts.timeout).await?;
        parsed
            .content
            .into_iter()
            .find_map(|b| b.text)
            .ok_or_else(|| UpstreamError::Other("missing content[].text".to_string()))
    }

    async fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        schema: &Value,
        opts: &GenerateOpts,
    ) -> Result<Value, UpstreamError> {
        let augmented = format!(
            "{prompt}\n\nRespond with JSON only, matching this schema:\n{schema}"
        );
        let body = serde_json::json!({
            "model": model,
            "max_tokens": opts.max_completion_tokens.unwrap_or(4096),
            "messages": [AnthropicMessage { role: "user", content: &augmented }],
        });
        let parsed = self.send(body, opts.timeout).await?;
        let text = parsed
            .content
            .into_iter()
            .find_map(|b| b.text)
            .ok_or_else(|| UpstreamError::Other("missing content[].text".to_string()))?;
        serde_json::from_str(&text).map_err(|_| UpstreamError::UnsupportedFormat)
    }
}
