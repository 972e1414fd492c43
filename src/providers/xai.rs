//! xAI (Grok) provider — uses an OpenAI-compatible chat-completions
//! surface, so it is grounded in the same request/response shapes as
//! `providers::openai` with no reasoning/verbosity options and no
//! deferred endpoint.

use super::{GenerateOpts, Provider, UpstreamError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

const XAI_BASE: &str = "https://api.x.ai/v1/chat/completions";

pub struct XaiProvider {
    client: reqwest::Client,
    api_key: String,
}

impl XaiProvider {
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
    ) -> Result<ChatResponse, UpstreamError> {
        let fut = self
            .client
            .post(XAI_BASE)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send();
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

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Provider for XaiProvider {
    fn name(&self) -> &'static str {
        "xai"
    }

    async fn generate_text(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerateOpts,
    ) -> Result<String, UpstreamError> {
        let mut body = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(t) = opts.temperature {
            body["temperature"] = serde_json::json!(t);
        }
        let response = self.send(body, opts.timeout).await?;
        response
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
        let body = serde_json::json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": "advice_response", "schema": schema, "strict": true }
            },
        });
        let response = self.send(body, opts.timeout).await?;
        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| UpstreamError::Other("missing choices[0].message.content".to_string()))?;
        serde_json::from_str(&text).map_err(|_| UpstreamError::UnsupportedFormat)
    }
}
