//! Google Gemini provider (generateContent API), grounded in the
//! teacher's `llm/gemini.rs` request shape, collapsed to a single
//! blocking call per spec §1.

use super::{GenerateOpts, Provider, UpstreamError};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GoogleProvider {
    client: reqwest::Client,
    api_key: String,
}

impl GoogleProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }

    async fn generate(
        &self,
        model: &str,
        body: Value,
        timeout: Option<std::time::Duration>,
    ) -> Result<GenerateContentResponse, UpstreamError> {
        let url = format!(
            "{GEMINI_BASE}/models/{model}:generateContent?key={}",
            self.api_key
        );
        let fut = self.client.post(url).json(&body).send();
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
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

fn extract_text(response: GenerateContentResponse) -> Result<String, UpstreamError> {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content.parts.into_iter().find_map(|p| p.text))
        .ok_or_else(|| UpstreamError::Other("missing candidates[0].content.parts[].text".to_string()))
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn generate_text(
        &self,
        model: &str,
        prompt: &str,
        opts: &GenerateOpts,
    ) -> Result<String, UpstreamError> {
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });
        let response = self.generate(model, body, opts.timeout).await?;
        extract_text(response)
    }

    async fn generate_structured(
        &self,
        model: &str,
        prompt: &str,
        schema: &Value,
        opts: &GenerateOpts,
    ) -> Result<Value, UpstreamError> {
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": schema,
            },
        });
        let response = self.generate(model, body, opts.timeout).await?;
        let text = extract_text(response)?;
        serde_json::from_str(&text).map_err(|_| UpstreamError::UnsupportedFormat)
    }
}
