//! The error taxonomy (spec §7) and its mapping onto JSON-RPC error codes.

use serde::Serialize;
use serde_json::Value;

/// One entry per row of the §7 taxonomy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    ProviderError,
    ModelNotFound,
    AuthError,
    RateLimit,
}

impl ErrorKind {
    pub fn code(self) -> i64 {
        match self {
            ErrorKind::ParseError => -32700,
            ErrorKind::InvalidRequest => -32600,
            ErrorKind::MethodNotFound => -32601,
            ErrorKind::InvalidParams => -32602,
            ErrorKind::InternalError => -32603,
            ErrorKind::ProviderError => -32000,
            ErrorKind::ModelNotFound => -32001,
            ErrorKind::AuthError => -32002,
            ErrorKind::RateLimit => -32003,
        }
    }
}

/// A taxonomy error carrying the optional `data` payload the spec attaches
/// to `model-not-found` (`availableModels`/`suggestedModels`) and
/// `rate-limit` (`retryAfterMs`).
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[error("{message}")]
pub struct GatewayError {
    #[serde(skip)]
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorKind::MethodNotFound, format!("Unknown tool: {method}"))
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParams, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalError, message)
    }

    pub fn model_not_found(
        requested: &str,
        available: Vec<String>,
        suggested: Vec<String>,
    ) -> Self {
        Self::new(
            ErrorKind::ModelNotFound,
            format!("Model not found: {requested}"),
        )
        .with_data(serde_json::json!({
            "availableModels": available,
            "suggestedModels": suggested,
        }))
    }

    pub fn auth_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthError, message)
    }

    pub fn rate_limit(retry_after_ms: Option<u64>) -> Self {
        let mut err = Self::new(ErrorKind::RateLimit, "Rate limit exceeded");
        if let Some(ms) = retry_after_ms {
            err = err.with_data(serde_json::json!({ "retryAfterMs": ms }));
        }
        err
    }

    pub fn provider_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderError, message)
    }

    /// JSON-RPC error object as sent on the wire.
    pub fn to_rpc_error(&self) -> Value {
        let mut obj = serde_json::json!({
            "code": self.kind.code(),
            "message": self.message,
        });
        if let Some(data) = &self.data {
            obj["data"] = data.clone();
        }
        obj
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_taxonomy() {
        assert_eq!(ErrorKind::ParseError.code(), -32700);
        assert_eq!(ErrorKind::InvalidRequest.code(), -32600);
        assert_eq!(ErrorKind::MethodNotFound.code(), -32601);
        assert_eq!(ErrorKind::InvalidParams.code(), -32602);
        assert_eq!(ErrorKind::InternalError.code(), -32603);
        assert_eq!(ErrorKind::ProviderError.code(), -32000);
        assert_eq!(ErrorKind::ModelNotFound.code(), -32001);
        assert_eq!(ErrorKind::AuthError.code(), -32002);
        assert_eq!(ErrorKind::RateLimit.code(), -32003);
    }

    #[test]
    fn model_not_found_carries_candidates() {
        let err = GatewayError::model_not_found(
            "invalid:model",
            vec!["openai:gpt-5".to_string()],
            vec![],
        );
        let rpc = err.to_rpc_error();
        assert_eq!(rpc["data"]["availableModels"][0], "openai:gpt-5");
    }

    #[test]
    fn method_not_found_message_mentions_unknown_tool() {
        let err = GatewayError::method_not_found("nope");
        assert!(err.message.contains("Unknown tool"));
    }
}
