//! The structured response schema (spec §4.3 "Structured Response
//! Schema") and its JSON Schema representation sent to providers.

use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Complete,
    NeedsContext,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Code,
    Library,
    Environment,
    Error,
    Requirements,
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextNeeded {
    #[serde(rename = "type")]
    pub kind: ContextKind,
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StructuredResponse {
    pub response_type: ResponseType,
    pub response: String,
    #[serde(default)]
    pub context_needed: Option<Vec<ContextNeeded>>,
    #[serde(default)]
    pub questions: Option<Vec<String>>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// JSON Schema describing `StructuredResponse`, sent to providers for
/// both the capability probe and the real structured call.
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "response_type": {
                "type": "string",
                "enum": ["complete", "needs_context", "continue"]
            },
            "response": { "type": "string" },
            "context_needed": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "type": {
                            "type": "string",
                            "enum": ["code", "library", "environment", "error", "requirements", "other"]
                        },
                        "description": { "type": "string" }
                    },
                    "required": ["type", "description"]
                }
            },
            "questions": {
                "type": "array",
                "items": { "type": "string" }
            },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 }
        },
        "required": ["response_type", "response"]
    })
}

/// A small, cheap probe prompt — the exact wording doesn't matter, only
/// that the provider is forced to emit schema-constrained JSON.
pub fn probe_prompt() -> &'static str {
    "Respond with a single short acknowledgement."
}
