//! Tool Router (spec §4.6): the three logical tools exposed to the RPC
//! dispatcher — `models`, `advice`, `idiom`.

pub mod advice_tool;
pub mod idiom_tool;
pub mod models_tool;

use crate::async_engine::AsyncEngine;
use crate::registry::ModelRegistry;
use crate::rpc::error::GatewayError;
use crate::sync_engine::SyncEngine;
use serde_json::{json, Value};
use std::sync::Arc;

/// A tool handler's result before it is wrapped in the RPC `content[0].text`
/// envelope (spec §6 "Tool inventory").
pub struct ToolOutcome {
    pub text: String,
    pub metadata: Option<Value>,
}

/// One entry of `tools/list`.
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "models",
            description: "List available language models, optionally with detailed per-provider status.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "detailed": { "type": "boolean" }
                }
            }),
        },
        ToolDefinition {
            name: "advice",
            description: "Ask a language model for advice on a prompt, synchronously or via a polled conversation.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "model": { "type": "string" },
                    "prompt": { "type": "string" },
                    "reasoningEffort": { "type": "string" },
                    "verbosity": { "type": "string" },
                    "conversation_id": { "type": "integer" },
                    "request_id": { "type": "integer" },
                    "check_status": { "type": "boolean" },
                    "temperature": { "type": "number" },
                    "max_completion_tokens": { "type": "integer" },
                    "wait_timeout_ms": { "type": "integer" }
                }
            }),
        },
        ToolDefinition {
            name: "idiom",
            description: "Ask for idiomatic Rust ecosystem guidance on a task.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "task": { "type": "string" },
                    "current_approach": { "type": "string" },
                    "context": { "type": "string" },
                    "model": { "type": "string" }
                },
                "required": ["task"]
            }),
        },
    ]
}

pub struct ToolRouter {
    registry: Arc<ModelRegistry>,
    sync_engine: Arc<SyncEngine>,
    async_engine: Arc<AsyncEngine>,
}

impl ToolRouter {
    pub fn new(
        registry: Arc<ModelRegistry>,
        sync_engine: Arc<SyncEngine>,
        async_engine: Arc<AsyncEngine>,
    ) -> Self {
        Self {
            registry,
            sync_engine,
            async_engine,
        }
    }

    pub async fn dispatch(&self, name: &str, arguments: &Value) -> Result<ToolOutcome, GatewayError> {
        match name {
            "models" => {
                let detailed = arguments
                    .get("detailed")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let value = models_tool::run(&self.registry, detailed);
                Ok(ToolOutcome {
                    text: serde_json::to_string_pretty(&value).unwrap_or_default(),
                    metadata: None,
                })
            }
            "advice" => {
                let args = advice_tool::AdviceArgs::from_value(arguments);
                advice_tool::run(&self.registry, &self.sync_engine, &self.async_engine, args).await
            }
            "idiom" => {
                let args = idiom_tool::IdiomArgs {
                    task: arguments
                        .get("task")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    current_approach: arguments
                        .get("current_approach")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    context: arguments.get("context").and_then(|v| v.as_str()).map(str::to_string),
                    model: arguments.get("model").and_then(|v| v.as_str()).map(str::to_string),
                };
                let text = idiom_tool::run(&self.sync_engine, args).await?;
                Ok(ToolOutcome { text, metadata: None })
            }
            other => Err(GatewayError::method_not_found(other)),
        }
    }
}
