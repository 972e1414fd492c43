//! JSON-RPC 2.0 over newline-delimited stdio (spec §6): `initialize`,
//! `tools/list`, `tools/call`.

pub mod error;

use crate::tools::{tool_definitions, ToolRouter};
use error::{ErrorKind, GatewayError};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};

pub struct RpcServer {
    router: Arc<ToolRouter>,
}

impl RpcServer {
    pub fn new(router: Arc<ToolRouter>) -> Self {
        Self { router }
    }

    /// Reads one JSON object per line from stdin, writes one per line to
    /// stdout, until stdin closes.
    pub async fn serve_stdio(&self) -> std::io::Result<()> {
        let stdin = tokio::io::stdin();
        let stdout = tokio::io::stdout();
        let mut lines = BufReader::new(stdin).lines();
        let mut writer = BufWriter::new(stdout);

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if let Some(response) = self.handle_line(&line).await {
                let serialized = serde_json::to_string(&response).unwrap_or_default();
                writer.write_all(serialized.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }

    /// Parses one line and returns the response to write, if any. A
    /// Notification (no `id`) is never answered; a malformed line yields a
    /// Parse-Error response only if an `id` could be recovered from it,
    /// otherwise it's dropped with a diagnostic on stderr.
    async fn handle_line(&self, line: &str) -> Option<Value> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(err) => {
                eprintln!("rpc: dropping unparsable line ({err}): {line}");
                return None;
            }
        };

        let id = value.get("id").cloned().filter(|v| !v.is_null());
        let method = value.get("method").and_then(|m| m.as_str());

        let Some(method) = method else {
            return match id {
                Some(id) => Some(error_response(
                    Some(id),
                    GatewayError::parse_error("request is missing a \"method\" field"),
                )),
                None => {
                    eprintln!("rpc: dropping line with no method and no id: {line}");
                    None
                }
            };
        };

        let params = value.get("params").cloned().unwrap_or(Value::Null);
        let result = self.dispatch_method(method, &params).await;

        // A Notification (no id) is never answered, even on error.
        let id = id?;

        Some(match result {
            Ok(value) => success_response(id, value),
            Err(err) => error_response(Some(id), err),
        })
    }

    async fn dispatch_method(&self, method: &str, params: &Value) -> Result<Value, GatewayError> {
        match method {
            "initialize" => Ok(json!({
                "protocolVersion": "2024-11-05",
                "serverInfo": {
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                },
                "capabilities": { "tools": {} },
            })),
            "tools/list" => {
                let tools: Vec<Value> = tool_definitions()
                    .into_iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "inputSchema": t.input_schema,
                        })
                    })
                    .collect();
                Ok(json!({ "tools": tools }))
            }
            "tools/call" => {
                let name = params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| GatewayError::invalid_params("missing tool name"))?;
                let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
                let outcome = self.router.dispatch(name, &arguments).await?;

                let mut result = json!({
                    "content": [{ "type": "text", "text": outcome.text }],
                });
                if let Some(metadata) = outcome.metadata {
                    result["metadata"] = metadata;
                }
                Ok(result)
            }
            other => Err(GatewayError::new(
                ErrorKind::MethodNotFound,
                format!("Unknown method: {other}"),
            )),
        }
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Option<Value>, err: GatewayError) -> Value {
    json!({ "jsonrpc": "2.0", "id": id.unwrap_or(Value::Null), "error": err.to_rpc_error() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::async_engine::AsyncEngine;
    use crate::capability_cache::CapabilityCache;
    use crate::concurrency::ConcurrencyLimiter;
    use crate::registry::ModelRegistry;
    use crate::store::Store;
    use crate::sync_engine::SyncEngine;
    use std::collections::HashMap;

    async fn test_server() -> RpcServer {
        let registry = Arc::new(ModelRegistry::new(HashMap::new()));
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let limiter = Arc::new(ConcurrencyLimiter::new());
        let cache = Arc::new(CapabilityCache::new());
        let clients = HashMap::new();
        let sync_engine = Arc::new(SyncEngine::new(
            registry.clone(),
            limiter,
            cache,
            clients.clone(),
        ));
        let async_engine = Arc::new(AsyncEngine::new(store, registry.clone(), clients));
        let router = Arc::new(ToolRouter::new(registry, sync_engine, async_engine));
        RpcServer::new(router)
    }

    #[tokio::test]
    async fn unknown_tool_reports_method_not_found() {
        let server = test_server().await;
        let response = server
            .handle_line(r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"nope"},"id":1}"#)
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32601);
        assert!(response["error"]["message"].as_str().unwrap().contains("Unknown tool"));
        assert_eq!(response["id"], 1);
    }

    #[tokio::test]
    async fn empty_model_reports_invalid_params() {
        let server = test_server().await;
        let response = server
            .handle_line(
                r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"advice","arguments":{"model":"","prompt":"hi"}},"id":2}"#,
            )
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32602);
        assert!(response["error"]["message"].as_str().unwrap().contains("cannot be empty"));
    }

    #[tokio::test]
    async fn model_not_found_lists_available_models() {
        let server = test_server().await;
        let response = server
            .handle_line(
                r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"advice","arguments":{"model":"invalid:model","prompt":"test"}},"id":3}"#,
            )
            .await
            .unwrap();
        assert_eq!(response["error"]["code"], -32001);
        assert!(response["error"]["data"]["availableModels"].is_array());
    }

    #[tokio::test]
    async fn notification_is_never_answered() {
        let server = test_server().await;
        let response = server
            .handle_line(r#"{"jsonrpc":"2.0","method":"tools/list"}"#)
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn malformed_json_with_no_recoverable_id_is_dropped() {
        let server = test_server().await;
        let response = server.handle_line("not json at all").await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn tools_list_reports_all_three_tools() {
        let server = test_server().await;
        let response = server
            .handle_line(r#"{"jsonrpc":"2.0","method":"tools/list","id":4}"#)
            .await
            .unwrap();
        let tools = response["result"]["tools"].as_array().unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["models", "advice", "idiom"]);
    }
}
