//! `advice` tool (spec §4.6): routes to the sync engine (§4.3) or, for
//! deferred-capable providers driving a conversation, the async engine
//! (§4.4).

use super::ToolOutcome;
use crate::async_engine::{AsyncEngine, RunTurnOpts, TurnResult};
use crate::registry::ModelRegistry;
use crate::rpc::error::GatewayError;
use crate::sync_engine::{AdviceOpts, SyncEngine};
use serde_json::Value;

const DEFAULT_WAIT_TIMEOUT_MS: u64 = 30_000;

pub struct AdviceArgs {
    pub model: Option<String>,
    pub prompt: Option<String>,
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
    pub conversation_id: Option<i64>,
    pub request_id: Option<i64>,
    pub check_status: bool,
    pub temperature: Option<f32>,
    pub max_completion_tokens: Option<u32>,
    pub wait_timeout_ms: Option<u64>,
}

impl AdviceArgs {
    pub fn from_value(value: &Value) -> Self {
        Self {
            model: value.get("model").and_then(|v| v.as_str()).map(str::to_string),
            prompt: value.get("prompt").and_then(|v| v.as_str()).map(str::to_string),
            reasoning_effort: value
                .get("reasoningEffort")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            verbosity: value.get("verbosity").and_then(|v| v.as_str()).map(str::to_string),
            conversation_id: value.get("conversation_id").and_then(|v| v.as_i64()),
            request_id: value.get("request_id").and_then(|v| v.as_i64()),
            check_status: value
                .get("check_status")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            temperature: value
                .get("temperature")
                .and_then(|v| v.as_f64())
                .map(|v| v as f32),
            max_completion_tokens: value
                .get("max_completion_tokens")
                .and_then(|v| v.as_u64())
                .map(|v| v as u32),
            wait_timeout_ms: value.get("wait_timeout_ms").and_then(|v| v.as_u64()),
        }
    }
}

pub async fn run(
    registry: &ModelRegistry,
    sync_engine: &SyncEngine,
    async_engine: &AsyncEngine,
    args: AdviceArgs,
) -> Result<ToolOutcome, GatewayError> {
    // Resuming a previously-opened deferred job by id never needs a model
    // or prompt: the persisted Request already names both.
    if args.check_status {
        if let Some(request_id) = args.request_id {
            let wait_ms = args.wait_timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS);
            let result = async_engine.check_or_wait(request_id, wait_ms).await?;
            return turn_result_to_outcome(result);
        }
    }

    let model = args
        .model
        .filter(|m| !m.is_empty())
        .ok_or_else(|| GatewayError::invalid_params("model cannot be empty"))?;
    let prompt = args
        .prompt
        .filter(|p| !p.is_empty())
        .ok_or_else(|| GatewayError::invalid_params("prompt cannot be empty"))?;

    let descriptor = registry.resolve(&model)?;
    let use_async = descriptor.id.provider.supports_deferred()
        && (args.conversation_id.is_some() || args.check_status);

    if use_async {
        let params = serde_json::json!({
            "reasoningEffort": args.reasoning_effort,
            "verbosity": args.verbosity,
            "temperature": args.temperature,
            "max_completion_tokens": args.max_completion_tokens,
        });
        let opts = RunTurnOpts {
            model,
            params,
            overall_timeout_ms: args.wait_timeout_ms.unwrap_or(DEFAULT_WAIT_TIMEOUT_MS),
            ..Default::default()
        };
        let result = async_engine
            .run_turn(args.conversation_id, &prompt, opts)
            .await?;
        return turn_result_to_outcome(result);
    }

    let opts = AdviceOpts {
        reasoning_effort: args.reasoning_effort,
        verbosity: args.verbosity,
        additional_context: None,
        temperature: args.temperature,
        max_completion_tokens: args.max_completion_tokens,
        iteration: 0,
    };
    let advice = sync_engine.advise(&model, &prompt, opts).await?;

    Ok(ToolOutcome {
        text: advice.text,
        metadata: Some(serde_json::to_value(advice.meta).unwrap_or(Value::Null)),
    })
}

fn turn_result_to_outcome(result: TurnResult) -> Result<ToolOutcome, GatewayError> {
    match result {
        TurnResult::Completed { text, request_id, usage } => Ok(ToolOutcome {
            text,
            metadata: Some(serde_json::json!({
                "status": "completed",
                "request_id": request_id,
                "usage": usage,
            })),
        }),
        TurnResult::Waiting { request_id, provider_response_id } => Ok(ToolOutcome {
            text: String::new(),
            metadata: Some(serde_json::json!({
                "status": "waiting",
                "request_id": request_id,
                "provider_response_id": provider_response_id,
            })),
        }),
        TurnResult::Error { err, .. } => Err(err),
    }
}
