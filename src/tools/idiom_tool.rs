//! `idiom` tool (spec §4.6): asks a model for idiomatic-Rust-ecosystem
//! guidance, using the §4.3 sync path with a fixed system-prompt template
//! and its own structured schema.

use crate::sync_engine::{AdviceOpts, StructuredOrText, SyncEngine};
use crate::rpc::error::GatewayError;
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_MODEL: &str = "openai:gpt-5";

const SYSTEM_PROMPT_TEMPLATE: &str = "\
You are advising on idiomatic usage within the Rust crate ecosystem. \
Given a task and, optionally, the caller's current approach and surrounding \
context, recommend the idiomatic way to accomplish it: which crates to \
reach for, which patterns to avoid, and a short illustrative example. \
Prefer widely-used, actively maintained crates over hand-rolled alternatives.";

#[derive(Debug, Deserialize)]
struct IdiomResponse {
    approach: String,
    packages_to_use: Vec<String>,
    anti_patterns: Vec<String>,
    example_code: String,
    rationale: String,
    #[serde(default)]
    references: Option<Vec<String>>,
}

fn idiom_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "approach": { "type": "string" },
            "packages_to_use": { "type": "array", "items": { "type": "string" } },
            "anti_patterns": { "type": "array", "items": { "type": "string" } },
            "example_code": { "type": "string" },
            "rationale": { "type": "string" },
            "references": { "type": "array", "items": { "type": "string" } }
        },
        "required": ["approach", "packages_to_use", "anti_patterns", "example_code", "rationale"]
    })
}

pub struct IdiomArgs {
    pub task: String,
    pub current_approach: Option<String>,
    pub context: Option<String>,
    pub model: Option<String>,
}

pub async fn run(engine: &SyncEngine, args: IdiomArgs) -> Result<String, GatewayError> {
    if args.task.is_empty() {
        return Err(GatewayError::invalid_params("task cannot be empty"));
    }

    let model = args.model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
    let mut prompt = format!("{SYSTEM_PROMPT_TEMPLATE}\n\nTask:\n{}", args.task);
    if let Some(current) = &args.current_approach {
        prompt.push_str(&format!("\n\nCurrent approach:\n{current}"));
    }
    if let Some(context) = &args.context {
        prompt.push_str(&format!("\n\nContext:\n{context}"));
    }

    let outcome = engine
        .run_structured_or_text(&model, &prompt, &idiom_schema(), AdviceOpts::default())
        .await?;

    Ok(match outcome {
        StructuredOrText::Structured(value) => {
            let parsed: IdiomResponse = serde_json::from_value(value)
                .map_err(|_| GatewayError::provider_error("malformed idiom response"))?;
            render_markdown(&parsed)
        }
        StructuredOrText::Text(text) => text,
        StructuredOrText::MaxIterations => {
            "Max iterations reached; returning without calling upstream.".to_string()
        }
    })
}

fn render_markdown(parsed: &IdiomResponse) -> String {
    let mut out = String::new();
    out.push_str(&format!("## Approach\n{}\n\n", parsed.approach));

    out.push_str("## Packages to use\n");
    for pkg in &parsed.packages_to_use {
        out.push_str(&format!("- `{pkg}`\n"));
    }
    out.push('\n');

    out.push_str("## Anti-patterns\n");
    for anti in &parsed.anti_patterns {
        out.push_str(&format!("- {anti}\n"));
    }
    out.push('\n');

    out.push_str(&format!("## Example\n```rust\n{}\n```\n\n", parsed.example_code));
    out.push_str(&format!("## Rationale\n{}\n", parsed.rationale));

    if let Some(references) = &parsed.references {
        out.push_str("\n## References\n");
        for reference in references {
            out.push_str(&format!("- {reference}\n"));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_all_sections() {
        let parsed = IdiomResponse {
            approach: "use a builder".to_string(),
            packages_to_use: vec!["serde".to_string()],
            anti_patterns: vec!["manual string parsing".to_string()],
            example_code: "let x = 1;".to_string(),
            rationale: "because it composes".to_string(),
            references: Some(vec!["https://serde.rs".to_string()]),
        };
        let markdown = render_markdown(&parsed);
        assert!(markdown.contains("## Approach"));
        assert!(markdown.contains("`serde`"));
        assert!(markdown.contains("## References"));
    }
}
