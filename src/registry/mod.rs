//! Model Registry + Provider Binding (spec §4.1).

pub mod descriptor;

pub use descriptor::{
    InvalidModelId, ModelCapabilities, ModelClass, ModelDefaults, ModelDescriptor, ModelId,
    Provider, ReasoningEffort, Verbosity,
};

use crate::rpc::error::GatewayError;
use std::collections::HashMap;

/// `{provider, apiKey, baseUrl?}` derived from environment. A binding
/// exists iff its api key is non-empty.
#[derive(Debug, Clone)]
pub struct ProviderBinding {
    pub provider: Provider,
    pub api_key: String,
    pub base_url: Option<String>,
}

/// Declares one descriptor for the static registry table.
fn registry_table() -> Vec<ModelDescriptor> {
    use ModelClass::*;

    let entry = |provider: Provider,
                 name: &str,
                 reasoning: bool,
                 structured_output: bool,
                 speed: &str,
                 intelligence: &str,
                 context_window: u64| {
        let class = ModelClass::classify(name);
        ModelDescriptor {
            id: ModelId {
                provider,
                name: name.to_string(),
            },
            reasoning,
            structured_output,
            defaults: ModelDefaults {
                reasoning_effort: if reasoning {
                    Some(ReasoningEffort::Medium)
                } else {
                    None
                },
                verbosity: if matches!(class, Reasoning) && name.starts_with("gpt-5") {
                    Some(Verbosity::Medium)
                } else {
                    None
                },
            },
            capabilities: ModelCapabilities {
                speed: Some(speed.to_string()),
                intelligence: Some(intelligence.to_string()),
                context_window: Some(context_window),
                vision: Some(true),
                audio: Some(false),
            },
        }
    };

    vec![
        entry(Provider::Openai, "gpt-5", true, true, "medium", "very-high", 400_000),
        entry(Provider::Openai, "gpt-5-mini", true, true, "high", "high", 400_000),
        entry(Provider::Openai, "gpt-4o", false, true, "high", "high", 128_000),
        entry(Provider::Openai, "o1", true, true, "low", "very-high", 200_000),
        entry(Provider::Google, "gemini-2.5-pro", false, true, "medium", "very-high", 1_000_000),
        entry(Provider::Google, "gemini-2.5-flash", false, true, "high", "high", 1_000_000),
        entry(Provider::Anthropic, "claude-opus-4", false, true, "low", "very-high", 200_000),
        entry(Provider::Anthropic, "claude-sonnet-4", false, true, "medium", "high", 200_000),
        entry(Provider::Anthropic, "claude-haiku-4", false, false, "high", "medium", 200_000),
        entry(Provider::Xai, "grok-4", false, true, "medium", "very-high", 256_000),
        entry(Provider::Xai, "grok-4-fast", false, true, "high", "high", 256_000),
    ]
}

/// Reads `OPENAI_API_KEY`, `GOOGLE_API_KEY`/`GEMINI_API_KEY` (first
/// non-empty wins), `ANTHROPIC_API_KEY`, `XAI_API_KEY`/`GROK_API_KEY`
/// (spec §6 "Environment variables").
pub fn bindings_from_env() -> HashMap<Provider, ProviderBinding> {
    let mut out = HashMap::new();

    let first_non_empty = |names: &[&str]| -> Option<String> {
        names.iter().find_map(|name| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
        })
    };

    if let Some(key) = first_non_empty(&["OPENAI_API_KEY"]) {
        out.insert(
            Provider::Openai,
            ProviderBinding {
                provider: Provider::Openai,
                api_key: key,
                base_url: std::env::var("OPENAI_BASE_URL").ok(),
            },
        );
    }
    if let Some(key) = first_non_empty(&["GOOGLE_API_KEY", "GEMINI_API_KEY"]) {
        out.insert(
            Provider::Google,
            ProviderBinding {
                provider: Provider::Google,
                api_key: key,
                base_url: std::env::var("GOOGLE_BASE_URL").ok(),
            },
        );
    }
    if let Some(key) = first_non_empty(&["ANTHROPIC_API_KEY"]) {
        out.insert(
            Provider::Anthropic,
            ProviderBinding {
                provider: Provider::Anthropic,
                api_key: key,
                base_url: std::env::var("ANTHROPIC_BASE_URL").ok(),
            },
        );
    }
    if let Some(key) = first_non_empty(&["XAI_API_KEY", "GROK_API_KEY"]) {
        out.insert(
            Provider::Xai,
            ProviderBinding {
                provider: Provider::Xai,
                api_key: key,
                base_url: std::env::var("XAI_BASE_URL").ok(),
            },
        );
    }

    out
}

/// The env-var name(s) surfaced for each provider's "quick setup" hints
/// (spec §4.6 `models` detailed form).
pub fn env_var_hint(provider: Provider) -> &'static str {
    match provider {
        Provider::Openai => "OPENAI_API_KEY",
        Provider::Google => "GOOGLE_API_KEY or GEMINI_API_KEY",
        Provider::Anthropic => "ANTHROPIC_API_KEY",
        Provider::Xai => "XAI_API_KEY or GROK_API_KEY",
    }
}

pub struct ModelRegistry {
    descriptors: HashMap<ModelId, ModelDescriptor>,
    bindings: HashMap<Provider, ProviderBinding>,
}

impl ModelRegistry {
    pub fn new(bindings: HashMap<Provider, ProviderBinding>) -> Self {
        let descriptors = registry_table()
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();
        Self {
            descriptors,
            bindings,
        }
    }

    pub fn from_env() -> Self {
        Self::new(bindings_from_env())
    }

    pub fn configured(&self, provider: Provider) -> bool {
        self.bindings.contains_key(&provider)
    }

    pub fn binding(&self, provider: Provider) -> Option<&ProviderBinding> {
        self.bindings.get(&provider)
    }

    fn is_live(&self, id: &ModelId) -> bool {
        self.descriptors.contains_key(id) && self.configured(id.provider)
    }

    /// All ids whose provider is configured.
    pub fn list(&self) -> Vec<ModelId> {
        self.descriptors
            .keys()
            .filter(|id| self.configured(id.provider))
            .cloned()
            .collect()
    }

    /// All registered ids, live or not (used to build did-you-mean sets).
    pub fn all_ids(&self) -> Vec<ModelId> {
        self.descriptors.keys().cloned().collect()
    }

    pub fn resolve(&self, raw: &str) -> Result<&ModelDescriptor, GatewayError> {
        let id = ModelId::parse(raw).map_err(|_| {
            GatewayError::invalid_params(format!("invalid model identifier: {raw}"))
        })?;

        match self.descriptors.get(&id) {
            Some(descriptor) if self.is_live(&id) => Ok(descriptor),
            _ => Err(self.not_found_error(raw, &id)),
        }
    }

    fn not_found_error(&self, raw: &str, parsed: &ModelId) -> GatewayError {
        let available: Vec<String> = self.list().iter().map(|id| id.to_string()).collect();
        let suggested: Vec<String> = if let Some(provider) =
            ModelId::recognized_provider_prefix(raw).or(Some(parsed.provider))
        {
            available
                .iter()
                .filter(|id| id.starts_with(provider.as_str()))
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        GatewayError::model_not_found(raw, available, suggested)
    }

    pub fn list_detailed(&self) -> Vec<DetailedModel> {
        self.descriptors
            .values()
            .map(|d| DetailedModel {
                id: d.id.to_string(),
                provider: d.id.provider,
                capabilities: d.capabilities.clone(),
                configured: self.configured(d.id.provider),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct DetailedModel {
    pub id: String,
    pub provider: Provider,
    pub capabilities: ModelCapabilities,
    pub configured: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(providers: &[Provider]) -> ModelRegistry {
        let mut bindings = HashMap::new();
        for &p in providers {
            bindings.insert(
                p,
                ProviderBinding {
                    provider: p,
                    api_key: "key".to_string(),
                    base_url: None,
                },
            );
        }
        ModelRegistry::new(bindings)
    }

    #[test]
    fn parse_rejects_missing_colon() {
        assert!(ModelId::parse("gpt-5").is_err());
    }

    #[test]
    fn parse_rejects_empty_sides() {
        assert!(ModelId::parse(":gpt-5").is_err());
        assert!(ModelId::parse("openai:").is_err());
    }

    #[test]
    fn resolve_live_model_succeeds() {
        let registry = registry_with(&[Provider::Openai]);
        let descriptor = registry.resolve("openai:gpt-5").unwrap();
        assert_eq!(descriptor.id.name, "gpt-5");
    }

    #[test]
    fn resolve_unconfigured_provider_is_not_found() {
        let registry = registry_with(&[]);
        let err = registry.resolve("openai:gpt-5").unwrap_err();
        assert_eq!(err.kind, crate::rpc::error::ErrorKind::ModelNotFound);
    }

    #[test]
    fn not_found_includes_did_you_mean_subset() {
        let registry = registry_with(&[Provider::Openai, Provider::Anthropic]);
        let err = registry.resolve("openai:nonexistent").unwrap_err();
        let data = err.data.unwrap();
        let suggested = data["suggestedModels"].as_array().unwrap();
        assert!(suggested.iter().all(|v| v.as_str().unwrap().starts_with("openai:")));
        assert!(!suggested.is_empty());
    }

    #[test]
    fn classify_fast_before_reasoning() {
        // "gpt-5-mini" contains both a fast hint and a reasoning hint;
        // fast takes precedence per spec §4.3.
        assert_eq!(ModelClass::classify("gpt-5-mini"), ModelClass::Fast);
        assert_eq!(ModelClass::classify("gpt-5"), ModelClass::Reasoning);
        assert_eq!(ModelClass::classify("claude-haiku-4"), ModelClass::Fast);
        assert_eq!(ModelClass::classify("gpt-4o"), ModelClass::Standard);
    }
}
