//! Model identifiers and descriptors (spec §3).

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Google,
    Anthropic,
    Xai,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::Google => "google",
            Provider::Anthropic => "anthropic",
            Provider::Xai => "xai",
        }
    }

    pub fn all() -> [Provider; 4] {
        [
            Provider::Openai,
            Provider::Google,
            Provider::Anthropic,
            Provider::Xai,
        ]
    }

    /// Deferred-completion endpoints (spec §4.4) exist only for OpenAI's
    /// "responses" API today.
    pub fn supports_deferred(self) -> bool {
        matches!(self, Provider::Openai)
    }

    /// Per-provider concurrency cap (spec §4.2).
    pub fn concurrency_cap(self) -> usize {
        match self {
            Provider::Openai => 8,
            Provider::Google => 6,
            Provider::Anthropic => 6,
            Provider::Xai => 4,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "openai" => Ok(Provider::Openai),
            "google" => Ok(Provider::Google),
            "anthropic" => Ok(Provider::Anthropic),
            "xai" => Ok(Provider::Xai),
            _ => Err(()),
        }
    }
}

/// A parsed `<provider>:<name>` model identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelId {
    pub provider: Provider,
    pub name: String,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("invalid model identifier: {0}")]
pub struct InvalidModelId(pub String);

impl ModelId {
    pub fn parse(raw: &str) -> Result<Self, InvalidModelId> {
        let Some((provider_str, name)) = raw.split_once(':') else {
            return Err(InvalidModelId(raw.to_string()));
        };
        if provider_str.is_empty() || name.is_empty() {
            return Err(InvalidModelId(raw.to_string()));
        }
        let provider = provider_str
            .parse::<Provider>()
            .map_err(|_| InvalidModelId(raw.to_string()))?;
        Ok(ModelId {
            provider,
            name: name.to_string(),
        })
    }

    /// The recognized-provider prefix of an id the caller typed, even if
    /// the id as a whole doesn't resolve. Used for the model-not-found
    /// "did-you-mean" filter (spec §4.1) without requiring the id to parse
    /// cleanly first.
    pub fn recognized_provider_prefix(raw: &str) -> Option<Provider> {
        let (provider_str, _) = raw.split_once(':')?;
        provider_str.parse::<Provider>().ok()
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelDefaults {
    pub reasoning_effort: Option<ReasoningEffort>,
    pub verbosity: Option<Verbosity>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelClass {
    Fast,
    Reasoning,
    Standard,
}

impl ModelClass {
    /// Classification by substring match against the model name: fast
    /// first, then reasoning, then standard (spec §4.3).
    pub fn classify(name: &str) -> Self {
        const FAST_HINTS: &[&str] = &["mini", "flash", "nano", "haiku"];
        const REASONING_HINTS: &[&str] = &["o1", "o3", "o4", "gpt-5", "reasoning"];

        let lower = name.to_lowercase();
        if FAST_HINTS.iter().any(|hint| lower.contains(hint)) {
            ModelClass::Fast
        } else if REASONING_HINTS.iter().any(|hint| lower.contains(hint)) {
            ModelClass::Reasoning
        } else {
            ModelClass::Standard
        }
    }

    /// (probe, structured, overall) timeouts in milliseconds.
    pub fn timeouts_ms(self) -> (u64, u64, u64) {
        match self {
            ModelClass::Reasoning => (10_000, 120_000, 180_000),
            ModelClass::Standard => (5_000, 60_000, 90_000),
            ModelClass::Fast => (3_000, 30_000, 45_000),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCapabilities {
    pub speed: Option<String>,
    pub intelligence: Option<String>,
    pub context_window: Option<u64>,
    pub vision: Option<bool>,
    pub audio: Option<bool>,
}

/// Immutable per-process descriptor of a registered `(provider, name)` pair.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    pub id: ModelId,
    pub reasoning: bool,
    pub structured_output: bool,
    pub defaults: ModelDefaults,
    pub capabilities: ModelCapabilities,
}

impl ModelDescriptor {
    pub fn class(&self) -> ModelClass {
        ModelClass::classify(&self.id.name)
    }
}
