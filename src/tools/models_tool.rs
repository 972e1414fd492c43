//! `models` tool (spec §4.6): lists live model ids, or a detailed
//! per-provider status report.

use crate::registry::{env_var_hint, ModelRegistry, Provider};
use serde_json::{json, Value};

pub fn run(registry: &ModelRegistry, detailed: bool) -> Value {
    if !detailed {
        let ids: Vec<String> = registry.list().iter().map(|id| id.to_string()).collect();
        return json!({ "models": ids });
    }

    let detailed = registry.list_detailed();
    let mut providers = serde_json::Map::new();
    let mut total_providers_configured = 0usize;
    let mut total_models_available = 0usize;

    for provider in Provider::all() {
        let configured = registry.configured(provider);
        if configured {
            total_providers_configured += 1;
        }

        let models: Vec<Value> = detailed
            .iter()
            .filter(|m| m.provider == provider && m.configured)
            .map(|m| json!({ "id": m.id, "capabilities": m.capabilities }))
            .collect();
        total_models_available += models.len();

        let api_key = if configured {
            "configured".to_string()
        } else {
            format!("not set ({})", env_var_hint(provider))
        };

        providers.insert(
            provider.as_str().to_string(),
            json!({
                "configured": configured,
                "apiKey": api_key,
                "models": models,
            }),
        );
    }

    let mut response = json!({
        "providers": providers,
        "summary": {
            "totalProvidersConfigured": total_providers_configured,
            "totalModelsAvailable": total_models_available,
            "readyToUse": total_providers_configured > 0,
        },
    });

    if total_providers_configured == 0 {
        let quick_setup: Vec<String> = Provider::all()
            .iter()
            .map(|&p| format!("{}: set {}", p.as_str(), env_var_hint(p)))
            .collect();
        response["quickSetup"] = json!(quick_setup);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProviderBinding;
    use std::collections::HashMap;

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
    fn basic_form_lists_live_ids_only() {
        let registry = registry_with(&[Provider::Openai]);
        let response = run(&registry, false);
        let models = response["models"].as_array().unwrap();
        assert!(models.iter().all(|m| m.as_str().unwrap().starts_with("openai:")));
    }

    #[test]
    fn detailed_form_reports_per_provider_status() {
        let registry = registry_with(&[Provider::Openai]);
        let response = run(&registry, true);
        assert_eq!(response["summary"]["totalProvidersConfigured"], 1);
        assert_eq!(response["providers"]["openai"]["configured"], true);
        assert_eq!(response["providers"]["google"]["configured"], false);
        assert!(response["providers"]["google"]["apiKey"]
            .as_str()
            .unwrap()
            .contains("GOOGLE_API_KEY"));

        let models = response["providers"]["openai"]["models"].as_array().unwrap();
        assert!(!models.is_empty());
        assert!(models[0]["capabilities"]["intelligence"].is_string());
        assert!(response["providers"]["google"]["models"]
            .as_array()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn quick_setup_appears_only_when_nothing_is_configured() {
        let registry = registry_with(&[]);
        let response = run(&registry, true);
        assert!(response.get("quickSetup").is_some());

        let registry = registry_with(&[Provider::Openai]);
        let response = run(&registry, true);
        assert!(response.get("quickSetup").is_none());
    }
}
