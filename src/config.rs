//! Process configuration (spec §6 "Persisted state" / "Environment
//! variables").

use crate::registry::{bindings_from_env, ProviderBinding};
use crate::registry::Provider;
use std::collections::HashMap;

const DEFAULT_DB_PATH: &str = "chat.db";

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub db_path: String,
    pub bindings: HashMap<Provider, ProviderBinding>,
}

impl GatewayConfig {
    /// Reads `GATEWAY_DB_PATH` (falling back to `chat.db`) and the
    /// provider API key variables.
    pub fn from_env() -> Self {
        let db_path = std::env::var("GATEWAY_DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());
        Self {
            db_path,
            bindings: bindings_from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_db_path_when_unset() {
        std::env::remove_var("GATEWAY_DB_PATH");
        let config = GatewayConfig::from_env();
        assert_eq!(config.db_path, "chat.db");
    }
}
