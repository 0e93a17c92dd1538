//! Provider configuration.
//!
//! Built programmatically for embedding, or from the environment via
//! [`PrismConfig::from_env`]. Custom gateway servers are declared as a JSON
//! document so one deployment can route any number of OpenAI-compatible
//! endpoints.

use crate::types::{PrismError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// API key for a first-party provider. `custom` marks a workspace-supplied
/// key, which exempts the workspace from credit billing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub api_key: String,
    #[serde(default)]
    pub custom: bool,
}

impl ProviderCredentials {
    pub fn platform(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            custom: false,
        }
    }

    pub fn workspace(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            custom: true,
        }
    }
}

/// One OpenAI-compatible gateway. `server` is the chat-completions URL and
/// may contain a `{model}` placeholder substituted per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomServerConfig {
    pub id: String,
    pub server: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub models: Vec<CustomModelConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomModelConfig {
    /// Fully qualified routing key, "server-id/model-name".
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub tools: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PrismConfig {
    pub openai: Option<ProviderCredentials>,
    pub anthropic: Option<ProviderCredentials>,
    pub cohere: Option<ProviderCredentials>,
    pub custom_servers: Vec<CustomServerConfig>,
}

impl PrismConfig {
    /// Reads configuration from the environment, loading a `.env` file first
    /// if one is present. `PRISM_CUSTOM_SERVERS` holds the gateway list as a
    /// JSON array.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let openai = read_credentials("OPENAI_API_KEY", "OPENAI_CUSTOM_KEY");
        let anthropic = read_credentials("ANTHROPIC_API_KEY", "ANTHROPIC_CUSTOM_KEY");
        let cohere = read_credentials("COHERE_API_KEY", "COHERE_CUSTOM_KEY");

        let custom_servers = match std::env::var("PRISM_CUSTOM_SERVERS") {
            Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw).map_err(|e| {
                PrismError::Domain(format!("PRISM_CUSTOM_SERVERS is not valid JSON: {e}"))
            })?,
            _ => Vec::new(),
        };

        Ok(Self {
            openai,
            anthropic,
            cohere,
            custom_servers,
        })
    }

    pub fn custom_server(&self, id: &str) -> Option<&CustomServerConfig> {
        self.custom_servers.iter().find(|s| s.id == id)
    }
}

fn read_credentials(key_var: &str, custom_var: &str) -> Option<ProviderCredentials> {
    let api_key = std::env::var(key_var).ok()?;
    if api_key.trim().is_empty() {
        return None;
    }
    let custom = match std::env::var(custom_var) {
        Ok(v) => matches!(v.trim(), "1" | "true" | "yes"),
        Err(_) => false,
    };
    Some(ProviderCredentials { api_key, custom })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_server_list_parses_from_json() {
        let raw = r#"[{
            "id": "ollama",
            "server": "http://127.0.0.1:11434/v1/chat/completions",
            "headers": {"x-team": "research"},
            "models": [{"key": "ollama/llama3", "name": "llama3", "tools": true}]
        }]"#;
        let servers: Vec<CustomServerConfig> = serde_json::from_str(raw).unwrap();
        assert_eq!(servers[0].id, "ollama");
        assert!(servers[0].key.is_none());
        assert!(servers[0].models[0].tools);
    }

    #[test]
    fn workspace_credentials_are_marked_custom() {
        assert!(ProviderCredentials::workspace("sk-x").custom);
        assert!(!ProviderCredentials::platform("sk-x").custom);
    }
}
