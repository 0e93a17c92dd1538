//! Model routing.
//!
//! Maps a model identifier to its owning provider before any network traffic,
//! and answers per-model capability questions. Custom gateway models are
//! config-driven and take precedence over the static tables.

use crate::config::PrismConfig;
use crate::types::{Model, PrismError, Result};

pub const OPENAI_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-mini",
    "gpt-4-turbo",
    "gpt-4",
    "gpt-3.5-turbo",
];

pub const ANTHROPIC_MODELS: &[&str] = &[
    "claude-3-5-sonnet-latest",
    "claude-3-5-haiku-latest",
    "claude-3-opus-20240229",
    "claude-3-haiku-20240307",
];

pub const COHERE_MODELS: &[&str] = &["command-r-plus", "command-r", "command", "command-light"];

/// Cohere restricts tool use to the command-r family.
const COHERE_TOOL_MODELS: &[&str] = &["command-r-plus", "command-r"];

/// claude-3-opus rejects tool definitions on the streaming endpoint.
const ANTHROPIC_NO_TOOL_MODELS: &[&str] = &["claude-3-opus-20240229"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Cohere,
    /// Custom gateway, by server id.
    Custom(String),
}

/// Resolves the provider owning `model`, or `ModelNotSupported`. Performed
/// before any request is built so unknown models never reach the network.
pub fn resolve(config: &PrismConfig, model: &Model) -> Result<ProviderKind> {
    for server in &config.custom_servers {
        if server.models.iter().any(|m| m.key == model.as_str()) {
            return Ok(ProviderKind::Custom(server.id.clone()));
        }
    }

    if OPENAI_MODELS.contains(&model.as_str()) {
        return Ok(ProviderKind::OpenAi);
    }
    if ANTHROPIC_MODELS.contains(&model.as_str()) {
        return Ok(ProviderKind::Anthropic);
    }
    if COHERE_MODELS.contains(&model.as_str()) {
        return Ok(ProviderKind::Cohere);
    }

    Err(PrismError::ModelNotSupported(model.as_str().to_string()).into())
}

/// Whether tool definitions may be attached to a request for `model`.
pub fn supports_tools(config: &PrismConfig, model: &Model) -> bool {
    for server in &config.custom_servers {
        if let Some(m) = server.models.iter().find(|m| m.key == model.as_str()) {
            return m.tools;
        }
    }

    if ANTHROPIC_MODELS.contains(&model.as_str()) {
        return !ANTHROPIC_NO_TOOL_MODELS.contains(&model.as_str());
    }
    if COHERE_MODELS.contains(&model.as_str()) {
        return COHERE_TOOL_MODELS.contains(&model.as_str());
    }

    OPENAI_MODELS.contains(&model.as_str())
}
