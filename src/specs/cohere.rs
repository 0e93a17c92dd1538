use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize)]
pub struct CohereRequest {
    pub model: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub chat_history: Vec<CohereChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preamble: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_truncation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connectors: Option<Vec<CohereConnector>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<CohereTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<CohereToolResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_single_step: Option<bool>,
    pub stream: bool,
}

/// Cohere chat history roles are uppercase and the assistant is "CHATBOT".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohereChatMessage {
    pub role: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohereConnector {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohereTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub parameter_definitions: HashMap<String, CohereParameterDefinition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohereParameterDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub r#type: String,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohereToolResult {
    pub call: serde_json::Value,
    pub outputs: Vec<serde_json::Value>,
}

/// --- STREAMING EVENTS (newline-delimited JSON) ---

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event_type", rename_all = "kebab-case")]
pub enum CohereEvent {
    StreamStart,
    TextGeneration {
        text: String,
    },
    StreamEnd {
        finish_reason: Option<String>,
        response: Option<CohereStreamEndResponse>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CohereStreamEndResponse {
    pub meta: Option<CohereMeta>,
    pub tool_calls: Option<Vec<CohereToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CohereToolCall {
    pub name: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CohereMeta {
    pub billed_units: Option<CohereBilledUnits>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct CohereBilledUnits {
    pub input_tokens: Option<f64>,
    pub output_tokens: Option<f64>,
}
