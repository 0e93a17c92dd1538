//! Cohere message service.
//!
//! The chat endpoint takes the current message separately from the rolled-up
//! history, with uppercase roles and "CHATBOT" for the assistant. Tool calls
//! arrive whole in the stream-end event; results go back as `tool_results`
//! with `force_single_step` so the follow-up turn answers in text.

use crate::client::HttpClient;
use crate::files::FileStore;
use crate::history::{HistoryBuilder, QuoteStyle};
use crate::normalize::{CohereNormalizer, PendingCall, UnifiedEvent};
use crate::providers::{
    context_notes, run_pending_calls, ChunkSender, GenerationRequest, MessageService,
};
use crate::sse::SseReader;
use crate::specs::cohere::{
    CohereChatMessage, CohereParameterDefinition, CohereRequest, CohereTool, CohereToolResult,
};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{Chunk, CostLedger, Result, Role};
use async_trait::async_trait;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub struct CohereMessageService {
    client: HttpClient,
    files: Arc<dyn FileStore>,
    tools: ToolRegistry,
}

enum StreamOutcome {
    Finished(Vec<PendingCall>),
    Cancelled,
}

impl CohereMessageService {
    pub fn new(client: HttpClient, files: Arc<dyn FileStore>, tools: ToolRegistry) -> Self {
        Self {
            client,
            files,
            tools,
        }
    }

    fn tool_definitions(&self) -> Vec<CohereTool> {
        self.tools
            .iter()
            .map(|tool| CohereTool {
                name: tool.name().to_string(),
                description: Some(tool.description().to_string()),
                parameter_definitions: schema_to_parameter_definitions(&tool.parameters()),
            })
            .collect()
    }

    async fn run_stream(
        &self,
        body: &CohereRequest,
        ledger: &mut CostLedger,
        tx: &ChunkSender,
    ) -> Result<StreamOutcome> {
        let url = self.client.endpoint("/v1/chat", &body.model);
        let response = self.client.send_request(Method::POST, &url, body).await?;
        let mut reader = SseReader::new(response);
        let mut normalizer = CohereNormalizer::new();

        while let Some(frame) = reader.next_frame().await? {
            for event in normalizer.handle_frame(&frame)? {
                match event {
                    UnifiedEvent::Token(text) => {
                        if tx.send(Ok(Chunk::Token(text))).await.is_err() {
                            debug!("receiver dropped, abandoning stream");
                            return Ok(StreamOutcome::Cancelled);
                        }
                    }
                    UnifiedEvent::Usage { input, output } => {
                        ledger.usage.add_input(input);
                        ledger.usage.add_output(output);
                    }
                    UnifiedEvent::Done => {}
                }
            }
        }

        Ok(StreamOutcome::Finished(normalizer.finish()))
    }
}

#[async_trait]
impl MessageService for CohereMessageService {
    fn supports_model(&self, model: &crate::types::Model) -> bool {
        crate::dispatch::COHERE_MODELS.contains(&model.as_str())
    }

    fn quote_style(&self) -> QuoteStyle {
        QuoteStyle::Inline
    }

    fn has_custom_key(&self) -> bool {
        self.client.has_custom_key()
    }

    async fn stream_message(
        &self,
        request: &GenerationRequest<'_>,
        ledger: &mut CostLedger,
        tx: &ChunkSender,
    ) -> Result<()> {
        let history = HistoryBuilder::new(self.files.as_ref(), self.quote_style())
            .build(request.conversation, request.from);

        let mut entries = history.messages.clone();
        let message = match entries.pop() {
            Some(last) => last.text,
            None => "-".to_string(),
        };
        let chat_history: Vec<CohereChatMessage> = entries
            .iter()
            .map(|entry| CohereChatMessage {
                role: cohere_role(entry.role).to_string(),
                message: entry.text.clone(),
            })
            .collect();

        let preamble = {
            let mut sections = Vec::new();
            if let Some(instructions) = &request.profile.instructions {
                sections.push(instructions.clone());
            }
            sections.extend(context_notes(request.profile, &history.files));
            if sections.is_empty() {
                None
            } else {
                Some(sections.join("\n\n"))
            }
        };

        let attach_tools = request.allow_tools && !self.tools.is_empty();
        let mut tool_results: Option<Vec<CohereToolResult>> = None;

        for pass in 0..2 {
            let body = CohereRequest {
                model: request.model.as_str().to_string(),
                message: message.clone(),
                chat_history: chat_history.clone(),
                preamble: preamble.clone(),
                prompt_truncation: Some("AUTO".to_string()),
                connectors: None,
                tools: (pass == 0 && attach_tools).then(|| self.tool_definitions()),
                tool_results: tool_results.clone(),
                force_single_step: (pass > 0).then_some(true),
                stream: true,
            };

            let calls = match self.run_stream(&body, ledger, tx).await? {
                StreamOutcome::Finished(calls) => calls,
                StreamOutcome::Cancelled => return Ok(()),
            };

            if pass > 0 || calls.is_empty() {
                break;
            }

            let ctx = ToolContext {
                profile: request.profile,
                files: &history.files,
            };
            let executed = run_pending_calls(&self.tools, &ctx, calls, ledger, tx).await?;
            if executed.is_empty() {
                break;
            }

            tool_results = Some(
                executed
                    .iter()
                    .map(|e| CohereToolResult {
                        call: serde_json::json!({
                            "name": e.call.name,
                            "parameters": e.call.arguments,
                        }),
                        outputs: vec![serde_json::json!({ "call_response": e.content })],
                    })
                    .collect(),
            );
        }

        Ok(())
    }
}

fn cohere_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "CHATBOT",
        Role::System => "SYSTEM",
        _ => "USER",
    }
}

/// Converts a JSON-schema object into Cohere's flat parameter map. Type
/// names follow the Python convention the API expects; enum values are
/// folded into the description.
fn schema_to_parameter_definitions(
    schema: &serde_json::Value,
) -> HashMap<String, CohereParameterDefinition> {
    let mut definitions = HashMap::new();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let properties = match schema.get("properties").and_then(|p| p.as_object()) {
        Some(props) => props,
        None => return definitions,
    };

    for (name, prop) in properties {
        let r#type = match prop.get("type").and_then(|t| t.as_str()) {
            Some("string") => "str",
            Some("integer") => "int",
            Some("number") => "float",
            Some("boolean") => "bool",
            Some("object") => "Dict",
            Some("array") => "List",
            _ => "str",
        };

        let mut description = prop
            .get("description")
            .and_then(|d| d.as_str())
            .map(|d| d.to_string());
        if let Some(values) = prop.get("enum").and_then(|e| e.as_array()) {
            let list: Vec<String> = values
                .iter()
                .map(|v| match v.as_str() {
                    Some(s) => s.to_string(),
                    None => v.to_string(),
                })
                .collect();
            let suffix = format!("Possible enum values: {}.", list.join(", "));
            description = Some(match description {
                Some(d) => format!("{d} {suffix}"),
                None => suffix,
            });
        }

        definitions.insert(
            name.clone(),
            CohereParameterDefinition {
                description,
                r#type: r#type.to_string(),
                required: required.contains(&name.as_str()),
            },
        );
    }

    definitions
}
