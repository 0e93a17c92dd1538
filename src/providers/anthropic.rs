//! Anthropic message service.

use crate::client::HttpClient;
use crate::files::FileStore;
use crate::history::{BuiltHistory, HistoryBuilder, HistoryMessage, QuoteStyle};
use crate::normalize::{AnthropicNormalizer, PendingCall, UnifiedEvent};
use crate::providers::{
    context_notes, run_pending_calls, ChunkSender, GenerationRequest, MessageService,
};
use crate::sse::SseReader;
use crate::specs::anthropic::{
    AnthropicContent, AnthropicContentPart, AnthropicImageSource, AnthropicMessage,
    AnthropicRequest, AnthropicTool,
};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{Chunk, CostLedger, Result, Role};
use async_trait::async_trait;
use reqwest::Method;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicMessageService {
    client: HttpClient,
    files: Arc<dyn FileStore>,
    tools: ToolRegistry,
}

enum StreamOutcome {
    Finished(Vec<PendingCall>),
    Cancelled,
}

impl AnthropicMessageService {
    pub fn new(client: HttpClient, files: Arc<dyn FileStore>, tools: ToolRegistry) -> Self {
        Self {
            client,
            files,
            tools,
        }
    }

    fn system_prompt(&self, request: &GenerationRequest<'_>, history: &BuiltHistory) -> Option<String> {
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
    }

    fn wire_message(entry: &HistoryMessage) -> AnthropicMessage {
        let role = match entry.role {
            Role::Assistant => "assistant",
            _ => "user",
        };

        let content = if entry.images.is_empty() {
            AnthropicContent::String(entry.text.clone())
        } else {
            let mut parts: Vec<AnthropicContentPart> = entry
                .images
                .iter()
                .map(|image| AnthropicContentPart::Image {
                    source: AnthropicImageSource {
                        r#type: "base64".to_string(),
                        media_type: image.media_type.clone(),
                        data: image.data_b64.clone(),
                    },
                })
                .collect();
            parts.push(AnthropicContentPart::Text {
                text: entry.text.clone(),
            });
            AnthropicContent::Parts(parts)
        };

        AnthropicMessage {
            role: role.to_string(),
            content,
        }
    }

    fn tool_definitions(&self) -> Vec<AnthropicTool> {
        self.tools
            .iter()
            .map(|tool| AnthropicTool {
                name: tool.name().to_string(),
                description: Some(tool.description().to_string()),
                input_schema: tool.parameters(),
            })
            .collect()
    }

    async fn run_stream(
        &self,
        body: &AnthropicRequest,
        ledger: &mut CostLedger,
        tx: &ChunkSender,
    ) -> Result<StreamOutcome> {
        let url = self.client.endpoint("/v1/messages", &body.model);
        let response = self.client.send_request(Method::POST, &url, body).await?;
        let mut reader = SseReader::new(response);
        let mut normalizer = AnthropicNormalizer::new();

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
impl MessageService for AnthropicMessageService {
    fn supports_model(&self, model: &crate::types::Model) -> bool {
        crate::dispatch::ANTHROPIC_MODELS.contains(&model.as_str())
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
        let system = self.system_prompt(request, &history);
        let mut messages: Vec<AnthropicMessage> =
            history.messages.iter().map(Self::wire_message).collect();

        let attach_tools = request.allow_tools && !self.tools.is_empty();

        for pass in 0..2 {
            let body = AnthropicRequest {
                model: request.model.as_str().to_string(),
                system: system.clone(),
                messages: messages.clone(),
                max_tokens: request.params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
                stream: Some(true),
                temperature: request.params.temperature,
                top_p: request.params.top_p,
                tools: (pass == 0 && attach_tools).then(|| self.tool_definitions()),
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

            messages.push(AnthropicMessage {
                role: "assistant".to_string(),
                content: AnthropicContent::Parts(
                    executed
                        .iter()
                        .map(|e| AnthropicContentPart::ToolUse {
                            id: e.call.id.clone(),
                            name: e.call.name.clone(),
                            input: e.call.arguments.clone(),
                        })
                        .collect(),
                ),
            });
            messages.push(AnthropicMessage {
                role: "user".to_string(),
                content: AnthropicContent::Parts(
                    executed
                        .iter()
                        .map(|e| AnthropicContentPart::ToolResult {
                            tool_use_id: e.call.id.clone(),
                            content: e.content.clone(),
                        })
                        .collect(),
                ),
            });
        }

        Ok(())
    }
}
