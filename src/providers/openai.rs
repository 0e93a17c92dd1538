//! OpenAI message service, and the chat-completions dialect shared with the
//! custom gateways.

use crate::client::HttpClient;
use crate::cost::{self, Direction};
use crate::files::FileStore;
use crate::history::{BuiltHistory, HistoryBuilder, QuoteStyle};
use crate::normalize::{OpenAiNormalizer, PendingCall, UnifiedEvent};
use crate::providers::{
    context_notes, run_pending_calls, ChunkSender, GenerationRequest, MessageService,
};
use crate::sse::SseReader;
use crate::specs::openai::{
    OpenAiCompletion, OpenAiContent, OpenAiContentPart, OpenAiFunctionCall,
    OpenAiFunctionDefinition, OpenAiImageUrl, OpenAiMessage, OpenAiRequest, OpenAiStreamOptions,
    OpenAiTool, OpenAiToolCall,
};
use crate::str_utils::first_n_words;
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{Chunk, CostLedger, CreditCount, Model, PrismError, Result};
use async_trait::async_trait;
use reqwest::Method;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const TITLE_SYSTEM_PROMPT: &str = "Your task is to generate a single title for the given content. \
Identify the language of the content and generate a title that is relevant to the content. The \
title should be concise and informative. The title should be no more than 64 characters long. \
Even though the given summary is in list form, the title should not be a list. Generate the \
title as if it were for a blog post or news article on the topic. Don't generate variations of \
the same title with different tones or styles.";

/// Request assembly and stream handling for the chat-completions wire format.
/// OpenAI proper and every custom gateway speak this dialect.
pub(crate) struct ChatDialect {
    pub client: HttpClient,
    pub files: Arc<dyn FileStore>,
    pub tools: ToolRegistry,
}

enum StreamOutcome {
    Finished(Vec<PendingCall>),
    Cancelled,
}

impl ChatDialect {
    fn base_messages(&self, request: &GenerationRequest<'_>, history: &BuiltHistory) -> Vec<OpenAiMessage> {
        let mut messages = Vec::new();

        if let Some(instructions) = &request.profile.instructions {
            messages.push(OpenAiMessage::System {
                content: instructions.clone(),
            });
        }
        for note in context_notes(request.profile, &history.files) {
            messages.push(OpenAiMessage::System { content: note });
        }

        for entry in &history.messages {
            match entry.role {
                crate::types::Role::System => messages.push(OpenAiMessage::System {
                    content: entry.text.clone(),
                }),
                crate::types::Role::Assistant => messages.push(OpenAiMessage::Assistant {
                    content: Some(entry.text.clone()),
                    tool_calls: Vec::new(),
                }),
                _ => {
                    let content = if entry.images.is_empty() {
                        OpenAiContent::String(entry.text.clone())
                    } else {
                        let mut parts = vec![OpenAiContentPart::Text {
                            text: entry.text.clone(),
                        }];
                        for image in &entry.images {
                            parts.push(OpenAiContentPart::ImageUrl {
                                image_url: OpenAiImageUrl {
                                    url: format!(
                                        "data:{};base64,{}",
                                        image.media_type, image.data_b64
                                    ),
                                },
                            });
                        }
                        OpenAiContent::Parts(parts)
                    };
                    messages.push(OpenAiMessage::User { content });
                }
            }
        }

        messages
    }

    fn tool_definitions(&self) -> Vec<OpenAiTool> {
        self.tools
            .iter()
            .map(|tool| OpenAiTool {
                r#type: "function".to_string(),
                function: OpenAiFunctionDefinition {
                    name: tool.name().to_string(),
                    description: Some(tool.description().to_string()),
                    parameters: tool.parameters(),
                },
            })
            .collect()
    }

    async fn run_stream(
        &self,
        url: &str,
        body: &OpenAiRequest,
        ledger: &mut CostLedger,
        tx: &ChunkSender,
    ) -> Result<StreamOutcome> {
        let response = self.client.send_request(Method::POST, url, body).await?;
        let mut reader = SseReader::new(response);
        let mut normalizer = OpenAiNormalizer::new();

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

    /// The full generation loop: first pass, at most one tool execution and
    /// resubmission, second pass with tools withheld.
    pub async fn stream_message(
        &self,
        request: &GenerationRequest<'_>,
        wire_model: &str,
        url: &str,
        quote_style: QuoteStyle,
        ledger: &mut CostLedger,
        tx: &ChunkSender,
    ) -> Result<()> {
        let history = HistoryBuilder::new(self.files.as_ref(), quote_style)
            .build(request.conversation, request.from);
        let mut messages = self.base_messages(request, &history);

        let attach_tools = request.allow_tools && !self.tools.is_empty();

        for pass in 0..2 {
            let body = OpenAiRequest {
                model: wire_model.to_string(),
                messages: messages.clone(),
                stream: Some(true),
                stream_options: Some(OpenAiStreamOptions {
                    include_usage: true,
                }),
                temperature: request.params.temperature,
                top_p: request.params.top_p,
                max_tokens: request.params.max_tokens,
                tools: (pass == 0 && attach_tools).then(|| self.tool_definitions()),
                extra: HashMap::new(),
            };

            let calls = match self.run_stream(url, &body, ledger, tx).await? {
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

            messages.push(OpenAiMessage::Assistant {
                content: None,
                tool_calls: executed
                    .iter()
                    .map(|e| OpenAiToolCall {
                        id: e.call.id.clone(),
                        r#type: "function".to_string(),
                        function: OpenAiFunctionCall {
                            name: e.call.name.clone(),
                            arguments: e.call.arguments.to_string(),
                        },
                    })
                    .collect(),
            });
            for e in &executed {
                messages.push(OpenAiMessage::Tool {
                    content: e.content.clone(),
                    tool_call_id: e.call.id.clone(),
                });
            }
        }

        Ok(())
    }

    /// Non-streaming title generation from the opening words of a
    /// conversation.
    pub async fn generate_title(
        &self,
        content: &str,
        wire_model: &str,
        url: &str,
        model: &Model,
    ) -> Result<(Option<String>, CreditCount)> {
        let words = first_n_words(content, 100);
        if words.trim().is_empty() {
            return Ok((None, CreditCount::zero()));
        }

        let body = OpenAiRequest {
            model: wire_model.to_string(),
            messages: vec![
                OpenAiMessage::System {
                    content: TITLE_SYSTEM_PROMPT.to_string(),
                },
                OpenAiMessage::User {
                    content: OpenAiContent::String(format!(
                        "Summarize the text delimited by triple quotes in one sentence by using \
                         same language. \"\"\"{words}\"\"\""
                    )),
                },
                OpenAiMessage::Assistant {
                    content: Some("Title:".to_string()),
                    tool_calls: Vec::new(),
                },
            ],
            stream: None,
            stream_options: None,
            temperature: None,
            top_p: None,
            max_tokens: None,
            tools: None,
            extra: HashMap::new(),
        };

        let response = self.client.send_request(Method::POST, url, &body).await?;
        let completion: OpenAiCompletion = response.json().await.map_err(PrismError::Network)?;

        let cost = title_cost(&completion, model, self.client.has_custom_key());
        Ok((extract_title(&completion), cost))
    }
}

/// First line of the model's answer, stripped of surrounding quotes.
fn extract_title(completion: &OpenAiCompletion) -> Option<String> {
    let raw = completion
        .choices
        .first()
        .and_then(|c| c.message.content.clone())?;
    raw.trim()
        .lines()
        .next()
        .map(|line| line.trim_matches([' ', '"']).to_string())
        .filter(|line| !line.is_empty())
}

fn title_cost(completion: &OpenAiCompletion, model: &Model, custom_key: bool) -> CreditCount {
    if custom_key {
        return CreditCount::zero();
    }
    let usage = completion.usage.unwrap_or_default();
    cost::calculate(usage.prompt_tokens, model, Direction::Input).add(cost::calculate(
        usage.completion_tokens,
        model,
        Direction::Output,
    ))
}

pub struct OpenAiMessageService {
    dialect: ChatDialect,
}

impl OpenAiMessageService {
    pub fn new(client: HttpClient, files: Arc<dyn FileStore>, tools: ToolRegistry) -> Self {
        Self {
            dialect: ChatDialect {
                client,
                files,
                tools,
            },
        }
    }

    pub async fn generate_title(
        &self,
        content: &str,
        model: &Model,
    ) -> Result<(Option<String>, CreditCount)> {
        let url = self
            .dialect
            .client
            .endpoint("/v1/chat/completions", model.as_str());
        self.dialect
            .generate_title(content, model.as_str(), &url, model)
            .await
    }
}

#[async_trait]
impl MessageService for OpenAiMessageService {
    fn supports_model(&self, model: &Model) -> bool {
        crate::dispatch::OPENAI_MODELS.contains(&model.as_str())
    }

    fn quote_style(&self) -> QuoteStyle {
        QuoteStyle::SystemNote
    }

    fn has_custom_key(&self) -> bool {
        self.dialect.client.has_custom_key()
    }

    async fn stream_message(
        &self,
        request: &GenerationRequest<'_>,
        ledger: &mut CostLedger,
        tx: &ChunkSender,
    ) -> Result<()> {
        let url = self
            .dialect
            .client
            .endpoint("/v1/chat/completions", request.model.as_str());
        self.dialect
            .stream_message(
                request,
                request.model.as_str(),
                &url,
                self.quote_style(),
                ledger,
                tx,
            )
            .await
    }
}
