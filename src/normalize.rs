//! Provider event normalization.
//!
//! Each provider family speaks its own stream dialect; a normalizer folds the
//! decoded frames into the unified event model consumed by the generation
//! loop. Tool-call fragments are accumulated here, keyed by the
//! provider-local index, and resolved to complete calls once the stream ends.

use crate::json_repair;
use crate::sse::SseFrame;
use crate::str_utils::first_n_chars_lossy;
use crate::specs::anthropic::{
    AnthropicBlockDelta, AnthropicContentBlock, AnthropicEvent,
};
use crate::specs::cohere::CohereEvent;
use crate::specs::openai::{OpenAiChunk, OpenAiErrorBody, OpenAiToolCallDelta};
use crate::types::{PrismError, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// One provider-agnostic stream event. Usage figures are deltas and must be
/// added to the running totals, never assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnifiedEvent {
    Token(String),
    Usage { input: u64, output: u64 },
    Done,
}

/// A completed tool-call request reconstructed from stream fragments.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// In-progress tool calls keyed by the provider's per-response index. The
/// ordered map keeps finalized calls in announcement order.
#[derive(Debug, Default)]
pub struct CallAccumulator {
    builders: BTreeMap<u32, CallBuilder>,
}

#[derive(Debug, Default)]
struct CallBuilder {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl CallAccumulator {
    pub fn open(&mut self, index: u32, id: Option<String>, name: &str) {
        let builder = self.builders.entry(index).or_default();
        if builder.id.is_none() {
            builder.id = id;
        }
        builder.name.push_str(name);
    }

    pub fn push_arguments(&mut self, index: u32, fragment: &str) {
        self.builders
            .entry(index)
            .or_default()
            .arguments
            .push_str(fragment);
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    /// Resolves every buffered call. Argument strings that fail to parse even
    /// after repair become empty objects rather than failing the turn.
    pub fn finalize(self) -> Vec<PendingCall> {
        self.builders
            .into_iter()
            .map(|(index, builder)| {
                let id = match builder.id {
                    Some(id) => id,
                    None => format!("call_{index}"),
                };
                let arguments =
                    json_repair::parse_tool_arguments(&builder.name, &builder.arguments);
                PendingCall {
                    id,
                    name: builder.name,
                    arguments,
                }
            })
            .collect()
    }
}

/// Per-text-block filter that withholds output until it can tell whether the
/// block opens with a `<thinking>` marker. Marked blocks are dropped entirely.
#[derive(Debug, Default)]
struct ThinkingFilter {
    buffer: String,
    state: FilterState,
}

#[derive(Debug, Default, PartialEq)]
enum FilterState {
    #[default]
    Undecided,
    Passing,
    Suppressing,
}

const THINKING_MARKER: &str = "<thinking>";

impl ThinkingFilter {
    fn push(&mut self, text: &str) -> Option<String> {
        match self.state {
            FilterState::Passing => Some(text.to_string()),
            FilterState::Suppressing => None,
            FilterState::Undecided => {
                self.buffer.push_str(text);
                if self.buffer.starts_with(THINKING_MARKER) {
                    self.state = FilterState::Suppressing;
                    self.buffer.clear();
                    None
                } else if THINKING_MARKER.starts_with(self.buffer.as_str()) {
                    // Still a prefix of the marker, keep holding.
                    None
                } else {
                    self.state = FilterState::Passing;
                    Some(std::mem::take(&mut self.buffer))
                }
            }
        }
    }

    /// Block ended before the buffer diverged from the marker prefix.
    fn finish(&mut self) -> Option<String> {
        if self.state == FilterState::Undecided && !self.buffer.is_empty() {
            self.state = FilterState::Passing;
            Some(std::mem::take(&mut self.buffer))
        } else {
            None
        }
    }
}

/// Normalizer for the OpenAI chat-completions dialect, shared by OpenAI
/// proper and the custom gateways.
#[derive(Debug, Default)]
pub struct OpenAiNormalizer {
    calls: CallAccumulator,
}

impl OpenAiNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_frame(&mut self, frame: &SseFrame) -> Result<Vec<UnifiedEvent>> {
        if frame.data.trim() == "[DONE]" {
            return Ok(vec![UnifiedEvent::Done]);
        }

        let value: serde_json::Value = match serde_json::from_str(&frame.data) {
            Ok(value) => value,
            Err(_) => {
                debug!(data = %first_n_chars_lossy(&frame.data, 200), "skipping malformed stream frame");
                return Ok(Vec::new());
            }
        };

        // An error body can arrive as a regular frame mid-stream; it would
        // otherwise deserialize as an empty chunk and vanish.
        if value.get("error").map(|e| !e.is_null()).unwrap_or(false) {
            let body: OpenAiErrorBody = serde_json::from_value(value.clone()).unwrap_or(
                OpenAiErrorBody { error: None },
            );
            let message = match body.error {
                Some(detail) => match detail.message {
                    Some(m) => m,
                    None => match detail.code {
                        Some(code) => code.to_string(),
                        None => "unknown provider error".to_string(),
                    },
                },
                None => value["error"].to_string(),
            };
            return Err(PrismError::Api(message).into());
        }

        let chunk: OpenAiChunk = match serde_json::from_value(value) {
            Ok(chunk) => chunk,
            Err(_) => {
                debug!(data = %first_n_chars_lossy(&frame.data, 200), "skipping malformed stream frame");
                return Ok(Vec::new());
            }
        };

        let mut events = Vec::new();

        if let Some(usage) = chunk.usage {
            events.push(UnifiedEvent::Usage {
                input: usage.prompt_tokens,
                output: usage.completion_tokens,
            });
        }

        for choice in &chunk.choices {
            if let Some(content) = &choice.delta.content {
                if !content.is_empty() {
                    events.push(UnifiedEvent::Token(content.clone()));
                }
            }
            if let Some(deltas) = &choice.delta.tool_calls {
                for delta in deltas {
                    self.push_tool_delta(delta);
                }
            }
        }

        Ok(events)
    }

    fn push_tool_delta(&mut self, delta: &OpenAiToolCallDelta) {
        let function = delta.function.clone().unwrap_or_default();
        if delta.id.is_some() || function.name.is_some() {
            let name = match &function.name {
                Some(name) => name.as_str(),
                None => "",
            };
            self.calls.open(delta.index, delta.id.clone(), name);
        }
        if let Some(fragment) = &function.arguments {
            if !fragment.is_empty() {
                self.calls.push_arguments(delta.index, fragment);
            }
        }
    }

    pub fn finish(self) -> Vec<PendingCall> {
        self.calls.finalize()
    }
}

/// Normalizer for the Anthropic messages stream.
#[derive(Debug, Default)]
pub struct AnthropicNormalizer {
    calls: CallAccumulator,
    text_filters: BTreeMap<u32, ThinkingFilter>,
}

impl AnthropicNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_frame(&mut self, frame: &SseFrame) -> Result<Vec<UnifiedEvent>> {
        let event: AnthropicEvent = match serde_json::from_str(&frame.data) {
            Ok(event) => event,
            Err(_) => {
                debug!(data = %first_n_chars_lossy(&frame.data, 200), "skipping malformed stream frame");
                return Ok(Vec::new());
            }
        };

        let mut events = Vec::new();

        match event {
            AnthropicEvent::MessageStart { message } => {
                if let Some(usage) = message.usage {
                    events.push(usage_event(usage.input_tokens, usage.output_tokens));
                }
            }
            AnthropicEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                AnthropicContentBlock::Text { text } => {
                    let filter = self.text_filters.entry(index).or_default();
                    if let Some(out) = filter.push(&text) {
                        if !out.is_empty() {
                            events.push(UnifiedEvent::Token(out));
                        }
                    }
                }
                AnthropicContentBlock::ToolUse { id, name } => {
                    self.calls.open(index, Some(id), &name);
                }
                AnthropicContentBlock::Unknown => {}
            },
            AnthropicEvent::ContentBlockDelta { index, delta } => match delta {
                AnthropicBlockDelta::TextDelta { text } => {
                    let filter = self.text_filters.entry(index).or_default();
                    if let Some(out) = filter.push(&text) {
                        if !out.is_empty() {
                            events.push(UnifiedEvent::Token(out));
                        }
                    }
                }
                AnthropicBlockDelta::InputJsonDelta { partial_json } => {
                    self.calls.push_arguments(index, &partial_json);
                }
                AnthropicBlockDelta::Unknown => {}
            },
            AnthropicEvent::ContentBlockStop { index } => {
                if let Some(mut filter) = self.text_filters.remove(&index) {
                    if let Some(out) = filter.finish() {
                        events.push(UnifiedEvent::Token(out));
                    }
                }
            }
            AnthropicEvent::MessageDelta { usage } => {
                if let Some(usage) = usage {
                    events.push(usage_event(usage.input_tokens, usage.output_tokens));
                }
            }
            AnthropicEvent::MessageStop => events.push(UnifiedEvent::Done),
            AnthropicEvent::Error { error } => {
                let message = match error.message {
                    Some(m) => m,
                    None => "unknown provider error".to_string(),
                };
                return Err(PrismError::Api(message).into());
            }
            AnthropicEvent::Ping | AnthropicEvent::Unknown => {}
        }

        Ok(events)
    }

    pub fn finish(self) -> Vec<PendingCall> {
        self.calls.finalize()
    }
}

/// Normalizer for the Cohere chat stream. Tool calls arrive whole in the
/// stream-end event rather than as fragments.
#[derive(Debug, Default)]
pub struct CohereNormalizer {
    calls: Vec<PendingCall>,
}

impl CohereNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle_frame(&mut self, frame: &SseFrame) -> Result<Vec<UnifiedEvent>> {
        let event: CohereEvent = match serde_json::from_str(&frame.data) {
            Ok(event) => event,
            Err(_) => {
                debug!(data = %first_n_chars_lossy(&frame.data, 200), "skipping malformed stream frame");
                return Ok(Vec::new());
            }
        };

        let mut events = Vec::new();

        match event {
            CohereEvent::StreamStart | CohereEvent::Unknown => {}
            CohereEvent::TextGeneration { text } => {
                if !text.is_empty() {
                    events.push(UnifiedEvent::Token(text));
                }
            }
            CohereEvent::StreamEnd {
                finish_reason,
                response,
            } => {
                if matches!(finish_reason.as_deref(), Some("ERROR" | "ERROR_TOXIC")) {
                    return Err(PrismError::Api(format!(
                        "generation failed: {}",
                        finish_reason.as_deref().unwrap_or("ERROR")
                    ))
                    .into());
                }

                if let Some(response) = response {
                    if let Some(units) = response.meta.and_then(|m| m.billed_units) {
                        events.push(UnifiedEvent::Usage {
                            input: units.input_tokens.unwrap_or(0.0).round() as u64,
                            output: units.output_tokens.unwrap_or(0.0).round() as u64,
                        });
                    }
                    if let Some(tool_calls) = response.tool_calls {
                        for (i, call) in tool_calls.into_iter().enumerate() {
                            self.calls.push(PendingCall {
                                id: format!("call_{i}"),
                                name: call.name,
                                arguments: call.parameters,
                            });
                        }
                    }
                }

                events.push(UnifiedEvent::Done);
            }
        }

        Ok(events)
    }

    pub fn finish(self) -> Vec<PendingCall> {
        if !self.calls.is_empty() {
            debug!(count = self.calls.len(), "captured stream-end tool calls");
        }
        self.calls
    }
}

fn usage_event(input: Option<u64>, output: Option<u64>) -> UnifiedEvent {
    let input = match input {
        Some(n) => n,
        None => 0,
    };
    let output = match output {
        Some(n) => n,
        None => 0,
    };
    UnifiedEvent::Usage { input, output }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(data: &str) -> SseFrame {
        SseFrame {
            event: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn openai_text_deltas_concatenate() {
        let mut n = OpenAiNormalizer::new();
        let mut out = String::new();
        for data in [
            r#"{"choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"content":"lo"},"finish_reason":null}]}"#,
        ] {
            for ev in n.handle_frame(&frame(data)).unwrap() {
                if let UnifiedEvent::Token(t) = ev {
                    out.push_str(&t);
                }
            }
        }
        assert_eq!(out, "Hello");
    }

    #[test]
    fn openai_tool_call_rebuilt_from_three_deltas() {
        let mut n = OpenAiNormalizer::new();
        let frames = [
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_abc","function":{"name":"web_search","arguments":""}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"query\":"}}]},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\"rust\"}"}}]},"finish_reason":"tool_calls"}]}"#,
        ];
        for data in frames {
            n.handle_frame(&frame(data)).unwrap();
        }
        let calls = n.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_abc");
        assert_eq!(calls[0].name, "web_search");
        assert_eq!(calls[0].arguments["query"], "rust");
    }

    #[test]
    fn openai_usage_frame_becomes_usage_event() {
        let mut n = OpenAiNormalizer::new();
        let events = n
            .handle_frame(&frame(
                r#"{"choices":[],"usage":{"prompt_tokens":12,"completion_tokens":7}}"#,
            ))
            .unwrap();
        assert_eq!(
            events,
            vec![UnifiedEvent::Usage {
                input: 12,
                output: 7
            }]
        );
    }

    #[test]
    fn openai_error_frame_fails_the_stream() {
        let mut n = OpenAiNormalizer::new();
        let err = n
            .handle_frame(&frame(r#"{"error":{"message":"rate limited"}}"#))
            .unwrap_err();
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn anthropic_usage_is_emitted_at_start_and_delta() {
        let mut n = AnthropicNormalizer::new();
        let start = n
            .handle_frame(&frame(
                r#"{"type":"message_start","message":{"usage":{"input_tokens":100,"output_tokens":1}}}"#,
            ))
            .unwrap();
        let delta = n
            .handle_frame(&frame(
                r#"{"type":"message_delta","usage":{"output_tokens":42}}"#,
            ))
            .unwrap();
        assert_eq!(
            start,
            vec![UnifiedEvent::Usage {
                input: 100,
                output: 1
            }]
        );
        assert_eq!(
            delta,
            vec![UnifiedEvent::Usage {
                input: 0,
                output: 42
            }]
        );
    }

    #[test]
    fn anthropic_thinking_block_is_suppressed() {
        let mut n = AnthropicNormalizer::new();
        let mut tokens = Vec::new();
        let frames = [
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"<think"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"ing>private"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"text","text":"visible"}}"#,
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"text_delta","text":" text"}}"#,
            r#"{"type":"content_block_stop","index":1}"#,
        ];
        for data in frames {
            for ev in n.handle_frame(&frame(data)).unwrap() {
                if let UnifiedEvent::Token(t) = ev {
                    tokens.push(t);
                }
            }
        }
        assert_eq!(tokens.concat(), "visible text");
    }

    #[test]
    fn anthropic_tool_use_block_accumulates_input_json() {
        let mut n = AnthropicNormalizer::new();
        let frames = [
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"toolu_1","name":"generate_image"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"prompt\":"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"\"a cat\"}"}}"#,
            r#"{"type":"message_stop"}"#,
        ];
        for data in frames {
            n.handle_frame(&frame(data)).unwrap();
        }
        let calls = n.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "toolu_1");
        assert_eq!(calls[0].arguments["prompt"], "a cat");
    }

    #[test]
    fn anthropic_short_text_block_is_not_swallowed() {
        let mut n = AnthropicNormalizer::new();
        let mut tokens = Vec::new();
        let frames = [
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":"<"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
        ];
        for data in frames {
            for ev in n.handle_frame(&frame(data)).unwrap() {
                if let UnifiedEvent::Token(t) = ev {
                    tokens.push(t);
                }
            }
        }
        assert_eq!(tokens.concat(), "<");
    }

    #[test]
    fn cohere_stream_end_yields_usage_calls_and_done() {
        let mut n = CohereNormalizer::new();
        let events = n
            .handle_frame(&frame(
                r#"{"event_type":"stream-end","finish_reason":"COMPLETE","response":{"meta":{"billed_units":{"input_tokens":30.0,"output_tokens":11.0}},"tool_calls":[{"name":"web_search","parameters":{"query":"rust"}}]}}"#,
            ))
            .unwrap();
        assert_eq!(
            events,
            vec![
                UnifiedEvent::Usage {
                    input: 30,
                    output: 11
                },
                UnifiedEvent::Done
            ]
        );
        let calls = n.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "web_search");
    }

    #[test]
    fn malformed_frames_are_skipped() {
        let mut n = OpenAiNormalizer::new();
        assert!(n.handle_frame(&frame("not json")).unwrap().is_empty());
    }

    #[test]
    fn unparseable_arguments_fall_back_to_empty_object() {
        let mut acc = CallAccumulator::default();
        acc.open(0, None, "web_search");
        acc.push_arguments(0, "}}broken{{");
        let calls = acc.finalize();
        assert_eq!(calls[0].arguments, serde_json::json!({}));
        assert_eq!(calls[0].id, "call_0");
    }
}
