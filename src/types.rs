use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;
use uuid::Uuid;

/// Opaque model identifier, used as the routing key for provider and pricing
/// lookup (e.g. "gpt-4o", "claude-3-5-sonnet-latest").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Model(pub String);

impl Model {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Custom gateway models are prefixed with the server id ("ollama/llama3").
    /// The wire payload only carries the part after the first slash.
    pub fn bare_name(&self) -> &str {
        match self.0.split_once('/') {
            Some((_, rest)) => rest,
            None => &self.0,
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Model {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub Uuid);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConversationId(pub Uuid);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct UserId(pub Uuid);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkspaceId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        crate::str_utils::prefix_chars(&self.0.simple().to_string(), 8).to_string()
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn short(&self) -> String {
        crate::str_utils::prefix_chars(&self.0.simple().to_string(), 6).to_string()
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// Billable credit amount. Non-negative and additive; the unit of everything
/// the platform charges for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, PartialOrd, Default)]
pub struct CreditCount(f64);

impl CreditCount {
    pub fn new(value: f64) -> Self {
        Self(value.max(0.0))
    }

    pub fn zero() -> Self {
        Self(0.0)
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0.0
    }

    pub fn add(&self, other: CreditCount) -> CreditCount {
        CreditCount(self.0 + other.0)
    }
}

impl fmt::Display for CreditCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// Input/output token counters for a single logical generation. Providers emit
/// usage at different points in the stream (start, end, or both); every
/// emission is a delta and is added, never overwritten.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add_input(&mut self, delta: u64) {
        self.input_tokens += delta;
    }

    pub fn add_output(&mut self, delta: u64) {
        self.output_tokens += delta;
    }
}

/// Running cost state for one generation: token counters accumulated across
/// every provider round-trip plus the summed cost of executed tools. Owned
/// exclusively by the generation's control flow and discarded once the final
/// credit cost is computed.
#[derive(Debug, Clone, Default)]
pub struct CostLedger {
    pub usage: TokenUsage,
    pub tool_cost: CreditCount,
}

impl CostLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tool_cost(&mut self, cost: CreditCount) {
        self.tool_cost = self.tool_cost.add(cost);
    }
}

/// A named tool invocation request with its decoded JSON arguments. Emitted
/// transiently during generation; never persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Call {
    pub name: String,
    pub arguments: serde_json::Value,
}

impl Call {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// A finished artifact produced mid-generation by a tool (e.g. a generated
/// image), surfaced to the caller as its own chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LibraryItem {
    pub id: Uuid,
    pub kind: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LibraryItem {
    pub fn image(url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: "image".to_string(),
            url: url.into(),
            title: None,
            created_at: Utc::now(),
        }
    }
}

/// One unit of streamed generation output, serialized to the caller as it
/// arrives.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Chunk {
    Token(String),
    Call(Call),
    Item(LibraryItem),
}

impl Chunk {
    pub fn token(s: impl Into<String>) -> Self {
        Chunk::Token(s.into())
    }
}

/// Reference to a stored file. Content is fetched through a
/// [`crate::files::FileStore`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRef {
    pub path: String,
    pub extension: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl FileRef {
    pub fn new(path: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            extension: extension.into(),
            width: None,
            height: None,
        }
    }

    /// Pixel dimensions, when the uploader recorded them. Token estimation
    /// falls back to a flat figure without them.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Media type for inline attachment payloads. "jpg" is normalized to the
    /// registered "jpeg" subtype.
    pub fn media_type(&self) -> String {
        let ext = if self.extension == "jpg" {
            "jpeg"
        } else {
            &self.extension
        };
        format!("image/{}", ext)
    }
}

/// A node in a conversation's message tree. Immutable once stored, except for
/// being referenced as the parent of later messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub quote: Option<String>,
    pub file: Option<FileRef>,
    pub image: Option<FileRef>,
    pub parent_id: Option<MessageId>,
    pub cost: CreditCount,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            quote: None,
            file: None,
            image: None,
            parent_id: None,
            cost: CreditCount::zero(),
        }
    }

    pub fn with_parent(mut self, parent: MessageId) -> Self {
        self.parent_id = Some(parent);
        self
    }
}

/// Owns an ordered collection of messages. Aggregate cost is the sum of all
/// message costs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
        }
    }

    pub fn add_message(&mut self, message: Message) -> MessageId {
        let id = message.id;
        self.messages.push(message);
        id
    }

    pub fn find(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn total_cost(&self) -> CreditCount {
        self.messages
            .iter()
            .fold(CreditCount::zero(), |acc, m| acc.add(m.cost))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UserId(Uuid::new_v4()),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub total_credits: CreditCount,
}

impl Workspace {
    pub fn new(total_credits: CreditCount) -> Self {
        Self {
            id: WorkspaceId(Uuid::new_v4()),
            total_credits,
        }
    }

    pub fn deduct_credit(&mut self, amount: CreditCount) {
        self.total_credits = CreditCount::new(self.total_credits.value() - amount.value());
    }
}

/// Precomputed embedding of one knowledge-base unit, consulted by the
/// knowledge-base tool via cosine similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeEmbedding {
    pub content: String,
    pub vector: Vec<f32>,
}

/// Assistant persona attached to a conversation: system instructions plus an
/// optional embedded dataset.
#[derive(Debug, Clone, Default)]
pub struct AssistantProfile {
    pub instructions: Option<String>,
    pub dataset: Vec<KnowledgeEmbedding>,
}

impl AssistantProfile {
    pub fn has_dataset(&self) -> bool {
        !self.dataset.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum PrismError {
    /// Upstream provider returned an error status or an explicit error-type
    /// stream event. The message is provider-supplied where available.
    #[error("Provider API error: {0}")]
    Api(String),

    #[error("Model not supported: {0}")]
    ModelNotSupported(String),

    #[error("Invalid request: {0}")]
    Domain(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String, SpanTrace),
}

/// Error wrapper that captures the span trace at the point of conversion.
#[derive(Debug)]
pub struct ObservedError {
    pub inner: PrismError,
    pub span_trace: SpanTrace,
}

impl fmt::Display for ObservedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n\nSpan Trace:\n{}", self.inner, self.span_trace)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<PrismError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;
