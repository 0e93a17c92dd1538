//! Message history construction.
//!
//! A conversation is a tree linked by parent ids; a generation's context is
//! the chain from the newest message back toward the root. The walk stops at
//! the message cap, the token budget, or the root, whichever comes first.
//! Messages with no textual content are traversed for their attachments but
//! contribute nothing to the transcript.

use crate::files::FileStore;
use crate::tokenizer::TokenEstimator;
use crate::types::{Conversation, FileRef, Message, MessageId, Role};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::debug;

pub const MAX_MESSAGES: usize = 20;
pub const MAX_IMAGES: usize = 2;
pub const MAX_CONTEXT_TOKENS: usize = 200_000;

const QUOTE_PREFIX: &str = "The user is referring to this in particular:\n";

/// How a message's quoted excerpt reaches the provider. Anthropic and Cohere
/// take it appended to the message text; OpenAI-compatible providers take a
/// separate system note adjacent to the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    Inline,
    SystemNote,
}

/// Image attachment inlined as base64 for the request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub media_type: String,
    pub data_b64: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryMessage {
    pub role: Role,
    pub text: String,
    pub images: Vec<InlineImage>,
}

/// Chronological transcript plus every file reference seen along the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltHistory {
    pub messages: Vec<HistoryMessage>,
    pub files: Vec<FileRef>,
}

pub struct HistoryBuilder<'a> {
    files: &'a dyn FileStore,
    max_messages: usize,
    max_images: usize,
    max_tokens: usize,
    quote_style: QuoteStyle,
}

impl<'a> HistoryBuilder<'a> {
    pub fn new(files: &'a dyn FileStore, quote_style: QuoteStyle) -> Self {
        Self {
            files,
            max_messages: MAX_MESSAGES,
            max_images: MAX_IMAGES,
            max_tokens: MAX_CONTEXT_TOKENS,
            quote_style,
        }
    }

    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = max;
        self
    }

    pub fn with_max_tokens(mut self, max: usize) -> Self {
        self.max_tokens = max;
        self
    }

    /// Builds the transcript ending at `from`. Deterministic for a fixed
    /// conversation and file store.
    pub fn build(&self, conversation: &Conversation, from: MessageId) -> BuiltHistory {
        // Collected newest-first, reversed at the end.
        let mut collected: Vec<CollectedMessage> = Vec::new();
        let mut files: Vec<FileRef> = Vec::new();
        let mut tokens = 0usize;
        let mut images_used = 0usize;

        let mut cursor = conversation.find(from);
        while let Some(message) = cursor {
            if message.content.is_empty() {
                // Attachment-only node: harvest files, accumulate nothing.
                if let Some(file) = &message.file {
                    files.push(file.clone());
                }
                cursor = message.parent_id.and_then(|id| conversation.find(id));
                continue;
            }

            if collected.len() >= self.max_messages {
                break;
            }

            let estimate = TokenEstimator::estimate_message_tokens(message);
            if !collected.is_empty() && tokens + estimate > self.max_tokens {
                debug!(tokens, estimate, "token budget reached, truncating history");
                break;
            }
            tokens += estimate;

            if let Some(file) = &message.file {
                files.push(file.clone());
            }

            let image = if images_used < self.max_images {
                match self.inline_image(message) {
                    Some(image) => {
                        images_used += 1;
                        Some(image)
                    }
                    None => None,
                }
            } else {
                None
            };

            collected.push(self.render(message, image));
            cursor = message.parent_id.and_then(|id| conversation.find(id));
        }

        let mut messages: Vec<HistoryMessage> = Vec::new();
        for item in collected.into_iter().rev() {
            messages.push(item.message);
            if let Some(note) = item.quote_note {
                messages.push(HistoryMessage {
                    role: Role::System,
                    text: note,
                    images: Vec::new(),
                });
            }
        }

        // Providers reject transcripts that do not open with a user turn.
        if messages.first().map(|m| m.role) != Some(Role::User) {
            messages.insert(
                0,
                HistoryMessage {
                    role: Role::User,
                    text: "-".to_string(),
                    images: Vec::new(),
                },
            );
        }

        files.reverse();
        BuiltHistory { messages, files }
    }

    fn render(&self, message: &Message, image: Option<InlineImage>) -> CollectedMessage {
        let mut text = message.content.clone();
        let mut quote_note = None;

        if let Some(quote) = &message.quote {
            match self.quote_style {
                QuoteStyle::Inline => {
                    text.push_str("\n\n");
                    text.push_str(QUOTE_PREFIX);
                    text.push_str(quote);
                }
                QuoteStyle::SystemNote => {
                    quote_note = Some(format!("{QUOTE_PREFIX}{quote}"));
                }
            }
        }

        CollectedMessage {
            message: HistoryMessage {
                role: message.role,
                text,
                images: image.into_iter().collect(),
            },
            quote_note,
        }
    }

    /// Unreadable attachments are dropped, never fatal.
    fn inline_image(&self, message: &Message) -> Option<InlineImage> {
        let file = message.image.as_ref()?;
        match self.files.get_file_contents(file) {
            Ok(bytes) => Some(InlineImage {
                media_type: file.media_type(),
                data_b64: BASE64.encode(bytes),
            }),
            Err(e) => {
                debug!(path = %file.path, error = %e, "skipping unreadable image attachment");
                None
            }
        }
    }
}

struct CollectedMessage {
    message: HistoryMessage,
    quote_note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::testing::MemoryFileStore;
    use crate::types::{Conversation, Message, Role};

    fn chain(count: usize) -> Conversation {
        let mut conv = Conversation::new();
        let mut parent = None;
        for i in 0..count {
            let role = if i % 2 == 0 {
                Role::User
            } else {
                Role::Assistant
            };
            let mut message = Message::new(role, format!("message {i}"));
            message.parent_id = parent;
            parent = Some(conv.add_message(message));
        }
        conv
    }

    fn last_id(conv: &Conversation) -> MessageId {
        conv.last_message().unwrap().id
    }

    #[test]
    fn caps_at_twenty_most_recent_messages() {
        let store = MemoryFileStore::default();
        let conv = chain(25);
        let history = HistoryBuilder::new(&store, QuoteStyle::Inline).build(&conv, last_id(&conv));

        assert_eq!(history.messages.len(), 21);
        assert_eq!(history.messages[0].text, "-");
        assert_eq!(history.messages[1].text, "message 5");
        assert_eq!(history.messages.last().unwrap().text, "message 24");
    }

    #[test]
    fn opens_with_user_turn_even_after_truncation() {
        let store = MemoryFileStore::default();
        let conv = chain(25);
        let history = HistoryBuilder::new(&store, QuoteStyle::Inline).build(&conv, last_id(&conv));

        // "message 5" is assistant-role, so a placeholder user turn leads.
        assert_eq!(history.messages[0].role, Role::User);
        assert_eq!(history.messages[0].text, "-");
    }

    #[test]
    fn short_chains_are_untouched() {
        let store = MemoryFileStore::default();
        let conv = chain(4);
        let history = HistoryBuilder::new(&store, QuoteStyle::Inline).build(&conv, last_id(&conv));
        assert_eq!(history.messages.len(), 4);
        assert_eq!(history.messages[0].role, Role::User);
    }

    #[test]
    fn empty_content_messages_yield_files_but_no_turns() {
        let store = MemoryFileStore::default();
        let mut conv = Conversation::new();
        let first = conv.add_message(Message::new(Role::User, "look at this"));

        let mut upload = Message::new(Role::User, "");
        upload.file = Some(FileRef::new("report.pdf", "pdf"));
        upload.parent_id = Some(first);
        let upload_id = conv.add_message(upload);

        let last = Message::new(Role::Assistant, "reading it").with_parent(upload_id);
        let last_id = conv.add_message(last);

        let history = HistoryBuilder::new(&store, QuoteStyle::Inline).build(&conv, last_id);
        assert_eq!(history.messages.len(), 2);
        assert_eq!(history.files.len(), 1);
        assert_eq!(history.files[0].path, "report.pdf");
    }

    #[test]
    fn inline_quote_is_appended_to_the_message() {
        let store = MemoryFileStore::default();
        let mut conv = Conversation::new();
        let mut message = Message::new(Role::User, "what about this part?");
        message.quote = Some("the second paragraph".to_string());
        let id = conv.add_message(message);

        let history = HistoryBuilder::new(&store, QuoteStyle::Inline).build(&conv, id);
        assert_eq!(history.messages.len(), 1);
        assert!(history.messages[0]
            .text
            .ends_with("The user is referring to this in particular:\nthe second paragraph"));
    }

    #[test]
    fn system_note_quote_follows_its_message() {
        let store = MemoryFileStore::default();
        let mut conv = Conversation::new();
        let mut first = Message::new(Role::User, "what about this part?");
        first.quote = Some("the second paragraph".to_string());
        let first_id = conv.add_message(first);
        let reply = Message::new(Role::Assistant, "it says...").with_parent(first_id);
        let reply_id = conv.add_message(reply);

        let history =
            HistoryBuilder::new(&store, QuoteStyle::SystemNote).build(&conv, reply_id);
        assert_eq!(history.messages.len(), 3);
        assert_eq!(history.messages[0].text, "what about this part?");
        assert_eq!(history.messages[1].role, Role::System);
        assert!(history.messages[1].text.contains("the second paragraph"));
        assert_eq!(history.messages[2].text, "it says...");
    }

    #[test]
    fn image_cap_keeps_the_most_recent_two() {
        let store = MemoryFileStore::default()
            .with_file("a.png", b"aaa")
            .with_file("b.png", b"bbb")
            .with_file("c.png", b"ccc");
        let mut conv = Conversation::new();
        let mut parent = None;
        for path in ["a.png", "b.png", "c.png"] {
            let mut message = Message::new(Role::User, format!("see {path}"));
            message.image = Some(FileRef::new(path, "png"));
            message.parent_id = parent;
            parent = Some(conv.add_message(message));
        }

        let history =
            HistoryBuilder::new(&store, QuoteStyle::Inline).build(&conv, parent.unwrap());
        let with_images: Vec<_> = history
            .messages
            .iter()
            .filter(|m| !m.images.is_empty())
            .collect();
        assert_eq!(with_images.len(), 2);
        // Oldest image falls off first.
        assert!(history.messages[0].images.is_empty());
    }

    #[test]
    fn unreadable_image_is_dropped_silently() {
        let store = MemoryFileStore::default();
        let mut conv = Conversation::new();
        let mut message = Message::new(Role::User, "broken upload");
        message.image = Some(FileRef::new("missing.png", "png"));
        let id = conv.add_message(message);

        let history = HistoryBuilder::new(&store, QuoteStyle::Inline).build(&conv, id);
        assert_eq!(history.messages.len(), 1);
        assert!(history.messages[0].images.is_empty());
    }

    #[test]
    fn token_budget_truncates_the_walk() {
        let store = MemoryFileStore::default();
        let mut conv = Conversation::new();
        let mut parent = None;
        for i in 0..5 {
            let mut message = Message::new(Role::User, "x".repeat(300));
            message.content.push_str(&format!(" {i}"));
            message.parent_id = parent;
            parent = Some(conv.add_message(message));
        }

        let history = HistoryBuilder::new(&store, QuoteStyle::Inline)
            .with_max_tokens(250)
            .build(&conv, parent.unwrap());
        assert!(history.messages.len() < 5);
        // The newest message always survives.
        assert!(history.messages.last().unwrap().text.ends_with("4"));
    }

    #[test]
    fn builds_are_deterministic() {
        let store = MemoryFileStore::default();
        let conv = chain(25);
        let builder = HistoryBuilder::new(&store, QuoteStyle::SystemNote);
        let a = builder.build(&conv, last_id(&conv));
        let b = builder.build(&conv, last_id(&conv));
        assert_eq!(a, b);
    }
}
