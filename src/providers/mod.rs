//! Provider message services.
//!
//! One service per provider family. Each owns request assembly in its wire
//! dialect, stream normalization, and the single tool resubmission pass; the
//! engine owns routing, ledger finalization, and the output channels.

pub mod anthropic;
pub mod cohere;
pub mod custom;
pub mod openai;

use crate::history::QuoteStyle;
use crate::normalize::PendingCall;
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{
    AssistantProfile, Call, Chunk, Conversation, CostLedger, FileRef, MessageId, Model, Result,
};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

pub type ChunkSender = mpsc::Sender<Result<Chunk>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Everything a provider needs to produce one assistant turn.
pub struct GenerationRequest<'a> {
    pub model: Model,
    pub conversation: &'a Conversation,
    pub from: MessageId,
    pub profile: &'a AssistantProfile,
    pub params: GenerationParams,
    /// Resolved by the engine from model capabilities; when false the
    /// provider must not attach tool definitions.
    pub allow_tools: bool,
}

#[async_trait]
pub trait MessageService: Send + Sync {
    fn supports_model(&self, model: &Model) -> bool;

    fn quote_style(&self) -> QuoteStyle;

    fn has_custom_key(&self) -> bool;

    /// Streams one assistant turn into `tx`, accumulating usage and tool
    /// cost into `ledger`. Returns once the stream (including any single
    /// tool resubmission pass) has ended. A closed receiver means the caller
    /// cancelled; stop quietly.
    async fn stream_message(
        &self,
        request: &GenerationRequest<'_>,
        ledger: &mut CostLedger,
        tx: &ChunkSender,
    ) -> Result<()>;
}

/// A tool call that has been executed and owes the provider its result.
pub struct ExecutedCall {
    pub call: PendingCall,
    pub content: String,
}

/// Runs the resolved calls in order. Unknown names are dropped without a
/// trace in the resubmission payload; each known call is announced as a
/// `Call` chunk before execution, and any produced library item follows as
/// its own chunk.
pub async fn run_pending_calls(
    registry: &ToolRegistry,
    ctx: &ToolContext<'_>,
    calls: Vec<PendingCall>,
    ledger: &mut CostLedger,
    tx: &ChunkSender,
) -> Result<Vec<ExecutedCall>> {
    let mut executed = Vec::new();

    for pending in calls {
        let tool = match registry.find(&pending.name) {
            Some(tool) => tool.clone(),
            None => {
                debug!(name = %pending.name, "ignoring unknown tool call");
                continue;
            }
        };

        let announce = Chunk::Call(Call::new(pending.name.clone(), pending.arguments.clone()));
        if tx.send(Ok(announce)).await.is_err() {
            return Ok(executed);
        }

        info!(name = %pending.name, "executing tool");
        let response = tool.call(ctx, &pending.arguments).await?;
        ledger.add_tool_cost(response.cost);

        if let Some(item) = response.item {
            if tx.send(Ok(Chunk::Item(item))).await.is_err() {
                return Ok(executed);
            }
        }

        executed.push(ExecutedCall {
            call: pending,
            content: response.content,
        });
    }

    Ok(executed)
}

/// System notes appended after the assistant instructions: uploaded files the
/// model should know about, and a nudge toward the knowledge base when the
/// assistant carries a dataset.
pub fn context_notes(profile: &AssistantProfile, files: &[FileRef]) -> Vec<String> {
    let mut notes = Vec::new();

    if !files.is_empty() {
        let names: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        notes.push(format!(
            "The user has uploaded the following files to the conversation: {}",
            names.join(", ")
        ));
    }

    if profile.has_dataset() {
        notes.push(
            "Use the knowledge_base tool to look up information relevant to the user's request."
                .to_string(),
        );
    }

    notes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CreditCount, FileRef};

    #[tokio::test]
    async fn unknown_tools_are_skipped_silently() {
        let registry = ToolRegistry::new();
        let profile = AssistantProfile::default();
        let ctx = ToolContext {
            profile: &profile,
            files: &[],
        };
        let (tx, mut rx) = mpsc::channel(8);
        let mut ledger = CostLedger::new();

        let calls = vec![PendingCall {
            id: "call_0".to_string(),
            name: "nonexistent".to_string(),
            arguments: serde_json::json!({}),
        }];
        let executed = run_pending_calls(&registry, &ctx, calls, &mut ledger, &tx)
            .await
            .unwrap();

        assert!(executed.is_empty());
        assert!(ledger.tool_cost.is_zero());
        drop(tx);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn context_notes_cover_files_and_dataset() {
        let profile = AssistantProfile {
            instructions: None,
            dataset: vec![crate::types::KnowledgeEmbedding {
                content: "fact".to_string(),
                vector: vec![1.0],
            }],
        };
        let files = vec![FileRef::new("report.pdf", "pdf")];
        let notes = context_notes(&profile, &files);
        assert_eq!(notes.len(), 2);
        assert!(notes[0].contains("report.pdf"));
        assert!(notes[1].contains("knowledge_base"));
    }

    #[test]
    fn credit_count_zero_is_default_tool_cost() {
        assert_eq!(CostLedger::new().tool_cost, CreditCount::zero());
    }
}
