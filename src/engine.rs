//! Generation orchestration.
//!
//! The engine routes a request to its provider service, drives the stream on
//! a spawned task, and resolves the final credit cost exactly once when the
//! generation truly ends. Output is split on purpose: chunks arrive over an
//! mpsc channel as they stream, the cost over a oneshot that resolves only
//! after the last chunk. The two are never conflated.

use crate::client::HttpClient;
use crate::config::PrismConfig;
use crate::cost;
use crate::dispatch::{self, ProviderKind};
use crate::files::FileStore;
use crate::providers::anthropic::AnthropicMessageService;
use crate::providers::cohere::CohereMessageService;
use crate::providers::custom::CustomMessageService;
use crate::providers::openai::OpenAiMessageService;
use crate::providers::{GenerationParams, GenerationRequest, MessageService};
use crate::tools::ToolRegistry;
use crate::types::{
    AssistantProfile, Chunk, Conversation, CostLedger, CreditCount, MessageId, Model, PrismError,
    Result,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, info_span, Instrument};

const CHUNK_CHANNEL_CAPACITY: usize = 64;

/// Owned inputs for one generation, movable onto the driver task.
pub struct GenerationSpec {
    pub model: Model,
    pub conversation: Conversation,
    pub from: MessageId,
    pub profile: AssistantProfile,
    pub params: GenerationParams,
}

/// The two outputs of a generation. Dropping `chunks` cancels the stream;
/// `cost` still resolves with whatever was billed up to that point.
#[derive(Debug)]
pub struct GenerationHandle {
    pub chunks: mpsc::Receiver<Result<Chunk>>,
    pub cost: oneshot::Receiver<CreditCount>,
}

impl GenerationHandle {
    /// Splits into a `Stream` of chunks and the cost future, for callers
    /// that want combinators instead of `recv` loops.
    pub fn into_parts(
        self,
    ) -> (
        ReceiverStream<Result<Chunk>>,
        oneshot::Receiver<CreditCount>,
    ) {
        (ReceiverStream::new(self.chunks), self.cost)
    }
}

pub struct Engine {
    config: PrismConfig,
    files: Arc<dyn FileStore>,
    tools: ToolRegistry,
}

impl Engine {
    pub fn new(config: PrismConfig, files: Arc<dyn FileStore>, tools: ToolRegistry) -> Self {
        Self {
            config,
            files,
            tools,
        }
    }

    /// Starts a generation. Routing happens here, before any network call,
    /// so an unsupported model fails synchronously.
    pub fn generate(&self, spec: GenerationSpec) -> Result<GenerationHandle> {
        let kind = dispatch::resolve(&self.config, &spec.model)?;
        let allow_tools = dispatch::supports_tools(&self.config, &spec.model);
        let service = self.service_for(&kind)?;
        if !service.supports_model(&spec.model) {
            return Err(PrismError::ModelNotSupported(spec.model.as_str().to_string()).into());
        }

        info!(model = %spec.model, ?kind, allow_tools, "starting generation");
        Ok(spawn_generation(service, spec, allow_tools))
    }

    /// Conversation title from its opening content. Non-streaming, served by
    /// the OpenAI-compatible side.
    pub async fn generate_title(
        &self,
        content: &str,
        model: &Model,
    ) -> Result<(Option<String>, CreditCount)> {
        match dispatch::resolve(&self.config, model)? {
            ProviderKind::OpenAi => {
                let creds = self.config.openai.as_ref().ok_or_else(|| {
                    PrismError::Domain("OpenAI API key is not configured".into())
                })?;
                let service = OpenAiMessageService::new(
                    HttpClient::openai(&creds.api_key, creds.custom),
                    self.files.clone(),
                    ToolRegistry::new(),
                );
                service.generate_title(content, model).await
            }
            _ => Err(PrismError::Domain(format!(
                "title generation is not supported for model {model}"
            ))
            .into()),
        }
    }

    fn service_for(&self, kind: &ProviderKind) -> Result<Box<dyn MessageService>> {
        match kind {
            ProviderKind::OpenAi => {
                let creds = self.config.openai.as_ref().ok_or_else(|| {
                    PrismError::Domain("OpenAI API key is not configured".into())
                })?;
                Ok(Box::new(OpenAiMessageService::new(
                    HttpClient::openai(&creds.api_key, creds.custom),
                    self.files.clone(),
                    self.tools.clone(),
                )))
            }
            ProviderKind::Anthropic => {
                let creds = self.config.anthropic.as_ref().ok_or_else(|| {
                    PrismError::Domain("Anthropic API key is not configured".into())
                })?;
                Ok(Box::new(AnthropicMessageService::new(
                    HttpClient::anthropic(&creds.api_key, creds.custom),
                    self.files.clone(),
                    self.tools.clone(),
                )))
            }
            ProviderKind::Cohere => {
                let creds = self.config.cohere.as_ref().ok_or_else(|| {
                    PrismError::Domain("Cohere API key is not configured".into())
                })?;
                Ok(Box::new(CohereMessageService::new(
                    HttpClient::cohere(&creds.api_key, creds.custom),
                    self.files.clone(),
                    self.tools.clone(),
                )))
            }
            ProviderKind::Custom(id) => {
                let server = self.config.custom_server(id).ok_or_else(|| {
                    PrismError::Domain(format!("custom server {id} is not configured"))
                })?;
                Ok(Box::new(CustomMessageService::new(
                    server,
                    self.files.clone(),
                    self.tools.clone(),
                )))
            }
        }
    }
}

/// Drives one generation on its own task. The cost oneshot resolves exactly
/// once, after the stream has ended, whether it ended cleanly, with an
/// error, or by cancellation. Usage accrued before a failure is still
/// billed.
pub(crate) fn spawn_generation(
    service: Box<dyn MessageService>,
    spec: GenerationSpec,
    allow_tools: bool,
) -> GenerationHandle {
    let (tx, rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
    let (cost_tx, cost_rx) = oneshot::channel();

    let span = info_span!(
        "generation",
        model = %spec.model,
        conversation = %spec.conversation.id.short(),
        from = %spec.from.short(),
    );
    tokio::spawn(
        async move {
            let mut ledger = CostLedger::new();
            let request = GenerationRequest {
                model: spec.model.clone(),
                conversation: &spec.conversation,
                from: spec.from,
                profile: &spec.profile,
                params: spec.params,
                allow_tools,
            };

            let outcome = service.stream_message(&request, &mut ledger, &tx).await;

            let cost = cost::final_cost(&ledger, &spec.model, service.has_custom_key());
            if let Err(e) = outcome {
                error!(error = %e, "generation failed");
                let _ = tx.send(Err(e)).await;
            }
            info!(
                input_tokens = ledger.usage.input_tokens,
                output_tokens = ledger.usage.output_tokens,
                cost = %cost,
                "generation finished"
            );
            let _ = cost_tx.send(cost);
        }
        .instrument(span),
    );

    GenerationHandle {
        chunks: rx,
        cost: cost_rx,
    }
}
