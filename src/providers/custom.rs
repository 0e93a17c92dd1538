//! Custom OpenAI-compatible gateway service.
//!
//! Speaks the chat-completions dialect against a configured server URL. The
//! routing key is "server-id/model-name"; only the bare model name goes on
//! the wire. Gateway keys are workspace-supplied, so generations bill zero.

use crate::client::HttpClient;
use crate::config::CustomServerConfig;
use crate::files::FileStore;
use crate::history::QuoteStyle;
use crate::providers::openai::ChatDialect;
use crate::providers::{ChunkSender, GenerationRequest, MessageService};
use crate::tools::ToolRegistry;
use crate::types::{CostLedger, Result};
use async_trait::async_trait;
use std::sync::Arc;

pub struct CustomMessageService {
    dialect: ChatDialect,
    model_keys: Vec<String>,
}

impl CustomMessageService {
    pub fn new(
        config: &CustomServerConfig,
        files: Arc<dyn FileStore>,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            dialect: ChatDialect {
                client: HttpClient::gateway(config),
                files,
                tools,
            },
            model_keys: config.models.iter().map(|m| m.key.clone()).collect(),
        }
    }
}

#[async_trait]
impl MessageService for CustomMessageService {
    fn supports_model(&self, model: &crate::types::Model) -> bool {
        self.model_keys.iter().any(|k| k == model.as_str())
    }

    fn quote_style(&self) -> QuoteStyle {
        QuoteStyle::SystemNote
    }

    fn has_custom_key(&self) -> bool {
        true
    }

    async fn stream_message(
        &self,
        request: &GenerationRequest<'_>,
        ledger: &mut CostLedger,
        tx: &ChunkSender,
    ) -> Result<()> {
        let wire_model = request.model.bare_name();
        let url = self.dialect.client.endpoint("", wire_model);
        self.dialect
            .stream_message(request, wire_model, &url, self.quote_style(), ledger, tx)
            .await
    }
}
