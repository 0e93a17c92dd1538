//! Text embedding service, used by the knowledge-base tool.

use crate::client::HttpClient;
use crate::cost::{self, Direction};
use crate::specs::openai::{OpenAiEmbeddingsRequest, OpenAiEmbeddingsResponse};
use crate::types::{CreditCount, Model, PrismError, Result};
use async_trait::async_trait;
use reqwest::Method;

#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub vector: Vec<f32>,
    pub cost: CreditCount,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse>;
}

/// OpenAI `/v1/embeddings` client.
pub struct OpenAiEmbedder {
    client: HttpClient,
    model: Model,
}

impl OpenAiEmbedder {
    pub fn new(client: HttpClient, model: Model) -> Self {
        Self { client, model }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingResponse> {
        let body = OpenAiEmbeddingsRequest {
            model: self.model.as_str().to_string(),
            input: text.to_string(),
        };
        let url = self.client.endpoint("/v1/embeddings", self.model.as_str());
        let response = self.client.send_request(Method::POST, &url, &body).await?;
        let parsed: OpenAiEmbeddingsResponse =
            response.json().await.map_err(PrismError::Network)?;

        let vector = match parsed.data.into_iter().next() {
            Some(datum) => datum.embedding,
            None => {
                return Err(
                    PrismError::Api("embeddings response carried no vectors".to_string()).into(),
                )
            }
        };

        let cost = if self.client.has_custom_key() {
            CreditCount::zero()
        } else {
            let tokens = match parsed.usage {
                Some(usage) => usage.prompt_tokens,
                None => 0,
            };
            cost::calculate(tokens, &self.model, Direction::Input)
        };

        Ok(EmbeddingResponse { vector, cost })
    }
}
