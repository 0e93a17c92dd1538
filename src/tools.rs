//! Tool surface for the generation loop.
//!
//! Tools are named capabilities the model may request mid-generation. Each
//! one advertises a JSON-schema parameter block (providers reshape it to
//! their own dialect) and returns a textual result, a credit cost, and
//! optionally a library item to surface to the caller.

use crate::client::HttpClient;
use crate::cost;
use crate::embedding::Embedder;
use crate::specs::openai::{OpenAiImagesRequest, OpenAiImagesResponse};
use crate::types::{
    AssistantProfile, CreditCount, FileRef, LibraryItem, Model, PrismError, Result,
};
use async_trait::async_trait;
use reqwest::Method;
use std::sync::Arc;
use tracing::info;

/// Result of one tool invocation.
#[derive(Debug, Clone)]
pub struct CallResponse {
    pub content: String,
    pub cost: CreditCount,
    pub item: Option<LibraryItem>,
}

impl CallResponse {
    pub fn text(content: impl Into<String>, cost: CreditCount) -> Self {
        Self {
            content: content.into(),
            cost,
            item: None,
        }
    }
}

/// Ambient state a tool may consult: the assistant's dataset and the files
/// collected from the conversation walk.
pub struct ToolContext<'a> {
    pub profile: &'a AssistantProfile,
    pub files: &'a [FileRef],
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON-schema object describing the arguments.
    fn parameters(&self) -> serde_json::Value;
    async fn call(&self, ctx: &ToolContext<'_>, args: &serde_json::Value) -> Result<CallResponse>;
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.iter()
    }
}

/// Ranks the assistant's dataset against the query embedding and returns the
/// best-matching units.
pub struct KnowledgeBaseTool {
    embedder: Arc<dyn Embedder>,
}

pub const KNOWLEDGE_BASE_TOOL: &str = "knowledge_base";
const KNOWLEDGE_BASE_TOP_K: usize = 5;

impl KnowledgeBaseTool {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl Tool for KnowledgeBaseTool {
    fn name(&self) -> &str {
        KNOWLEDGE_BASE_TOOL
    }

    fn description(&self) -> &str {
        "Searches the assistant's knowledge base for information relevant to the query."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query."
                }
            },
            "required": ["query"]
        })
    }

    async fn call(&self, ctx: &ToolContext<'_>, args: &serde_json::Value) -> Result<CallResponse> {
        let query = match args.get("query").and_then(|q| q.as_str()) {
            Some(q) => q,
            None => return Err(PrismError::Domain("knowledge_base requires a query".into()).into()),
        };

        let embedded = self.embedder.embed(query).await?;

        let mut scored: Vec<(f32, &str)> = ctx
            .profile
            .dataset
            .iter()
            .map(|unit| {
                (
                    cosine_similarity(&embedded.vector, &unit.vector),
                    unit.content.as_str(),
                )
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let top: Vec<&str> = scored
            .iter()
            .take(KNOWLEDGE_BASE_TOP_K)
            .map(|(_, content)| *content)
            .collect();

        info!(matches = top.len(), "knowledge base lookup");
        Ok(CallResponse::text(
            serde_json::to_string(&top).map_err(PrismError::Serialization)?,
            embedded.cost,
        ))
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Generates an image through the images endpoint; billed at the model's
/// flat per-call rate and surfaced to the caller as a library item.
pub struct GenerateImageTool {
    client: HttpClient,
    model: Model,
}

pub const GENERATE_IMAGE_TOOL: &str = "generate_image";

impl GenerateImageTool {
    pub fn new(client: HttpClient, model: Model) -> Self {
        Self { client, model }
    }

    /// Requests a variation of an uploaded image through the multipart
    /// variations endpoint. Driven by the caller rather than the model;
    /// billed like a generation call.
    pub async fn create_variation(&self, image: Vec<u8>, file_name: &str) -> Result<CallResponse> {
        let part = reqwest::multipart::Part::bytes(image)
            .file_name(file_name.to_string())
            .mime_str("image/png")
            .map_err(PrismError::Network)?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.as_str().to_string())
            .part("image", part);

        let url = self
            .client
            .endpoint("/v1/images/variations", self.model.as_str());
        let response = self.client.send_multipart(&url, form).await?;
        let parsed: OpenAiImagesResponse = response.json().await.map_err(PrismError::Network)?;
        self.image_response(parsed)
    }

    fn image_response(&self, parsed: OpenAiImagesResponse) -> Result<CallResponse> {
        let url = parsed
            .data
            .into_iter()
            .next()
            .and_then(|d| d.url)
            .ok_or_else(|| PrismError::Api("images response carried no URL".to_string()))?;

        let cost = if self.client.has_custom_key() {
            CreditCount::zero()
        } else {
            cost::flat_call_cost(&self.model)
        };

        let item = LibraryItem::image(url.clone());
        Ok(CallResponse {
            content: format!("The image was generated and is already visible to the user: {url}"),
            cost,
            item: Some(item),
        })
    }
}

#[async_trait]
impl Tool for GenerateImageTool {
    fn name(&self) -> &str {
        GENERATE_IMAGE_TOOL
    }

    fn description(&self) -> &str {
        "Generates an image from a text prompt and shows it to the user."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Description of the image to generate."
                }
            },
            "required": ["prompt"]
        })
    }

    async fn call(&self, _ctx: &ToolContext<'_>, args: &serde_json::Value) -> Result<CallResponse> {
        let prompt = match args.get("prompt").and_then(|p| p.as_str()) {
            Some(p) => p,
            None => {
                return Err(PrismError::Domain("generate_image requires a prompt".into()).into())
            }
        };

        let body = OpenAiImagesRequest {
            model: self.model.as_str().to_string(),
            prompt: prompt.to_string(),
            size: None,
        };
        let url = self
            .client
            .endpoint("/v1/images/generations", self.model.as_str());
        let response = self.client.send_request(Method::POST, &url, &body).await?;
        let parsed: OpenAiImagesResponse = response.json().await.map_err(PrismError::Network)?;
        self.image_response(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingResponse;
    use crate::types::KnowledgeEmbedding;

    struct FixedEmbedder {
        vector: Vec<f32>,
        cost: CreditCount,
    }

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<EmbeddingResponse> {
            Ok(EmbeddingResponse {
                vector: self.vector.clone(),
                cost: self.cost,
            })
        }
    }

    #[test]
    fn cosine_similarity_basics() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn knowledge_base_returns_best_matches_first() {
        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0, 0.0],
            cost: CreditCount::new(0.5),
        });
        let tool = KnowledgeBaseTool::new(embedder);

        let profile = AssistantProfile {
            instructions: None,
            dataset: vec![
                KnowledgeEmbedding {
                    content: "orthogonal".to_string(),
                    vector: vec![0.0, 1.0],
                },
                KnowledgeEmbedding {
                    content: "aligned".to_string(),
                    vector: vec![1.0, 0.0],
                },
            ],
        };
        let ctx = ToolContext {
            profile: &profile,
            files: &[],
        };

        let response = tool
            .call(&ctx, &serde_json::json!({"query": "anything"}))
            .await
            .unwrap();
        let contents: Vec<String> = serde_json::from_str(&response.content).unwrap();
        assert_eq!(contents[0], "aligned");
        assert_eq!(response.cost, CreditCount::new(0.5));
    }

    #[tokio::test]
    async fn knowledge_base_rejects_missing_query() {
        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0],
            cost: CreditCount::zero(),
        });
        let tool = KnowledgeBaseTool::new(embedder);
        let profile = AssistantProfile::default();
        let ctx = ToolContext {
            profile: &profile,
            files: &[],
        };
        assert!(tool.call(&ctx, &serde_json::json!({})).await.is_err());
    }

    #[test]
    fn image_responses_become_library_items() {
        let tool = GenerateImageTool::new(
            HttpClient::openai("sk-test", false),
            Model::from("dall-e-3"),
        );
        let parsed: OpenAiImagesResponse =
            serde_json::from_str(r#"{"data":[{"url":"https://img.example/cat.png"}]}"#).unwrap();

        let response = tool.image_response(parsed).unwrap();
        assert!(response.content.contains("https://img.example/cat.png"));
        assert_eq!(response.item.unwrap().url, "https://img.example/cat.png");
        assert_eq!(response.cost, cost::flat_call_cost(&Model::from("dall-e-3")));
    }

    #[test]
    fn image_response_without_a_url_is_an_error() {
        let tool = GenerateImageTool::new(
            HttpClient::openai("sk-test", false),
            Model::from("dall-e-3"),
        );
        let parsed: OpenAiImagesResponse = serde_json::from_str(r#"{"data":[]}"#).unwrap();
        assert!(tool.image_response(parsed).is_err());
    }

    #[test]
    fn registry_finds_tools_by_name() {
        let embedder = Arc::new(FixedEmbedder {
            vector: vec![1.0],
            cost: CreditCount::zero(),
        });
        let registry = ToolRegistry::new().register(Arc::new(KnowledgeBaseTool::new(embedder)));
        assert!(registry.find(KNOWLEDGE_BASE_TOOL).is_some());
        assert!(registry.find("nonexistent").is_none());
    }
}
