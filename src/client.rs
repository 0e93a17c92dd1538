//! Provider HTTP transport.
//!
//! One [`HttpClient`] per configured provider endpoint. The client owns
//! authentication and error-body extraction; it performs no retries and no
//! interpretation of successful bodies.

use crate::config::CustomServerConfig;
use crate::specs::openai::OpenAiErrorBody;
use crate::types::{PrismError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use tracing::{debug, warn};

lazy_static! {
    static ref MODEL_PLACEHOLDER: Regex = Regex::new(r"\{model\}").expect("static pattern");
}

const GATEWAY_BAD_KEY_MESSAGE: &str =
    "Incorrect API key provided. Please contact your workspace owner.";

#[derive(Debug, Clone)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>` (OpenAI, Cohere, custom gateways).
    Bearer,
    /// `x-api-key` plus `anthropic-version` headers.
    XApiKey { version: String },
}

#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base_url: String,
    auth: AuthStyle,
    api_key: Option<String>,
    extra_headers: HashMap<String, String>,
    custom_key: bool,
    gateway: bool,
}

impl HttpClient {
    pub fn openai(api_key: impl Into<String>, custom_key: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://api.openai.com".to_string(),
            auth: AuthStyle::Bearer,
            api_key: Some(api_key.into()),
            extra_headers: HashMap::new(),
            custom_key,
            gateway: false,
        }
    }

    pub fn anthropic(api_key: impl Into<String>, custom_key: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://api.anthropic.com".to_string(),
            auth: AuthStyle::XApiKey {
                version: "2023-06-01".to_string(),
            },
            api_key: Some(api_key.into()),
            extra_headers: HashMap::new(),
            custom_key,
            gateway: false,
        }
    }

    pub fn cohere(api_key: impl Into<String>, custom_key: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: "https://api.cohere.ai".to_string(),
            auth: AuthStyle::Bearer,
            api_key: Some(api_key.into()),
            extra_headers: HashMap::new(),
            custom_key,
            gateway: false,
        }
    }

    /// Client for an OpenAI-compatible custom gateway. The configured server
    /// URL is the full endpoint, possibly holding a `{model}` placeholder.
    pub fn gateway(config: &CustomServerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.server.clone(),
            auth: AuthStyle::Bearer,
            api_key: config.key.clone(),
            extra_headers: config.headers.clone(),
            custom_key: true,
            gateway: true,
        }
    }

    /// Workspace-supplied key, so generations through this client bill zero.
    pub fn has_custom_key(&self) -> bool {
        self.custom_key
    }

    /// Endpoint URL with the `{model}` placeholder resolved. Gateways route
    /// per model; first-party clients never carry the placeholder.
    pub fn endpoint(&self, path: &str, model: &str) -> String {
        let url = if self.gateway {
            self.base_url.clone()
        } else {
            format!("{}{}", self.base_url, path)
        };
        MODEL_PLACEHOLDER.replace_all(&url, model).into_owned()
    }

    /// Sends a JSON request and returns the raw response. Non-2xx statuses
    /// become `Api` errors carrying the provider's message.
    pub async fn send_request<B: serde::Serialize + ?Sized>(
        &self,
        method: Method,
        url: &str,
        body: &B,
    ) -> Result<reqwest::Response> {
        debug!(%method, %url, "dispatching provider request");

        let mut request = self.http.request(method, url).headers(self.headers()?);
        request = request.json(body);

        let response = request.send().await.map_err(PrismError::Network)?;
        self.check_status(response).await
    }

    /// Multipart variant for binary uploads (image edit/variation
    /// endpoints).
    pub async fn send_multipart(
        &self,
        url: &str,
        form: reqwest::multipart::Form,
    ) -> Result<reqwest::Response> {
        debug!(%url, "dispatching multipart provider request");
        let response = self
            .http
            .post(url)
            .headers(self.headers()?)
            .multipart(form)
            .send()
            .await
            .map_err(PrismError::Network)?;
        self.check_status(response).await
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        match (&self.auth, &self.api_key) {
            (AuthStyle::Bearer, Some(key)) => {
                let value = HeaderValue::from_str(&format!("Bearer {key}"))
                    .map_err(|_| PrismError::Domain("API key is not header-safe".into()))?;
                headers.insert(reqwest::header::AUTHORIZATION, value);
            }
            (AuthStyle::XApiKey { version }, Some(key)) => {
                let value = HeaderValue::from_str(key)
                    .map_err(|_| PrismError::Domain("API key is not header-safe".into()))?;
                headers.insert(HeaderName::from_static("x-api-key"), value);
                headers.insert(
                    HeaderName::from_static("anthropic-version"),
                    HeaderValue::from_str(version)
                        .map_err(|_| PrismError::Domain("bad anthropic version".into()))?,
                );
            }
            (_, None) => {}
        }

        for (name, value) in &self.extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| PrismError::Domain(format!("invalid header name: {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| PrismError::Domain("invalid header value".into()))?;
            headers.insert(name, value);
        }

        Ok(headers)
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        if self.gateway && status == StatusCode::UNAUTHORIZED {
            return Err(PrismError::Api(GATEWAY_BAD_KEY_MESSAGE.to_string()).into());
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(_) => String::new(),
        };
        let message = extract_error_message(&body)
            .unwrap_or_else(|| format!("provider returned HTTP {}", status.as_u16()));
        warn!(status = status.as_u16(), %message, "provider request failed");
        Err(PrismError::Api(message).into())
    }
}

/// Pulls the human-readable message out of a provider error body. Falls back
/// through `error.message`, `error.code`, then the bare `error` value.
fn extract_error_message(body: &str) -> Option<String> {
    if let Ok(parsed) = serde_json::from_str::<OpenAiErrorBody>(body) {
        if let Some(detail) = parsed.error {
            if let Some(message) = detail.message {
                return Some(message);
            }
            if let Some(code) = detail.code {
                return Some(code.to_string());
            }
        }
    }
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("error") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(other) if !other.is_null() => Some(other.to_string()),
        _ => value
            .get("message")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CustomServerConfig;

    #[test]
    fn error_message_extraction_prefers_message_then_code() {
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"too many requests"}}"#).as_deref(),
            Some("too many requests")
        );
        assert_eq!(
            extract_error_message(r#"{"error":{"code":"model_overloaded"}}"#).as_deref(),
            Some("\"model_overloaded\"")
        );
        assert_eq!(
            extract_error_message(r#"{"error":"boom"}"#).as_deref(),
            Some("boom")
        );
        assert!(extract_error_message("not json").is_none());
    }

    #[test]
    fn gateway_endpoint_substitutes_model_placeholder() {
        let config = CustomServerConfig {
            id: "ollama".to_string(),
            server: "http://127.0.0.1:11434/api/{model}/chat".to_string(),
            key: None,
            headers: Default::default(),
            models: Vec::new(),
        };
        let client = HttpClient::gateway(&config);
        assert_eq!(
            client.endpoint("", "llama3"),
            "http://127.0.0.1:11434/api/llama3/chat"
        );
        assert!(client.has_custom_key());
    }

    #[test]
    fn first_party_endpoint_joins_base_and_path() {
        let client = HttpClient::openai("sk-test", false);
        assert_eq!(
            client.endpoint("/v1/chat/completions", "gpt-4o"),
            "https://api.openai.com/v1/chat/completions"
        );
    }
}
