//! Backend for OpenAI-compatible APIs.
//!
//! [`OpenAiBackend`] covers OpenAI itself and the many servers that speak
//! the same protocol (vLLM, llama.cpp server, LM Studio, Groq, Ollama's
//! `/v1/` endpoint). Endpoint: `/v1/chat/completions`, always chat mode,
//! never streamed.

use super::{http_error, Backend, LlmRequest, LlmResponse, TokenUsage};
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Backend for any OpenAI-compatible API.
///
/// # Example
///
/// ```
/// use calarm::backend::OpenAiBackend;
///
/// let backend = OpenAiBackend::new();
/// let with_key = OpenAiBackend::new().with_api_key("sk-...");
/// assert!(with_key.has_api_key());
/// ```
#[derive(Clone)]
pub struct OpenAiBackend {
    /// Optional API key. If set, sent as `Authorization: Bearer {key}`.
    pub(crate) api_key: Option<String>,
    /// Optional organization ID. If set, sent as `OpenAI-Organization: {org}`.
    pub(crate) organization: Option<String>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("api_key", &self.api_key.as_ref().map(|k| {
                match k.get(..6) {
                    Some(prefix) if k.len() > 6 => format!("{}***", prefix),
                    _ => "***".to_string(),
                }
            }))
            .field("organization", &self.organization)
            .finish()
    }
}

impl OpenAiBackend {
    /// Create a new OpenAI-compatible backend without authentication.
    pub fn new() -> Self {
        Self {
            api_key: None,
            organization: None,
        }
    }

    /// Set the API key for authentication.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the organization ID header.
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    /// Returns `true` if an API key has been configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Build the request body for `/v1/chat/completions`.
    ///
    /// The whole prompt goes in a single user message; Ollama-specific
    /// `options` are not forwarded.
    fn build_body(request: &LlmRequest) -> Value {
        json!({
            "model": request.model,
            "messages": [{"role": "user", "content": request.prompt}],
            "temperature": request.config.temperature,
            "max_tokens": request.config.max_tokens,
            "stream": false,
        })
    }

    fn build_http_request(
        &self,
        client: &Client,
        url: &str,
        body: &Value,
    ) -> reqwest::RequestBuilder {
        let mut req = client.post(url).json(body);

        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        if let Some(ref org) = self.organization {
            req = req.header("OpenAI-Organization", org.as_str());
        }

        req
    }

    fn extract_text(json_resp: &Value) -> String {
        json_resp
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string()
    }
}

impl Default for OpenAiBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let url = format!("{}/v1/chat/completions", base_url.trim_end_matches('/'));
        let body = Self::build_body(request);

        let resp = self.build_http_request(client, &url, &body).send().await?;
        if !resp.status().is_success() {
            return Err(http_error(resp).await);
        }

        let json_resp: Value = resp.json().await?;
        Ok(LlmResponse {
            text: Self::extract_text(&json_resp),
            usage: TokenUsage::from_fields(
                json_resp.get("usage"),
                "prompt_tokens",
                "completion_tokens",
            ),
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
