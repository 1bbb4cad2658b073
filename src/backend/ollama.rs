//! Backend for Ollama's native API.
//!
//! [`OllamaBackend`] sends the prompt to `/api/generate` with streaming
//! disabled and reads the `response` field.

use super::{http_error, Backend, LlmRequest, LlmResponse, TokenUsage};
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Backend for a local or remote Ollama server.
#[derive(Debug, Clone, Default)]
pub struct OllamaBackend;

impl OllamaBackend {
    /// Build the Ollama `options` object from the request config.
    fn build_options(request: &LlmRequest) -> Value {
        let mut opts = json!({
            "temperature": request.config.temperature,
            "num_predict": request.config.max_tokens,
        });
        if let Some(ref custom) = request.config.options {
            if let (Some(base), Some(extra)) = (opts.as_object_mut(), custom.as_object()) {
                for (k, v) in extra {
                    base.insert(k.clone(), v.clone());
                }
            }
        }
        opts
    }

    fn build_generate_body(request: &LlmRequest) -> Value {
        json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
            "options": Self::build_options(request),
        })
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let url = format!("{}/api/generate", base_url.trim_end_matches('/'));
        let body = Self::build_generate_body(request);

        let resp = client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(http_error(resp).await);
        }

        let json_resp: Value = resp.json().await?;
        let text = json_resp
            .get("response")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        Ok(LlmResponse {
            text,
            usage: TokenUsage::from_fields(Some(&json_resp), "prompt_eval_count", "eval_count"),
        })
    }

    fn name(&self) -> &'static str {
        "ollama"
    }
}
