//! Generator trait and normalized request/response types.
//!
//! The [`Backend`] trait abstracts over LLM providers, translating between
//! normalized [`LlmRequest`]/[`LlmResponse`] types and provider-specific
//! HTTP APIs. Built-in implementations: [`OllamaBackend`], [`OpenAiBackend`],
//! and [`MockBackend`] for tests and offline runs.
//!
//! ## Architecture
//!
//! ```text
//! ExtractionPipeline ──► LlmRequest ──► with_backoff() ──► Backend::complete() ──► LlmResponse
//!                                                                 │
//!                                                    ┌────────────┴────────────┐
//!                                               OllamaBackend            OpenAiBackend
//!                                              /api/generate          /v1/chat/completions
//! ```

pub mod backoff;
pub mod mock;
pub mod ollama;
pub mod openai;

pub use backoff::BackoffConfig;
pub use mock::MockBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

use crate::error::Result;
use crate::CalarmError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Type alias for the callback invoked before each transport retry.
///
/// Arguments: `(attempt_number, delay_before_retry, reason_for_retry)`.
pub type RetryCallback<'a> = Option<&'a mut (dyn FnMut(u32, Duration, &str) + Send)>;

/// Sampling configuration sent with every request.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Temperature (0.0 = deterministic, 1.0 = creative).
    pub temperature: f64,

    /// Maximum tokens to generate.
    pub max_tokens: u32,

    /// Custom options merged into the Ollama options object.
    pub options: Option<Value>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 1024,
            options: None,
        }
    }
}

impl LlmConfig {
    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    /// Set the completion length cap.
    pub fn with_max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = tokens;
        self
    }

    /// Set extra Ollama options (`top_p`, `num_ctx`, ...).
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }
}

/// A normalized generator request, provider-agnostic.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier (e.g. `"llama3.2:3b"`, `"gpt-4o-mini"`).
    pub model: String,

    /// The full prompt text.
    pub prompt: String,

    /// Sampling configuration.
    pub config: LlmConfig,
}

/// Token accounting reported by the provider, when it reports any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: Option<u64>,
    /// Tokens in the completion.
    pub completion_tokens: Option<u64>,
}

impl TokenUsage {
    /// Read two counters out of a provider response object.
    pub(crate) fn from_fields(obj: Option<&Value>, prompt_key: &str, completion_key: &str) -> Option<Self> {
        let obj = obj?;
        let usage = Self {
            prompt_tokens: obj.get(prompt_key).and_then(Value::as_u64),
            completion_tokens: obj.get(completion_key).and_then(Value::as_u64),
        };
        (usage != Self::default()).then_some(usage)
    }
}

/// A normalized generator response.
#[derive(Debug)]
pub struct LlmResponse {
    /// The generated text content.
    pub text: String,

    /// Token counts, logged per attempt.
    pub usage: Option<TokenUsage>,
}

/// Abstraction over text generators.
///
/// One call, one candidate string. Implementations carry no per-request
/// state, so a single `Arc<dyn Backend>` serves any number of concurrent
/// extractions.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute a single completion.
    async fn complete(
        &self,
        client: &Client,
        base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Parse a `Retry-After` header value given in whole seconds.
pub(crate) fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Turn a non-success response into [`CalarmError::HttpError`].
pub(crate) async fn http_error(resp: reqwest::Response) -> CalarmError {
    let status = resp.status().as_u16();
    let retry_after = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = resp.text().await.unwrap_or_default();
    CalarmError::HttpError {
        status,
        body,
        retry_after,
    }
}

/// Check whether a [`CalarmError`] is retryable based on the backoff config.
///
/// Retryable conditions:
/// - [`CalarmError::HttpError`] with a status in `config.retryable_statuses`
/// - [`CalarmError::Request`] (connection/transport errors)
pub fn is_retryable(error: &CalarmError, config: &BackoffConfig) -> bool {
    match error {
        CalarmError::HttpError { status, .. } => config.retryable_statuses.contains(status),
        CalarmError::Request(_) => true,
        _ => false,
    }
}

/// Execute a backend call with transport-level retry and exponential backoff.
///
/// Retries transient failures (429, 5xx, connection errors) according to
/// `config`. Backoff sleeps race the cancellation token, so a cancelled
/// request never waits out a delay.
///
/// Returns the first successful response, or the last error once retries
/// run out or the provider asks for a wait longer than `config.max_delay`.
pub async fn with_backoff(
    backend: &Arc<dyn Backend>,
    client: &Client,
    base_url: &str,
    request: &LlmRequest,
    config: &BackoffConfig,
    cancel: Option<&CancellationToken>,
    mut on_retry: RetryCallback<'_>,
) -> Result<LlmResponse> {
    let cancelled = || cancel.is_some_and(|t| t.is_cancelled());
    let mut last_error: Option<CalarmError> = None;

    for attempt in 0..=config.max_retries {
        if cancelled() {
            return Err(CalarmError::Cancelled);
        }

        if attempt > 0 {
            let retry_after = match &last_error {
                Some(CalarmError::HttpError { retry_after, .. }) => *retry_after,
                _ => None,
            };
            let Some(delay) = config.delay_for(attempt - 1, retry_after) else {
                tracing::debug!(attempt, ?retry_after, "provider wait exceeds backoff cap, giving up");
                break;
            };

            let reason = last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default();

            if let Some(ref mut cb) = on_retry {
                cb(attempt, delay, &reason);
            }

            match cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(CalarmError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }

        match backend.complete(client, base_url, request).await {
            Ok(response) => return Ok(response),
            Err(e) => {
                if attempt < config.max_retries && is_retryable(&e, config) {
                    tracing::debug!(attempt, error = %e, "transport error, will retry");
                    last_error = Some(e);
                    continue;
                }
                return Err(e);
            }
        }
    }

    Err(last_error.unwrap_or(CalarmError::Other(
        "backoff loop exited unexpectedly".into(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LlmRequest {
        LlmRequest {
            model: "test".into(),
            prompt: "test".into(),
            config: LlmConfig::default(),
        }
    }

    #[test]
    fn test_is_retryable_429() {
        let config = BackoffConfig::standard();
        let err = CalarmError::HttpError {
            status: 429,
            body: "rate limited".into(),
            retry_after: None,
        };
        assert!(is_retryable(&err, &config));
    }

    #[test]
    fn test_is_retryable_400_not_retried() {
        let config = BackoffConfig::standard();
        let err = CalarmError::HttpError {
            status: 400,
            body: "bad request".into(),
            retry_after: None,
        };
        assert!(!is_retryable(&err, &config));
    }

    #[test]
    fn test_is_retryable_other_errors_not_retried() {
        let config = BackoffConfig::standard();
        assert!(!is_retryable(&CalarmError::Other("x".into()), &config));
        assert!(!is_retryable(&CalarmError::Cancelled, &config));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }

    #[tokio::test]
    async fn test_backoff_respects_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let mock = Arc::new(MockBackend::fixed("never"));
        let backend: Arc<dyn Backend> = mock.clone();

        let result = with_backoff(
            &backend,
            &Client::new(),
            "http://unused",
            &request(),
            &BackoffConfig::standard(),
            Some(&token),
            None,
        )
        .await;

        assert!(matches!(result, Err(CalarmError::Cancelled)));
        assert_eq!(mock.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_retries_transient_status() {
        let mock = Arc::new(MockBackend::scripted(vec![
            Err(CalarmError::HttpError {
                status: 503,
                body: "busy".into(),
                retry_after: Some(Duration::from_secs(2)),
            }),
            Ok("hello".into()),
        ]));
        let backend: Arc<dyn Backend> = mock.clone();
        let mut retries = Vec::new();
        let mut on_retry = |attempt: u32, delay: Duration, _reason: &str| {
            retries.push((attempt, delay));
        };

        let resp = with_backoff(
            &backend,
            &Client::new(),
            "http://unused",
            &request(),
            &BackoffConfig::interactive(),
            None,
            Some(&mut on_retry),
        )
        .await
        .unwrap();

        assert_eq!(resp.text, "hello");
        assert_eq!(mock.calls(), 2);
        assert_eq!(retries, vec![(1, Duration::from_secs(2))]);
    }

    #[tokio::test]
    async fn test_backoff_none_returns_first_error() {
        let mock = Arc::new(MockBackend::unavailable("connection refused"));
        let backend: Arc<dyn Backend> = mock.clone();

        let result = with_backoff(
            &backend,
            &Client::new(),
            "http://unused",
            &request(),
            &BackoffConfig::none(),
            None,
            None,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_gives_up_when_provider_wait_exceeds_cap() {
        let mock = Arc::new(MockBackend::scripted(vec![
            Err(CalarmError::HttpError {
                status: 429,
                body: "quota".into(),
                retry_after: Some(Duration::from_secs(120)),
            }),
            Ok("too late".into()),
        ]));
        let backend: Arc<dyn Backend> = mock.clone();

        let result = with_backoff(
            &backend,
            &Client::new(),
            "http://unused",
            &request(),
            &BackoffConfig::standard(),
            None,
            None,
        )
        .await;

        assert!(matches!(result, Err(CalarmError::HttpError { status: 429, .. })));
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn test_token_usage_from_fields() {
        let body = serde_json::json!({"usage": {"prompt_tokens": 310, "completion_tokens": 42}});
        let usage = TokenUsage::from_fields(body.get("usage"), "prompt_tokens", "completion_tokens");
        assert_eq!(
            usage,
            Some(TokenUsage {
                prompt_tokens: Some(310),
                completion_tokens: Some(42),
            })
        );
        assert_eq!(TokenUsage::from_fields(Some(&serde_json::json!({})), "a", "b"), None);
        assert_eq!(TokenUsage::from_fields(None, "a", "b"), None);
    }
}
