//! Execution context shared across extraction requests.
//!
//! [`ExecCtx`] carries the HTTP client, generator backend, endpoint, clock,
//! cancellation handle, and optional event handler. It is built once at
//! startup and cloned cheaply into each request, which may attach its own
//! cancellation token with [`ExecCtx::with_cancellation`].

use crate::backend::{Backend, BackoffConfig, OllamaBackend};
use crate::clock::{Clock, SystemClock};
use crate::events::EventHandler;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default upper bound on a single generator call.
pub const DEFAULT_GENERATOR_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared execution context for extraction requests.
///
/// # Example
///
/// ```
/// use calarm::ExecCtx;
/// use std::time::Duration;
///
/// let ctx = ExecCtx::builder("http://localhost:11434")
///     .timeout(Duration::from_secs(30))
///     .build();
/// assert_eq!(ctx.timeout, Duration::from_secs(30));
/// ```
#[derive(Clone)]
pub struct ExecCtx {
    /// HTTP client (cheap to clone, uses `Arc` internally).
    pub client: Client,
    /// Base URL for the generator (e.g. `http://localhost:11434`).
    pub base_url: String,
    /// Generator backend. Default: [`OllamaBackend`].
    pub backend: Arc<dyn Backend>,
    /// Transport retry policy, already fitted to `timeout`.
    /// Default: [`BackoffConfig::none()`].
    pub backoff: BackoffConfig,
    /// Source of the request's current time. Default: [`SystemClock`].
    pub clock: Arc<dyn Clock>,
    /// Upper bound on one generator call.
    pub timeout: Duration,
    /// Optional cancellation token, checked before every attempt.
    pub cancellation: Option<CancellationToken>,
    /// Optional event handler for lifecycle events.
    pub event_handler: Option<Arc<dyn EventHandler>>,
}

impl ExecCtx {
    /// Create a new builder.
    pub fn builder(base_url: impl Into<String>) -> ExecCtxBuilder {
        ExecCtxBuilder {
            client: None,
            base_url: base_url.into(),
            backend: None,
            backoff: None,
            clock: None,
            cancellation: None,
            event_handler: None,
            timeout: None,
        }
    }

    /// A copy of this context bound to `token`.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancellation: Some(token),
            ..self.clone()
        }
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Return an error if cancellation has been requested.
    pub fn check_cancelled(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            return Err(crate::CalarmError::Cancelled);
        }
        Ok(())
    }
}

impl std::fmt::Debug for ExecCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecCtx")
            .field("base_url", &self.base_url)
            .field("backend", &self.backend.name())
            .field("backoff", &self.backoff)
            .field("timeout", &self.timeout)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

/// Builder for [`ExecCtx`].
pub struct ExecCtxBuilder {
    client: Option<Client>,
    base_url: String,
    backend: Option<Arc<dyn Backend>>,
    backoff: Option<BackoffConfig>,
    clock: Option<Arc<dyn Clock>>,
    cancellation: Option<CancellationToken>,
    event_handler: Option<Arc<dyn EventHandler>>,
    timeout: Option<Duration>,
}

impl ExecCtxBuilder {
    /// Set the HTTP client. If not set, a default client is created.
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the generator backend. Default: [`OllamaBackend`].
    pub fn backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the transport retry policy. Default: [`BackoffConfig::none()`].
    ///
    /// Its sleeps are capped against the call timeout at build time.
    pub fn backoff(mut self, config: BackoffConfig) -> Self {
        self.backoff = Some(config);
        self
    }

    /// Set the clock. Default: [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set the cancellation token.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Set the generator call timeout. Default: 60 seconds.
    ///
    /// Also applied to the HTTP client unless a custom one is provided via
    /// `.client()`.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the execution context.
    pub fn build(self) -> ExecCtx {
        let timeout = self.timeout.unwrap_or(DEFAULT_GENERATOR_TIMEOUT);
        let client = self.client.unwrap_or_else(|| {
            Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default()
        });
        ExecCtx {
            client,
            base_url: normalize_base_url(&self.base_url),
            backend: self.backend.unwrap_or_else(|| Arc::new(OllamaBackend)),
            backoff: self
                .backoff
                .unwrap_or_else(BackoffConfig::none)
                .fit_within(timeout),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            timeout,
            cancellation: self.cancellation,
            event_handler: self.event_handler,
        }
    }
}

/// Strip known provider path suffixes from a base URL.
/// This prevents double-pathing when backends append their own paths.
/// e.g., "https://api.openai.com/v1" -> "https://api.openai.com"
/// e.g., "http://localhost:11434/api" -> "http://localhost:11434"
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    // Longest first.
    for suffix in &["/v1/chat/completions", "/v1/chat", "/v1", "/api/generate", "/api/chat", "/api"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    #[test]
    fn test_normalize_base_url_strips_v1() {
        assert_eq!(normalize_base_url("https://api.openai.com/v1"), "https://api.openai.com");
        assert_eq!(normalize_base_url("https://api.openai.com/v1/"), "https://api.openai.com");
    }

    #[test]
    fn test_normalize_base_url_strips_api() {
        assert_eq!(normalize_base_url("http://localhost:11434/api"), "http://localhost:11434");
        assert_eq!(normalize_base_url("http://localhost:11434/api/generate"), "http://localhost:11434");
    }

    #[test]
    fn test_normalize_base_url_preserves_clean() {
        assert_eq!(normalize_base_url("http://localhost:11434"), "http://localhost:11434");
        assert_eq!(normalize_base_url("http://localhost:11434/"), "http://localhost:11434");
    }

    #[test]
    fn test_defaults() {
        let ctx = ExecCtx::builder("http://localhost:11434").build();
        assert_eq!(ctx.backend.name(), "ollama");
        assert_eq!(ctx.backoff.max_retries, 0);
        assert_eq!(ctx.timeout, DEFAULT_GENERATOR_TIMEOUT);
        assert!(!ctx.is_cancelled());
        assert!(ctx.check_cancelled().is_ok());
    }

    #[test]
    fn test_with_cancellation_is_per_copy() {
        let base = ExecCtx::builder("http://localhost:11434").build();
        let token = CancellationToken::new();
        let request_ctx = base.with_cancellation(token.clone());
        token.cancel();
        assert!(request_ctx.is_cancelled());
        assert!(matches!(request_ctx.check_cancelled(), Err(crate::CalarmError::Cancelled)));
        assert!(!base.is_cancelled());
    }

    #[test]
    fn test_clock_injection() {
        let clock = FixedClock::parse("2024-05-04T14:27:50-04:00").unwrap();
        let ctx = ExecCtx::builder("http://localhost:11434")
            .clock(Arc::new(clock))
            .build();
        assert_eq!(ctx.clock.now().to_rfc3339(), "2024-05-04T14:27:50-04:00");
    }

    #[test]
    fn test_backoff_fitted_to_timeout() {
        let ctx = ExecCtx::builder("http://localhost:11434")
            .backoff(BackoffConfig::standard())
            .timeout(Duration::from_secs(10))
            .build();
        assert_eq!(ctx.backoff.max_delay, Duration::from_millis(2500));
        assert_eq!(ctx.backoff.max_retries, 3);
    }
}
