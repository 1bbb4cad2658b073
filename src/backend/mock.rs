//! Mock backend for testing without a live LLM.
//!
//! [`MockBackend`] returns pre-configured candidates in order, counts calls,
//! and records every prompt it was sent, so extraction tests can assert on
//! exactly what the retry loop did.
//!
//! # Example
//!
//! ```
//! use calarm::backend::MockBackend;
//!
//! let mock = MockBackend::new(vec!["{\"name\": \"Lunch\"} DONE".to_string()]);
//! assert_eq!(mock.calls(), 0);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::{Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::CalarmError;

#[derive(Debug)]
enum Script {
    Cycle(Vec<String>),
    Queue(Mutex<VecDeque<Result<String>>>),
    Unavailable(String),
}

/// A test backend that returns canned responses.
#[derive(Debug)]
pub struct MockBackend {
    script: Script,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    latency: Option<Duration>,
}

impl MockBackend {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            latency: None,
        }
    }

    /// Create a mock backend with the given canned responses.
    ///
    /// Responses are returned in order. When exhausted, cycles from the beginning.
    pub fn new(responses: Vec<String>) -> Self {
        assert!(!responses.is_empty(), "MockBackend requires at least one response");
        Self::with_script(Script::Cycle(responses))
    }

    /// Create a mock that always returns the same response.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Replay a fixed sequence of outcomes, one per call.
    ///
    /// Calls past the end of the script fail.
    pub fn scripted(outcomes: Vec<Result<String>>) -> Self {
        Self::with_script(Script::Queue(Mutex::new(outcomes.into())))
    }

    /// A generator that can never be reached.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::with_script(Script::Unavailable(message.into()))
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of completions requested so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn complete(
        &self,
        _client: &Client,
        _base_url: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse> {
        let idx = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let text = match &self.script {
            Script::Cycle(responses) => responses[idx % responses.len()].clone(),
            Script::Queue(queue) => {
                let next = queue.lock().ok().and_then(|mut q| q.pop_front());
                next.unwrap_or_else(|| Err(CalarmError::Other("mock script exhausted".into())))?
            }
            Script::Unavailable(message) => {
                return Err(CalarmError::Other(format!(
                    "Failed to connect to LLM: {}",
                    message
                )))
            }
        };

        Ok(LlmResponse {
            text,
            usage: None,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
