use std::time::Duration;
use thiserror::Error;

/// Errors produced by the extraction pipeline, its collaborators, and the service layer.
///
/// Validation failures are not errors here: a candidate that fails the
/// schema is a [`ValidationError`](crate::validator::ValidationError), which
/// drives a retry and never crosses the pipeline boundary.
#[derive(Error, Debug)]
pub enum CalarmError {
    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON encoding or decoding failed at the serde level.
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error with status code, response body, and optional Retry-After hint.
    ///
    /// Returned by [`Backend`](crate::backend::Backend) implementations when
    /// the provider returns a non-success status code. The `retry_after` field
    /// is populated from the `Retry-After` response header when present.
    #[error("HTTP {status}: {body}")]
    HttpError {
        /// HTTP status code (e.g. 401, 429, 503).
        status: u16,
        /// Response body text.
        body: String,
        /// Parsed `Retry-After` header value, if present.
        retry_after: Option<Duration>,
    },

    /// The generator could not be invoked (transport, auth, status, timeout).
    ///
    /// Fatal for the current request: the extraction loop does not spend
    /// retry budget on connectivity problems.
    #[error("Generator unavailable: {0}")]
    GeneratorUnavailable(String),

    /// The caller's input cannot be processed (e.g. empty text).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The request was cancelled via its cancellation token.
    #[error("Extraction was cancelled")]
    Cancelled,

    /// Invalid configuration detected at build time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The calendar collaborator rejected or failed to store the event.
    #[error("Calendar publish failed: {0}")]
    PublishFailed(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for CalarmError {
    fn from(err: anyhow::Error) -> Self {
        CalarmError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CalarmError>;
