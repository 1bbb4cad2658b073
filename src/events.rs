//! Lifecycle hooks for extraction requests.
//!
//! Provides an optional, non-intrusive way to observe the retry loop.
//! The pipeline emits events when a request starts, when each attempt
//! begins, when a candidate is rejected, and when the request ends.
//! Implement [`EventHandler`] to receive them for progress reporting or
//! metrics; structured logs are emitted through `tracing` regardless.

use std::sync::Arc;

/// Events emitted during an extraction.
#[derive(Debug, Clone)]
pub enum Event {
    /// An extraction request has started.
    ExtractionStart {
        /// Attempt budget for this request.
        max_attempts: u32,
    },
    /// A generator call is about to be made.
    AttemptStart {
        /// Attempt number (1-indexed).
        attempt: u32,
    },
    /// A candidate failed validation and will drive a retry (or exhaust the budget).
    CandidateRejected {
        /// Attempt number that produced the candidate.
        attempt: u32,
        /// `"parse"` or `"schema"`.
        kind: &'static str,
        /// The validation error text fed back to the generator.
        reason: String,
    },
    /// A transport-level retry due to an HTTP error.
    TransportRetry {
        /// Extraction attempt the transport retry belongs to.
        attempt: u32,
        /// Transport retry number (1-indexed).
        retry: u32,
        /// Delay before this retry in milliseconds.
        delay_ms: u64,
        /// Reason for the retry (error description).
        reason: String,
    },
    /// An extraction request has finished.
    ExtractionEnd {
        /// Generator calls made.
        attempts: u32,
        /// Whether a valid record was produced.
        success: bool,
    },
}

/// Handler for extraction lifecycle events.
///
/// # Example
///
/// ```
/// use calarm::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::AttemptStart { attempt } => println!("[attempt] {}", attempt),
///             Event::ExtractionEnd { success, .. } => println!("[end] ok={}", success),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called when the pipeline emits an event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use calarm::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::CandidateRejected { reason, .. } = event {
///         eprintln!("rejected: {}", reason);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
