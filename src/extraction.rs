//! Bounded feedback loop from free text to a validated [`Readout`].
//!
//! [`ExtractionPipeline::run`] cycles assemble → generate → validate until a
//! candidate passes the schema or the retry budget is spent. Each rejected
//! candidate, together with its exact validation error, is fed into the next
//! prompt. The loop is an explicit state machine over [`LoopState`]; all
//! per-request bookkeeping lives in a local [`RetryState`], so one pipeline
//! value can serve any number of concurrent requests.
//!
//! ```text
//! Assembling ──► Generating ──► Validating ──┬──► Succeeded
//!     ▲                                      ├──► Exhausted
//!     └──────────────── Retrying ◄───────────┘
//! ```
//!
//! Budget exhaustion is not an error: it yields a readout whose record has
//! `error == true`. Generator failures and cancellation are errors and end
//! the request immediately without touching the budget.

use crate::backend::{self, LlmConfig, LlmRequest};
use crate::error::Result;
use crate::events::{emit, Event};
use crate::exec_ctx::ExecCtx;
use crate::parsing;
use crate::prompt::{PriorAttempt, PromptAssembler};
use crate::record::{EventRecord, Readout};
use crate::validator::{SchemaValidator, ValidationError, ValidationOutcome};
use crate::CalarmError;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retry budget used when none is configured.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Model requested when none is configured.
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Where the loop is.
#[derive(Debug)]
enum LoopState {
    Assembling,
    Generating { prompt: String },
    Validating { raw: String },
    Retrying { prior: PriorAttempt },
    Succeeded(EventRecord),
    Exhausted,
}

/// Per-request loop bookkeeping.
#[derive(Debug, Default)]
struct RetryState {
    /// Retries consumed so far; never exceeds `max_attempts`.
    attempt: u32,
    /// Generator calls made, including the first.
    calls: u32,
    /// Most recent rejected candidate.
    prior: Option<PriorAttempt>,
}

/// The extraction orchestrator.
///
/// # Example
///
/// ```no_run
/// use calarm::{ExecCtx, ExtractionPipeline};
///
/// # async fn example() -> calarm::Result<()> {
/// let ctx = ExecCtx::builder("http://localhost:11434").build();
/// let pipeline = ExtractionPipeline::new(10)?.with_model("llama3.2");
/// let readout = pipeline.run(&ctx, "Dentist tomorrow at 9am, remind me an hour before").await?;
/// println!("{}", readout.display_text);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ExtractionPipeline {
    name: String,
    max_attempts: u32,
    model: String,
    config: LlmConfig,
    assembler: PromptAssembler,
    require_sentinel: bool,
}

impl ExtractionPipeline {
    /// Create a pipeline allowing `max_attempts` retries after the first call.
    ///
    /// Returns [`CalarmError::InvalidConfig`] if `max_attempts` is zero.
    pub fn new(max_attempts: u32) -> Result<Self> {
        if max_attempts == 0 {
            return Err(CalarmError::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        Ok(Self {
            name: "extraction".into(),
            max_attempts,
            model: DEFAULT_MODEL.into(),
            config: LlmConfig::default(),
            assembler: PromptAssembler::new(),
            require_sentinel: true,
        })
    }

    /// Set the model identifier sent to the generator.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the sampling configuration.
    pub fn with_config(mut self, config: LlmConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the name used in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Use a different completion sentinel.
    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.assembler = self.assembler.with_sentinel(sentinel);
        self
    }

    /// Whether a candidate without the sentinel counts as a parse error.
    /// Default: `true`.
    pub fn require_sentinel(mut self, required: bool) -> Self {
        self.require_sentinel = required;
        self
    }

    /// The retry budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// The sampling configuration sent with every call.
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Run one extraction.
    ///
    /// Makes at most `max_attempts + 1` generator calls. Returns
    /// `Ok(readout)` both on success and on budget exhaustion (the latter
    /// with `readout.record.error == true`); returns
    /// [`CalarmError::GeneratorUnavailable`] or [`CalarmError::Cancelled`]
    /// when the loop cannot continue at all.
    pub async fn run(&self, ctx: &ExecCtx, user_text: &str) -> Result<Readout> {
        let mut retry = RetryState::default();

        emit(
            &ctx.event_handler,
            Event::ExtractionStart {
                max_attempts: self.max_attempts,
            },
        );

        let outcome = self.drive(ctx, user_text, &mut retry).await;

        emit(
            &ctx.event_handler,
            Event::ExtractionEnd {
                attempts: retry.calls,
                success: matches!(&outcome, Ok(readout) if readout.is_success()),
            },
        );

        outcome
    }

    async fn drive(&self, ctx: &ExecCtx, user_text: &str, retry: &mut RetryState) -> Result<Readout> {
        let now = ctx.clock.now();
        let validator = SchemaValidator::new(now);
        let mut state = LoopState::Assembling;

        info!(
            pipeline = %self.name,
            backend = ctx.backend.name(),
            model = %self.model,
            max_attempts = self.max_attempts,
            "extraction started"
        );

        loop {
            state = match state {
                LoopState::Assembling => {
                    ctx.check_cancelled()?;
                    let prompt = self.assembler.build(user_text, now, retry.prior.as_ref());
                    LoopState::Generating { prompt }
                }
                LoopState::Generating { prompt } => {
                    retry.calls += 1;
                    emit(
                        &ctx.event_handler,
                        Event::AttemptStart {
                            attempt: retry.calls,
                        },
                    );
                    debug!(pipeline = %self.name, attempt = retry.calls, "invoking generator");
                    let raw = self.generate(ctx, prompt, retry.calls).await?;
                    LoopState::Validating { raw }
                }
                LoopState::Validating { raw } => match self.check(&validator, &raw) {
                    Ok(record) => LoopState::Succeeded(record),
                    Err(error) => {
                        emit(
                            &ctx.event_handler,
                            Event::CandidateRejected {
                                attempt: retry.calls,
                                kind: error.kind(),
                                reason: error.to_string(),
                            },
                        );
                        debug!(
                            pipeline = %self.name,
                            attempt = retry.calls,
                            kind = error.kind(),
                            error = %error,
                            "candidate rejected"
                        );
                        let prior = PriorAttempt {
                            candidate: raw,
                            error,
                        };
                        if retry.attempt < self.max_attempts {
                            retry.attempt += 1;
                            LoopState::Retrying { prior }
                        } else {
                            LoopState::Exhausted
                        }
                    }
                },
                LoopState::Retrying { prior } => {
                    retry.prior = Some(prior);
                    LoopState::Assembling
                }
                LoopState::Succeeded(record) => {
                    info!(
                        pipeline = %self.name,
                        attempts = retry.calls,
                        name = %record.name,
                        "extraction succeeded"
                    );
                    return Ok(Readout::new(record));
                }
                LoopState::Exhausted => {
                    warn!(
                        pipeline = %self.name,
                        attempts = retry.calls,
                        last_error = retry.prior.as_ref().map(|p| p.error.to_string()).unwrap_or_default(),
                        "retry budget exhausted"
                    );
                    return Ok(Readout::failed(now));
                }
            };
        }
    }

    /// Strip noise, enforce the sentinel, then validate.
    fn check(&self, validator: &SchemaValidator, raw: &str) -> ValidationOutcome {
        let sentinel = self.assembler.sentinel();
        let cleaned = parsing::clean_candidate(raw, sentinel);
        if let Some(ref thinking) = cleaned.thinking {
            debug!(len = thinking.len(), "candidate included a reasoning block");
        }
        if self.require_sentinel && !cleaned.sentinel_seen {
            return Err(ValidationError::Parse {
                message: format!("completion sentinel `{}` not found", sentinel),
            });
        }
        validator.validate(&cleaned.body)
    }

    /// One generator call under the context's timeout, raced against
    /// cancellation. Transport retries happen inside and do not count as
    /// extraction attempts.
    async fn generate(&self, ctx: &ExecCtx, prompt: String, attempt: u32) -> Result<String> {
        let request = LlmRequest {
            model: self.model.clone(),
            prompt,
            config: self.config.clone(),
        };

        let event_handler = ctx.event_handler.clone();
        let mut on_retry = |retry: u32, delay: Duration, reason: &str| {
            warn!(attempt, retry, delay_ms = delay.as_millis() as u64, reason, "generator transport retry");
            emit(
                &event_handler,
                Event::TransportRetry {
                    attempt,
                    retry,
                    delay_ms: delay.as_millis() as u64,
                    reason: reason.to_string(),
                },
            );
        };

        let call = tokio::time::timeout(
            ctx.timeout,
            backend::with_backoff(
                &ctx.backend,
                &ctx.client,
                &ctx.base_url,
                &request,
                &ctx.backoff,
                ctx.cancellation.as_ref(),
                Some(&mut on_retry),
            ),
        );

        let outcome = match ctx.cancellation {
            Some(ref token) => tokio::select! {
                _ = token.cancelled() => return Err(CalarmError::Cancelled),
                outcome = call => outcome,
            },
            None => call.await,
        };

        match outcome {
            Ok(Ok(response)) => {
                if let Some(usage) = response.usage {
                    debug!(
                        attempt,
                        prompt_tokens = usage.prompt_tokens,
                        completion_tokens = usage.completion_tokens,
                        "generator usage"
                    );
                }
                Ok(response.text)
            }
            Ok(Err(CalarmError::Cancelled)) => Err(CalarmError::Cancelled),
            Ok(Err(e)) => {
                warn!(attempt, backend = ctx.backend.name(), error = %e, "generator call failed");
                Err(CalarmError::GeneratorUnavailable(format!(
                    "{}: {}",
                    ctx.backend.name(),
                    e
                )))
            }
            Err(_) => {
                warn!(attempt, backend = ctx.backend.name(), timeout = ?ctx.timeout, "generator call timed out");
                Err(CalarmError::GeneratorUnavailable(format!(
                    "{} did not respond within {:?}",
                    ctx.backend.name(),
                    ctx.timeout
                )))
            }
        }
    }
}
