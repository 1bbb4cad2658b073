//! # calarm
//!
//! Turns a natural-language event description ("dentist monday at 9 on
//! Main St") into a schema-valid [`EventRecord`] and a one-line readout,
//! then publishes it to a calendar.
//!
//! The model is untrusted. Every candidate it produces is checked by the
//! [`SchemaValidator`]; a rejected candidate is sent back with the exact
//! validation error for a corrected attempt, up to a fixed budget. When the
//! budget runs out the caller still gets a well-formed record with
//! `error: true` instead of a hard failure.
//!
//! ## Core Concepts
//!
//! - **[`ExecCtx`]** holds the shared collaborators: HTTP client, generator
//!   backend, clock, timeout, cancellation and an optional event handler.
//! - **[`ExtractionPipeline`]** runs the bounded generate/validate/retry
//!   loop for one request.
//! - **[`PromptAssembler`]** builds the prompt for each attempt, embedding
//!   the previous candidate and its error on retries.
//! - **[`SchemaValidator`]** parses, checks and normalizes a candidate.
//! - **[`AlarmService`]** is the `createAlarm` operation: extraction plus
//!   calendar publishing. [`server`] exposes it over HTTP.
//!
//! ## Quick Start
//!
//! ```no_run
//! use calarm::{ExecCtx, ExtractionPipeline, OpenAiBackend};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> calarm::Result<()> {
//!     let ctx = ExecCtx::builder("https://api.openai.com")
//!         .backend(Arc::new(OpenAiBackend::new().with_api_key("sk-...")))
//!         .build();
//!
//!     let pipeline = ExtractionPipeline::new(10)?.with_model("gpt-4o-mini");
//!     let readout = pipeline.run(&ctx, "lunch with Sam tomorrow at noon").await?;
//!
//!     println!("{}", readout.display_text);
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod exec_ctx;
pub mod extraction;
pub mod parsing;
pub mod prompt;
pub mod readout;
pub mod record;
pub mod server;
pub mod service;
pub mod validator;

pub use backend::{BackoffConfig, LlmConfig, MockBackend, OllamaBackend, OpenAiBackend};
pub use calendar::{CalendarEvent, CalendarPublisher, GoogleCalendarPublisher, NoopPublisher};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::AppConfig;
pub use error::{CalarmError, Result};
pub use events::{Event, EventHandler, FnEventHandler};
pub use exec_ctx::{ExecCtx, ExecCtxBuilder};
pub use extraction::ExtractionPipeline;
pub use prompt::{PriorAttempt, PromptAssembler};
pub use record::{Category, EventRecord, Readout};
pub use service::AlarmService;
pub use validator::{SchemaValidator, ValidationError};
