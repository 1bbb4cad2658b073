//! Generation prompts for event extraction.
//!
//! [`PromptAssembler`] produces the text sent to the generator. The first
//! attempt describes the task and the record schema; every later attempt
//! also carries the previous raw candidate and the exact validation error
//! it produced, so the model can correct only what was wrong.

use crate::parsing::SENTINEL;
use crate::record::{Category, DEFAULT_EVENT_MINUTES, DEFAULT_LEAD_TIME_MINUTES, EVENT_TZ};
use crate::validator::ValidationError;
use chrono::{DateTime, FixedOffset};

/// The failed attempt fed back into the next prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorAttempt {
    /// Raw generator output, exactly as received.
    pub candidate: String,
    /// Why it was rejected.
    pub error: ValidationError,
}

/// Builds generation prompts.
#[derive(Debug, Clone)]
pub struct PromptAssembler {
    sentinel: String,
}

impl Default for PromptAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptAssembler {
    /// Assembler using the standard `DONE` sentinel.
    pub fn new() -> Self {
        Self {
            sentinel: SENTINEL.to_string(),
        }
    }

    /// Use a different completion sentinel.
    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.sentinel = sentinel.into();
        self
    }

    /// The sentinel the prompt asks the generator to emit.
    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// Build the prompt for one attempt.
    ///
    /// `prior_attempt` is `None` on the first attempt and the most recent
    /// rejected candidate afterwards.
    pub fn build(
        &self,
        user_text: &str,
        current_time: DateTime<FixedOffset>,
        prior_attempt: Option<&PriorAttempt>,
    ) -> String {
        let now = current_time.with_timezone(&EVENT_TZ).to_rfc3339();
        let mut parts = vec![
            "You extract calendar events from short free-form descriptions.".to_string(),
            section("Context", user_text.trim()),
            section(
                "Current Time",
                &format!(
                    "{} ({}). Resolve relative dates such as \"today\" or \"next Friday\" against this instant. \
                     Assume the event is today unless the context says otherwise.",
                    now, EVENT_TZ
                ),
            ),
            section("Schema", &schema_description()),
            section("Rules", &numbered_list(&self.rules())),
            section("Example", EXAMPLE),
        ];

        if let Some(prior) = prior_attempt {
            parts.push(section(
                "Previous Attempt",
                &format!(
                    "Your previous answer was rejected.\n\nAnswer:\n{}\n\nError:\n{}\n\n\
                     Correct only the fields named in the error and keep every other field as it was. \
                     End your answer with {} again.",
                    prior.candidate.trim(),
                    prior.error,
                    self.sentinel
                ),
            ));
        }

        parts.push(format!(
            "Respond with the JSON object, then a one-line description of the event, then {}.",
            self.sentinel
        ));
        parts.join("\n\n")
    }

    fn rules(&self) -> Vec<String> {
        vec![
            "Return exactly one JSON object using only the fields above. No extra, missing or duplicate fields.".into(),
            format!(
                "If the category is unclear use \"{}\".",
                Category::default()
            ),
            format!(
                "If no reminder lead time is given use {}.",
                DEFAULT_LEAD_TIME_MINUTES
            ),
            format!(
                "If no end time is given, event_time_end is event_time plus {} minutes.",
                DEFAULT_EVENT_MINUTES
            ),
            "event_time must be in the future relative to the current time. If the time of day has already passed today, use the same time tomorrow.".into(),
            "Optional fields with no value in the context are an empty string.".into(),
            "error is always false.".into(),
            format!(
                "When you are done, write {} on its own line.",
                self.sentinel
            ),
        ]
    }
}

fn schema_description() -> String {
    let categories = Category::ALL
        .iter()
        .map(|c| format!("\"{}\"", c))
        .collect::<Vec<_>>()
        .join(" | ");
    format!(
        "{{\n  \"name\": string (required, short title),\n  \"category\": {},\n  \
         \"lead_time\": integer minutes before the event,\n  \
         \"event_time\": ISO-8601 datetime with offset (required),\n  \
         \"event_time_end\": ISO-8601 datetime with offset,\n  \
         \"location\": string,\n  \"error\": boolean,\n  \
         \"current_time\": ISO-8601 datetime\n}}",
        categories
    )
}

const EXAMPLE: &str = r#"Context: Fix your app at 2PM today at home. Remind me 10 minutes beforehand.
{
  "name": "Fix your app",
  "category": "home",
  "lead_time": 10,
  "event_time": "2024-08-25T14:00:00-04:00",
  "event_time_end": "2024-08-25T14:30:00-04:00",
  "location": "home",
  "error": false,
  "current_time": "2024-08-25T09:10:06-04:00"
}"#;

/// Create a numbered list from items (1-indexed).
pub fn numbered_list(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wrap text in a labeled section for structured prompts.
pub fn section(label: &str, content: &str) -> String {
    format!("## {}\n{}", label, content)
}
