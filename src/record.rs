//! Event record data model.
//!
//! [`EventRecord`] is the closed, fully typed target of extraction and
//! [`Readout`] is what the pipeline hands to the calendar collaborator.
//! Wire names are snake_case (`lead_time`, `event_time`, ...) and the
//! readout serializes as `{ "response", "jsonResponse" }`.

use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Time zone every event timestamp is expressed in.
pub const EVENT_TZ: Tz = chrono_tz::America::New_York;

/// Lead time applied when the candidate does not specify one.
pub const DEFAULT_LEAD_TIME_MINUTES: u32 = 30;

/// Duration applied when the candidate omits `event_time_end`.
pub const DEFAULT_EVENT_MINUTES: i64 = 30;

/// Reminder category of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Remind everywhere. The default when the text gives no hint.
    #[default]
    Always,
    /// Work-related reminders.
    Work,
    /// Home-related reminders.
    Home,
}

impl Category {
    /// All accepted values, in schema order.
    pub const ALL: [Category; 3] = [Category::Always, Category::Work, Category::Home];

    /// Lowercase wire name (`"always"`, `"work"`, `"home"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Always => "always",
            Category::Work => "work",
            Category::Home => "home",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    /// Case-insensitive: `"HOME"`, `"Home"` and `"home"` all parse.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                format!(
                    "`{}` is not one of {}",
                    wanted,
                    Category::ALL
                        .iter()
                        .map(Category::as_str)
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

/// A validated event, normalized to [`EVENT_TZ`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Short event title.
    pub name: String,
    /// Reminder category.
    pub category: Category,
    /// Minutes before `event_time` the reminder fires.
    pub lead_time: u32,
    /// Event start.
    pub event_time: DateTime<FixedOffset>,
    /// Event end, never before `event_time`.
    pub event_time_end: DateTime<FixedOffset>,
    /// Location, empty when none was given.
    pub location: String,
    /// When the request was issued.
    pub current_time: DateTime<FixedOffset>,
    /// `true` only on the terminal record of an exhausted extraction.
    pub error: bool,
}

impl EventRecord {
    /// The record returned when the retry budget runs out.
    ///
    /// Every field is at its empty/zero value and all timestamps collapse to
    /// `now`, so the record still satisfies `event_time_end >= event_time`.
    pub fn failed(now: DateTime<FixedOffset>) -> Self {
        Self {
            name: String::new(),
            category: Category::Always,
            lead_time: 0,
            event_time: now,
            event_time_end: now,
            location: String::new(),
            current_time: now,
            error: true,
        }
    }

    /// Location if one was given.
    pub fn location(&self) -> Option<&str> {
        let trimmed = self.location.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

/// Final output of an extraction: display text plus the record it describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readout {
    /// Human-readable summary, see [`readout::format`](crate::readout::format).
    #[serde(rename = "response")]
    pub display_text: String,
    /// The structured record.
    #[serde(rename = "jsonResponse")]
    pub record: EventRecord,
}

impl Readout {
    /// Build a readout for a valid record, formatting its display text.
    pub fn new(record: EventRecord) -> Self {
        Self {
            display_text: crate::readout::format(&record),
            record,
        }
    }

    /// Build the graceful-failure readout.
    pub fn failed(now: DateTime<FixedOffset>) -> Self {
        Self {
            display_text: String::new(),
            record: EventRecord::failed(now),
        }
    }

    /// Whether this readout carries a usable event.
    pub fn is_success(&self) -> bool {
        !self.record.error
    }
}
