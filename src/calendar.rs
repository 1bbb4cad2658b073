//! Publishing readouts to a calendar.
//!
//! [`CalendarPublisher`] is the outbound seam. [`GoogleCalendarPublisher`]
//! inserts events through the Google Calendar v3 REST API with a bearer
//! token; [`NoopPublisher`] only logs, for offline runs and tests.

use crate::error::Result;
use crate::record::{Readout, EVENT_TZ};
use crate::CalarmError;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default Google Calendar API root.
pub const GOOGLE_CALENDAR_BASE_URL: &str = "https://www.googleapis.com";

/// A start or end instant in Calendar API form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    /// RFC 3339 timestamp.
    pub date_time: String,
    /// IANA zone name.
    pub time_zone: String,
}

/// A single popup reminder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderOverride {
    /// Delivery method, always `"popup"` here.
    pub method: String,
    /// Minutes before the start.
    pub minutes: u32,
}

/// Reminder settings for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reminders {
    /// Use the calendar's default reminders instead of `overrides`.
    pub use_default: bool,
    /// Explicit reminders.
    pub overrides: Vec<ReminderOverride>,
}

/// Event insert body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Readout display text.
    pub summary: String,
    /// Location, empty when none.
    pub location: String,
    /// Event start.
    pub start: EventDateTime,
    /// Event end.
    pub end: EventDateTime,
    /// Popup reminder `lead_time` minutes before the start.
    pub reminders: Reminders,
}

impl CalendarEvent {
    /// Map a readout to an insert body.
    ///
    /// Returns `None` for the graceful-failure readout, which must never
    /// reach a calendar.
    pub fn from_readout(readout: &Readout) -> Option<Self> {
        if !readout.is_success() {
            return None;
        }
        let record = &readout.record;
        let at = |t: &chrono::DateTime<chrono::FixedOffset>| EventDateTime {
            date_time: t.with_timezone(&EVENT_TZ).to_rfc3339(),
            time_zone: EVENT_TZ.name().to_string(),
        };
        Some(Self {
            summary: readout.display_text.clone(),
            location: record.location.trim().to_string(),
            start: at(&record.event_time),
            end: at(&record.event_time_end),
            reminders: Reminders {
                use_default: false,
                overrides: vec![ReminderOverride {
                    method: "popup".into(),
                    minutes: record.lead_time,
                }],
            },
        })
    }
}

/// What the calendar reported back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub html_link: Option<String>,
}

/// Outbound calendar collaborator.
#[async_trait]
pub trait CalendarPublisher: Send + Sync {
    /// Store one event.
    async fn publish(&self, event: &CalendarEvent) -> Result<PublishedEvent>;

    /// Human-readable name for logging.
    fn name(&self) -> &'static str;
}

/// Publisher that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl CalendarPublisher for NoopPublisher {
    async fn publish(&self, event: &CalendarEvent) -> Result<PublishedEvent> {
        info!(summary = %event.summary, start = %event.start.date_time, "calendar publishing disabled, skipping");
        Ok(PublishedEvent::default())
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Google Calendar v3 events.insert.
#[derive(Clone)]
pub struct GoogleCalendarPublisher {
    client: Client,
    base_url: String,
    calendar_id: String,
    access_token: String,
}

impl std::fmt::Debug for GoogleCalendarPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleCalendarPublisher")
            .field("base_url", &self.base_url)
            .field("calendar_id", &self.calendar_id)
            .field("access_token", &"***")
            .finish()
    }
}

impl GoogleCalendarPublisher {
    /// Publisher for `calendar_id` (usually `"primary"`).
    pub fn new(client: Client, calendar_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: GOOGLE_CALENDAR_BASE_URL.into(),
            calendar_id: calendar_id.into(),
            access_token: access_token.into(),
        }
    }

    /// Point at a different API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// `{base}/calendar/v3/calendars/{id}/events`, with the id escaped.
    fn events_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            CalarmError::InvalidConfig(format!("calendar base_url `{}`: {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                CalarmError::InvalidConfig(format!(
                    "calendar base_url `{}` cannot have a path",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(["calendar", "v3", "calendars", self.calendar_id.as_str(), "events"]);
        Ok(url)
    }
}

#[async_trait]
impl CalendarPublisher for GoogleCalendarPublisher {
    async fn publish(&self, event: &CalendarEvent) -> Result<PublishedEvent> {
        let url = self.events_url()?;
        debug!(%url, "inserting calendar event");

        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(event)
            .send()
            .await
            .map_err(|e| CalarmError::PublishFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CalarmError::PublishFailed(format!("HTTP {}: {}", status.as_u16(), body)));
        }

        let published: PublishedEvent = resp
            .json()
            .await
            .map_err(|e| CalarmError::PublishFailed(format!("unreadable response: {}", e)))?;
        info!(id = ?published.id, summary = %event.summary, "calendar event created");
        Ok(published)
    }

    fn name(&self) -> &'static str {
        "google"
    }
}
