//! Display text for a validated event.
//!
//! The layout is a fixed contract consumed by calendar clients; spacing and
//! field order matter:
//!
//! ```text
//! <name> @ <hh:mm AM|PM>[ at <location>] on <Weekday> <Month> <dd> #<category> [<lead>m]
//! ```

use crate::record::{EventRecord, EVENT_TZ};

/// Format a record into its one-line readout.
///
/// Times are rendered in [`EVENT_TZ`] regardless of the offset the record
/// carries.
///
/// # Example
///
/// ```
/// use calarm::record::{Category, EventRecord};
/// use chrono::DateTime;
///
/// let start = DateTime::parse_from_rfc3339("2024-05-04T15:30:00-04:00").unwrap();
/// let record = EventRecord {
///     name: "Test CalendarAPI Setup".into(),
///     category: Category::Home,
///     lead_time: 13,
///     event_time: start,
///     event_time_end: start,
///     location: "home".into(),
///     current_time: start,
///     error: false,
/// };
/// assert_eq!(
///     calarm::readout::format(&record),
///     "Test CalendarAPI Setup @ 03:30 PM at home on Saturday May 04 #home [13m]"
/// );
/// ```
pub fn format(record: &EventRecord) -> String {
    let start = record.event_time.with_timezone(&EVENT_TZ);
    let location = record
        .location()
        .map(|loc| format!(" at {}", loc))
        .unwrap_or_default();

    format!(
        "{} @ {}{} on {} #{} [{}m]",
        record.name.trim(),
        start.format("%I:%M %p"),
        location,
        start.format("%A %B %d"),
        record.category,
        record.lead_time
    )
}
