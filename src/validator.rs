//! Schema validation and normalization of generator candidates.
//!
//! [`SchemaValidator`] turns one raw candidate string into either a fully
//! typed [`EventRecord`] or a [`ValidationError`] precise enough to be fed
//! back to the generator. Defaulting (category, lead time, end time,
//! location) and time normalization happen here, so the result never
//! depends on the model applying those rules itself.
//!
//! The field set is closed: unknown, duplicate, missing and mistyped fields
//! are all rejected, and every violation in a candidate is reported at once.

use crate::parsing::{self, SENTINEL};
use crate::record::{
    Category, EventRecord, DEFAULT_EVENT_MINUTES, DEFAULT_LEAD_TIME_MINUTES, EVENT_TZ,
};
use chrono::{DateTime, Days, Duration, FixedOffset, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use thiserror::Error;

/// Every field a candidate may carry, in schema order.
pub const FIELDS: [&str; 8] = [
    "name",
    "category",
    "lead_time",
    "event_time",
    "event_time_end",
    "location",
    "error",
    "current_time",
];

/// Result of validating one candidate.
pub type ValidationOutcome = Result<EventRecord, ValidationError>;

/// What is wrong with a single field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    /// The field is not part of the schema.
    Unknown,
    /// A required field is absent, null, or empty.
    Missing,
    /// The field appears more than once.
    Duplicate,
    /// The JSON type is wrong.
    WrongType {
        /// What the schema expects.
        expected: &'static str,
        /// The JSON type that was found.
        found: &'static str,
    },
    /// The type is right but the value is not acceptable.
    Invalid(String),
}

/// One schema violation, naming the offending field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    /// Field name as it appeared in the candidate.
    pub field: String,
    /// What is wrong with it.
    pub problem: Problem,
}

impl FieldViolation {
    fn new(field: impl Into<String>, problem: Problem) -> Self {
        Self {
            field: field.into(),
            problem,
        }
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.problem {
            Problem::Unknown => write!(
                f,
                "`{}` is not a recognized field (allowed: {})",
                self.field,
                FIELDS.join(", ")
            ),
            Problem::Missing => write!(f, "`{}` is required but missing", self.field),
            Problem::Duplicate => write!(f, "`{}` appears more than once", self.field),
            Problem::WrongType { expected, found } => {
                write!(f, "`{}` must be {}, found {}", self.field, expected, found)
            }
            Problem::Invalid(reason) => write!(f, "`{}`: {}", self.field, reason),
        }
    }
}

fn join_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The candidate is not a well-formed JSON object.
    #[error("ParseError: {message}")]
    Parse {
        /// Parser message.
        message: String,
    },

    /// The candidate is well-formed but breaks the record schema.
    #[error("SchemaError: {}", join_violations(.violations))]
    Schema {
        /// Every violation found, in field order.
        violations: Vec<FieldViolation>,
    },
}

impl ValidationError {
    /// Names of the offending fields (empty for parse errors).
    pub fn fields(&self) -> Vec<&str> {
        match self {
            ValidationError::Parse { .. } => Vec::new(),
            ValidationError::Schema { violations } => {
                violations.iter().map(|v| v.field.as_str()).collect()
            }
        }
    }

    /// Stable kind label for logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            ValidationError::Parse { .. } => "parse",
            ValidationError::Schema { .. } => "schema",
        }
    }

    fn schema(field: &str, problem: Problem) -> Self {
        ValidationError::Schema {
            violations: vec![FieldViolation::new(field, problem)],
        }
    }
}

/// Top-level object fields in document order, duplicates preserved.
///
/// `serde_json::Value` collapses repeated keys, which would hide exactly
/// the kind of drift the validator has to report.
struct RawFields(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for RawFields {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = RawFields;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawFields, A::Error> {
                let mut fields = Vec::new();
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    fields.push((key, value));
                }
                Ok(RawFields(fields))
            }
        }

        deserializer.deserialize_map(FieldsVisitor)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// `null` and `""` both mean "not provided".
fn provided(value: Option<&Value>) -> Option<&Value> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(v) => Some(v),
    }
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 datetime taken as
/// wall-clock time in the event zone.
pub fn parse_timestamp(text: &str) -> Result<DateTime<FixedOffset>, String> {
    let text = text.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Ok(t);
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return EVENT_TZ
                .from_local_datetime(&naive)
                .earliest()
                .map(|t| t.fixed_offset())
                .ok_or_else(|| format!("`{}` does not exist in {}", text, EVENT_TZ));
        }
    }
    Err(format!("`{}` is not an ISO-8601 timestamp", text))
}

fn shift_days(t: DateTime<Tz>, days: u64) -> DateTime<Tz> {
    t.checked_add_days(Days::new(days))
        .unwrap_or_else(|| t + Duration::days(days as i64))
}

/// Move a non-future start forward whole days (keeping wall-clock time)
/// until it is strictly after `now`; the end keeps its distance.
fn roll_forward(
    start: DateTime<Tz>,
    end: DateTime<Tz>,
    now: DateTime<Tz>,
) -> (DateTime<Tz>, DateTime<Tz>) {
    if start > now {
        return (start, end);
    }
    let span = end - start;
    let mut days = (now - start).num_days().max(0) as u64;
    let mut rolled = shift_days(start, days);
    while rolled <= now {
        days += 1;
        rolled = shift_days(start, days);
    }
    (rolled, rolled + span)
}

/// Validates candidates for a single extraction request.
///
/// Holds the request's current time, which anchors the future-start rule
/// and becomes the record's `current_time`. With that fixed, `validate` is
/// a pure function of its input.
#[derive(Debug, Clone, Copy)]
pub struct SchemaValidator {
    now: DateTime<FixedOffset>,
}

impl SchemaValidator {
    /// Create a validator anchored at `now`.
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self { now }
    }

    /// The anchoring current time.
    pub fn now(&self) -> DateTime<FixedOffset> {
        self.now
    }

    /// Validate a raw candidate, stripping formatting noise first.
    pub fn validate(&self, candidate: &str) -> ValidationOutcome {
        let cleaned = parsing::clean_candidate(candidate, SENTINEL);
        if cleaned.body.is_empty() {
            return Err(ValidationError::Parse {
                message: "candidate is empty".into(),
            });
        }

        if cleaned.body.starts_with('[') {
            return Err(ValidationError::Parse {
                message: "expected a single JSON object, found an array".into(),
            });
        }

        let RawFields(fields) =
            serde_json::from_str(&cleaned.body).map_err(|e| ValidationError::Parse {
                message: e.to_string(),
            })?;

        let mut violations = Vec::new();
        let mut seen: HashMap<&str, &Value> = HashMap::new();
        let mut duplicates: HashSet<&str> = HashSet::new();

        for (key, value) in &fields {
            if !FIELDS.contains(&key.as_str()) {
                violations.push(FieldViolation::new(key.as_str(), Problem::Unknown));
            } else if seen.insert(key.as_str(), value).is_some() && duplicates.insert(key.as_str())
            {
                violations.push(FieldViolation::new(key.as_str(), Problem::Duplicate));
            }
        }

        let name = match seen.get("name").copied() {
            None | Some(Value::Null) => {
                violations.push(FieldViolation::new("name", Problem::Missing));
                None
            }
            Some(Value::String(s)) if s.trim().is_empty() => {
                violations.push(FieldViolation::new(
                    "name",
                    Problem::Invalid("must not be empty".into()),
                ));
                None
            }
            Some(Value::String(s)) => Some(s.trim().to_string()),
            Some(other) => {
                violations.push(wrong_type("name", "a string", other));
                None
            }
        };

        let category = match provided(seen.get("category").copied()) {
            None => Category::default(),
            Some(Value::String(s)) => s.parse().unwrap_or_else(|reason| {
                violations.push(FieldViolation::new("category", Problem::Invalid(reason)));
                Category::default()
            }),
            Some(other) => {
                violations.push(wrong_type("category", "a string", other));
                Category::default()
            }
        };

        let lead_time = match provided(seen.get("lead_time").copied()) {
            None => DEFAULT_LEAD_TIME_MINUTES,
            Some(Value::Number(n)) => match n.as_u64().and_then(|m| u32::try_from(m).ok()) {
                Some(minutes) => minutes,
                None => {
                    violations.push(FieldViolation::new(
                        "lead_time",
                        Problem::Invalid(format!(
                            "{} is not a non-negative whole number of minutes",
                            n
                        )),
                    ));
                    DEFAULT_LEAD_TIME_MINUTES
                }
            },
            Some(other) => {
                violations.push(wrong_type("lead_time", "an integer", other));
                DEFAULT_LEAD_TIME_MINUTES
            }
        };

        let event_time = match provided(seen.get("event_time").copied()) {
            None => {
                violations.push(FieldViolation::new("event_time", Problem::Missing));
                None
            }
            Some(value) => timestamp_field("event_time", value, &mut violations),
        };

        let event_time_end = provided(seen.get("event_time_end").copied())
            .and_then(|value| timestamp_field("event_time_end", value, &mut violations));

        let location = match seen.get("location").copied() {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.trim().to_string(),
            Some(other) => {
                violations.push(wrong_type("location", "a string", other));
                String::new()
            }
        };

        match seen.get("error").copied() {
            None | Some(Value::Null) | Some(Value::Bool(false)) => {}
            Some(Value::Bool(true)) => violations.push(FieldViolation::new(
                "error",
                Problem::Invalid(
                    "must be false; extract the event described by the user instead of flagging it"
                        .into(),
                ),
            )),
            Some(other) => violations.push(wrong_type("error", "a boolean", other)),
        }

        // Type-checked only; the request clock is authoritative.
        if let Some(value) = provided(seen.get("current_time").copied()) {
            timestamp_field("current_time", value, &mut violations);
        }

        let (name, start) = match (name, event_time) {
            (Some(name), Some(start)) if violations.is_empty() => (name, start),
            _ => return Err(ValidationError::Schema { violations }),
        };

        let now = self.now.with_timezone(&EVENT_TZ);
        let start = start.with_timezone(&EVENT_TZ);
        let end = event_time_end
            .map(|t| t.with_timezone(&EVENT_TZ))
            .unwrap_or_else(|| start + Duration::minutes(DEFAULT_EVENT_MINUTES));

        if end < start {
            return Err(ValidationError::schema(
                "event_time_end",
                Problem::Invalid(format!(
                    "{} is before event_time {}",
                    end.to_rfc3339(),
                    start.to_rfc3339()
                )),
            ));
        }

        let (start, end) = roll_forward(start, end, now);

        Ok(EventRecord {
            name,
            category,
            lead_time,
            event_time: start.fixed_offset(),
            event_time_end: end.fixed_offset(),
            location,
            current_time: now.fixed_offset(),
            error: false,
        })
    }
}

fn wrong_type(field: &str, expected: &'static str, found: &Value) -> FieldViolation {
    FieldViolation::new(
        field,
        Problem::WrongType {
            expected,
            found: json_type(found),
        },
    )
}

fn timestamp_field(
    field: &str,
    value: &Value,
    violations: &mut Vec<FieldViolation>,
) -> Option<DateTime<FixedOffset>> {
    match value {
        Value::String(s) => match parse_timestamp(s) {
            Ok(t) => Some(t),
            Err(reason) => {
                violations.push(FieldViolation::new(field, Problem::Invalid(reason)));
                None
            }
        },
        other => {
            violations.push(wrong_type(field, "an ISO-8601 timestamp string", other));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> SchemaValidator {
        SchemaValidator::new(DateTime::parse_from_rfc3339("2024-05-04T14:27:50-04:00").unwrap())
    }

    fn candidate() -> Value {
        json!({
            "name": "Test CalendarAPI Setup",
            "category": "home",
            "lead_time": 13,
            "event_time": "2024-05-04T15:30:00-04:00",
            "event_time_end": "2024-05-04T15:40:00-04:00",
            "location": "home",
            "error": false,
            "current_time": "2024-05-04T14:27:50.983855"
        })
    }

    fn schema_fields(err: &ValidationError) -> Vec<String> {
        err.fields().into_iter().map(String::from).collect()
    }

    #[test]
    fn test_valid_candidate() {
        let record = validator().validate(&candidate().to_string()).unwrap();
        assert_eq!(record.name, "Test CalendarAPI Setup");
        assert_eq!(record.category, Category::Home);
        assert_eq!(record.lead_time, 13);
        assert_eq!(record.event_time.to_rfc3339(), "2024-05-04T15:30:00-04:00");
        assert_eq!(record.event_time_end.to_rfc3339(), "2024-05-04T15:40:00-04:00");
        assert_eq!(record.location, "home");
        assert_eq!(record.current_time.to_rfc3339(), "2024-05-04T14:27:50-04:00");
        assert!(!record.error);
    }

    #[test]
    fn test_noise_is_stripped() {
        let raw = format!(
            "DONE\n```json\n{}\n```\nTest CalendarAPI Setup @ 03:30 PM",
            candidate()
        );
        assert!(validator().validate(&raw).is_ok());
    }

    #[test]
    fn test_validation_is_idempotent() {
        let v = validator();
        for text in [candidate().to_string(), "not json".to_string(), r#"{"x": 1}"#.to_string()] {
            assert_eq!(v.validate(&text), v.validate(&text));
        }
    }

    #[test]
    fn test_end_time_defaults_to_thirty_minutes() {
        let mut c = candidate();
        c.as_object_mut().unwrap().remove("event_time_end");
        let record = validator().validate(&c.to_string()).unwrap();
        assert_eq!(record.event_time_end.to_rfc3339(), "2024-05-04T16:00:00-04:00");
    }

    #[test]
    fn test_optional_defaults() {
        let c = json!({
            "name": "Dentist",
            "event_time": "2024-05-04T16:00:00-04:00",
            "category": "",
            "lead_time": null,
        });
        let record = validator().validate(&c.to_string()).unwrap();
        assert_eq!(record.category, Category::Always);
        assert_eq!(record.lead_time, 30);
        assert_eq!(record.location, "");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut c = candidate();
        c["priority"] = json!("high");
        let err = validator().validate(&c.to_string()).unwrap_err();
        assert_eq!(err.kind(), "schema");
        assert_eq!(schema_fields(&err), vec!["priority"]);
        assert!(err.to_string().contains("`priority` is not a recognized field"));
    }

    #[test]
    fn test_category_outside_set_rejected() {
        let mut c = candidate();
        c["category"] = json!("errands");
        let err = validator().validate(&c.to_string()).unwrap_err();
        assert_eq!(schema_fields(&err), vec!["category"]);
        assert!(err.to_string().starts_with("SchemaError: `category`"));
    }

    #[test]
    fn test_category_uppercase_accepted() {
        let mut c = candidate();
        c["category"] = json!("WORK");
        let record = validator().validate(&c.to_string()).unwrap();
        assert_eq!(record.category, Category::Work);
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let raw = r#"{"name": "a", "name": "b", "event_time": "2024-05-04T16:00:00-04:00"}"#;
        let err = validator().validate(raw).unwrap_err();
        assert_eq!(
            err,
            ValidationError::Schema {
                violations: vec![FieldViolation::new("name", Problem::Duplicate)]
            }
        );
    }

    #[test]
    fn test_missing_required_fields() {
        let err = validator().validate(r#"{"location": "home"}"#).unwrap_err();
        assert_eq!(schema_fields(&err), vec!["name", "event_time"]);
    }

    #[test]
    fn test_wrong_types_all_reported() {
        let mut c = candidate();
        c["lead_time"] = json!("ten");
        c["location"] = json!(5);
        let err = validator().validate(&c.to_string()).unwrap_err();
        assert_eq!(schema_fields(&err), vec!["lead_time", "location"]);
        assert!(err
            .to_string()
            .contains("`lead_time` must be an integer, found a string"));
    }

    #[test]
    fn test_negative_lead_time_rejected() {
        let mut c = candidate();
        c["lead_time"] = json!(-5);
        let err = validator().validate(&c.to_string()).unwrap_err();
        assert_eq!(schema_fields(&err), vec!["lead_time"]);
    }

    #[test]
    fn test_error_flag_true_rejected() {
        let mut c = candidate();
        c["error"] = json!(true);
        let err = validator().validate(&c.to_string()).unwrap_err();
        assert_eq!(schema_fields(&err), vec!["error"]);
    }

    #[test]
    fn test_bad_timestamp_rejected() {
        let mut c = candidate();
        c["event_time"] = json!("3:30pm today");
        let err = validator().validate(&c.to_string()).unwrap_err();
        assert_eq!(schema_fields(&err), vec!["event_time"]);
    }

    #[test]
    fn test_end_before_start_rejected() {
        let mut c = candidate();
        c["event_time_end"] = json!("2024-05-04T15:00:00-04:00");
        let err = validator().validate(&c.to_string()).unwrap_err();
        assert_eq!(schema_fields(&err), vec!["event_time_end"]);
    }

    #[test]
    fn test_past_start_rolls_to_next_day() {
        let mut c = candidate();
        c["event_time"] = json!("2024-05-04T10:30:00-04:00");
        c["event_time_end"] = json!("2024-05-04T10:45:00-04:00");
        let record = validator().validate(&c.to_string()).unwrap();
        assert_eq!(record.event_time.to_rfc3339(), "2024-05-05T10:30:00-04:00");
        assert_eq!(record.event_time_end.to_rfc3339(), "2024-05-05T10:45:00-04:00");
    }

    #[test]
    fn test_roll_forward_keeps_wall_clock_across_dst() {
        // Clocks spring forward on 2024-03-10.
        let v = SchemaValidator::new(
            DateTime::parse_from_rfc3339("2024-03-09T20:00:00-05:00").unwrap(),
        );
        let c = json!({"name": "Run", "event_time": "2024-03-09T07:00:00"});
        let record = v.validate(&c.to_string()).unwrap();
        assert_eq!(record.event_time.to_rfc3339(), "2024-03-10T07:00:00-04:00");
    }

    #[test]
    fn test_naive_timestamps_use_event_zone() {
        let mut c = candidate();
        c["event_time"] = json!("2024-05-04T15:30:00");
        c["event_time_end"] = json!("2024-05-04T19:40:00Z");
        let record = validator().validate(&c.to_string()).unwrap();
        assert_eq!(record.event_time.to_rfc3339(), "2024-05-04T15:30:00-04:00");
        assert_eq!(record.event_time_end.to_rfc3339(), "2024-05-04T15:40:00-04:00");
    }

    #[test]
    fn test_parse_errors() {
        let v = validator();
        assert!(matches!(v.validate("not json"), Err(ValidationError::Parse { .. })));
        assert!(matches!(v.validate(""), Err(ValidationError::Parse { .. })));
        assert!(matches!(v.validate("{\"name\": "), Err(ValidationError::Parse { .. })));
        assert!(matches!(v.validate("[1, 2]"), Err(ValidationError::Parse { .. })));
    }

    #[test]
    fn test_array_of_records_is_a_parse_error() {
        let v = validator();
        let err = v
            .validate(r#"[{"name": "Lunch", "event_time": "2024-05-04T16:00:00-04:00"}, {"x": 1}] DONE"#)
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::Parse {
                message: "expected a single JSON object, found an array".into()
            }
        );

        let prose = v.validate(r#"Sure: [{"name": "Lunch", "event_time": "2024-05-04T16:00:00-04:00"}]"#);
        assert!(matches!(prose, Err(ValidationError::Parse { .. })));
    }

    #[test]
    fn test_braces_in_leading_prose_are_skipped() {
        let v = validator();
        let record = v
            .validate("Here is the event {as requested}:\n{\"name\": \"Lunch\", \"event_time\": \"2024-05-04T16:00:00-04:00\"} DONE")
            .unwrap();
        assert_eq!(record.name, "Lunch");
    }
}
