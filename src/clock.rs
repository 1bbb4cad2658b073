//! Injectable time source.
//!
//! The pipeline never reads the system clock directly; it asks the
//! [`Clock`] on its [`ExecCtx`](crate::exec_ctx::ExecCtx). Tests pin time
//! with [`FixedClock`].

use crate::record::EVENT_TZ;
use chrono::{DateTime, FixedOffset, Utc};

/// Source of "now" for an extraction request.
pub trait Clock: Send + Sync {
    /// Current instant, expressed in the event time zone.
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&EVENT_TZ).fixed_offset()
    }
}

/// A clock frozen at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<FixedOffset>);

impl FixedClock {
    /// Parse an RFC 3339 timestamp into a frozen clock.
    pub fn parse(rfc3339: &str) -> crate::error::Result<Self> {
        DateTime::parse_from_rfc3339(rfc3339)
            .map(|t| Self(t.with_timezone(&EVENT_TZ).fixed_offset()))
            .map_err(|e| crate::CalarmError::InvalidConfig(format!("bad timestamp `{}`: {}", rfc3339, e)))
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.0
    }
}
