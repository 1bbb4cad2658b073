//! Transport retry policy for generator calls.
//!
//! A transport retry re-sends the same prompt after a 429, a 5xx or a dropped
//! connection. It never consumes an extraction attempt. All of its sleeps
//! happen inside the single call budget (`ExecCtx::timeout`) that wraps
//! [`with_backoff`](super::with_backoff), so the policy is sized against that
//! budget with [`BackoffConfig::fit_within`].

use std::time::Duration;

/// Largest share of the call budget one backoff sleep may take (1/4).
pub const MAX_SLEEP_SHARE: u32 = 4;

/// How transient generator failures are retried.
///
/// Delays grow as `initial_delay * multiplier^n`, are capped at `max_delay`,
/// and are spread with full jitter. A `Retry-After` longer than `max_delay`
/// stops retrying instead of sleeping past the budget.
///
/// # Example
///
/// ```
/// use calarm::backend::BackoffConfig;
/// use std::time::Duration;
///
/// let policy = BackoffConfig::from_preset("standard")
///     .unwrap()
///     .fit_within(Duration::from_secs(20));
/// assert_eq!(policy.max_delay, Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Retries after the first send. `0` disables transport retry.
    pub max_retries: u32,

    /// Ceiling of the first sleep.
    pub initial_delay: Duration,

    /// Growth factor between consecutive ceilings.
    pub multiplier: f64,

    /// Hard cap on any single sleep.
    pub max_delay: Duration,

    /// HTTP statuses worth another send.
    pub retryable_statuses: Vec<u16>,

    /// Honor the provider's `Retry-After` when present.
    pub respect_retry_after: bool,
}

fn transient_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

impl BackoffConfig {
    /// No transport retry. The default; suits a local Ollama.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::interactive()
        }
    }

    /// Hosted APIs with a patient caller: 3 retries, 1s doubling to 8s.
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(8),
            retryable_statuses: transient_statuses(),
            respect_retry_after: true,
        }
    }

    /// A person is waiting on the HTTP response: 2 quick retries, at most 4s each.
    pub fn interactive() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(4),
            retryable_statuses: transient_statuses(),
            respect_retry_after: true,
        }
    }

    /// Look up a named preset: `none`, `standard` or `interactive`.
    pub fn from_preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" => Some(Self::none()),
            "standard" => Some(Self::standard()),
            "interactive" => Some(Self::interactive()),
            _ => None,
        }
    }

    /// Shrink `max_delay` so a single sleep takes at most
    /// `1/MAX_SLEEP_SHARE` of `call_timeout`.
    pub fn fit_within(mut self, call_timeout: Duration) -> Self {
        self.max_delay = self.max_delay.min(call_timeout / MAX_SLEEP_SHARE);
        self.initial_delay = self.initial_delay.min(self.max_delay);
        self
    }

    /// Upper bound of the sleep before retry `n` (0-indexed), before jitter.
    pub fn ceiling(&self, n: u32) -> Duration {
        let exp = i32::try_from(n).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Sleep before retry `n`, or `None` when the provider asked for a wait
    /// longer than `max_delay`.
    pub fn delay_for(&self, n: u32, retry_after: Option<Duration>) -> Option<Duration> {
        match retry_after {
            Some(wait) if self.respect_retry_after => (wait <= self.max_delay).then_some(wait),
            _ => Some(self.ceiling(n).mul_f64(fastrand::f64())),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_doubles_then_caps() {
        let policy = BackoffConfig::standard();
        assert_eq!(policy.ceiling(0), Duration::from_secs(1));
        assert_eq!(policy.ceiling(2), Duration::from_secs(4));
        assert_eq!(policy.ceiling(3), Duration::from_secs(8));
        assert_eq!(policy.ceiling(40), Duration::from_secs(8));
    }

    #[test]
    fn test_jittered_delay_stays_under_ceiling() {
        let policy = BackoffConfig::interactive();
        for n in 0..4 {
            for _ in 0..50 {
                let d = policy.delay_for(n, None).unwrap();
                assert!(d <= policy.ceiling(n), "retry {}: {:?}", n, d);
            }
        }
    }

    #[test]
    fn test_retry_after_within_cap_is_used_verbatim() {
        let policy = BackoffConfig::standard();
        assert_eq!(
            policy.delay_for(0, Some(Duration::from_secs(3))),
            Some(Duration::from_secs(3))
        );
    }

    #[test]
    fn test_retry_after_past_cap_gives_up() {
        let policy = BackoffConfig::standard();
        assert_eq!(policy.delay_for(0, Some(Duration::from_secs(30))), None);
    }

    #[test]
    fn test_retry_after_ignored_when_disabled() {
        let policy = BackoffConfig {
            respect_retry_after: false,
            ..BackoffConfig::standard()
        };
        let d = policy.delay_for(0, Some(Duration::from_secs(30))).unwrap();
        assert!(d <= Duration::from_secs(1));
    }

    #[test]
    fn test_fit_within_bounds_sleep_by_call_timeout() {
        let policy = BackoffConfig::standard().fit_within(Duration::from_secs(8));
        assert_eq!(policy.max_delay, Duration::from_secs(2));
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.ceiling(5), Duration::from_secs(2));

        let tight = BackoffConfig::interactive().fit_within(Duration::from_secs(1));
        assert_eq!(tight.max_delay, Duration::from_millis(250));
        assert_eq!(tight.initial_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_fit_within_keeps_smaller_cap() {
        let policy = BackoffConfig::interactive().fit_within(Duration::from_secs(60));
        assert_eq!(policy, BackoffConfig::interactive());
    }

    #[test]
    fn test_presets() {
        assert_eq!(BackoffConfig::from_preset("none").unwrap().max_retries, 0);
        assert_eq!(BackoffConfig::from_preset(" Interactive ").unwrap().max_retries, 2);
        assert_eq!(BackoffConfig::from_preset("standard").unwrap().max_retries, 3);
        assert!(BackoffConfig::from_preset("aggressive").is_none());
        assert_eq!(BackoffConfig::default(), BackoffConfig::none());
        assert!(BackoffConfig::standard().retryable_statuses.contains(&429));
    }
}
