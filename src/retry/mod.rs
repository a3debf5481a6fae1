//! Retry policy with exponential backoff, plus failure classification
//!
//! Every failed attempt is first classified into a [`ScrapeError`]; the
//! [`RetryPolicy`] of the source's tier then decides whether the job goes to
//! `retrying` (with a jittered delay) or `failed`.
//!
//! # Delay Calculation
//!
//! ```text
//! d          = min(max_delay, initial_delay * base^(attempt - 1))
//! next_delay = min(max_delay, d + U[0, d * jitter_fraction])
//! ```
//!
//! `attempt` counts failed attempts so far, starting at 1, so the first retry
//! waits about `initial_delay`.

use crate::config::RetryConfig;
use crate::registry::TierSettings;
use crate::ScrapeError;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, instrument};

/// Structure mismatches get one more try in case the page rendered badly
const MAX_STRUCTURE_ATTEMPTS: u32 = 2;

/// Backoff bookkeeping for a job that is going to be retried
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryState {
    /// Failed attempts so far
    pub attempt: u32,

    /// Un-jittered exponential delay
    pub base_delay: Duration,

    /// Delay actually applied, jitter included
    pub next_delay: Duration,
}

/// Decision on what to do with a failed job
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry(RetryState),

    /// Mark the job failed
    GiveUp { reason: String },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_delay: Duration,
    base: f64,
    max_delay: Duration,
    jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, &RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_retries` attempts with the given backoff
    #[must_use]
    pub fn new(max_retries: u32, config: &RetryConfig) -> Self {
        Self {
            max_retries: max_retries.max(1),
            initial_delay: Duration::from_secs(config.initial_delay_seconds),
            base: config.backoff_base.max(1.0),
            max_delay: Duration::from_secs(config.max_delay_seconds),
            jitter_fraction: config.jitter_fraction.clamp(0.0, 1.0),
        }
    }

    /// Policy for sources in a tier
    #[must_use]
    pub fn for_tier(settings: &TierSettings, config: &RetryConfig) -> Self {
        Self::new(settings.max_retries, config)
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Exponential delay for `attempt` without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.base.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Delay before the retry following failed `attempt`, jitter included
    ///
    /// Never exceeds `max_delay`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        (base + self.jitter(base)).min(self.max_delay)
    }

    /// Whether a job that has failed `attempt` times with `error` gets another try
    pub fn should_retry(&self, attempt: u32, error: &ScrapeError) -> bool {
        if attempt >= self.max_retries {
            return false;
        }

        match error {
            ScrapeError::TransientFetch { .. } => true,
            ScrapeError::ExtractionStructure { .. } => attempt < MAX_STRUCTURE_ATTEMPTS,
            ScrapeError::PermanentFetch { .. }
            | ScrapeError::Validation { .. }
            | ScrapeError::SourceConfig(_)
            | ScrapeError::RateLimited { .. } => false,
        }
    }

    /// Combines [`should_retry`](Self::should_retry) and [`next_delay`](Self::next_delay)
    #[instrument(skip(self, error), fields(max_retries = self.max_retries, reason = error.reason_code()))]
    pub fn decide(&self, attempt: u32, error: &ScrapeError) -> RetryDecision {
        if !self.should_retry(attempt, error) {
            let reason = if is_retryable(error) {
                format!("attempts exhausted ({} of {})", attempt, self.max_retries)
            } else {
                format!("{} is not retryable", error.reason_code())
            };
            debug!(attempt, %reason, "giving up");
            return RetryDecision::GiveUp { reason };
        }

        let base_delay = self.base_delay(attempt);
        let next_delay = (base_delay + self.jitter(base_delay)).min(self.max_delay);

        debug!(
            attempt,
            delay_ms = next_delay.as_millis() as u64,
            "will retry"
        );

        RetryDecision::Retry(RetryState {
            attempt,
            base_delay,
            next_delay,
        })
    }

    fn jitter(&self, delay: Duration) -> Duration {
        let span = delay.as_secs_f64() * self.jitter_fraction;
        if span <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rand::thread_rng().gen_range(0.0..=span))
    }
}

/// Whether an error class can ever succeed on a later attempt
pub fn is_retryable(error: &ScrapeError) -> bool {
    matches!(
        error,
        ScrapeError::TransientFetch { .. } | ScrapeError::ExtractionStructure { .. }
    )
}

/// Classifies a non-success HTTP status into a [`ScrapeError`]
///
/// | Status | Class |
/// |--------|-------|
/// | 408 | transient |
/// | 429 | rate limited (server `Retry-After`, else `default_retry_after`) |
/// | other 4xx | permanent |
/// | 5xx | transient |
/// | anything else | permanent |
pub fn classify_http_status(
    url: &str,
    domain: &str,
    status: u16,
    retry_after: Option<Duration>,
    default_retry_after: Duration,
) -> ScrapeError {
    match status {
        408 => ScrapeError::TransientFetch {
            url: url.to_string(),
            reason: "HTTP 408 request timeout".to_string(),
        },
        429 => ScrapeError::RateLimited {
            domain: domain.to_string(),
            retry_after: retry_after.unwrap_or(default_retry_after),
        },
        500..=599 => ScrapeError::TransientFetch {
            url: url.to_string(),
            reason: format!("HTTP {}", status),
        },
        _ => ScrapeError::PermanentFetch {
            url: url.to_string(),
            reason: format!("HTTP {}", status),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> ScrapeError {
        ScrapeError::TransientFetch {
            url: "https://example.com/".to_string(),
            reason: "timeout".to_string(),
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, &RetryConfig::default())
    }

    fn no_jitter(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(
            max_retries,
            &RetryConfig {
                jitter_fraction: 0.0,
                ..RetryConfig::default()
            },
        )
    }

    #[test]
    fn test_base_delay_doubles_from_initial() {
        let policy = no_jitter(5);
        assert_eq!(policy.base_delay(1), Duration::from_secs(60));
        assert_eq!(policy.base_delay(2), Duration::from_secs(120));
        assert_eq!(policy.base_delay(3), Duration::from_secs(240));
        assert_eq!(policy.next_delay(3), Duration::from_secs(240));
    }

    #[test]
    fn test_delay_is_monotonic_and_capped() {
        let policy = no_jitter(100);
        let mut previous = Duration::ZERO;

        for attempt in 1..=64 {
            let delay = policy.next_delay(attempt);
            assert!(delay >= previous, "attempt {} went backwards", attempt);
            assert!(delay <= policy.max_delay());
            previous = delay;
        }

        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = policy(5);

        for _ in 0..200 {
            let delay = policy.next_delay(1);
            assert!(delay >= Duration::from_secs(60));
            assert!(delay <= Duration::from_secs(66));
        }

        for _ in 0..200 {
            assert!(policy.next_delay(30) <= policy.max_delay());
        }
    }

    #[test]
    fn test_should_retry_respects_max() {
        let policy = policy(5);

        for attempt in 1..5 {
            assert!(policy.should_retry(attempt, &transient()));
        }
        assert!(!policy.should_retry(5, &transient()));
        assert!(!policy.should_retry(6, &transient()));
    }

    #[test]
    fn test_non_retryable_errors() {
        let policy = policy(5);

        let permanent = ScrapeError::PermanentFetch {
            url: "u".into(),
            reason: "HTTP 404".into(),
        };
        assert!(!policy.should_retry(1, &permanent));
        assert!(!policy.should_retry(1, &ScrapeError::SourceConfig("bad".into())));
        assert!(!is_retryable(&permanent));
    }

    #[test]
    fn test_structure_mismatch_retried_once() {
        let policy = policy(5);
        let mismatch = ScrapeError::ExtractionStructure {
            url: "u".into(),
            reason: "no selector matched".into(),
        };

        assert!(policy.should_retry(1, &mismatch));
        assert!(!policy.should_retry(2, &mismatch));
    }

    #[test]
    fn test_decide() {
        let policy = no_jitter(2);

        match policy.decide(1, &transient()) {
            RetryDecision::Retry(state) => {
                assert_eq!(state.attempt, 1);
                assert_eq!(state.next_delay, Duration::from_secs(60));
            }
            other => panic!("expected retry, got {:?}", other),
        }

        assert!(matches!(
            policy.decide(2, &transient()),
            RetryDecision::GiveUp { .. }
        ));
    }

    #[test]
    fn test_classify_http_status() {
        let default = Duration::from_secs(60);
        let classify = |status, retry_after| {
            classify_http_status("https://example.com/a", "example.com", status, retry_after, default)
        };

        assert_eq!(classify(404, None).reason_code(), "permanent_fetch");
        assert_eq!(classify(410, None).reason_code(), "permanent_fetch");
        assert_eq!(classify(403, None).reason_code(), "permanent_fetch");
        assert_eq!(classify(408, None).reason_code(), "transient_fetch");
        assert_eq!(classify(503, None).reason_code(), "transient_fetch");
        assert_eq!(
            classify(429, Some(Duration::from_secs(5))),
            ScrapeError::RateLimited {
                domain: "example.com".to_string(),
                retry_after: Duration::from_secs(5),
            }
        );
        assert_eq!(
            classify(429, None),
            ScrapeError::RateLimited {
                domain: "example.com".to_string(),
                retry_after: default,
            }
        );
    }
}
