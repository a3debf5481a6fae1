//! Per-domain admission control
//!
//! [`RateLimiter`] enforces "N requests per M seconds" for every domain with a
//! sliding window of admitted timestamps. It is shared by every tier loop and
//! worker through an `Arc`.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use scrape_conductor::limiter::RateLimiter;
//!
//! let limiter = RateLimiter::new(2, Duration::from_secs(60));
//! assert!(limiter.admit("example.com").allowed);
//! assert!(limiter.admit("example.com").allowed);
//!
//! let denied = limiter.admit("example.com");
//! assert!(!denied.allowed);
//! assert!(denied.retry_after > Duration::ZERO);
//!
//! // Other domains are unaffected
//! assert!(limiter.admit("other.org").allowed);
//! ```

use crate::state::{RateWindow, MIN_RETRY_AFTER};
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

/// Maximum Retry-After value honored from a server
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Result of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,

    /// Zero when allowed; otherwise how long until a slot frees up
    pub retry_after: Duration,
}

impl Admission {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }

    fn denied(retry_after: Duration) -> Self {
        Self {
            allowed: false,
            retry_after,
        }
    }
}

/// Window plus any server-imposed block for one domain
#[derive(Debug)]
struct DomainLimit {
    window: RateWindow,

    /// Set from an HTTP 429 Retry-After; denies everything until it passes
    blocked_until: Option<Instant>,
}

/// Sliding-window rate limiter keyed by domain
///
/// Domains live in a `DashMap`; each entry's state sits behind its own mutex,
/// so callers on different domains never contend and callers on the same
/// domain are serialized around the window mutation.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    domains: DashMap<String, Arc<Mutex<DomainLimit>>>,
}

impl RateLimiter {
    /// Creates a limiter admitting `max_requests` per `window` for each domain
    #[must_use]
    #[instrument(skip_all, fields(max_requests = max_requests, window_secs = window.as_secs()))]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        debug!("creating rate limiter");
        Self {
            max_requests,
            window,
            domains: DashMap::new(),
        }
    }

    pub fn from_config(config: &crate::config::RateLimitConfig) -> Self {
        Self::new(
            config.max_requests,
            Duration::from_secs(config.window_seconds),
        )
    }

    /// Checks whether a request to `domain` may go out now, recording it if so
    pub fn admit(&self, domain: &str) -> Admission {
        self.admit_at(domain, Instant::now())
    }

    /// Same as [`admit`](Self::admit) at an explicit instant
    pub fn admit_at(&self, domain: &str, now: Instant) -> Admission {
        let state = self.domain_state(domain);
        let mut limit = lock(&state);

        if let Some(until) = limit.blocked_until {
            if now < until {
                let retry_after = (until - now).max(MIN_RETRY_AFTER);
                debug!(
                    domain,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "domain blocked by server"
                );
                return Admission::denied(retry_after);
            }
            limit.blocked_until = None;
        }

        match limit.window.try_admit(now) {
            Ok(()) => Admission::allowed(),
            Err(retry_after) => {
                debug!(
                    domain,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "rate window full"
                );
                Admission::denied(retry_after)
            }
        }
    }

    /// Waits until `domain` admits a request, then records it
    ///
    /// Used by listing jobs between article fetches; the scheduler itself
    /// never waits and reschedules instead.
    #[instrument(skip(self))]
    pub async fn acquire(&self, domain: &str) {
        loop {
            let admission = self.admit(domain);
            if admission.allowed {
                return;
            }
            tokio::time::sleep(admission.retry_after).await;
        }
    }

    /// Records a server-mandated pause (HTTP 429) for `domain`
    ///
    /// Excessive values are capped at [`MAX_RETRY_AFTER`].
    #[instrument(skip(self))]
    pub fn record_server_limit(&self, domain: &str, retry_after: Duration) {
        let retry_after = retry_after.min(MAX_RETRY_AFTER);
        let state = self.domain_state(domain);
        let mut limit = lock(&state);

        let until = Instant::now() + retry_after;
        if limit.blocked_until.map_or(true, |current| current < until) {
            limit.blocked_until = Some(until);
        }

        warn!(
            domain,
            retry_after_secs = retry_after.as_secs(),
            "server asked us to slow down"
        );
    }

    /// Number of domains with live state
    pub fn tracked_domains(&self) -> usize {
        self.domains.len()
    }

    /// Clones the domain's `Arc` out so the map shard is released before locking
    fn domain_state(&self, domain: &str) -> Arc<Mutex<DomainLimit>> {
        if let Some(state) = self.domains.get(domain) {
            return Arc::clone(state.value());
        }

        self.domains
            .entry(domain.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DomainLimit {
                    window: RateWindow::new(self.max_requests, self.window),
                    blocked_until: None,
                }))
            })
            .clone()
    }
}

fn lock(state: &Mutex<DomainLimit>) -> MutexGuard<'_, DomainLimit> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Parses a Retry-After header value into a Duration
///
/// Supports integer seconds and HTTP-dates. Returns `None` if the value
/// cannot be parsed; caps excessive values at one hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use scrape_conductor::limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        return Some(Duration::from_secs(seconds as u64).min(MAX_RETRY_AFTER));
    }

    let date = httpdate::parse_http_date(header_value).ok()?;
    let duration = date
        .duration_since(std::time::SystemTime::now())
        .unwrap_or(Duration::ZERO);
    Some(duration.min(MAX_RETRY_AFTER))
}
