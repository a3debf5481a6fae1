//! Per-origin robots.txt cache with a fixed time-to-live

use crate::robots::ParsedRobots;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// How long fetched rules stay valid
pub const ROBOTS_TTL_HOURS: i64 = 24;

/// Rules for an origin plus when they were fetched
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub rules: ParsedRobots,
    pub fetched_at: DateTime<Utc>,
}

impl CachedRobots {
    pub fn new(rules: ParsedRobots, fetched_at: DateTime<Utc>) -> Self {
        Self { rules, fetched_at }
    }

    /// True once the entry is older than [`ROBOTS_TTL_HOURS`]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now - self.fetched_at > Duration::hours(ROBOTS_TTL_HOURS)
    }
}

/// Robots rules keyed by origin (`scheme://host[:port]`)
///
/// Shared by every worker; entries are replaced wholesale on refresh.
#[derive(Debug, Default)]
pub struct RobotsCache {
    entries: DashMap<String, CachedRobots>,
}

impl RobotsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached rules for `origin` unless missing or stale
    pub fn get_fresh(&self, origin: &str, now: DateTime<Utc>) -> Option<ParsedRobots> {
        self.entries
            .get(origin)
            .filter(|entry| !entry.is_stale(now))
            .map(|entry| entry.rules.clone())
    }

    pub fn insert(&self, origin: &str, rules: ParsedRobots, now: DateTime<Utc>) {
        self.entries
            .insert(origin.to_string(), CachedRobots::new(rules, now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
