use crate::config::TiersConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Priority class of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    High,
    Medium,
    Low,
}

impl Tier {
    pub fn all() -> [Tier; 3] {
        [Tier::High, Tier::Medium, Tier::Low]
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Cadence, retry budget, pool size and alert threshold of one tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSettings {
    pub interval: Duration,
    pub max_retries: u32,
    pub max_concurrency: u32,

    /// Consecutive failed jobs before a source is flagged
    pub alert_threshold: u32,
}

impl TierSettings {
    /// Built-in defaults: 15/30/60 minutes, 5/3/2 retries
    pub fn defaults(tier: Tier) -> Self {
        match tier {
            Tier::High => Self {
                interval: Duration::from_secs(15 * 60),
                max_retries: 5,
                max_concurrency: 4,
                alert_threshold: 1,
            },
            Tier::Medium => Self {
                interval: Duration::from_secs(30 * 60),
                max_retries: 3,
                max_concurrency: 2,
                alert_threshold: 2,
            },
            Tier::Low => Self {
                interval: Duration::from_secs(60 * 60),
                max_retries: 2,
                max_concurrency: 1,
                alert_threshold: 3,
            },
        }
    }

    /// Defaults with any `[tiers.<tier>]` overrides applied
    pub fn resolve(tier: Tier, config: &TiersConfig) -> Self {
        let mut settings = Self::defaults(tier);

        if let Some(overrides) = config.overrides(tier) {
            if let Some(minutes) = overrides.interval_minutes {
                settings.interval = Duration::from_secs(minutes.saturating_mul(60));
            }
            if let Some(max_retries) = overrides.max_retries {
                settings.max_retries = max_retries;
            }
            if let Some(max_concurrency) = overrides.max_concurrency {
                settings.max_concurrency = max_concurrency;
            }
            if let Some(alert_threshold) = overrides.alert_threshold {
                settings.alert_threshold = alert_threshold;
            }
        }

        settings
    }
}
