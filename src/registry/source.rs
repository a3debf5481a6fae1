use crate::config::{SourceEntry, TiersConfig};
use crate::registry::tier::{Tier, TierSettings};
use crate::url::extract_domain;
use crate::ConfigError;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use url::Url;

/// What a job for the source fetches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// The source URL is an index; articles are discovered from its links
    #[default]
    Listing,

    /// The source URL is itself the document
    Article,
}

impl fmt::Display for SourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listing => write!(f, "listing"),
            Self::Article => write!(f, "article"),
        }
    }
}

/// Per-source extraction rules, compiled by the extractor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionRules {
    pub structured_data: bool,
    pub content_selectors: Vec<String>,
    pub title_selectors: Vec<String>,
    pub article_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,

    /// Wildcard domain pattern that discovered links must fall under
    pub link_scope: String,
}

/// A content source
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub name: String,
    pub url: String,

    /// Lowercase host of `url`; the rate limiter key
    pub domain: String,
    pub category: String,
    pub tier: Tier,
    pub interval: Duration,
    pub enabled: bool,
    pub mode: SourceMode,
    pub rules: ExtractionRules,
}

impl Source {
    /// Resolves a `[[source]]` entry against the tier defaults
    pub fn from_entry(entry: &SourceEntry, tiers: &TiersConfig) -> Result<Self, ConfigError> {
        let url = Url::parse(&entry.url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", entry.url, e)))?;
        let domain = extract_domain(&url)
            .ok_or_else(|| ConfigError::InvalidUrl(format!("{}: no host", entry.url)))?;

        let interval = match entry.interval_minutes {
            Some(minutes) => Duration::from_secs(minutes.saturating_mul(60)),
            None => TierSettings::resolve(entry.tier, tiers).interval,
        };

        Ok(Self {
            name: entry.name.clone(),
            url: entry.url.clone(),
            category: entry.category.clone(),
            tier: entry.tier,
            interval,
            enabled: entry.enabled,
            mode: entry.mode,
            rules: ExtractionRules {
                structured_data: entry.structured_data,
                content_selectors: entry.content_selectors.clone(),
                title_selectors: entry.title_selectors.clone(),
                article_patterns: entry.article_patterns.clone(),
                exclude_patterns: entry.exclude_patterns.clone(),
                link_scope: entry.domain.clone().unwrap_or_else(|| domain.clone()),
            },
            domain,
        })
    }
}
