//! Scrape-Conductor: a scheduling and extraction engine for content sources
//!
//! This crate decides which sources to poll and when, dispatches fetch jobs to
//! bounded per-tier worker pools under per-domain rate limits, recovers failed
//! jobs with exponential backoff, and turns fetched pages into validated
//! structured documents.

pub mod config;
pub mod events;
pub mod extract;
pub mod limiter;
pub mod orchestrator;
pub mod output;
pub mod registry;
pub mod retry;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;

use std::time::Duration;
use thiserror::Error;

/// Main error type for Scrape-Conductor operations
#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid domain pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Why a single fetch-and-extract attempt did not produce documents
///
/// Every variant is converted into a job outcome at the worker boundary;
/// none of them propagate into the scheduling loop.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScrapeError {
    /// Timeout, connection reset, 5xx
    #[error("Transient fetch error for {url}: {reason}")]
    TransientFetch { url: String, reason: String },

    /// 404/410, robots-disallowed, non-HTML content
    #[error("Permanent fetch error for {url}: {reason}")]
    PermanentFetch { url: String, reason: String },

    /// Denied by the local rate limiter or by the server (HTTP 429)
    #[error("Rate limited on {domain}, retry after {retry_after:?}")]
    RateLimited {
        domain: String,
        retry_after: Duration,
    },

    /// None of the extraction rules match the page template
    #[error("Extraction structure mismatch for {url}: {reason}")]
    ExtractionStructure { url: String, reason: String },

    /// Document extracted but too short or untitled
    #[error("Document failed validation for {url}: {reason}")]
    Validation { url: String, reason: String },

    /// The source descriptor itself cannot be used
    #[error("Source configuration error: {0}")]
    SourceConfig(String),
}

impl ScrapeError {
    /// Stable code persisted as a job's failure reason
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::TransientFetch { .. } => "transient_fetch",
            Self::PermanentFetch { .. } => "permanent_fetch",
            Self::RateLimited { .. } => "rate_limited",
            Self::ExtractionStructure { .. } => "extraction_structure",
            Self::Validation { .. } => "validation",
            Self::SourceConfig(_) => "source_config",
        }
    }
}

/// Result type alias for Scrape-Conductor operations
pub type Result<T> = std::result::Result<T, ConductorError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use extract::{ExtractionMethod, Extractor, ScrapedDocument};
pub use limiter::{Admission, RateLimiter};
pub use orchestrator::Orchestrator;
pub use registry::{Source, SourceRegistry, Tier};
pub use retry::RetryPolicy;
pub use state::JobStatus;
pub use url::{extract_domain, normalize_url};
