use crate::registry::{SourceMode, Tier};
use serde::Deserialize;

/// Main configuration structure for Scrape-Conductor
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(rename = "rate-limit", default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub tiers: TiersConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    #[serde(rename = "source", default)]
    pub sources: Vec<SourceEntry>,
}

/// Control loop behavior
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Seconds between scheduling passes of each tier loop
    #[serde(rename = "tick-seconds", default = "default_tick_seconds")]
    pub tick_seconds: u64,

    /// Per-request timeout; also bounds how long a cancelled fetch lingers
    #[serde(
        rename = "fetch-timeout-seconds",
        default = "default_fetch_timeout_seconds"
    )]
    pub fetch_timeout_seconds: u64,

    /// How old a `running` claim from another run must be before recovery resets it
    #[serde(
        rename = "recovery-grace-seconds",
        default = "default_recovery_grace_seconds"
    )]
    pub recovery_grace_seconds: u64,

    /// Terminal jobs older than this are purged
    #[serde(rename = "retention-days", default = "default_retention_days")]
    pub retention_days: u32,

    /// Seconds between recovery/retention sweeps
    #[serde(
        rename = "housekeeping-seconds",
        default = "default_housekeeping_seconds"
    )]
    pub housekeeping_seconds: u64,

    /// Upper bound on article fetches a listing job performs
    #[serde(
        rename = "max-articles-per-job",
        default = "default_max_articles_per_job"
    )]
    pub max_articles_per_job: u32,

    /// Whether a successful job that stored nothing counts toward the alert threshold
    #[serde(rename = "zero-yield-counts-as-failure", default)]
    pub zero_yield_counts_as_failure: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
            fetch_timeout_seconds: default_fetch_timeout_seconds(),
            recovery_grace_seconds: default_recovery_grace_seconds(),
            retention_days: default_retention_days(),
            housekeeping_seconds: default_housekeeping_seconds(),
            max_articles_per_job: default_max_articles_per_job(),
            zero_yield_counts_as_failure: false,
        }
    }
}

/// "N requests per M seconds" admission window, applied per domain
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(rename = "max-requests", default = "default_max_requests")]
    pub max_requests: u32,

    #[serde(rename = "window-seconds", default = "default_window_seconds")]
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
        }
    }
}

/// Exponential backoff parameters shared by all tiers
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(
        rename = "initial-delay-seconds",
        default = "default_initial_delay_seconds"
    )]
    pub initial_delay_seconds: u64,

    #[serde(rename = "backoff-base", default = "default_backoff_base")]
    pub backoff_base: f64,

    #[serde(rename = "max-delay-seconds", default = "default_max_delay_seconds")]
    pub max_delay_seconds: u64,

    /// Jitter is drawn uniformly from `[0, delay * jitter_fraction]`
    #[serde(rename = "jitter-fraction", default = "default_jitter_fraction")]
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_seconds: default_initial_delay_seconds(),
            backoff_base: default_backoff_base(),
            max_delay_seconds: default_max_delay_seconds(),
            jitter_fraction: default_jitter_fraction(),
        }
    }
}

/// Per-tier overrides; omitted tiers use the built-in defaults
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TiersConfig {
    #[serde(default)]
    pub high: Option<TierOverrides>,
    #[serde(default)]
    pub medium: Option<TierOverrides>,
    #[serde(default)]
    pub low: Option<TierOverrides>,
}

impl TiersConfig {
    pub fn overrides(&self, tier: Tier) -> Option<&TierOverrides> {
        match tier {
            Tier::High => self.high.as_ref(),
            Tier::Medium => self.medium.as_ref(),
            Tier::Low => self.low.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TierOverrides {
    #[serde(rename = "interval-minutes")]
    pub interval_minutes: Option<u64>,
    #[serde(rename = "max-retries")]
    pub max_retries: Option<u32>,
    #[serde(rename = "max-concurrency")]
    pub max_concurrency: Option<u32>,
    #[serde(rename = "alert-threshold")]
    pub alert_threshold: Option<u32>,
}

/// Thresholds applied by the extractor
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    /// Minimum body length (characters) for a document to be kept
    #[serde(rename = "min-body-chars", default = "default_min_body_chars")]
    pub min_body_chars: usize,

    #[serde(rename = "min-title-chars", default = "default_min_title_chars")]
    pub min_title_chars: usize,

    /// Paragraphs must be strictly longer than this to count as content
    #[serde(
        rename = "min-paragraph-chars",
        default = "default_min_paragraph_chars"
    )]
    pub min_paragraph_chars: usize,

    /// Paragraphs whose linked text exceeds this share are navigational
    #[serde(rename = "max-link-density", default = "default_max_link_density")]
    pub max_link_density: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_body_chars: default_min_body_chars(),
            min_title_chars: default_min_title_chars(),
            min_paragraph_chars: default_min_paragraph_chars(),
            max_link_density: default_max_link_density(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Format: CrawlerName/Version (+ContactURL; ContactEmail)
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// One `[[source]]` descriptor
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub name: String,

    pub url: String,

    pub category: String,

    pub tier: Tier,

    /// Overrides the tier's default polling interval
    #[serde(rename = "interval-minutes", default)]
    pub interval_minutes: Option<u64>,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub mode: SourceMode,

    /// Try embedded JSON-LD before the selector fallback
    #[serde(rename = "structured-data", default = "default_true")]
    pub structured_data: bool,

    /// Candidate content containers, tried in order
    #[serde(rename = "content-selectors", default)]
    pub content_selectors: Vec<String>,

    #[serde(rename = "title-selectors", default)]
    pub title_selectors: Vec<String>,

    /// If non-empty, discovered links must match one of these path regexes
    #[serde(rename = "article-patterns", default)]
    pub article_patterns: Vec<String>,

    /// Discovered links matching any of these path regexes are dropped
    #[serde(rename = "exclude-patterns", default)]
    pub exclude_patterns: Vec<String>,

    /// Wildcard pattern restricting discovered links (defaults to the source host)
    #[serde(default)]
    pub domain: Option<String>,
}

fn default_tick_seconds() -> u64 {
    30
}

fn default_fetch_timeout_seconds() -> u64 {
    30
}

fn default_recovery_grace_seconds() -> u64 {
    60
}

fn default_retention_days() -> u32 {
    14
}

fn default_housekeeping_seconds() -> u64 {
    300
}

fn default_max_articles_per_job() -> u32 {
    20
}

fn default_max_requests() -> u32 {
    10
}

fn default_window_seconds() -> u64 {
    60
}

fn default_initial_delay_seconds() -> u64 {
    60
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_max_delay_seconds() -> u64 {
    3600
}

fn default_jitter_fraction() -> f64 {
    0.1
}

fn default_min_body_chars() -> usize {
    80
}

fn default_min_title_chars() -> usize {
    1
}

fn default_min_paragraph_chars() -> usize {
    30
}

fn default_max_link_density() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}
