use crate::config::types::{
    Config, ExtractionConfig, OrchestratorConfig, OutputConfig, RateLimitConfig, RetryConfig,
    SourceEntry, TiersConfig, UserAgentConfig,
};
use crate::registry::Tier;
use crate::ConfigError;
use regex::Regex;
use scraper::Selector;
use std::collections::HashSet;
use url::Url;

/// Longest polling interval accepted, one year
pub const MAX_INTERVAL_MINUTES: u64 = 365 * 24 * 60;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_orchestrator_config(&config.orchestrator)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_retry_config(&config.retry)?;
    validate_tiers_config(&config.tiers)?;
    validate_extraction_config(&config.extraction)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    validate_sources(&config.sources)?;
    Ok(())
}

fn validate_orchestrator_config(config: &OrchestratorConfig) -> Result<(), ConfigError> {
    if config.tick_seconds < 1 {
        return Err(ConfigError::Validation(
            "tick_seconds must be >= 1".to_string(),
        ));
    }

    if config.fetch_timeout_seconds < 1 {
        return Err(ConfigError::Validation(
            "fetch_timeout_seconds must be >= 1".to_string(),
        ));
    }

    if config.housekeeping_seconds < 1 {
        return Err(ConfigError::Validation(
            "housekeeping_seconds must be >= 1".to_string(),
        ));
    }

    if config.max_articles_per_job < 1 {
        return Err(ConfigError::Validation(format!(
            "max_articles_per_job must be >= 1, got {}",
            config.max_articles_per_job
        )));
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.max_requests < 1 {
        return Err(ConfigError::Validation(format!(
            "rate-limit max_requests must be >= 1, got {}",
            config.max_requests
        )));
    }

    if config.window_seconds < 1 {
        return Err(ConfigError::Validation(format!(
            "rate-limit window_seconds must be >= 1, got {}",
            config.window_seconds
        )));
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    if config.initial_delay_seconds < 1 {
        return Err(ConfigError::Validation(
            "retry initial_delay_seconds must be >= 1".to_string(),
        ));
    }

    if config.backoff_base.is_nan() || config.backoff_base < 1.0 {
        return Err(ConfigError::Validation(format!(
            "retry backoff_base must be >= 1.0, got {}",
            config.backoff_base
        )));
    }

    if config.max_delay_seconds < config.initial_delay_seconds {
        return Err(ConfigError::Validation(format!(
            "retry max_delay_seconds ({}) must be >= initial_delay_seconds ({})",
            config.max_delay_seconds, config.initial_delay_seconds
        )));
    }

    if !(0.0..=1.0).contains(&config.jitter_fraction) {
        return Err(ConfigError::Validation(format!(
            "retry jitter_fraction must be between 0.0 and 1.0, got {}",
            config.jitter_fraction
        )));
    }

    Ok(())
}

fn validate_tiers_config(config: &TiersConfig) -> Result<(), ConfigError> {
    for tier in Tier::all() {
        let Some(overrides) = config.overrides(tier) else {
            continue;
        };

        if let Some(minutes) = overrides.interval_minutes {
            if !(1..=MAX_INTERVAL_MINUTES).contains(&minutes) {
                return Err(ConfigError::Validation(format!(
                    "tier {} interval_minutes must be between 1 and {}, got {}",
                    tier, MAX_INTERVAL_MINUTES, minutes
                )));
            }
        }

        if let Some(concurrency) = overrides.max_concurrency {
            if !(1..=100).contains(&concurrency) {
                return Err(ConfigError::Validation(format!(
                    "tier {} max_concurrency must be between 1 and 100, got {}",
                    tier, concurrency
                )));
            }
        }

        if overrides.alert_threshold == Some(0) {
            return Err(ConfigError::Validation(format!(
                "tier {} alert_threshold must be >= 1",
                tier
            )));
        }
    }

    Ok(())
}

fn validate_extraction_config(config: &ExtractionConfig) -> Result<(), ConfigError> {
    if !(config.max_link_density > 0.0 && config.max_link_density <= 1.0) {
        return Err(ConfigError::Validation(format!(
            "max_link_density must be in (0.0, 1.0], got {}",
            config.max_link_density
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates `[[source]]` descriptors
///
/// Names must be unique since they key jobs and per-source state.
fn validate_sources(sources: &[SourceEntry]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();

    for entry in sources {
        if entry.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "source name cannot be empty".to_string(),
            ));
        }

        if !seen.insert(entry.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate source name '{}'",
                entry.name
            )));
        }

        if entry.category.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "source '{}' must have a category",
                entry.name
            )));
        }

        let url = Url::parse(&entry.url).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid url for source '{}': {}", entry.name, e))
        })?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "source '{}' url must use http or https, got '{}'",
                entry.name,
                url.scheme()
            )));
        }

        if url.host_str().is_none() {
            return Err(ConfigError::InvalidUrl(format!(
                "source '{}' url has no host",
                entry.name
            )));
        }

        if let Some(minutes) = entry.interval_minutes {
            if !(1..=MAX_INTERVAL_MINUTES).contains(&minutes) {
                return Err(ConfigError::Validation(format!(
                    "source '{}' interval_minutes must be between 1 and {}, got {}",
                    entry.name, MAX_INTERVAL_MINUTES, minutes
                )));
            }
        }

        for selector in entry.content_selectors.iter().chain(&entry.title_selectors) {
            Selector::parse(selector).map_err(|e| {
                ConfigError::Validation(format!(
                    "source '{}' has invalid selector '{}': {:?}",
                    entry.name, selector, e
                ))
            })?;
        }

        for pattern in entry.article_patterns.iter().chain(&entry.exclude_patterns) {
            Regex::new(pattern).map_err(|e| {
                ConfigError::InvalidPattern(format!(
                    "source '{}' has invalid path pattern '{}': {}",
                    entry.name, pattern, e
                ))
            })?;
        }

        if let Some(domain) = &entry.domain {
            validate_domain_pattern(domain)?;
        }
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    if let Some(domain) = pattern.strip_prefix("*.") {
        validate_domain_string(domain)?;
    } else {
        validate_domain_string(pattern)?;
    }

    Ok(())
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    };

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
