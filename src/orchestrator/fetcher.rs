//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the conductor, including:
//! - Building HTTP clients with proper user agent strings
//! - robots.txt checks against a per-origin cache
//! - Status and Content-Type classification into [`ScrapeError`]s
//! - Honoring `Retry-After` on HTTP 429

use crate::config::UserAgentConfig;
use crate::limiter::parse_retry_after;
use crate::retry::classify_http_status;
use crate::robots::{fetch_robots, origin_of, RobotsCache};
use crate::url::extract_domain;
use crate::ScrapeError;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{redirect::Policy, Client};
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

/// Used for HTTP 429 responses that carry no usable `Retry-After`
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

const MAX_REDIRECTS: usize = 10;

/// A successfully fetched HTML page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// Final URL after redirects
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Fetches pages for workers
///
/// Every failure is already classified, so callers only decide what to do
/// with the job.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ScrapeError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The user agent configuration
/// * `timeout` - Whole-request timeout; a hung fetch is abandoned after it
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(
    config: &UserAgentConfig,
    timeout: Duration,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`PageFetcher`] over `reqwest`, respecting robots.txt
pub struct HttpFetcher {
    client: Client,
    robots: RobotsCache,

    /// Product token matched against robots.txt groups
    robots_agent: String,
}

impl HttpFetcher {
    pub fn new(config: &UserAgentConfig, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(config, timeout)?,
            robots: RobotsCache::new(),
            robots_agent: config.crawler_name.clone(),
        })
    }

    async fn robots_allow(&self, url: &Url) -> bool {
        let origin = origin_of(url);
        let now = Utc::now();

        let rules = match self.robots.get_fresh(&origin, now) {
            Some(rules) => rules,
            None => {
                debug!(%origin, "fetching robots.txt");
                let rules = fetch_robots(&self.client, &origin).await;
                self.robots.insert(&origin, rules.clone(), now);
                rules
            }
        };

        rules.is_allowed(url.as_str(), &self.robots_agent)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ScrapeError> {
        let parsed = Url::parse(url).map_err(|e| ScrapeError::PermanentFetch {
            url: url.to_string(),
            reason: format!("invalid URL: {}", e),
        })?;
        let domain = extract_domain(&parsed).unwrap_or_default();

        if !self.robots_allow(&parsed).await {
            return Err(ScrapeError::PermanentFetch {
                url: url.to_string(),
                reason: "disallowed by robots.txt".to_string(),
            });
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| classify_request_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            debug!(status = status.as_u16(), "non-success response");
            return Err(classify_http_status(
                url,
                &domain,
                status.as_u16(),
                retry_after,
                DEFAULT_RETRY_AFTER,
            ));
        }

        // A missing header is given the benefit of the doubt
        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            if !is_html(content_type) {
                return Err(ScrapeError::PermanentFetch {
                    url: url.to_string(),
                    reason: format!("non-HTML content: {}", content_type),
                });
            }
        }

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| classify_request_error(url, &e))?;

        Ok(FetchedPage {
            url: final_url,
            status: status.as_u16(),
            body,
        })
    }
}

fn is_html(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}

/// Maps a transport-level failure onto the error taxonomy
fn classify_request_error(url: &str, error: &reqwest::Error) -> ScrapeError {
    let permanent = |reason: String| ScrapeError::PermanentFetch {
        url: url.to_string(),
        reason,
    };
    let transient = |reason: String| ScrapeError::TransientFetch {
        url: url.to_string(),
        reason,
    };

    if error.is_timeout() {
        transient("request timed out".to_string())
    } else if error.is_connect() {
        transient(format!("connection failed: {}", error))
    } else if error.is_redirect() {
        permanent(format!("redirect error: {}", error))
    } else if error.is_builder() {
        permanent(format!("invalid request: {}", error))
    } else {
        transient(error.to_string())
    }
}
