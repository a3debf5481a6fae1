//! Robots.txt handling module
//!
//! Rules are fetched once per origin and cached for a day. A robots.txt that
//! cannot be fetched, or answers with a non-success status, allows everything.

mod cache;
mod parser;

pub use cache::{CachedRobots, RobotsCache, ROBOTS_TTL_HOURS};
pub use parser::ParsedRobots;

use url::Url;

/// Cache key for a URL's robots.txt (`scheme://host[:port]`)
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Fetches robots.txt for an origin
///
/// # Arguments
///
/// * `client` - HTTP client carrying the crawler's User-Agent
/// * `origin` - Origin as produced by [`origin_of`]
///
/// # Returns
///
/// The parsed rules, or allow-all when the file is unavailable
pub async fn fetch_robots(client: &reqwest::Client, origin: &str) -> ParsedRobots {
    let robots_url = format!("{}/robots.txt", origin);

    match client.get(&robots_url).send().await {
        Ok(response) if response.status().is_success() => match response.text().await {
            Ok(body) => ParsedRobots::from_content(&body),
            Err(e) => {
                tracing::debug!(%origin, error = %e, "Unreadable robots.txt, allowing all");
                ParsedRobots::allow_all()
            }
        },
        Ok(response) => {
            tracing::debug!(%origin, status = %response.status(), "No robots.txt, allowing all");
            ParsedRobots::allow_all()
        }
        Err(e) => {
            tracing::debug!(%origin, error = %e, "robots.txt unreachable, allowing all");
            ParsedRobots::allow_all()
        }
    }
}
