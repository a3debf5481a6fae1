use crate::UrlError;
use url::Url;

/// Extracts the lowercase host of a URL
///
/// Hosts key the per-domain rate limiter and the robots.txt cache, so two
/// spellings of the same host must map to one key.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use scrape_conductor::url::extract_domain;
///
/// let url = Url::parse("https://NEWS.Example.com/world").unwrap();
/// assert_eq!(extract_domain(&url), Some("news.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Parses `url_str` and returns its lowercase host
///
/// # Returns
///
/// * `Ok(String)` - The host
/// * `Err(UrlError)` - The string is not a URL or has no host
pub fn domain_of(url_str: &str) -> Result<String, UrlError> {
    let url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
    extract_domain(&url).ok_or(UrlError::MissingDomain)
}
