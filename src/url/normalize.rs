use crate::UrlError;
use url::Url;

/// Query parameters that only carry campaign or click tracking
const TRACKING_PARAMS: &[&str] = &[
    "fbclid",
    "gclid",
    "mc_eid",
    "mc_cid",
    "ref",
    "cmpid",
    "ocid",
];

/// Normalizes a URL into the canonical form used for document identity
///
/// Two links that point at the same article must normalize to the same
/// string, since documents are unique on (source, canonical URL).
///
/// # Normalization Steps
///
/// 1. Parse; only `http` and `https` are accepted
/// 2. Lowercase the host (the scheme and any `www.` are kept so the result stays fetchable)
/// 3. Collapse duplicate slashes, resolve `.`/`..`, drop the trailing slash except at root
/// 4. Drop the fragment
/// 5. Drop tracking parameters (`utm_*` and friends), sort the rest, drop an empty query
///
/// # Examples
///
/// ```
/// use scrape_conductor::url::normalize_url;
///
/// let url = normalize_url("https://News.Example.com/world//story/?utm_source=x#comments").unwrap();
/// assert_eq!(url.as_str(), "https://news.example.com/world/story");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let mut url = Url::parse(url_str.trim()).map_err(|e| UrlError::Parse(e.to_string()))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let path = normalize_path(url.path());
    url.set_path(&path);

    url.set_fragment(None);

    if url.query().is_some() {
        let params = filter_and_sort_query_params(&url);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params);
        }
    }

    Ok(url)
}

/// Resolves an `href` found on `base_url` into an absolute http(s) URL
///
/// Returns `None` for anchors, `javascript:`/`mailto:`/`tel:`/`data:` links
/// and anything that does not resolve to http(s).
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    base_url
        .join(href)
        .ok()
        .filter(|url| url.scheme() == "http" || url.scheme() == "https")
}

fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                segments.pop();
            }
            _ => segments.push(segment),
        }
    }

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key)
}
