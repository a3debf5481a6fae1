//! Article URL discovery on listing pages

use crate::registry::ExtractionRules;
use crate::url::{extract_domain, matches_wildcard, normalize_url, resolve_link};
use crate::ScrapeError;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Path shapes that are never articles
const DEFAULT_EXCLUDES: &[&str] = &[
    r"^/(tags?|topics?|categor(y|ies)|sections?|authors?|search|page|live|video|videos|newsletters?|subscribe|login|account|about|contact|privacy|terms)(/|$)",
    r"/page/\d+/?$",
    r"(?i)\.(jpe?g|png|gif|svg|webp|pdf|zip|mp3|mp4|css|js|xml|rss|json)$",
    r"/(feed|rss|amp)/?$",
];

/// Compiled link filters for one source
#[derive(Debug, Clone)]
pub struct LinkRules {
    scope: String,
    article_patterns: Vec<Regex>,
    exclude_patterns: Vec<Regex>,
}

impl LinkRules {
    pub fn compile(rules: &ExtractionRules) -> Result<Self, ScrapeError> {
        Ok(Self {
            scope: rules.link_scope.clone(),
            article_patterns: compile_patterns(rules.article_patterns.iter().map(String::as_str))?,
            exclude_patterns: compile_patterns(
                DEFAULT_EXCLUDES
                    .iter()
                    .copied()
                    .chain(rules.exclude_patterns.iter().map(String::as_str)),
            )?,
        })
    }

    /// Candidate article URLs on a listing page, normalized and deduplicated
    ///
    /// Links outside the scope domain, section indexes (a single path segment
    /// with no hyphen or digit), excluded paths and the page itself are dropped.
    /// When article patterns are configured, a path must match one of them.
    pub fn extract_links(&self, raw_html: &str, base_url: &Url) -> Vec<String> {
        let document = Html::parse_document(raw_html);
        let Ok(anchor) = Selector::parse("a[href]") else {
            return Vec::new();
        };

        let page = normalize_url(base_url.as_str()).ok();
        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for element in document.select(&anchor) {
            if element.value().attr("download").is_some() {
                continue;
            }

            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let Some(resolved) = resolve_link(href, base_url) else {
                continue;
            };
            let Ok(url) = normalize_url(resolved.as_str()) else {
                continue;
            };

            if page.as_ref() == Some(&url) || !self.accepts(&url) {
                continue;
            }

            let url = url.to_string();
            if seen.insert(url.clone()) {
                links.push(url);
            }
        }

        links
    }

    fn accepts(&self, url: &Url) -> bool {
        let in_scope = extract_domain(url)
            .map(|host| matches_wildcard(&self.scope, &host))
            .unwrap_or(false);
        if !in_scope {
            return false;
        }

        let path = url.path();
        if path == "/" || is_section_index(path) {
            return false;
        }

        if self.exclude_patterns.iter().any(|re| re.is_match(path)) {
            return false;
        }

        self.article_patterns.is_empty() || self.article_patterns.iter().any(|re| re.is_match(path))
    }
}

fn compile_patterns<'a, I>(patterns: I) -> Result<Vec<Regex>, ScrapeError>
where
    I: IntoIterator<Item = &'a str>,
{
    patterns
        .into_iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                ScrapeError::SourceConfig(format!("invalid path pattern '{}': {}", p, e))
            })
        })
        .collect()
}

fn is_section_index(path: &str) -> bool {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    match (segments.next(), segments.next()) {
        (Some(only), None) => !only.contains('-') && !only.chars().any(|c| c.is_ascii_digit()),
        _ => false,
    }
}
