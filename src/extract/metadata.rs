//! Page-level metadata from `<link>`/`<meta>` tags

use crate::extract::structured::parse_published;
use chrono::{DateTime, Utc};
use scraper::{Html, Selector};

/// Metadata found outside any structured-data block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetadata {
    pub canonical_url: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub section: Option<String>,
    pub tags: Vec<String>,
}

impl PageMetadata {
    pub fn from_document(document: &Html) -> Self {
        let canonical_url = first_attr(document, r#"link[rel="canonical"]"#, "href")
            .or_else(|| first_attr(document, r#"meta[property="og:url"]"#, "content"));

        let author = first_attr(document, r#"meta[name="author"]"#, "content")
            .or_else(|| first_attr(document, r#"meta[property="article:author"]"#, "content"))
            .or_else(|| first_text(document, r#"[rel="author"]"#));

        let published_at = first_attr(
            document,
            r#"meta[property="article:published_time"]"#,
            "content",
        )
        .or_else(|| first_attr(document, r#"meta[itemprop="datePublished"]"#, "content"))
        .or_else(|| first_attr(document, "time[datetime]", "datetime"))
        .and_then(|raw| parse_published(&raw));

        let section = first_attr(document, r#"meta[property="article:section"]"#, "content");

        let mut tags = all_attrs(document, r#"meta[property="article:tag"]"#, "content");
        if let Some(keywords) = first_attr(document, r#"meta[name="keywords"]"#, "content") {
            tags.extend(keywords.split(',').map(str::to_string));
        }

        Self {
            canonical_url,
            author,
            published_at,
            section,
            tags,
        }
    }
}

fn first_attr(document: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .filter_map(|element| element.value().attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .map(str::to_string)
}

fn all_attrs(document: &Html, selector: &str, attr: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(selector) else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|element| element.value().attr(attr))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document
        .select(&selector)
        .map(|element| element.text().collect::<String>().trim().to_string())
        .find(|text| !text.is_empty())
}
