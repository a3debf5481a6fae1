//! JSON-LD (`<script type="application/ld+json">`) article extraction

use crate::extract::text::{collapse_whitespace, normalize_text};
use crate::extract::ArticleDraft;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

/// schema.org types treated as articles
const ARTICLE_TYPES: &[&str] = &[
    "Article",
    "NewsArticle",
    "BlogPosting",
    "ReportageNews",
    "AnalysisNewsArticle",
    "OpinionNewsArticle",
    "BackgroundNewsArticle",
    "ReviewNewsArticle",
    "TechArticle",
    "ScholarlyArticle",
    "LiveBlogPosting",
    "Report",
];

/// Returns the first article block carrying both a headline and a body
///
/// Blocks that fail to parse as JSON are skipped. Top-level arrays and
/// `@graph` containers are flattened.
pub fn extract_json_ld(document: &Html) -> Option<ArticleDraft> {
    let selector = Selector::parse(r#"script[type="application/ld+json"]"#).ok()?;

    for script in document.select(&selector) {
        let raw: String = script.text().collect();
        let value: Value = match serde_json::from_str(raw.trim()) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "skipping malformed JSON-LD block");
                continue;
            }
        };

        let mut nodes = Vec::new();
        flatten(value, &mut nodes);

        if let Some(draft) = nodes
            .iter()
            .filter(|node| is_article(node))
            .find_map(draft_from_node)
        {
            return Some(draft);
        }
    }

    None
}

fn flatten(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten(item, out);
            }
        }
        Value::Object(mut map) => {
            if let Some(graph) = map.remove("@graph") {
                flatten(graph, out);
            }
            if !map.is_empty() {
                out.push(Value::Object(map));
            }
        }
        _ => {}
    }
}

fn is_article(node: &Value) -> bool {
    match node.get("@type") {
        Some(Value::String(t)) => is_article_type(t),
        Some(Value::Array(types)) => types
            .iter()
            .filter_map(Value::as_str)
            .any(is_article_type),
        _ => false,
    }
}

fn is_article_type(name: &str) -> bool {
    let name = name.rsplit('/').next().unwrap_or(name);
    ARTICLE_TYPES.contains(&name)
}

fn draft_from_node(node: &Value) -> Option<ArticleDraft> {
    let title = string_field(node, "headline")
        .or_else(|| string_field(node, "name"))
        .map(|t| collapse_whitespace(&t))
        .filter(|t| !t.is_empty())?;

    let body = string_field(node, "articleBody")
        .map(|b| normalize_text(&b))
        .filter(|b| !b.is_empty())?;

    Some(ArticleDraft {
        title,
        body,
        author: node.get("author").and_then(author_names),
        published_at: string_field(node, "datePublished").and_then(|d| parse_published(&d)),
        section: node.get("articleSection").and_then(first_string),
        tags: node.get("keywords").map(keywords).unwrap_or_default(),
        canonical_url: string_field(node, "url").or_else(|| {
            node.get("mainEntityOfPage").and_then(|page| match page {
                Value::String(s) => Some(s.clone()),
                other => other.get("@id").and_then(Value::as_str).map(str::to_string),
            })
        }),
    })
}

fn string_field(node: &Value, key: &str) -> Option<String> {
    node.get(key).and_then(first_string)
}

fn first_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Array(items) => items.iter().find_map(first_string),
        _ => None,
    }
}

/// `"Jane"`, `{"name": "Jane"}` or a list of either
fn author_names(value: &Value) -> Option<String> {
    let names: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(author_names).collect(),
        Value::Object(_) => value
            .get("name")
            .and_then(first_string)
            .into_iter()
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };

    if names.is_empty() {
        None
    } else {
        Some(names.join(", "))
    }
}

/// Comma-separated string or array of strings
fn keywords(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Parses RFC 3339 timestamps, naive date-times (taken as UTC) and bare dates
pub fn parse_published(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn page(json: &str) -> Html {
        Html::parse_document(&format!(
            r#"<html><head><script type="application/ld+json">{}</script></head><body></body></html>"#,
            json
        ))
    }

    #[test]
    fn test_news_article_block() {
        let doc = page(
            r#"{
                "@context": "https://schema.org",
                "@type": "NewsArticle",
                "headline": "  Council approves   budget ",
                "articleBody": "The council met on Tuesday.\n\nIt approved the budget.",
                "author": [{"@type": "Person", "name": "Ana Ruiz"}, {"name": "Li Wei"}],
                "datePublished": "2024-03-05T09:30:00+01:00",
                "articleSection": ["Local", "Politics"],
                "keywords": "budget, council",
                "mainEntityOfPage": {"@id": "https://news.example.com/budget"}
            }"#,
        );

        let draft = extract_json_ld(&doc).unwrap();
        assert_eq!(draft.title, "Council approves budget");
        assert_eq!(
            draft.body,
            "The council met on Tuesday.\n\nIt approved the budget."
        );
        assert_eq!(draft.author.as_deref(), Some("Ana Ruiz, Li Wei"));
        assert_eq!(
            draft.published_at,
            Some(Utc.with_ymd_and_hms(2024, 3, 5, 8, 30, 0).unwrap())
        );
        assert_eq!(draft.section.as_deref(), Some("Local"));
        assert_eq!(draft.tags, vec!["budget".to_string(), "council".to_string()]);
        assert_eq!(
            draft.canonical_url.as_deref(),
            Some("https://news.example.com/budget")
        );
    }

    #[test]
    fn test_graph_container() {
        let doc = page(
            r#"{"@graph": [
                {"@type": "WebSite", "name": "Example"},
                {"@type": ["BlogPosting"], "headline": "Post", "articleBody": "Body text"}
            ]}"#,
        );

        let draft = extract_json_ld(&doc).unwrap();
        assert_eq!(draft.title, "Post");
        assert_eq!(draft.body, "Body text");
    }

    #[test]
    fn test_missing_body_yields_none() {
        let doc = page(r#"{"@type": "NewsArticle", "headline": "Only a headline"}"#);
        assert!(extract_json_ld(&doc).is_none());
    }

    #[test]
    fn test_non_article_and_malformed_ignored() {
        let doc = Html::parse_document(
            r#"<html><head>
            <script type="application/ld+json">{ not json </script>
            <script type="application/ld+json">{"@type": "Organization", "name": "X", "articleBody": "nope"}</script>
            </head></html>"#,
        );
        assert!(extract_json_ld(&doc).is_none());
    }

    #[test]
    fn test_parse_published_formats() {
        assert!(parse_published("2024-01-02T03:04:05Z").is_some());
        assert!(parse_published("2024-01-02T03:04:05").is_some());
        assert_eq!(
            parse_published("2024-01-02"),
            Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap())
        );
        assert!(parse_published("yesterday").is_none());
    }
}
