//! Content extraction
//!
//! One generic [`Extractor`] per source turns a fetched page into a
//! [`ScrapedDocument`]. Extraction is layered: an embedded JSON-LD article
//! block wins when it carries a usable headline and body; otherwise the
//! source's ordered content selectors are tried, with promotional and
//! navigational paragraphs filtered out. Whatever comes out is validated
//! before it is returned.
//!
//! Parsed HTML is not `Send`, so everything here is synchronous and must not
//! be held across an `.await`.

mod fallback;
mod links;
mod metadata;
mod structured;
mod text;

pub use fallback::{is_promotional, DEFAULT_CONTENT_SELECTORS, DEFAULT_TITLE_SELECTORS};
pub use links::LinkRules;
pub use metadata::PageMetadata;
pub use text::{complexity_score, normalize_text, word_count};

use crate::config::ExtractionConfig;
use crate::registry::Source;
use crate::url::normalize_url;
use crate::ScrapeError;
use chrono::{DateTime, Utc};
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Which stage produced a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionMethod {
    Structured,
    Fallback,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Structured => "structured",
            Self::Fallback => "fallback",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "structured" => Some(Self::Structured),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A validated article
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedDocument {
    /// Source name
    pub source: String,
    pub canonical_url: String,
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub category: String,
    pub tags: Vec<String>,
    pub word_count: usize,

    /// Flesch-Kincaid grade level of `body`
    pub complexity: f64,
    pub extraction_method: ExtractionMethod,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractionError {
    /// No extraction stage recognized the page layout
    #[error("page structure not recognized: {0}")]
    StructureMismatch(String),

    /// Content was found but is too short or untitled
    #[error("document rejected: {0}")]
    Validation(String),
}

impl ExtractionError {
    pub fn into_scrape_error(self, url: &str) -> ScrapeError {
        match self {
            Self::StructureMismatch(reason) => ScrapeError::ExtractionStructure {
                url: url.to_string(),
                reason,
            },
            Self::Validation(reason) => ScrapeError::Validation {
                url: url.to_string(),
                reason,
            },
        }
    }
}

/// Intermediate result of one extraction stage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleDraft {
    pub title: String,
    pub body: String,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub section: Option<String>,
    pub tags: Vec<String>,
    pub canonical_url: Option<String>,
}

/// The two extraction stages a source's rules provide
pub trait ContentStrategy: Send + Sync {
    /// Article from embedded structured data, if the page carries a usable block
    fn extract_structured(&self, document: &Html) -> Option<ArticleDraft>;

    /// Article from the page markup
    fn extract_fallback(&self, document: &Html) -> Result<ArticleDraft, ExtractionError>;
}

/// Compiled selector lists for one source
pub struct SelectorRules {
    content: Vec<Selector>,
    titles: Vec<Selector>,
    config: ExtractionConfig,
}

impl SelectorRules {
    /// Compiles the source's selectors, or the defaults where it names none
    pub fn compile(
        content_selectors: &[String],
        title_selectors: &[String],
        config: &ExtractionConfig,
    ) -> Result<Self, ScrapeError> {
        Ok(Self {
            content: compile_selectors(content_selectors, DEFAULT_CONTENT_SELECTORS)?,
            titles: compile_selectors(title_selectors, DEFAULT_TITLE_SELECTORS)?,
            config: config.clone(),
        })
    }
}

impl ContentStrategy for SelectorRules {
    fn extract_structured(&self, document: &Html) -> Option<ArticleDraft> {
        structured::extract_json_ld(document)
    }

    fn extract_fallback(&self, document: &Html) -> Result<ArticleDraft, ExtractionError> {
        fallback::extract_with_selectors(document, &self.content, &self.titles, &self.config)
    }
}

fn compile_selectors(configured: &[String], defaults: &[&str]) -> Result<Vec<Selector>, ScrapeError> {
    let raw: Vec<&str> = if configured.is_empty() {
        defaults.to_vec()
    } else {
        configured.iter().map(String::as_str).collect()
    };

    raw.into_iter()
        .map(|s| {
            Selector::parse(s)
                .map_err(|e| ScrapeError::SourceConfig(format!("invalid selector '{}': {:?}", s, e)))
        })
        .collect()
}

/// Turns pages from one source into documents
pub struct Extractor {
    source: String,
    category: String,
    structured_data: bool,
    strategy: Box<dyn ContentStrategy>,
    links: LinkRules,
    config: ExtractionConfig,
}

impl Extractor {
    /// Builds the extractor for `source`
    ///
    /// # Returns
    ///
    /// * `Err(ScrapeError::SourceConfig)` - A selector or path pattern does not compile
    pub fn new(source: &Source, config: &ExtractionConfig) -> Result<Self, ScrapeError> {
        Ok(Self {
            source: source.name.clone(),
            category: source.category.clone(),
            structured_data: source.rules.structured_data,
            strategy: Box::new(SelectorRules::compile(
                &source.rules.content_selectors,
                &source.rules.title_selectors,
                config,
            )?),
            links: LinkRules::compile(&source.rules)?,
            config: config.clone(),
        })
    }

    /// Replaces the extraction stages, keeping validation and metadata handling
    pub fn with_strategy(mut self, strategy: Box<dyn ContentStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Extracts and validates a document from `raw_html` fetched at `url`
    ///
    /// # Returns
    ///
    /// * `Ok(ScrapedDocument)` - Valid document; `extraction_method` tells which stage produced it
    /// * `Err(ExtractionError::StructureMismatch)` - Neither stage found content
    /// * `Err(ExtractionError::Validation)` - Content found but too short or untitled
    pub fn extract(&self, raw_html: &str, url: &str) -> Result<ScrapedDocument, ExtractionError> {
        let document = Html::parse_document(raw_html);

        let mut structured_rejection = None;
        if self.structured_data {
            if let Some(draft) = self.strategy.extract_structured(&document) {
                match self.validate(&draft) {
                    Ok(()) => {
                        return Ok(self.finish(draft, ExtractionMethod::Structured, &document, url))
                    }
                    Err(e) => structured_rejection = Some(e),
                }
            }
        }

        match self.strategy.extract_fallback(&document) {
            Ok(draft) => {
                self.validate(&draft)?;
                Ok(self.finish(draft, ExtractionMethod::Fallback, &document, url))
            }
            Err(mismatch) => Err(structured_rejection.unwrap_or(mismatch)),
        }
    }

    /// Candidate article URLs on a listing page
    pub fn extract_links(&self, raw_html: &str, base_url: &str) -> Vec<String> {
        match Url::parse(base_url) {
            Ok(base) => self.links.extract_links(raw_html, &base),
            Err(_) => Vec::new(),
        }
    }

    fn validate(&self, draft: &ArticleDraft) -> Result<(), ExtractionError> {
        let title_chars = draft.title.trim().chars().count();
        if title_chars == 0 || title_chars < self.config.min_title_chars {
            return Err(ExtractionError::Validation(format!(
                "title has {} characters, need at least {}",
                title_chars,
                self.config.min_title_chars.max(1)
            )));
        }

        let body_chars = draft.body.chars().count();
        if body_chars <= self.config.min_body_chars {
            return Err(ExtractionError::Validation(format!(
                "body has {} characters, need more than {}",
                body_chars, self.config.min_body_chars
            )));
        }

        Ok(())
    }

    fn finish(
        &self,
        draft: ArticleDraft,
        method: ExtractionMethod,
        document: &Html,
        url: &str,
    ) -> ScrapedDocument {
        let meta = PageMetadata::from_document(document);

        let canonical_url = draft
            .canonical_url
            .as_deref()
            .or(meta.canonical_url.as_deref())
            .and_then(|candidate| canonicalize(candidate, url))
            .or_else(|| normalize_url(url).ok().map(|u| u.to_string()))
            .unwrap_or_else(|| url.to_string());

        let tags = merge_tags(draft.tags.iter().chain(meta.tags.iter()));

        ScrapedDocument {
            source: self.source.clone(),
            canonical_url,
            word_count: word_count(&draft.body),
            complexity: complexity_score(&draft.body),
            title: draft.title,
            author: draft.author.or(meta.author),
            published_at: draft.published_at.or(meta.published_at),
            category: draft
                .section
                .or(meta.section)
                .unwrap_or_else(|| self.category.clone()),
            tags,
            body: draft.body,
            extraction_method: method,
        }
    }
}

/// Resolves a possibly relative canonical link against the page URL
fn canonicalize(candidate: &str, page_url: &str) -> Option<String> {
    let base = Url::parse(page_url).ok()?;
    let joined = base.join(candidate.trim()).ok()?;
    normalize_url(joined.as_str()).ok().map(|u| u.to_string())
}

/// Lower-cased, trimmed, deduplicated, first occurrence wins
fn merge_tags<'a, I>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut seen = HashSet::new();
    tags.into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ExtractionRules, SourceMode, Tier};
    use std::time::Duration;

    fn source(structured_data: bool) -> Source {
        Source {
            name: "Daily".to_string(),
            url: "https://news.example.com/".to_string(),
            domain: "news.example.com".to_string(),
            category: "general".to_string(),
            tier: Tier::High,
            interval: Duration::from_secs(900),
            enabled: true,
            mode: SourceMode::Article,
            rules: ExtractionRules {
                structured_data,
                content_selectors: vec![".story".to_string()],
                link_scope: "news.example.com".to_string(),
                ..ExtractionRules::default()
            },
        }
    }

    fn extractor(structured_data: bool) -> Extractor {
        Extractor::new(&source(structured_data), &ExtractionConfig::default()).unwrap()
    }

    const BODY: &str = "Crews worked through the night to restore power across the valley. \
                        By morning most homes had electricity again.\n\n\
                        The utility said the remaining outages would be fixed by noon.";

    fn structured_page() -> String {
        format!(
            r#"<html><head>
            <script type="application/ld+json">{}</script>
            <meta property="article:tag" content="Power">
            </head><body><div class="story"><p>unrelated short</p></div></body></html>"#,
            serde_json::json!({
                "@type": "NewsArticle",
                "headline": "Power restored",
                "articleBody": BODY,
                "articleSection": "Local",
                "keywords": ["Power", "Utilities"],
                "url": "/2024/power-restored?utm_source=feed"
            })
        )
    }

    fn fallback_page() -> &'static str {
        r#"<html><head><title>Site | Bridge reopens</title>
        <link rel="canonical" href="https://news.example.com/bridge-reopens/">
        </head><body>
        <h1>Bridge reopens after repairs</h1>
        <div class="story">
          <p>The main bridge into town reopened on Friday after six weeks of repairs.</p>
          <p>Sign up for our newsletter today!</p>
          <p>Engineers replaced two support beams and resurfaced the whole deck.</p>
          <p>Traffic officials expect commute times to return to normal next week.</p>
        </div></body></html>"#
    }

    #[test]
    fn test_structured_data_preferred() {
        let doc = extractor(true)
            .extract(&structured_page(), "https://news.example.com/2024/power-restored")
            .unwrap();

        assert_eq!(doc.extraction_method, ExtractionMethod::Structured);
        assert_eq!(doc.title, "Power restored");
        assert_eq!(doc.body, normalize_text(BODY));
        assert_eq!(doc.category, "Local");
        assert_eq!(doc.tags, vec!["power".to_string(), "utilities".to_string()]);
        assert_eq!(
            doc.canonical_url,
            "https://news.example.com/2024/power-restored"
        );
        assert_eq!(doc.source, "Daily");
        assert!(doc.word_count > 20);
    }

    #[test]
    fn test_structured_disabled_uses_fallback() {
        let result = extractor(false).extract(&structured_page(), "https://news.example.com/x");
        assert!(matches!(result, Err(ExtractionError::StructureMismatch(_))));
    }

    #[test]
    fn test_fallback_document() {
        let doc = extractor(true)
            .extract(fallback_page(), "https://news.example.com/bridge-reopens")
            .unwrap();

        assert_eq!(doc.extraction_method, ExtractionMethod::Fallback);
        assert_eq!(doc.title, "Bridge reopens after repairs");
        assert!(doc.body.contains("six weeks of repairs"));
        assert!(doc.body.contains("support beams"));
        assert!(doc.body.contains("commute times"));
        assert!(!doc.body.contains("newsletter"));
        assert_eq!(doc.body.split("\n\n").count(), 3);
        assert_eq!(doc.category, "general");
        assert_eq!(
            doc.canonical_url,
            "https://news.example.com/bridge-reopens"
        );
    }

    #[test]
    fn test_short_body_rejected() {
        let html = r#"<html><body><h1>Title</h1><div class="story">
            <p>Only one modest paragraph lives in this story.</p></div></body></html>"#;

        let result = extractor(true).extract(html, "https://news.example.com/a");
        assert!(matches!(result, Err(ExtractionError::Validation(_))));
    }

    #[test]
    fn test_missing_title_rejected() {
        let html = r#"<html><body><div class="story">
            <p>The main bridge into town reopened on Friday after six weeks of repairs.</p>
            <p>Engineers replaced two support beams and resurfaced the whole deck.</p>
            </div></body></html>"#;

        let result = extractor(true).extract(html, "https://news.example.com/a");
        assert!(matches!(result, Err(ExtractionError::Validation(_))));
    }

    #[test]
    fn test_custom_strategy() {
        struct Fixed;
        impl ContentStrategy for Fixed {
            fn extract_structured(&self, _: &Html) -> Option<ArticleDraft> {
                None
            }
            fn extract_fallback(&self, _: &Html) -> Result<ArticleDraft, ExtractionError> {
                Ok(ArticleDraft {
                    title: "Fixed".to_string(),
                    body: "x".repeat(100),
                    ..ArticleDraft::default()
                })
            }
        }

        let doc = extractor(true)
            .with_strategy(Box::new(Fixed))
            .extract("<html></html>", "https://news.example.com/fixed")
            .unwrap();
        assert_eq!(doc.title, "Fixed");
        assert_eq!(doc.extraction_method, ExtractionMethod::Fallback);
    }

    #[test]
    fn test_invalid_selector_is_source_config() {
        let mut bad = source(true);
        bad.rules.content_selectors = vec!["div[".to_string()];
        assert!(matches!(
            Extractor::new(&bad, &ExtractionConfig::default()),
            Err(ScrapeError::SourceConfig(_))
        ));
    }

    #[test]
    fn test_merge_tags() {
        let tags = vec![
            " Space ".to_string(),
            "space".to_string(),
            "".to_string(),
            "NASA".to_string(),
        ];
        assert_eq!(merge_tags(&tags), vec!["space".to_string(), "nasa".to_string()]);
    }
}
