//! CSS-selector fallback extraction with boilerplate filtering

use crate::config::ExtractionConfig;
use crate::extract::text::{collapse_whitespace, join_paragraphs};
use crate::extract::{ArticleDraft, ExtractionError};
use scraper::{ElementRef, Html, Selector};

/// Candidate containers tried when a source names none
pub const DEFAULT_CONTENT_SELECTORS: &[&str] = &[
    "article",
    "[itemprop=articleBody]",
    ".article-body",
    ".article-content",
    ".post-content",
    ".entry-content",
    ".story-body",
    "main",
];

pub const DEFAULT_TITLE_SELECTORS: &[&str] = &[
    "h1",
    r#"meta[property="og:title"]"#,
    r#"meta[name="twitter:title"]"#,
    "title",
];

/// Elements whose paragraphs are navigation or chrome, not content
const EXCLUDED_ANCESTORS: &[&str] = &["nav", "aside", "footer", "form", "figure", "menu"];

/// Class/id fragments marking share widgets, promos and related-link blocks
const EXCLUDED_CLASS_HINTS: &[&str] = &[
    "share",
    "social",
    "newsletter",
    "promo",
    "advert",
    "sponsor",
    "related",
    "recommend",
    "subscribe",
    "cookie",
];

/// Phrases that mark a short paragraph as promotional boilerplate
const PROMOTIONAL_PHRASES: &[&str] = &[
    "subscribe",
    "sign up",
    "newsletter",
    "advertisement",
    "sponsored",
    "click here",
    "follow us",
    "share this",
    "read more",
    "related:",
    "all rights reserved",
    "download our app",
    "support our journalism",
    "cookies",
];

/// Paragraphs longer than this are never treated as promotional
const PROMOTIONAL_MAX_CHARS: usize = 200;

/// Picks the first container that yields qualifying paragraphs
///
/// # Returns
///
/// * `Ok(ArticleDraft)` - Title (possibly empty) and the joined paragraphs
/// * `Err(ExtractionError::StructureMismatch)` - No selector matched a container with content
pub fn extract_with_selectors(
    document: &Html,
    content_selectors: &[Selector],
    title_selectors: &[Selector],
    config: &ExtractionConfig,
) -> Result<ArticleDraft, ExtractionError> {
    let paragraph = Selector::parse("p").map_err(|e| {
        ExtractionError::StructureMismatch(format!("paragraph selector: {:?}", e))
    })?;
    let link = Selector::parse("a").map_err(|e| {
        ExtractionError::StructureMismatch(format!("link selector: {:?}", e))
    })?;

    let body = content_selectors
        .iter()
        .flat_map(|selector| document.select(selector))
        .find_map(|container| container_text(container, &paragraph, &link, config))
        .ok_or_else(|| {
            ExtractionError::StructureMismatch(
                "no content selector matched a container with paragraphs".to_string(),
            )
        })?;

    Ok(ArticleDraft {
        title: extract_title(document, title_selectors).unwrap_or_default(),
        body,
        ..ArticleDraft::default()
    })
}

/// First non-empty title; `meta` elements contribute their `content`
pub fn extract_title(document: &Html, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|selector| {
        document.select(selector).find_map(|element| {
            let text = if element.value().name() == "meta" {
                element.value().attr("content").unwrap_or_default().to_string()
            } else {
                element.text().collect::<String>()
            };
            Some(collapse_whitespace(&text)).filter(|t| !t.is_empty())
        })
    })
}

fn container_text(
    container: ElementRef<'_>,
    paragraph: &Selector,
    link: &Selector,
    config: &ExtractionConfig,
) -> Option<String> {
    let kept: Vec<String> = container
        .select(paragraph)
        .filter(|p| !inside_boilerplate(*p, container))
        .filter_map(|p| {
            let text = collapse_whitespace(&p.text().collect::<String>());
            let chars = text.chars().count();

            if chars <= config.min_paragraph_chars || is_promotional(&text) {
                return None;
            }

            let linked: usize = p
                .select(link)
                .map(|a| collapse_whitespace(&a.text().collect::<String>()).chars().count())
                .sum();
            let density = linked as f64 / chars as f64;
            if density > config.max_link_density {
                return None;
            }

            Some(text)
        })
        .collect();

    if kept.is_empty() {
        None
    } else {
        Some(join_paragraphs(kept.iter().map(String::as_str)))
    }
}

/// Whether `element` sits inside navigation or widget markup below `container`
fn inside_boilerplate(element: ElementRef<'_>, container: ElementRef<'_>) -> bool {
    for node in element.ancestors() {
        if node.id() == container.id() {
            break;
        }
        let Some(ancestor) = node.value().as_element() else {
            continue;
        };

        if EXCLUDED_ANCESTORS.contains(&ancestor.name()) {
            return true;
        }

        let marked = ancestor
            .attr("class")
            .into_iter()
            .chain(ancestor.attr("id"))
            .any(|attr| {
                let attr = attr.to_ascii_lowercase();
                EXCLUDED_CLASS_HINTS.iter().any(|hint| attr.contains(hint))
            });
        if marked {
            return true;
        }
    }

    false
}

/// Short paragraphs carrying a boilerplate phrase
pub fn is_promotional(text: &str) -> bool {
    if text.chars().count() > PROMOTIONAL_MAX_CHARS {
        return false;
    }
    let lower = text.to_lowercase();
    PROMOTIONAL_PHRASES.iter().any(|phrase| lower.contains(phrase))
}
