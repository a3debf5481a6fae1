//! Shared fixtures for the integration tests

use async_trait::async_trait;
use scrape_conductor::config::parse_config;
use scrape_conductor::events::MemorySink;
use scrape_conductor::orchestrator::{Collaborators, FetchedPage, PageFetcher};
use scrape_conductor::storage::SqliteStorage;
use scrape_conductor::{Orchestrator, ScrapeError};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Builds a configuration file body around the given `[[source]]` blocks
pub fn config_toml(db_path: &Path, extra: &str, sources: &str) -> String {
    format!(
        r#"
{extra}

[user-agent]
crawler-name = "TestConductor"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[output]
database-path = "{db}"

{sources}
"#,
        extra = extra,
        db = db_path.display(),
        sources = sources
    )
}

/// Serves canned responses per URL; the last response for a URL repeats
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, Vec<Result<String, ScrapeError>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn respond(&self, url: &str, response: Result<String, ScrapeError>) {
        self.responses
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push(response);
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, ScrapeError> {
        self.calls.lock().unwrap().push(url.to_string());

        let mut responses = self.responses.lock().unwrap();
        let queue = responses.entry(url.to_string()).or_default();
        let response = if queue.len() > 1 {
            queue.remove(0)
        } else {
            queue.first().cloned().unwrap_or_else(|| {
                Err(ScrapeError::PermanentFetch {
                    url: url.to_string(),
                    reason: "HTTP 404".to_string(),
                })
            })
        };

        response.map(|body| FetchedPage {
            url: url.to_string(),
            status: 200,
            body,
        })
    }
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub storage: Arc<SqliteStorage>,
    pub events: Arc<MemorySink>,
}

/// Opens an orchestrator over the database in `dir`
pub fn harness(
    dir: &TempDir,
    extra: &str,
    sources: &str,
    fetcher: Arc<dyn PageFetcher>,
) -> Harness {
    let db_path = dir.path().join("conductor.db");
    let config = parse_config(&config_toml(&db_path, extra, sources)).unwrap();

    let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());
    let events = Arc::new(MemorySink::new());
    let orchestrator = Orchestrator::new(
        config,
        "test-hash",
        Collaborators {
            jobs: storage.clone(),
            documents: storage.clone(),
            fetcher,
            events: events.clone(),
        },
    )
    .unwrap();

    Harness {
        orchestrator,
        storage,
        events,
    }
}

/// A page carrying a JSON-LD `NewsArticle` block
pub fn json_ld_article(headline: &str, body: &str) -> String {
    format!(
        r#"<html><head><title>{headline}</title>
        <script type="application/ld+json">
        {{"@context": "https://schema.org", "@type": "NewsArticle",
          "headline": "{headline}", "articleBody": "{body}",
          "datePublished": "2024-06-01T08:00:00Z", "author": {{"name": "Dana Reyes"}}}}
        </script></head><body><p>{body}</p></body></html>"#,
        headline = headline,
        body = body
    )
}

/// A plain page that only the selector fallback can read
pub fn plain_article(title: &str) -> String {
    format!(
        r#"<html><head><title>{title} | Gazette</title></head><body>
        <nav><a href="/">Home</a></nav>
        <article>
          <h1>{title}</h1>
          <p>Council members met late on Tuesday to debate the proposal in full.</p>
          <p>The measure passed by a narrow margin after two hours of public comment.</p>
        </article>
        </body></html>"#,
        title = title
    )
}

pub fn long_body() -> String {
    "The harbor reopened on Monday after two months of repairs to the sea wall. ".repeat(3)
}
