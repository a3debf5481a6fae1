//! Fetch-and-extract jobs against mock HTTP servers

use crate::support::{harness, json_ld_article, long_body, plain_article, Harness};
use chrono::Utc;
use scrape_conductor::config::UserAgentConfig;
use scrape_conductor::events::ScrapeEvent;
use scrape_conductor::orchestrator::HttpFetcher;
use scrape_conductor::state::JobStatus;
use scrape_conductor::storage::{DocumentStore, EnqueueOutcome, JobStore};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn http_harness(dir: &TempDir, sources: &str) -> Harness {
    let user_agent = UserAgentConfig {
        crawler_name: "TestConductor".to_string(),
        crawler_version: "1.0".to_string(),
        contact_url: "https://example.com/about".to_string(),
        contact_email: "admin@example.com".to_string(),
    };
    let fetcher = HttpFetcher::new(&user_agent, Duration::from_secs(5)).unwrap();
    harness(dir, "", sources, Arc::new(fetcher))
}

fn source(name: &str, url: &str, mode: &str) -> String {
    format!(
        r#"
[[source]]
name = "{}"
url = "{}"
category = "local"
tier = "high"
mode = "{}"
"#,
        name, url, mode
    )
}

fn html(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=utf-8")
}

#[tokio::test]
async fn test_article_source_stores_structured_document() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/story"))
        .respond_with(html(json_ld_article("Harbor reopens", &long_body())))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let h = http_harness(
        &dir,
        &source("Harbor", &format!("{}/story", server.uri()), "article"),
    );

    let report = h.orchestrator.run_once().await;

    assert_eq!(report.finished.len(), 1);
    assert_eq!(report.finished[0].status, JobStatus::Succeeded);
    assert_eq!(report.finished[0].documents, 1);
    assert_eq!(h.storage.count_documents(Some("Harbor")).unwrap(), 1);
    assert_eq!(h.events.count("extraction_fallback_used"), 0);
}

#[tokio::test]
async fn test_listing_source_follows_only_new_article_links() {
    let server = MockServer::start().await;
    let base = server.uri();

    let index = format!(
        r#"<html><body>
        <nav><a href="/about">About</a><a href="/tags/council">Council</a></nav>
        <ul>
          <li><a href="{base}/news/2024/harbor-reopens">Harbor reopens</a></li>
          <li><a href="/news/2024/budget-vote">Budget vote</a></li>
          <li><a href="/news/2024/live-blog">Live blog</a></li>
          <li><a href="https://elsewhere.example.org/news/2024/story">Elsewhere</a></li>
        </ul>
        </body></html>"#,
        base = base
    );

    Mock::given(path("/news"))
        .respond_with(html(index))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(path("/news/2024/harbor-reopens"))
        .respond_with(html(plain_article("Harbor reopens")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(path("/news/2024/budget-vote"))
        .respond_with(html(plain_article("Budget vote passes")))
        .expect(1)
        .mount(&server)
        .await;
    // A page whose template the extractor cannot read
    Mock::given(path("/news/2024/live-blog"))
        .respond_with(html("<html><body><div>Updates load here</div></body></html>".to_string()))
        .expect(2)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let h = http_harness(
        &dir,
        &source("Gazette", &format!("{}/news", base), "listing"),
    );

    let first = h.orchestrator.run_once().await;
    assert_eq!(first.finished.len(), 1);
    assert_eq!(first.finished[0].status, JobStatus::Succeeded);
    assert_eq!(first.finished[0].documents, 2);
    assert_eq!(h.storage.count_documents(Some("Gazette")).unwrap(), 2);
    assert_eq!(h.events.count("extraction_fallback_used"), 2);
    assert_eq!(h.events.count("extraction_structure_mismatch"), 1);

    // Stored articles are not fetched again; only the unreadable one is left
    let outcome = h.orchestrator.trigger("Gazette").unwrap();
    let second = h.orchestrator.run_once().await;
    let report = second
        .finished
        .iter()
        .find(|r| r.job_id == outcome.job_id())
        .unwrap();
    assert_eq!(report.status, JobStatus::Retrying);

    let job = h.storage.get_job(outcome.job_id()).unwrap().unwrap();
    assert_eq!(job.reason_code.as_deref(), Some("extraction_structure"));
    assert_eq!(h.storage.count_documents(Some("Gazette")).unwrap(), 2);
}

#[tokio::test]
async fn test_server_rate_limit_reschedules_without_attempt() {
    let server = MockServer::start().await;
    Mock::given(path("/story"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "120"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let h = http_harness(
        &dir,
        &source("Harbor", &format!("{}/story", server.uri()), "article"),
    );

    let before = Utc::now();
    let report = h.orchestrator.run_once().await;
    let job_id = report.finished[0].job_id;
    assert_eq!(report.finished[0].status, JobStatus::Pending);

    let job = h.storage.get_job(job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempt, 0);
    assert!(job.scheduled_at >= before + chrono::Duration::seconds(119));

    let limited: Vec<_> = h
        .events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ScrapeEvent::RateLimited { retry_after_ms, .. } => Some(retry_after_ms),
            _ => None,
        })
        .collect();
    assert_eq!(limited, vec![120_000]);

    // The rescheduled job still holds the source's slot
    assert_eq!(
        h.orchestrator.trigger("Harbor").unwrap(),
        EnqueueOutcome::Coalesced(job_id)
    );

    // Nothing is claimable before the server's deadline
    let next = h.orchestrator.run_once().await;
    assert_eq!(next.dispatched, 0);
}

#[tokio::test]
async fn test_short_article_is_zero_yield_success() {
    let server = MockServer::start().await;
    Mock::given(path("/story"))
        .respond_with(html(json_ld_article("Harbor reopens", "Too short.")))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let h = http_harness(
        &dir,
        &source("Harbor", &format!("{}/story", server.uri()), "article"),
    );

    let report = h.orchestrator.run_once().await;
    assert_eq!(report.finished[0].status, JobStatus::Succeeded);
    assert_eq!(report.finished[0].documents, 0);

    let job = h.storage.get_job(report.finished[0].job_id).unwrap().unwrap();
    assert!(job.last_error.is_some());
    assert_eq!(h.storage.count_documents(None).unwrap(), 0);
    assert_eq!(h.events.count("job_failed"), 0);
}

#[tokio::test]
async fn test_http_failures_are_classified() {
    let server = MockServer::start().await;
    Mock::given(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"))
        .mount(&server)
        .await;
    Mock::given(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;
    Mock::given(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(path("/private/story"))
        .respond_with(html(json_ld_article("Hidden", &long_body())))
        .expect(0)
        .mount(&server)
        .await;

    let base = server.uri();
    let sources = [
        source("Gone", &format!("{}/gone", base), "article"),
        source("Flaky", &format!("{}/flaky", base), "article"),
        source("Private", &format!("{}/private/story", base), "article"),
    ]
    .concat();

    let dir = TempDir::new().unwrap();
    let h = http_harness(&dir, &sources);

    let report = h.orchestrator.run_once().await;
    assert_eq!(report.finished.len(), 3);

    let outcome = |name: &str| {
        let report = report.finished.iter().find(|r| r.source == name).unwrap();
        h.storage.get_job(report.job_id).unwrap().unwrap()
    };

    let gone = outcome("Gone");
    assert_eq!(gone.status, JobStatus::Failed);
    assert_eq!(gone.attempt, 1);
    assert_eq!(gone.reason_code.as_deref(), Some("permanent_fetch"));

    let flaky = outcome("Flaky");
    assert_eq!(flaky.status, JobStatus::Retrying);
    assert_eq!(flaky.reason_code.as_deref(), Some("transient_fetch"));
    assert!(flaky.next_retry_at.is_some());

    let private = outcome("Private");
    assert_eq!(private.status, JobStatus::Failed);
    assert!(private
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("robots.txt"));
}
