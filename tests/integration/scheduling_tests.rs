//! End-to-end scheduling: retries, coalescing, recovery

use crate::support::{harness, json_ld_article, long_body, ScriptedFetcher};
use chrono::{DateTime, TimeZone, Utc};
use scrape_conductor::events::ScrapeEvent;
use scrape_conductor::registry::Tier;
use scrape_conductor::state::JobStatus;
use scrape_conductor::storage::{
    EnqueueOutcome, JobStore, NewJob, RunStatus, SqliteStorage,
};
use scrape_conductor::ScrapeError;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

const HIGH_SOURCE: &str = r#"
[[source]]
name = "Tier-High-Example"
url = "https://high.example.com/story"
category = "metro"
tier = "high"
mode = "article"
"#;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

fn transient() -> ScrapeError {
    ScrapeError::TransientFetch {
        url: "https://high.example.com/story".to_string(),
        reason: "connection reset".to_string(),
    }
}

#[tokio::test]
async fn test_transient_failures_back_off_then_fail_and_alert() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.respond("https://high.example.com/story", Err(transient()));
    let h = harness(&dir, "", HIGH_SOURCE, fetcher.clone());

    // First attempt fails and is scheduled about a minute out
    let report = h.orchestrator.run_once_at(t0()).await;
    assert_eq!(report.enqueued, 1);
    let job_id = report.finished[0].job_id;

    let job = h.storage.get_job(job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Retrying);
    assert_eq!(job.attempt, 1);
    assert_eq!(job.reason_code.as_deref(), Some("transient_fetch"));
    let first_delay = (job.next_retry_at.unwrap() - t0()).num_milliseconds();
    assert!(
        (60_000..=67_000).contains(&first_delay),
        "first delay was {}ms",
        first_delay
    );

    // Not promoted before its retry time
    let early = h
        .orchestrator
        .run_once_at(t0() + chrono::Duration::seconds(30))
        .await;
    assert_eq!(early.dispatched, 0);

    for expected_attempt in 2..=5u32 {
        let job = h.storage.get_job(job_id).unwrap().unwrap();
        let now = job.next_retry_at.unwrap() + chrono::Duration::seconds(1);

        let report = h.orchestrator.run_once_at(now).await;
        assert_eq!(report.enqueued, 0, "a source never has two active jobs");

        let job = h.storage.get_job(job_id).unwrap().unwrap();
        assert_eq!(job.attempt, expected_attempt);
    }

    let job = h.storage.get_job(job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.finished_at.is_some());
    assert_eq!(fetcher.call_count("https://high.example.com/story"), 5);

    // Delays grow exponentially within the jitter band
    let delays: Vec<u64> = h
        .events
        .events()
        .iter()
        .filter_map(|event| match event {
            ScrapeEvent::JobRetrying { delay_ms, .. } => Some(*delay_ms),
            _ => None,
        })
        .collect();
    assert_eq!(delays.len(), 4);
    for (i, delay) in delays.iter().enumerate() {
        let base = 60_000u64 << i;
        assert!(
            *delay >= base && *delay <= base + base / 10,
            "delay {} was {}ms",
            i + 1,
            delay
        );
    }

    assert_eq!(h.events.count("job_failed"), 1);
    assert_eq!(h.events.count("source_alert"), 1);
    let status = h.orchestrator.source_status("Tier-High-Example").unwrap();
    assert!(status.flagged);
    assert_eq!(status.consecutive_failures, 1);
}

#[tokio::test]
async fn test_success_after_retry_resets_streak() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.respond("https://high.example.com/story", Err(transient()));
    fetcher.respond(
        "https://high.example.com/story",
        Ok(json_ld_article("Harbor reopens", &long_body())),
    );
    let h = harness(&dir, "", HIGH_SOURCE, fetcher.clone());

    let report = h.orchestrator.run_once_at(t0()).await;
    let job_id = report.finished[0].job_id;
    assert_eq!(report.finished[0].status, JobStatus::Retrying);

    let job = h.storage.get_job(job_id).unwrap().unwrap();
    let report = h
        .orchestrator
        .run_once_at(job.next_retry_at.unwrap())
        .await;
    assert_eq!(report.finished.len(), 1);
    assert_eq!(report.finished[0].status, JobStatus::Succeeded);
    assert_eq!(report.finished[0].attempt, 2);
    assert_eq!(report.finished[0].documents, 1);

    let status = h.orchestrator.source_status("Tier-High-Example").unwrap();
    assert_eq!(status.consecutive_failures, 0);
    assert!(status.active_job.is_none());
    assert_eq!(status.recent_jobs.len(), 1);
}

#[tokio::test]
async fn test_schedule_survives_restart() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.respond(
        "https://high.example.com/story",
        Ok(json_ld_article("Harbor reopens", &long_body())),
    );

    {
        let h = harness(&dir, "", HIGH_SOURCE, fetcher.clone());
        h.orchestrator.run_once_at(t0()).await;
        h.orchestrator.finish(RunStatus::Completed).unwrap();
    }

    let h = harness(&dir, "", HIGH_SOURCE, fetcher.clone());
    let status = h.orchestrator.source_status("Tier-High-Example").unwrap();
    assert_eq!(status.last_scheduled, Some(t0()));
    assert_eq!(status.next_due, Some(t0() + chrono::Duration::minutes(15)));

    let report = h
        .orchestrator
        .run_once_at(t0() + chrono::Duration::minutes(10))
        .await;
    assert_eq!(report.enqueued, 0);
    assert_eq!(fetcher.call_count("https://high.example.com/story"), 1);
}

#[tokio::test]
async fn test_interrupted_job_recovered_on_startup() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.respond(
        "https://high.example.com/story",
        Ok(json_ld_article("Harbor reopens", &long_body())),
    );
    let extra = "[orchestrator]\nrecovery-grace-seconds = 0";

    // A run that claimed a job and died before finishing it
    let job_id = {
        let h = harness(&dir, extra, HIGH_SOURCE, fetcher.clone());
        let job_id = h.orchestrator.trigger("Tier-High-Example").unwrap().job_id();
        let claimed = h
            .storage
            .claim_next(Tier::High, h.orchestrator.run_id(), Utc::now())
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, job_id);
        job_id
    };

    let h = harness(&dir, extra, HIGH_SOURCE, fetcher.clone());
    let job = h.storage.get_job(job_id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempt, 0);

    // The recovered job is picked up instead of a duplicate
    let report = h.orchestrator.run_once().await;
    assert_eq!(report.enqueued, 0);
    assert_eq!(report.coalesced, 1);
    assert_eq!(report.finished.len(), 1);
    assert_eq!(report.finished[0].job_id, job_id);
    assert_eq!(report.finished[0].status, JobStatus::Succeeded);
}

#[test]
fn test_concurrent_enqueue_is_single_flight() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("conductor.db");
    SqliteStorage::new(&db_path).unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let db_path = db_path.clone();
            thread::spawn(move || {
                let storage = SqliteStorage::new(&db_path).unwrap();
                storage
                    .enqueue(&NewJob {
                        source: "Tier-High-Example".to_string(),
                        tier: Tier::High,
                        domain: "high.example.com".to_string(),
                        scheduled_at: t0(),
                    })
                    .unwrap()
            })
        })
        .collect();

    let outcomes: Vec<EnqueueOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let created: Vec<_> = outcomes.iter().filter(|o| o.is_new()).collect();
    assert_eq!(created.len(), 1);
    let id = created[0].job_id();
    assert!(outcomes.iter().all(|o| o.job_id() == id));

    let storage = SqliteStorage::new(&db_path).unwrap();
    assert_eq!(storage.list_pending(t0()).unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_source_job_fails_on_claim() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(ScriptedFetcher::default());
    let h = harness(&dir, "", HIGH_SOURCE, fetcher);

    // Queued before the source was removed from the catalog
    let outcome = h
        .storage
        .enqueue(&NewJob {
            source: "Retired".to_string(),
            tier: Tier::High,
            domain: "retired.example.com".to_string(),
            scheduled_at: t0(),
        })
        .unwrap();

    h.orchestrator.set_enabled("Tier-High-Example", false).unwrap();
    h.orchestrator.run_once_at(t0()).await;

    let job = h.storage.get_job(outcome.job_id()).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.reason_code.as_deref(), Some("source_config"));
}
