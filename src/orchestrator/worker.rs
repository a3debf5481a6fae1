//! Job execution: fetch, extract, store, settle
//!
//! A worker runs exactly one claimed job and always leaves it in a
//! well-defined state: finished, scheduled for retry, rescheduled after a
//! rate limit, or released back to `pending` on shutdown.

use super::{after, shutdown_requested, FetchedPage, JobReport, Shared};
use crate::events::ScrapeEvent;
use crate::extract::{ExtractionError, ExtractionMethod, Extractor, ScrapedDocument};
use crate::registry::{Source, SourceMode};
use crate::retry::{RetryDecision, RetryPolicy};
use crate::state::JobStatus;
use crate::storage::{JobOutcome, JobRecord, StreakUpdate};
use crate::url::domain_of;
use crate::ScrapeError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, instrument, warn};

/// What a successful scrape produced
#[derive(Debug)]
struct Harvest {
    stored: u32,

    /// Why nothing was stored, when nothing was
    note: Option<String>,
}

/// Wall time anchored to the pass that dispatched the job
///
/// Outcome timestamps are the pass instant plus the time the worker ran, so
/// scheduling stays consistent when a pass runs at an explicit instant.
struct PassClock {
    base: DateTime<Utc>,
    started: Instant,
}

impl PassClock {
    fn start(base: DateTime<Utc>) -> Self {
        Self {
            base,
            started: Instant::now(),
        }
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn now(&self) -> DateTime<Utc> {
        after(self.base, self.elapsed())
    }
}

/// Runs one claimed job to a settled state
#[instrument(skip_all, fields(job_id = job.id, source = %source.name, attempt = job.attempt + 1))]
pub(crate) async fn run_job(
    shared: Arc<Shared>,
    source: Source,
    job: JobRecord,
    pass_now: DateTime<Utc>,
) -> JobReport {
    let clock = PassClock::start(pass_now);

    shared.events.emit(ScrapeEvent::JobStarted {
        job_id: job.id,
        source: source.name.clone(),
        tier: source.tier,
        attempt: job.attempt + 1,
    });

    let mut shutdown = shared.shutdown.clone();
    let result = tokio::select! {
        biased;
        _ = shutdown_requested(&mut shutdown) => None,
        result = scrape(&shared, &source) => Some(result),
    };

    match result {
        Some(result) => settle(&shared, &source, &job, result, &clock),
        None => release(&shared, &job, clock.now()),
    }
}

/// Fails a claimed job whose source is no longer configured
pub(crate) fn fail_orphan(shared: &Shared, job: &JobRecord, now: DateTime<Utc>) -> JobReport {
    let error = ScrapeError::SourceConfig(format!("source {} is no longer configured", job.source));
    warn!(job_id = job.id, source = %job.source, "claimed job for unknown source");

    let attempt = job.attempt + 1;
    record(
        shared,
        job,
        &JobOutcome::Failed {
            attempt,
            reason_code: error.reason_code().to_string(),
            error: error.to_string(),
        },
        now,
    );

    shared.events.emit(ScrapeEvent::JobFailed {
        job_id: job.id,
        source: job.source.clone(),
        attempt,
        reason_code: error.reason_code().to_string(),
        error: error.to_string(),
    });

    report(job, JobStatus::Failed, attempt, 0)
}

/// Puts a job back to `pending` at `at` without counting an attempt
pub(crate) fn release(shared: &Shared, job: &JobRecord, at: DateTime<Utc>) -> JobReport {
    match shared.jobs.reschedule(job.id, at) {
        Ok(()) => info!(job_id = job.id, "released job"),
        Err(e) => error!(job_id = job.id, error = %e, "failed to release job"),
    }
    report(job, JobStatus::Pending, job.attempt, 0)
}

async fn scrape(shared: &Shared, source: &Source) -> Result<Harvest, ScrapeError> {
    let extractor = Extractor::new(source, &shared.extraction)?;
    let page = shared.fetcher.fetch(&source.url).await?;

    match source.mode {
        SourceMode::Article => scrape_article(shared, source, &extractor, &page),
        SourceMode::Listing => scrape_listing(shared, source, &extractor, &page).await,
    }
}

fn scrape_article(
    shared: &Shared,
    source: &Source,
    extractor: &Extractor,
    page: &FetchedPage,
) -> Result<Harvest, ScrapeError> {
    let doc = extractor
        .extract(&page.body, &page.url)
        .map_err(|e| extraction_failed(shared, source, &page.url, e))?;

    let created = store_document(shared, &doc)?;
    Ok(Harvest {
        stored: u32::from(created),
        note: (!created).then(|| format!("{} already stored", doc.canonical_url)),
    })
}

/// Follows article links from a listing page
///
/// Article fetches go through the rate limiter one by one. The job stops
/// early when the domain stays saturated for a whole window or the server
/// answers 429; whatever was stored by then counts.
async fn scrape_listing(
    shared: &Shared,
    source: &Source,
    extractor: &Extractor,
    page: &FetchedPage,
) -> Result<Harvest, ScrapeError> {
    let links = extractor.extract_links(&page.body, &page.url);
    if links.is_empty() {
        return Err(extraction_failed(
            shared,
            source,
            &page.url,
            ExtractionError::StructureMismatch("listing page has no article links".to_string()),
        ));
    }

    let max_articles = shared.settings.max_articles_per_job as usize;
    let candidates: Vec<String> = links
        .into_iter()
        .filter(|url| !already_stored(shared, &source.name, url))
        .take(max_articles)
        .collect();

    if candidates.is_empty() {
        return Ok(Harvest {
            stored: 0,
            note: Some("no new articles".to_string()),
        });
    }

    let mut stored = 0u32;
    let mut attempted = 0usize;
    let mut mismatched = 0usize;
    let mut rejected = 0usize;

    for url in &candidates {
        let domain = domain_of(url).unwrap_or_else(|_| source.domain.clone());
        if timeout(shared.rate_window, shared.limiter.acquire(&domain))
            .await
            .is_err()
        {
            debug!(%domain, "rate window saturated, deferring remaining articles");
            break;
        }

        attempted += 1;
        let article = match shared.fetcher.fetch(url).await {
            Ok(article) => article,
            Err(ScrapeError::RateLimited {
                domain,
                retry_after,
            }) => {
                shared.limiter.record_server_limit(&domain, retry_after);
                debug!(%domain, ?retry_after, "server rate limit, deferring remaining articles");
                break;
            }
            Err(e) => {
                warn!(%url, error = %e, "article fetch failed, skipping");
                continue;
            }
        };

        match extractor.extract(&article.body, &article.url) {
            Ok(doc) => {
                if store_document(shared, &doc)? {
                    stored += 1;
                }
            }
            Err(ExtractionError::Validation(reason)) => {
                debug!(%url, %reason, "article rejected");
                rejected += 1;
            }
            Err(e @ ExtractionError::StructureMismatch(_)) => {
                extraction_failed(shared, source, &article.url, e);
                mismatched += 1;
            }
        }
    }

    if stored == 0 && attempted > 0 && mismatched == attempted {
        return Err(ScrapeError::ExtractionStructure {
            url: source.url.clone(),
            reason: format!("none of {} articles matched the extraction rules", attempted),
        });
    }

    let note = (stored == 0).then(|| {
        format!(
            "{} of {} candidate articles fetched, {} rejected by validation",
            attempted,
            candidates.len(),
            rejected
        )
    });

    Ok(Harvest { stored, note })
}

/// Converts an extraction failure, reporting structure mismatches
fn extraction_failed(
    shared: &Shared,
    source: &Source,
    url: &str,
    error: ExtractionError,
) -> ScrapeError {
    if let ExtractionError::StructureMismatch(reason) = &error {
        shared.events.emit(ScrapeEvent::ExtractionStructureMismatch {
            source: source.name.clone(),
            url: url.to_string(),
            reason: reason.clone(),
        });
    }
    error.into_scrape_error(url)
}

fn already_stored(shared: &Shared, source: &str, url: &str) -> bool {
    match shared.documents.contains(source, url) {
        Ok(found) => found,
        Err(e) => {
            warn!(%url, error = %e, "document lookup failed");
            false
        }
    }
}

/// Stores a document, returning whether it was new
///
/// A storage failure fails the attempt as transient so the retry re-fetches;
/// the store ignores documents it already has.
fn store_document(shared: &Shared, doc: &ScrapedDocument) -> Result<bool, ScrapeError> {
    if doc.extraction_method == ExtractionMethod::Fallback {
        shared.events.emit(ScrapeEvent::ExtractionFallbackUsed {
            source: doc.source.clone(),
            url: doc.canonical_url.clone(),
        });
    }

    match shared.documents.store(doc) {
        Ok(receipt) => {
            debug!(url = %doc.canonical_url, created = receipt.created, "document stored");
            Ok(receipt.created)
        }
        Err(e) => {
            error!(url = %doc.canonical_url, error = %e, "failed to store document");
            Err(ScrapeError::TransientFetch {
                url: doc.canonical_url.clone(),
                reason: format!("document store unavailable: {}", e),
            })
        }
    }
}

/// Turns a scrape result into the job's next state
fn settle(
    shared: &Shared,
    source: &Source,
    job: &JobRecord,
    result: Result<Harvest, ScrapeError>,
    clock: &PassClock,
) -> JobReport {
    let now = clock.now();

    match result {
        Ok(harvest) => succeed(shared, source, job, harvest, clock),

        // Validation failures are a quiet outcome, not an error
        Err(ScrapeError::Validation { reason, .. }) => succeed(
            shared,
            source,
            job,
            Harvest {
                stored: 0,
                note: Some(reason),
            },
            clock,
        ),

        Err(ScrapeError::RateLimited {
            domain,
            retry_after,
        }) => {
            shared.limiter.record_server_limit(&domain, retry_after);
            shared.events.emit(ScrapeEvent::RateLimited {
                job_id: job.id,
                source: source.name.clone(),
                domain,
                retry_after_ms: millis(retry_after),
            });
            release(shared, job, after(now, retry_after))
        }

        Err(error) => {
            let attempt = job.attempt + 1;
            let settings = shared.registry().tier_settings(source.tier);
            let policy = RetryPolicy::for_tier(&settings, &shared.retry);
            let reason_code = error.reason_code().to_string();

            match policy.decide(attempt, &error) {
                RetryDecision::Retry(state) => {
                    record(
                        shared,
                        job,
                        &JobOutcome::Retrying {
                            attempt,
                            next_retry_at: after(now, state.next_delay),
                            reason_code: reason_code.clone(),
                            error: error.to_string(),
                        },
                        now,
                    );
                    shared.events.emit(ScrapeEvent::JobRetrying {
                        job_id: job.id,
                        source: source.name.clone(),
                        attempt,
                        delay_ms: millis(state.next_delay),
                        reason_code,
                    });
                    report(job, JobStatus::Retrying, attempt, 0)
                }
                RetryDecision::GiveUp { reason } => {
                    let message = format!("{} ({})", error, reason);
                    record(
                        shared,
                        job,
                        &JobOutcome::Failed {
                            attempt,
                            reason_code: reason_code.clone(),
                            error: message.clone(),
                        },
                        now,
                    );
                    shared.events.emit(ScrapeEvent::JobFailed {
                        job_id: job.id,
                        source: source.name.clone(),
                        attempt,
                        reason_code,
                        error: message,
                    });
                    update_streak(shared, source, StreakUpdate::Increment, now);
                    report(job, JobStatus::Failed, attempt, 0)
                }
            }
        }
    }
}

fn succeed(
    shared: &Shared,
    source: &Source,
    job: &JobRecord,
    harvest: Harvest,
    clock: &PassClock,
) -> JobReport {
    let now = clock.now();
    let attempt = job.attempt + 1;

    record(
        shared,
        job,
        &JobOutcome::Succeeded {
            documents: harvest.stored,
            note: harvest.note,
        },
        now,
    );
    shared.events.emit(ScrapeEvent::JobSucceeded {
        job_id: job.id,
        source: source.name.clone(),
        documents: harvest.stored,
        elapsed_ms: millis(clock.elapsed()),
    });

    let streak = if harvest.stored > 0 {
        StreakUpdate::Reset
    } else if shared.settings.zero_yield_counts_as_failure {
        StreakUpdate::Increment
    } else {
        StreakUpdate::Keep
    };
    update_streak(shared, source, streak, now);

    report(job, JobStatus::Succeeded, attempt, harvest.stored)
}

/// Applies a job result to the source's streak, alerting once per streak
fn update_streak(shared: &Shared, source: &Source, update: StreakUpdate, now: DateTime<Utc>) {
    let failures = match shared.jobs.record_job_result(&source.name, update, now) {
        Ok(failures) => failures,
        Err(e) => {
            error!(source = %source.name, error = %e, "failed to record job result");
            return;
        }
    };

    if update != StreakUpdate::Increment {
        return;
    }

    let threshold = shared.registry().tier_settings(source.tier).alert_threshold;
    if failures < threshold.max(1) {
        return;
    }

    let flagged = matches!(
        shared.jobs.get_source_state(&source.name),
        Ok(Some(state)) if state.flagged
    );
    if flagged {
        debug!(source = %source.name, failures, "source already flagged");
        return;
    }

    if let Err(e) = shared.jobs.set_flagged(&source.name, true) {
        error!(source = %source.name, error = %e, "failed to flag source");
    }
    shared.events.emit(ScrapeEvent::SourceAlert {
        source: source.name.clone(),
        tier: source.tier,
        consecutive_failures: failures,
    });
}

/// Persists an outcome; a lost claim or storage error is only logged
fn record(shared: &Shared, job: &JobRecord, outcome: &JobOutcome, now: DateTime<Utc>) {
    if let Err(e) = shared.jobs.complete(job.id, outcome, now) {
        error!(
            job_id = job.id,
            status = %outcome.status(),
            error = %e,
            "failed to record job outcome"
        );
    }
}

fn report(job: &JobRecord, status: JobStatus, attempt: u32, documents: u32) -> JobReport {
    JobReport {
        job_id: job.id,
        source: job.source.clone(),
        status,
        attempt,
        documents,
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
