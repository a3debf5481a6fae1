//! Per-tier control loop
//!
//! Each tier gets its own loop and worker semaphore, so a backlog in one tier
//! never starves another.

use super::worker::{fail_orphan, release, run_job};
use super::{after, shutdown_requested, JobReport, PassReport, Shared};
use crate::events::ScrapeEvent;
use crate::registry::Tier;
use crate::state::JobStatus;
use crate::storage::{EnqueueOutcome, JobRecord, NewJob};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

/// Spawned workers of one tier, keyed by job ID
pub(crate) type Workers = Vec<(i64, JoinHandle<JobReport>)>;

/// Runs scheduling passes for `tier` until shutdown, then waits for its workers
#[instrument(skip(shared))]
pub(crate) async fn run_tier(shared: Arc<Shared>, tier: Tier) {
    let capacity = shared.registry().tier_settings(tier).max_concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(capacity as usize));
    let mut workers: Workers = Vec::new();

    let mut ticker = interval(Duration::from_secs(shared.settings.tick_seconds.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut shutdown = shared.shutdown.clone();

    info!(capacity, "tier loop started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        drain_finished_workers(&shared, &mut workers).await;

        let report = run_pass(&shared, tier, Utc::now(), &semaphore, &mut workers);
        if report.enqueued + report.dispatched + report.promoted > 0 {
            debug!(
                promoted = report.promoted,
                enqueued = report.enqueued,
                coalesced = report.coalesced,
                rate_limited = report.rate_limited,
                dispatched = report.dispatched,
                "pass complete"
            );
        }
    }

    info!(in_flight = workers.len(), "tier loop stopping");
    join_workers(&shared, workers).await;
}

/// One scheduling pass; never waits on workers or the network
///
/// # Arguments
///
/// * `shared` - Orchestrator state
/// * `tier` - Tier to schedule
/// * `now` - Scheduling instant
/// * `semaphore` - The tier's worker capacity
/// * `workers` - Receives the handles of spawned workers
pub(crate) fn run_pass(
    shared: &Arc<Shared>,
    tier: Tier,
    now: DateTime<Utc>,
    semaphore: &Arc<Semaphore>,
    workers: &mut Workers,
) -> PassReport {
    let mut report = PassReport::default();

    match shared.jobs.promote_due_retries(now) {
        Ok(promoted) => report.promoted = promoted,
        Err(e) => error!(%tier, error = %e, "failed to promote retries"),
    }

    enqueue_due(shared, tier, now, &mut report);

    while !shared.is_shutting_down() {
        let Ok(permit) = Arc::clone(semaphore).try_acquire_owned() else {
            debug!(%tier, "worker pool full");
            break;
        };

        let job = match shared.jobs.claim_next(tier, shared.run_id, now) {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(e) => {
                error!(%tier, error = %e, "failed to claim job");
                break;
            }
        };

        let source = shared.registry().get(&job.source).cloned();
        let Some(source) = source else {
            fail_orphan(shared, &job, now);
            continue;
        };

        let admission = shared.limiter.admit(&job.domain);
        if !admission.allowed {
            defer_rate_limited(shared, &job, now, admission.retry_after);
            report.rate_limited += 1;
            continue;
        }

        report.dispatched += 1;
        let job_id = job.id;
        let worker_shared = Arc::clone(shared);
        let handle = tokio::spawn(async move {
            let _permit = permit;
            run_job(worker_shared, source, job, now).await
        });
        workers.push((job_id, handle));
    }

    report
}

/// Enqueues a job for every due source of the tier
fn enqueue_due(shared: &Shared, tier: Tier, now: DateTime<Utc>, report: &mut PassReport) {
    let due = shared.registry().list_due_in_tier(now, tier);

    for source in due {
        let job = NewJob {
            source: source.name.clone(),
            tier,
            domain: source.domain.clone(),
            scheduled_at: now,
        };

        match shared.jobs.enqueue(&job) {
            Ok(EnqueueOutcome::Enqueued(job_id)) => {
                debug!(source = %source.name, job_id, "enqueued");
                report.enqueued += 1;
            }
            Ok(EnqueueOutcome::Coalesced(job_id)) => {
                debug!(source = %source.name, job_id, "coalesced onto active job");
                report.coalesced += 1;
            }
            Err(e) => {
                // Left due, so the next pass tries again
                error!(source = %source.name, error = %e, "failed to enqueue");
                continue;
            }
        }

        shared.registry_mut().mark_scheduled(&source.name, now);
        if let Err(e) = shared.jobs.record_scheduled(&source.name, now) {
            warn!(source = %source.name, error = %e, "failed to persist schedule");
        }
    }
}

fn defer_rate_limited(shared: &Shared, job: &JobRecord, now: DateTime<Utc>, wait: Duration) {
    debug!(job_id = job.id, domain = %job.domain, ?wait, "domain at capacity, rescheduling");

    if let Err(e) = shared.jobs.reschedule(job.id, after(now, wait)) {
        error!(job_id = job.id, error = %e, "failed to reschedule rate-limited job");
    }

    shared.events.emit(ScrapeEvent::RateLimited {
        job_id: job.id,
        source: job.source.clone(),
        domain: job.domain.clone(),
        retry_after_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
    });
}

/// Collects workers that have already finished
pub(crate) async fn drain_finished_workers(
    shared: &Shared,
    workers: &mut Workers,
) -> Vec<JobReport> {
    let mut finished = Vec::new();
    let mut idx = 0;
    while idx < workers.len() {
        if workers[idx].1.is_finished() {
            let (job_id, handle) = workers.swap_remove(idx);
            finished.extend(settle_join(shared, job_id, handle.await));
        } else {
            idx += 1;
        }
    }
    finished
}

/// Waits for every worker
pub(crate) async fn join_workers(shared: &Shared, workers: Workers) -> Vec<JobReport> {
    let mut finished = Vec::with_capacity(workers.len());
    for (job_id, handle) in workers {
        finished.extend(settle_join(shared, job_id, handle.await));
    }
    finished
}

fn settle_join(
    shared: &Shared,
    job_id: i64,
    joined: Result<JobReport, JoinError>,
) -> Option<JobReport> {
    match joined {
        Ok(report) => Some(report),
        Err(e) => {
            handle_worker_join_error(shared, job_id, &e);
            None
        }
    }
}

/// A panicked worker leaves its job `running`; hand it back to the queue
fn handle_worker_join_error(shared: &Shared, job_id: i64, error: &JoinError) {
    error!(job_id, error = %error, "worker task failed");

    match shared.jobs.get_job(job_id) {
        Ok(Some(job)) if job.status == JobStatus::Running => {
            release(shared, &job, Utc::now());
        }
        Ok(_) => {}
        Err(e) => error!(job_id, error = %e, "failed to load job after worker failure"),
    }
}
