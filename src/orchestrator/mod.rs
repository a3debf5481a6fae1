//! Orchestrator - per-tier scheduling, dispatch and job settlement
//!
//! One control loop per tier runs on a fixed tick. Each pass:
//! 1. Promotes `retrying` jobs whose backoff has elapsed
//! 2. Enqueues a job for every due source (coalescing onto an outstanding one)
//! 3. Claims jobs up to the tier's free worker capacity
//! 4. Checks the per-domain rate limiter, rescheduling denied jobs
//! 5. Spawns a worker per admitted job
//!
//! Workers convert every outcome into a job status; nothing they hit
//! propagates back into the loop. A shared `watch` flag stops the loops and
//! makes in-flight workers release their jobs.

mod fetcher;
mod tier_loop;
mod worker;

pub use fetcher::{build_http_client, FetchedPage, HttpFetcher, PageFetcher, DEFAULT_RETRY_AFTER};

use crate::config::{Config, ExtractionConfig, OrchestratorConfig, RetryConfig};
use crate::events::{EventSink, TracingSink};
use crate::limiter::RateLimiter;
use crate::registry::{Source, SourceRegistry, Tier};
use crate::state::JobStatus;
use crate::storage::{
    open_storage, DocumentStore, EnqueueOutcome, JobRecord, JobStore, NewJob, RunStatus,
};
use crate::{ConductorError, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, instrument, warn};

/// External collaborators the orchestrator drives
pub struct Collaborators {
    pub jobs: Arc<dyn JobStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub events: Arc<dyn EventSink>,
}

/// How a dispatched job ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: i64,
    pub source: String,

    /// `Pending` when the job was rescheduled or released instead of finished
    pub status: JobStatus,
    pub attempt: u32,
    pub documents: u32,
}

/// What one scheduling pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub promoted: usize,
    pub enqueued: usize,
    pub coalesced: usize,
    pub rate_limited: usize,
    pub dispatched: usize,

    /// Workers that completed, filled in by passes that wait for them
    pub finished: Vec<JobReport>,
}

impl PassReport {
    fn merge(&mut self, other: PassReport) {
        self.promoted += other.promoted;
        self.enqueued += other.enqueued;
        self.coalesced += other.coalesced;
        self.rate_limited += other.rate_limited;
        self.dispatched += other.dispatched;
        self.finished.extend(other.finished);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub recovered: usize,
    pub purged: usize,
}

/// Operator view of one source
#[derive(Debug, Clone)]
pub struct SourceStatus {
    pub source: Source,
    pub last_scheduled: Option<DateTime<Utc>>,

    /// `None` while disabled or before the first scheduling
    pub next_due: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub flagged: bool,
    pub active_job: Option<JobRecord>,
    pub recent_jobs: Vec<JobRecord>,
}

/// State shared by the tier loops and their workers
pub(crate) struct Shared {
    registry: RwLock<SourceRegistry>,
    pub(crate) jobs: Arc<dyn JobStore>,
    pub(crate) documents: Arc<dyn DocumentStore>,
    pub(crate) fetcher: Arc<dyn PageFetcher>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) limiter: RateLimiter,
    pub(crate) settings: OrchestratorConfig,
    pub(crate) retry: RetryConfig,
    pub(crate) extraction: ExtractionConfig,

    /// Longest a listing job waits for a rate-limiter slot between articles
    pub(crate) rate_window: Duration,
    pub(crate) run_id: i64,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl Shared {
    pub(crate) fn registry(&self) -> RwLockReadGuard<'_, SourceRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn registry_mut(&self) -> RwLockWriteGuard<'_, SourceRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Top-level scheduler owning the registry, limiter and collaborators
pub struct Orchestrator {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
}

impl Orchestrator {
    /// Opens the SQLite store and HTTP fetcher named by `config`
    ///
    /// # Arguments
    ///
    /// * `config` - Validated configuration
    /// * `config_hash` - Hash recorded on the run
    ///
    /// # Returns
    ///
    /// * `Ok(Orchestrator)` - Ready to run, interrupted jobs already recovered
    /// * `Err(ConductorError)` - Storage or HTTP client could not be set up
    pub fn open(config: Config, config_hash: &str) -> Result<Self> {
        let storage = Arc::new(open_storage(Path::new(&config.output.database_path))?);
        let fetcher = Arc::new(HttpFetcher::new(
            &config.user_agent,
            Duration::from_secs(config.orchestrator.fetch_timeout_seconds),
        )?);

        Self::new(
            config,
            config_hash,
            Collaborators {
                jobs: storage.clone(),
                documents: storage,
                fetcher,
                events: Arc::new(TracingSink),
            },
        )
    }

    /// Builds an orchestrator over explicit collaborators
    ///
    /// Begins a run, restores each source's schedule from the store and
    /// recovers jobs left `running` by earlier runs.
    pub fn new(config: Config, config_hash: &str, collaborators: Collaborators) -> Result<Self> {
        let Collaborators {
            jobs,
            documents,
            fetcher,
            events,
        } = collaborators;

        let mut registry = SourceRegistry::from_config(&config)?;
        let run_id = jobs.begin_run(config_hash)?;

        let states = jobs.load_source_states()?;
        registry.seed_schedule(
            states
                .into_iter()
                .filter_map(|s| s.last_scheduled_at.map(|at| (s.source, at))),
        );

        let grace = Duration::from_secs(config.orchestrator.recovery_grace_seconds);
        let recovered = jobs.recover_interrupted(run_id, grace, Utc::now())?;
        if recovered > 0 {
            info!(run_id, recovered, "re-queued jobs interrupted by an earlier run");
        }

        info!(
            run_id,
            sources = registry.len(),
            "orchestrator initialized"
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Shared {
            registry: RwLock::new(registry),
            jobs,
            documents,
            fetcher,
            events,
            limiter: RateLimiter::from_config(&config.rate_limit),
            settings: config.orchestrator.clone(),
            retry: config.retry.clone(),
            extraction: config.extraction.clone(),
            rate_window: Duration::from_secs(config.rate_limit.window_seconds),
            run_id,
            shutdown: shutdown_rx,
        };

        Ok(Self {
            shared: Arc::new(shared),
            shutdown,
        })
    }

    pub fn run_id(&self) -> i64 {
        self.shared.run_id
    }

    /// Runs every tier loop and the housekeeping loop until [`shutdown`](Self::shutdown)
    ///
    /// The run is marked `interrupted` once all loops and workers have stopped.
    #[instrument(skip(self), fields(run_id = self.shared.run_id))]
    pub async fn run(&self) -> Result<()> {
        info!("starting tier loops");

        let mut handles = Vec::new();
        for tier in Tier::all() {
            handles.push(tokio::spawn(tier_loop::run_tier(
                Arc::clone(&self.shared),
                tier,
            )));
        }
        handles.push(tokio::spawn(housekeeping_loop(Arc::clone(&self.shared))));

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler task panicked");
            }
        }

        self.finish(RunStatus::Interrupted)
    }

    /// One scheduling pass per tier, waiting for the dispatched workers
    pub async fn run_once(&self) -> PassReport {
        self.run_once_at(Utc::now()).await
    }

    /// [`run_once`](Self::run_once) with an explicit scheduling instant
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> PassReport {
        let mut report = PassReport::default();

        for tier in Tier::all() {
            let capacity = self.shared.registry().tier_settings(tier).max_concurrency;
            let semaphore = Arc::new(Semaphore::new(capacity.max(1) as usize));
            let mut workers = Vec::new();

            report.merge(tier_loop::run_pass(
                &self.shared,
                tier,
                now,
                &semaphore,
                &mut workers,
            ));
            report
                .finished
                .extend(tier_loop::join_workers(&self.shared, workers).await);
        }

        report
    }

    /// Recovers stale claims and purges expired terminal jobs
    pub fn housekeeping(&self) -> Result<HousekeepingReport> {
        housekeeping_at(&self.shared, Utc::now())
    }

    /// [`housekeeping`](Self::housekeeping) at an explicit instant
    pub fn housekeeping_at(&self, now: DateTime<Utc>) -> Result<HousekeepingReport> {
        housekeeping_at(&self.shared, now)
    }

    /// Stops claiming work and makes in-flight workers release their jobs
    pub fn shutdown(&self) {
        info!("shutdown requested");
        self.shutdown.send_replace(true);
    }

    /// Records the end of this run
    pub fn finish(&self, status: RunStatus) -> Result<()> {
        self.shared.jobs.finish_run(self.shared.run_id, status)?;
        info!(run_id = self.shared.run_id, status = status.to_db_string(), "run finished");
        Ok(())
    }

    // ===== Admin Operations =====

    /// Enqueues an on-demand job, coalescing onto an outstanding one
    pub fn trigger(&self, name: &str) -> Result<EnqueueOutcome> {
        let source = self
            .shared
            .registry()
            .get(name)
            .cloned()
            .ok_or_else(|| ConductorError::UnknownSource(name.to_string()))?;

        let outcome = self.shared.jobs.enqueue(&NewJob {
            source: source.name.clone(),
            tier: source.tier,
            domain: source.domain.clone(),
            scheduled_at: Utc::now(),
        })?;

        info!(source = %source.name, job_id = outcome.job_id(), new = outcome.is_new(), "triggered");
        Ok(outcome)
    }

    /// Pending jobs due at or before `before`
    pub fn list_pending(&self, before: DateTime<Utc>) -> Result<Vec<JobRecord>> {
        Ok(self.shared.jobs.list_pending(before)?)
    }

    pub fn source_status(&self, name: &str) -> Result<SourceStatus> {
        let (source, last_scheduled) = {
            let registry = self.shared.registry();
            let source = registry
                .get(name)
                .cloned()
                .ok_or_else(|| ConductorError::UnknownSource(name.to_string()))?;
            (source, registry.last_scheduled(name))
        };

        let state = self.shared.jobs.get_source_state(name)?;
        let next_due = match (source.enabled, last_scheduled) {
            (true, Some(at)) => Some(after(at, source.interval)),
            _ => None,
        };

        Ok(SourceStatus {
            next_due,
            last_scheduled,
            consecutive_failures: state.as_ref().map_or(0, |s| s.consecutive_failures),
            flagged: state.as_ref().map_or(false, |s| s.flagged),
            active_job: self.shared.jobs.active_job_for_source(name)?,
            recent_jobs: self.shared.jobs.recent_jobs(name, 10)?,
            source,
        })
    }

    /// Takes effect from the next scheduling pass
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.shared.registry_mut().set_enabled(name, enabled)
    }

    /// Takes effect from the next scheduling pass
    pub fn set_interval(&self, name: &str, interval: Duration) -> Result<()> {
        self.shared.registry_mut().set_interval(name, interval)
    }

    /// Replaces the source catalog from a validated configuration
    ///
    /// Surviving sources keep their schedule; new ones pick up any persisted
    /// schedule. Jobs already queued for removed sources fail on claim.
    pub fn reload_sources(&self, config: &Config) -> Result<()> {
        let mut fresh = SourceRegistry::from_config(config)?;
        let states = self.shared.jobs.load_source_states()?;
        fresh.seed_schedule(
            states
                .into_iter()
                .filter_map(|s| s.last_scheduled_at.map(|at| (s.source, at))),
        );

        self.shared.registry_mut().reload(fresh);
        info!(sources = self.shared.registry().len(), "sources reloaded");
        Ok(())
    }
}

/// `now + delay`, saturating instead of overflowing
pub(crate) fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Resolves once the shutdown flag is set; never if the sender is gone
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn housekeeping_at(shared: &Shared, now: DateTime<Utc>) -> Result<HousekeepingReport> {
    let grace = Duration::from_secs(shared.settings.recovery_grace_seconds);
    let recovered = shared.jobs.recover_interrupted(shared.run_id, grace, now)?;

    let retention = chrono::Duration::days(i64::from(shared.settings.retention_days));
    let horizon = now
        .checked_sub_signed(retention)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let purged = shared.jobs.purge_finished(horizon)?;

    if recovered > 0 || purged > 0 {
        info!(recovered, purged, "housekeeping");
    }

    Ok(HousekeepingReport { recovered, purged })
}

async fn housekeeping_loop(shared: Arc<Shared>) {
    let period = Duration::from_secs(shared.settings.housekeeping_seconds.max(1));
    let mut ticker = tokio::time::interval(period);
    let mut shutdown = shared.shutdown.clone();

    // Startup recovery already ran in `Orchestrator::new`
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = housekeeping_at(&shared, Utc::now()) {
            warn!(error = %e, "housekeeping failed");
        }
    }
}
