//! Storage traits and error types
//!
//! This module defines the trait interfaces for storage backends and
//! associated error types. Both traits take `&self` so one backend can be
//! shared by every tier loop and worker behind an `Arc`.

use crate::extract::ScrapedDocument;
use crate::registry::Tier;
use crate::state::JobStatus;
use crate::storage::{
    EnqueueOutcome, JobOutcome, JobRecord, NewJob, RunRecord, RunStatus, SourceStateRecord,
    StoreReceipt, StreakUpdate,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Job not found: {0}")]
    JobNotFound(i64),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Invalid state transition for job {job_id}: expected {expected}")]
    InvalidTransition { job_id: i64, expected: JobStatus },

    #[error("Corrupt value in column {column}: {value}")]
    Corrupt { column: &'static str, value: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable job queue plus per-source scheduling state
///
/// Every status change is a compare-and-set on the job's current status, so a
/// job can never be claimed twice or finished by a worker that lost its claim.
pub trait JobStore: Send + Sync {
    // ===== Run Management =====

    /// Records the start of a process lifetime
    ///
    /// # Arguments
    ///
    /// * `config_hash` - Hash of the configuration file
    ///
    /// # Returns
    ///
    /// The ID of the newly created run
    fn begin_run(&self, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Marks a run finished with the given status
    fn finish_run(&self, run_id: i64, status: RunStatus) -> StorageResult<()>;

    // ===== Job Lifecycle =====

    /// Inserts a pending job unless the source already has an active one
    ///
    /// # Returns
    ///
    /// `Enqueued` with the new ID, or `Coalesced` with the ID of the job that
    /// already occupies the source's slot
    fn enqueue(&self, job: &NewJob) -> StorageResult<EnqueueOutcome>;

    /// Atomically claims the oldest due pending job of a tier
    ///
    /// # Arguments
    ///
    /// * `tier` - Tier whose queue to claim from
    /// * `run_id` - Run taking ownership of the job
    /// * `now` - Jobs scheduled after this instant are not yet due
    ///
    /// # Returns
    ///
    /// The claimed job (now `running`), or `None` if nothing is due
    fn claim_next(
        &self,
        tier: Tier,
        run_id: i64,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<JobRecord>>;

    /// Records how a running job finished
    fn complete(&self, job_id: i64, outcome: &JobOutcome, now: DateTime<Utc>)
        -> StorageResult<()>;

    /// Returns a running job to `pending` at `at` without counting an attempt
    fn reschedule(&self, job_id: i64, at: DateTime<Utc>) -> StorageResult<()>;

    /// Moves `retrying` jobs whose backoff has elapsed back to `pending`
    ///
    /// # Returns
    ///
    /// The number of jobs promoted
    fn promote_due_retries(&self, now: DateTime<Utc>) -> StorageResult<usize>;

    // ===== Queries =====

    /// Gets a job by ID
    fn get_job(&self, job_id: i64) -> StorageResult<Option<JobRecord>>;

    /// Lists pending jobs scheduled at or before `before`, oldest first
    fn list_pending(&self, before: DateTime<Utc>) -> StorageResult<Vec<JobRecord>>;

    /// Gets the job occupying a source's single-flight slot, if any
    fn active_job_for_source(&self, source: &str) -> StorageResult<Option<JobRecord>>;

    /// Most recent jobs of a source, newest first
    fn recent_jobs(&self, source: &str, limit: usize) -> StorageResult<Vec<JobRecord>>;

    /// Counts jobs per status
    fn count_by_status(&self) -> StorageResult<HashMap<JobStatus, u64>>;

    // ===== Maintenance =====

    /// Resets `running` jobs claimed by another run at least `grace` ago
    ///
    /// # Returns
    ///
    /// The number of jobs returned to `pending`
    fn recover_interrupted(
        &self,
        current_run: i64,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<usize>;

    /// Deletes terminal jobs that finished before `older_than`
    fn purge_finished(&self, older_than: DateTime<Utc>) -> StorageResult<usize>;

    // ===== Source State =====

    /// Loads the persisted state of every source seen so far
    fn load_source_states(&self) -> StorageResult<Vec<SourceStateRecord>>;

    /// Gets the persisted state of one source
    fn get_source_state(&self, source: &str) -> StorageResult<Option<SourceStateRecord>>;

    /// Records when a source was last scheduled
    fn record_scheduled(&self, source: &str, at: DateTime<Utc>) -> StorageResult<()>;

    /// Applies a finished job to the source's failure streak
    ///
    /// # Returns
    ///
    /// The consecutive failure count after the update
    fn record_job_result(
        &self,
        source: &str,
        update: StreakUpdate,
        now: DateTime<Utc>,
    ) -> StorageResult<u32>;

    /// Sets or clears the alert flag of a source
    fn set_flagged(&self, source: &str, flagged: bool) -> StorageResult<()>;
}

/// Persistence for extracted documents
pub trait DocumentStore: Send + Sync {
    /// Stores a document; storing the same (source, canonical URL) again is a no-op
    fn store(&self, doc: &ScrapedDocument) -> StorageResult<StoreReceipt>;

    /// Returns true if the source already has a document at `canonical_url`
    fn contains(&self, source: &str, canonical_url: &str) -> StorageResult<bool>;

    /// Loads a stored document
    fn get_document(
        &self,
        source: &str,
        canonical_url: &str,
    ) -> StorageResult<Option<ScrapedDocument>>;

    /// Counts documents, optionally for a single source
    fn count_documents(&self, source: Option<&str>) -> StorageResult<u64>;
}
