//! Storage module for persisting scheduling state and documents
//!
//! This module handles all database operations for the conductor, including:
//! - SQLite database initialization and schema management
//! - The durable job queue (claims, outcomes, retries, recovery)
//! - Per-source schedule and failure streaks
//! - Extracted documents, deduplicated per source and canonical URL
//! - Run tracking

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{DocumentStore, JobStore, StorageError, StorageResult};

use crate::registry::Tier;
use crate::state::JobStatus;
use crate::ConductorError;
use chrono::{DateTime, SecondsFormat, Utc};

use std::path::Path;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(ConductorError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, ConductorError> {
    SqliteStorage::new(path)
}

/// Fixed-width UTC timestamp used for every stored time
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A job to be inserted into the queue
#[derive(Debug, Clone)]
pub struct NewJob {
    pub source: String,
    pub tier: Tier,
    pub domain: String,
    pub scheduled_at: DateTime<Utc>,
}

/// Represents a job in the database
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: i64,
    pub source: String,
    pub tier: Tier,
    pub domain: String,
    pub status: JobStatus,
    pub scheduled_at: DateTime<Utc>,

    /// Failed attempts so far; claiming does not increment it
    pub attempt: u32,
    pub last_error: Option<String>,
    pub reason_code: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Run that currently holds (or last held) the claim
    pub run_id: Option<i64>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Documents stored by the successful attempt
    pub documents: u32,
    pub created_at: DateTime<Utc>,
}

/// Result of enqueueing a job for a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A new pending job was created
    Enqueued(i64),

    /// The source already had an active job; nothing was inserted
    Coalesced(i64),
}

impl EnqueueOutcome {
    pub fn job_id(&self) -> i64 {
        match self {
            Self::Enqueued(id) | Self::Coalesced(id) => *id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Enqueued(_))
    }
}

/// How a claimed job finished
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// `note` records why nothing was stored when `documents` is zero
    Succeeded { documents: u32, note: Option<String> },

    Retrying {
        attempt: u32,
        next_retry_at: DateTime<Utc>,
        reason_code: String,
        error: String,
    },

    Failed {
        attempt: u32,
        reason_code: String,
        error: String,
    },
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Succeeded { .. } => JobStatus::Succeeded,
            Self::Retrying { .. } => JobStatus::Retrying,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// How a finished job changes its source's failure streak
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakUpdate {
    /// Success: streak back to zero and the alert flag cleared
    Reset,

    /// Terminal failure
    Increment,

    /// Neither (a zero-yield success under the default policy)
    Keep,
}

/// Persisted per-source scheduling state
#[derive(Debug, Clone)]
pub struct SourceStateRecord {
    pub source: String,
    pub last_scheduled_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,

    /// Set when the failure streak reached the tier's alert threshold
    pub flagged: bool,
}

/// Receipt for a document handed to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreReceipt {
    pub id: i64,

    /// False when the (source, canonical URL) pair was already stored
    pub created: bool,
}

/// Represents a run of the conductor process
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
}

/// Status of a conductor run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}
