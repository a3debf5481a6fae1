//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the `JobStore` and
//! `DocumentStore` traits.

use crate::extract::{ExtractionMethod, ScrapedDocument};
use crate::registry::Tier;
use crate::state::JobStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{DocumentStore, JobStore, StorageError, StorageResult};
use crate::storage::{
    format_timestamp, EnqueueOutcome, JobOutcome, JobRecord, NewJob, RunRecord, RunStatus,
    SourceStateRecord, StoreReceipt, StreakUpdate,
};
use crate::ConductorError;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

const JOB_COLUMNS: &str = "id, source, tier, domain, status, scheduled_at, attempt, last_error, \
     reason_code, next_retry_at, run_id, claimed_at, finished_at, documents, created_at";

const SOURCE_STATE_COLUMNS: &str = "source, last_scheduled_at, consecutive_failures, \
     last_success_at, last_failure_at, flagged";

const DOCUMENT_COLUMNS: &str = "source, canonical_url, title, body, author, published_at, \
     category, tags, word_count, complexity, extraction_method";

/// SQLite storage backend
///
/// The connection sits behind a mutex; every operation is a short statement
/// or transaction, so tier loops and workers share one instance.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(ConductorError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, ConductorError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;

        // Configure SQLite for concurrent readers and a single writer
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, ConductorError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fetch_job(conn: &Connection, job_id: i64) -> StorageResult<Option<JobRecord>> {
        let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
        Ok(conn
            .query_row(&sql, params![job_id], job_from_row)
            .optional()?)
    }

    fn active_job_id(conn: &Connection, source: &str) -> StorageResult<Option<i64>> {
        Ok(conn
            .query_row(
                "SELECT id FROM jobs WHERE source = ?1 AND status IN (?2, ?3, ?4)",
                params![
                    source,
                    JobStatus::Pending.to_db_string(),
                    JobStatus::Running.to_db_string(),
                    JobStatus::Retrying.to_db_string(),
                ],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Explains why a compare-and-set update touched no rows
    fn transition_error(conn: &Connection, job_id: i64, expected: JobStatus) -> StorageError {
        match Self::fetch_job(conn, job_id) {
            Ok(Some(_)) => StorageError::InvalidTransition { job_id, expected },
            Ok(None) => StorageError::JobNotFound(job_id),
            Err(e) => e,
        }
    }

    fn ensure_source_state(conn: &Connection, source: &str) -> StorageResult<()> {
        conn.execute(
            "INSERT INTO source_state (source) VALUES (?1) ON CONFLICT(source) DO NOTHING",
            params![source],
        )?;
        Ok(())
    }
}

impl JobStore for SqliteStorage {
    // ===== Run Management =====

    fn begin_run(&self, config_hash: &str) -> StorageResult<i64> {
        let conn = self.conn();
        let now = format_timestamp(Utc::now());
        conn.execute(
            "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, RunStatus::Running.to_db_string()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, started_at, finished_at, config_hash, status FROM runs WHERE id = ?1",
        )?;

        let run = stmt
            .query_row(params![run_id], |row| {
                Ok(RunRecord {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    finished_at: row.get(2)?,
                    config_hash: row.get(3)?,
                    status: RunStatus::from_db_string(&row.get::<_, String>(4)?)
                        .unwrap_or(RunStatus::Running),
                })
            })
            .optional()?;

        run.ok_or(StorageError::RunNotFound(run_id))
    }

    fn finish_run(&self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = format_timestamp(Utc::now());
        let updated = self.conn().execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        Ok(())
    }

    // ===== Job Lifecycle =====

    fn enqueue(&self, job: &NewJob) -> StorageResult<EnqueueOutcome> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = Self::active_job_id(&tx, &job.source)? {
            return Ok(EnqueueOutcome::Coalesced(existing));
        }

        let now = format_timestamp(Utc::now());
        let inserted = tx.execute(
            "INSERT INTO jobs (source, tier, domain, status, scheduled_at, attempt, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            params![
                job.source,
                job.tier.to_db_string(),
                job.domain,
                JobStatus::Pending.to_db_string(),
                format_timestamp(job.scheduled_at),
                now,
            ],
        );

        match inserted {
            Ok(_) => {
                let id = tx.last_insert_rowid();
                tx.commit()?;
                Ok(EnqueueOutcome::Enqueued(id))
            }
            // Lost a race with another connection on the single-flight index
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                let existing = Self::active_job_id(&tx, &job.source)?;
                existing
                    .map(EnqueueOutcome::Coalesced)
                    .ok_or(StorageError::Sqlite(rusqlite::Error::SqliteFailure(e, None)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn claim_next(
        &self,
        tier: Tier,
        run_id: i64,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<JobRecord>> {
        let conn = self.conn();
        let now = format_timestamp(now);

        loop {
            let candidate: Option<i64> = conn
                .query_row(
                    "SELECT id FROM jobs
                     WHERE tier = ?1 AND status = ?2 AND scheduled_at <= ?3
                     ORDER BY scheduled_at, id LIMIT 1",
                    params![tier.to_db_string(), JobStatus::Pending.to_db_string(), now],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(job_id) = candidate else {
                return Ok(None);
            };

            let claimed = conn.execute(
                "UPDATE jobs SET status = ?1, run_id = ?2, claimed_at = ?3
                 WHERE id = ?4 AND status = ?5",
                params![
                    JobStatus::Running.to_db_string(),
                    run_id,
                    now,
                    job_id,
                    JobStatus::Pending.to_db_string(),
                ],
            )?;

            if claimed == 1 {
                return Self::fetch_job(&conn, job_id);
            }
            // Another connection claimed it first; try the next candidate
        }
    }

    fn complete(
        &self,
        job_id: i64,
        outcome: &JobOutcome,
        now: DateTime<Utc>,
    ) -> StorageResult<()> {
        let conn = self.conn();
        let now = format_timestamp(now);
        let running = JobStatus::Running.to_db_string();

        let updated = match outcome {
            JobOutcome::Succeeded { documents, note } => conn.execute(
                "UPDATE jobs SET status = ?1, documents = ?2, last_error = ?3,
                     reason_code = NULL, next_retry_at = NULL, finished_at = ?4
                 WHERE id = ?5 AND status = ?6",
                params![
                    JobStatus::Succeeded.to_db_string(),
                    documents,
                    note,
                    now,
                    job_id,
                    running,
                ],
            )?,
            JobOutcome::Retrying {
                attempt,
                next_retry_at,
                reason_code,
                error,
            } => conn.execute(
                "UPDATE jobs SET status = ?1, attempt = ?2, next_retry_at = ?3,
                     reason_code = ?4, last_error = ?5
                 WHERE id = ?6 AND status = ?7",
                params![
                    JobStatus::Retrying.to_db_string(),
                    attempt,
                    format_timestamp(*next_retry_at),
                    reason_code,
                    error,
                    job_id,
                    running,
                ],
            )?,
            JobOutcome::Failed {
                attempt,
                reason_code,
                error,
            } => conn.execute(
                "UPDATE jobs SET status = ?1, attempt = ?2, reason_code = ?3, last_error = ?4,
                     next_retry_at = NULL, finished_at = ?5
                 WHERE id = ?6 AND status = ?7",
                params![
                    JobStatus::Failed.to_db_string(),
                    attempt,
                    reason_code,
                    error,
                    now,
                    job_id,
                    running,
                ],
            )?,
        };

        if updated == 0 {
            return Err(Self::transition_error(&conn, job_id, JobStatus::Running));
        }
        Ok(())
    }

    fn reschedule(&self, job_id: i64, at: DateTime<Utc>) -> StorageResult<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE jobs SET status = ?1, scheduled_at = ?2, run_id = NULL, claimed_at = NULL
             WHERE id = ?3 AND status = ?4",
            params![
                JobStatus::Pending.to_db_string(),
                format_timestamp(at),
                job_id,
                JobStatus::Running.to_db_string(),
            ],
        )?;

        if updated == 0 {
            return Err(Self::transition_error(&conn, job_id, JobStatus::Running));
        }
        Ok(())
    }

    fn promote_due_retries(&self, now: DateTime<Utc>) -> StorageResult<usize> {
        let promoted = self.conn().execute(
            "UPDATE jobs SET status = ?1, scheduled_at = next_retry_at, next_retry_at = NULL,
                 run_id = NULL, claimed_at = NULL
             WHERE status = ?2 AND next_retry_at <= ?3",
            params![
                JobStatus::Pending.to_db_string(),
                JobStatus::Retrying.to_db_string(),
                format_timestamp(now),
            ],
        )?;
        Ok(promoted)
    }

    // ===== Queries =====

    fn get_job(&self, job_id: i64) -> StorageResult<Option<JobRecord>> {
        Self::fetch_job(&self.conn(), job_id)
    }

    fn list_pending(&self, before: DateTime<Utc>) -> StorageResult<Vec<JobRecord>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM jobs WHERE status = ?1 AND scheduled_at <= ?2
             ORDER BY scheduled_at, id",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;

        let jobs = stmt
            .query_map(
                params![JobStatus::Pending.to_db_string(), format_timestamp(before)],
                job_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(jobs)
    }

    fn active_job_for_source(&self, source: &str) -> StorageResult<Option<JobRecord>> {
        let conn = self.conn();
        match Self::active_job_id(&conn, source)? {
            Some(job_id) => Self::fetch_job(&conn, job_id),
            None => Ok(None),
        }
    }

    fn recent_jobs(&self, source: &str, limit: usize) -> StorageResult<Vec<JobRecord>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM jobs WHERE source = ?1 ORDER BY id DESC LIMIT ?2",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;

        let jobs = stmt
            .query_map(params![source, limit as i64], job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(jobs)
    }

    fn count_by_status(&self) -> StorageResult<HashMap<JobStatus, u64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            let status = JobStatus::from_db_string(&status).ok_or(StorageError::Corrupt {
                column: "status",
                value: status,
            })?;
            counts.insert(status, count as u64);
        }

        Ok(counts)
    }

    // ===== Maintenance =====

    fn recover_interrupted(
        &self,
        current_run: i64,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> StorageResult<usize> {
        let cutoff = chrono::Duration::from_std(grace)
            .ok()
            .and_then(|grace| now.checked_sub_signed(grace))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let recovered = self.conn().execute(
            "UPDATE jobs SET status = ?1, run_id = NULL, claimed_at = NULL
             WHERE status = ?2
               AND (run_id IS NULL OR run_id != ?3)
               AND (claimed_at IS NULL OR claimed_at <= ?4)",
            params![
                JobStatus::Pending.to_db_string(),
                JobStatus::Running.to_db_string(),
                current_run,
                format_timestamp(cutoff),
            ],
        )?;
        Ok(recovered)
    }

    fn purge_finished(&self, older_than: DateTime<Utc>) -> StorageResult<usize> {
        let purged = self.conn().execute(
            "DELETE FROM jobs WHERE status IN (?1, ?2) AND finished_at < ?3",
            params![
                JobStatus::Succeeded.to_db_string(),
                JobStatus::Failed.to_db_string(),
                format_timestamp(older_than),
            ],
        )?;
        Ok(purged)
    }

    // ===== Source State =====

    fn load_source_states(&self) -> StorageResult<Vec<SourceStateRecord>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM source_state ORDER BY source",
            SOURCE_STATE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;

        let states = stmt
            .query_map([], source_state_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(states)
    }

    fn get_source_state(&self, source: &str) -> StorageResult<Option<SourceStateRecord>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM source_state WHERE source = ?1",
            SOURCE_STATE_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![source], source_state_from_row)
            .optional()?)
    }

    fn record_scheduled(&self, source: &str, at: DateTime<Utc>) -> StorageResult<()> {
        self.conn().execute(
            "INSERT INTO source_state (source, last_scheduled_at) VALUES (?1, ?2)
             ON CONFLICT(source) DO UPDATE SET last_scheduled_at = excluded.last_scheduled_at",
            params![source, format_timestamp(at)],
        )?;
        Ok(())
    }

    fn record_job_result(
        &self,
        source: &str,
        update: StreakUpdate,
        now: DateTime<Utc>,
    ) -> StorageResult<u32> {
        let conn = self.conn();
        Self::ensure_source_state(&conn, source)?;

        let sql = match update {
            StreakUpdate::Reset => {
                "UPDATE source_state
                 SET consecutive_failures = 0, flagged = 0, last_success_at = ?2
                 WHERE source = ?1"
            }
            StreakUpdate::Increment => {
                "UPDATE source_state
                 SET consecutive_failures = consecutive_failures + 1, last_failure_at = ?2
                 WHERE source = ?1"
            }
            StreakUpdate::Keep => {
                "UPDATE source_state SET last_success_at = ?2 WHERE source = ?1"
            }
        };
        conn.execute(sql, params![source, format_timestamp(now)])?;

        let failures: u32 = conn.query_row(
            "SELECT consecutive_failures FROM source_state WHERE source = ?1",
            params![source],
            |row| row.get(0),
        )?;
        Ok(failures)
    }

    fn set_flagged(&self, source: &str, flagged: bool) -> StorageResult<()> {
        let conn = self.conn();
        Self::ensure_source_state(&conn, source)?;
        conn.execute(
            "UPDATE source_state SET flagged = ?2 WHERE source = ?1",
            params![source, flagged],
        )?;
        Ok(())
    }
}

impl DocumentStore for SqliteStorage {
    fn store(&self, doc: &ScrapedDocument) -> StorageResult<StoreReceipt> {
        let conn = self.conn();
        let tags = serde_json::to_string(&doc.tags)?;

        let inserted = conn.execute(
            "INSERT INTO documents (source, canonical_url, title, body, author, published_at,
                 category, tags, word_count, complexity, extraction_method, stored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(source, canonical_url) DO NOTHING",
            params![
                doc.source,
                doc.canonical_url,
                doc.title,
                doc.body,
                doc.author,
                doc.published_at.map(format_timestamp),
                doc.category,
                tags,
                doc.word_count as i64,
                doc.complexity,
                doc.extraction_method.as_str(),
                format_timestamp(Utc::now()),
            ],
        )?;

        if inserted == 1 {
            return Ok(StoreReceipt {
                id: conn.last_insert_rowid(),
                created: true,
            });
        }

        let id = conn.query_row(
            "SELECT id FROM documents WHERE source = ?1 AND canonical_url = ?2",
            params![doc.source, doc.canonical_url],
            |row| row.get(0),
        )?;
        Ok(StoreReceipt { id, created: false })
    }

    fn contains(&self, source: &str, canonical_url: &str) -> StorageResult<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row(
                "SELECT 1 FROM documents WHERE source = ?1 AND canonical_url = ?2",
                params![source, canonical_url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get_document(
        &self,
        source: &str,
        canonical_url: &str,
    ) -> StorageResult<Option<ScrapedDocument>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT {} FROM documents WHERE source = ?1 AND canonical_url = ?2",
            DOCUMENT_COLUMNS
        );

        let row = conn
            .query_row(&sql, params![source, canonical_url], |row| {
                Ok((document_from_row(row)?, row.get::<_, String>(7)?))
            })
            .optional()?;

        match row {
            Some((mut doc, tags)) => {
                doc.tags = serde_json::from_str(&tags)?;
                Ok(Some(doc))
            }
            None => Ok(None),
        }
    }

    fn count_documents(&self, source: Option<&str>) -> StorageResult<u64> {
        let conn = self.conn();
        let count: i64 = match source {
            Some(source) => conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE source = ?1",
                params![source],
                |row| row.get(0),
            )?,
            None => conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?,
        };
        Ok(count as u64)
    }
}

fn corrupt(idx: usize, column: &'static str, value: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(StorageError::Corrupt { column, value }),
    )
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn optional_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => time_at(row, idx).map(Some),
        None => Ok(None),
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let tier: String = row.get(2)?;
    let status: String = row.get(4)?;

    Ok(JobRecord {
        id: row.get(0)?,
        source: row.get(1)?,
        tier: Tier::from_db_string(&tier).ok_or_else(|| corrupt(2, "tier", tier.clone()))?,
        domain: row.get(3)?,
        status: JobStatus::from_db_string(&status)
            .ok_or_else(|| corrupt(4, "status", status.clone()))?,
        scheduled_at: time_at(row, 5)?,
        attempt: row.get(6)?,
        last_error: row.get(7)?,
        reason_code: row.get(8)?,
        next_retry_at: optional_time_at(row, 9)?,
        run_id: row.get(10)?,
        claimed_at: optional_time_at(row, 11)?,
        finished_at: optional_time_at(row, 12)?,
        documents: row.get(13)?,
        created_at: time_at(row, 14)?,
    })
}

fn source_state_from_row(row: &Row<'_>) -> rusqlite::Result<SourceStateRecord> {
    Ok(SourceStateRecord {
        source: row.get(0)?,
        last_scheduled_at: optional_time_at(row, 1)?,
        consecutive_failures: row.get(2)?,
        last_success_at: optional_time_at(row, 3)?,
        last_failure_at: optional_time_at(row, 4)?,
        flagged: row.get(5)?,
    })
}

/// Tags (column 7) are JSON and decoded by the caller
fn document_from_row(row: &Row<'_>) -> rusqlite::Result<ScrapedDocument> {
    let method: String = row.get(10)?;

    Ok(ScrapedDocument {
        source: row.get(0)?,
        canonical_url: row.get(1)?,
        title: row.get(2)?,
        body: row.get(3)?,
        author: row.get(4)?,
        published_at: optional_time_at(row, 5)?,
        category: row.get(6)?,
        tags: Vec::new(),
        word_count: row.get::<_, i64>(8)? as usize,
        complexity: row.get(9)?,
        extraction_method: ExtractionMethod::from_db_string(&method)
            .ok_or_else(|| corrupt(10, "extraction_method", method.clone()))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    fn new_job(source: &str, tier: Tier, at: DateTime<Utc>) -> NewJob {
        NewJob {
            source: source.to_string(),
            tier,
            domain: format!("{}.example.com", source.to_lowercase()),
            scheduled_at: at,
        }
    }

    fn sample_document(source: &str, url: &str) -> ScrapedDocument {
        ScrapedDocument {
            source: source.to_string(),
            canonical_url: url.to_string(),
            title: "Harbor reopens".to_string(),
            body: "The harbor reopened on Monday after repairs.".to_string(),
            author: Some("Ana Ruiz".to_string()),
            published_at: Some(t(0)),
            category: "local".to_string(),
            tags: vec!["harbor".to_string(), "city".to_string()],
            word_count: 7,
            complexity: 4.2,
            extraction_method: ExtractionMethod::Structured,
        }
    }

    #[test]
    fn test_create_in_memory() {
        let storage = SqliteStorage::new_in_memory();
        assert!(storage.is_ok());
    }

    #[test]
    fn test_run_lifecycle() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let run_id = storage.begin_run("test_hash").unwrap();
        assert!(run_id > 0);

        storage.finish_run(run_id, RunStatus::Interrupted).unwrap();
        let run = storage.get_run(run_id).unwrap();
        assert_eq!(run.status, RunStatus::Interrupted);

        // Same fixed-width millisecond form as the job columns
        let finished = run.finished_at.unwrap();
        for stamp in [&run.started_at, &finished] {
            assert_eq!(stamp.len(), "2024-06-01T09:00:00.000Z".len(), "{}", stamp);
            assert!(stamp.ends_with('Z'));
        }

        assert!(matches!(
            storage.get_run(999),
            Err(StorageError::RunNotFound(999))
        ));
    }

    #[test]
    fn test_enqueue_coalesces_active_job() {
        let storage = SqliteStorage::new_in_memory().unwrap();

        let first = storage.enqueue(&new_job("A", Tier::High, t(0))).unwrap();
        let second = storage.enqueue(&new_job("A", Tier::High, t(5))).unwrap();

        assert!(first.is_new());
        assert_eq!(second, EnqueueOutcome::Coalesced(first.job_id()));
        assert_eq!(storage.list_pending(t(10)).unwrap().len(), 1);
    }

    #[test]
    fn test_enqueue_after_terminal_creates_new_job() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let run = storage.begin_run("h").unwrap();

        let first = storage.enqueue(&new_job("A", Tier::High, t(0))).unwrap();
        storage.claim_next(Tier::High, run, t(0)).unwrap().unwrap();
        storage
            .complete(
                first.job_id(),
                &JobOutcome::Succeeded {
                    documents: 2,
                    note: None,
                },
                t(1),
            )
            .unwrap();

        let second = storage.enqueue(&new_job("A", Tier::High, t(15))).unwrap();
        assert!(second.is_new());
        assert_ne!(second.job_id(), first.job_id());
    }

    #[test]
    fn test_claim_respects_tier_and_schedule() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let run = storage.begin_run("h").unwrap();

        storage.enqueue(&new_job("Later", Tier::High, t(30))).unwrap();
        storage.enqueue(&new_job("Low", Tier::Low, t(0))).unwrap();
        let due = storage.enqueue(&new_job("Due", Tier::High, t(0))).unwrap();

        let claimed = storage.claim_next(Tier::High, run, t(1)).unwrap().unwrap();
        assert_eq!(claimed.id, due.job_id());
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.run_id, Some(run));
        assert_eq!(claimed.attempt, 0);

        // "Later" is not yet due, "Low" belongs to another tier
        assert!(storage.claim_next(Tier::High, run, t(1)).unwrap().is_none());
        assert!(storage.claim_next(Tier::High, run, t(30)).unwrap().is_some());
    }

    #[test]
    fn test_claim_is_exclusive_across_connections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.db");
        let a = SqliteStorage::new(&path).unwrap();
        let b = SqliteStorage::new(&path).unwrap();
        let run = a.begin_run("h").unwrap();

        a.enqueue(&new_job("A", Tier::Medium, t(0))).unwrap();

        let first = a.claim_next(Tier::Medium, run, t(1)).unwrap();
        let second = b.claim_next(Tier::Medium, run, t(1)).unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn test_retry_outcome_and_promotion() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let run = storage.begin_run("h").unwrap();
        let id = storage
            .enqueue(&new_job("A", Tier::High, t(0)))
            .unwrap()
            .job_id();
        storage.claim_next(Tier::High, run, t(0)).unwrap();

        storage
            .complete(
                id,
                &JobOutcome::Retrying {
                    attempt: 1,
                    next_retry_at: t(2),
                    reason_code: "transient_fetch".to_string(),
                    error: "503".to_string(),
                },
                t(0),
            )
            .unwrap();

        let job = storage.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Retrying);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.next_retry_at, Some(t(2)));

        // Still occupies the source's slot
        assert!(!storage.enqueue(&new_job("A", Tier::High, t(1))).unwrap().is_new());

        assert_eq!(storage.promote_due_retries(t(1)).unwrap(), 0);
        assert_eq!(storage.promote_due_retries(t(2)).unwrap(), 1);

        let job = storage.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.scheduled_at, t(2));
        assert_eq!(job.attempt, 1);
        assert!(job.next_retry_at.is_none());
    }

    #[test]
    fn test_complete_requires_running() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let id = storage
            .enqueue(&new_job("A", Tier::High, t(0)))
            .unwrap()
            .job_id();

        let result = storage.complete(
            id,
            &JobOutcome::Failed {
                attempt: 1,
                reason_code: "permanent_fetch".to_string(),
                error: "404".to_string(),
            },
            t(0),
        );
        assert!(matches!(
            result,
            Err(StorageError::InvalidTransition { .. })
        ));

        assert!(matches!(
            storage.reschedule(12345, t(0)),
            Err(StorageError::JobNotFound(12345))
        ));
    }

    #[test]
    fn test_reschedule_keeps_attempt() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let run = storage.begin_run("h").unwrap();
        let id = storage
            .enqueue(&new_job("A", Tier::High, t(0)))
            .unwrap()
            .job_id();
        storage.claim_next(Tier::High, run, t(0)).unwrap();

        storage.reschedule(id, t(3)).unwrap();

        let job = storage.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt, 0);
        assert_eq!(job.scheduled_at, t(3));
        assert!(job.run_id.is_none());
    }

    #[test]
    fn test_recover_interrupted_after_grace() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let old_run = storage.begin_run("h").unwrap();
        let id = storage
            .enqueue(&new_job("A", Tier::High, t(0)))
            .unwrap()
            .job_id();
        storage.claim_next(Tier::High, old_run, t(0)).unwrap();

        let new_run = storage.begin_run("h").unwrap();
        let grace = Duration::from_secs(60);

        // Claim is younger than the grace period
        assert_eq!(
            storage
                .recover_interrupted(new_run, grace, t(0) + chrono::Duration::seconds(30))
                .unwrap(),
            0
        );

        assert_eq!(storage.recover_interrupted(new_run, grace, t(1)).unwrap(), 1);
        let job = storage.get_job(id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt, 0);
        assert!(job.run_id.is_none());
    }

    #[test]
    fn test_recover_skips_current_run() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let run = storage.begin_run("h").unwrap();
        storage.enqueue(&new_job("A", Tier::High, t(0))).unwrap();
        storage.claim_next(Tier::High, run, t(0)).unwrap();

        assert_eq!(
            storage
                .recover_interrupted(run, Duration::ZERO, t(60))
                .unwrap(),
            0
        );
    }

    #[test]
    fn test_purge_finished_keeps_active_and_recent() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let run = storage.begin_run("h").unwrap();

        let old = storage
            .enqueue(&new_job("Old", Tier::Low, t(0)))
            .unwrap()
            .job_id();
        storage.claim_next(Tier::Low, run, t(0)).unwrap();
        storage
            .complete(
                old,
                &JobOutcome::Failed {
                    attempt: 2,
                    reason_code: "permanent_fetch".to_string(),
                    error: "410".to_string(),
                },
                t(0),
            )
            .unwrap();

        storage.enqueue(&new_job("Active", Tier::Low, t(0))).unwrap();

        assert_eq!(storage.purge_finished(t(60)).unwrap(), 1);
        assert!(storage.get_job(old).unwrap().is_none());
        assert_eq!(storage.list_pending(t(60)).unwrap().len(), 1);
    }

    #[test]
    fn test_count_by_status() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let run = storage.begin_run("h").unwrap();
        storage.enqueue(&new_job("A", Tier::High, t(0))).unwrap();
        storage.enqueue(&new_job("B", Tier::High, t(0))).unwrap();
        storage.claim_next(Tier::High, run, t(0)).unwrap();

        let counts = storage.count_by_status().unwrap();
        assert_eq!(counts.get(&JobStatus::Pending), Some(&1));
        assert_eq!(counts.get(&JobStatus::Running), Some(&1));
        assert_eq!(counts.get(&JobStatus::Failed), None);
    }

    #[test]
    fn test_failure_streak() {
        let storage = SqliteStorage::new_in_memory().unwrap();

        assert_eq!(
            storage
                .record_job_result("A", StreakUpdate::Increment, t(0))
                .unwrap(),
            1
        );
        assert_eq!(
            storage
                .record_job_result("A", StreakUpdate::Increment, t(1))
                .unwrap(),
            2
        );
        assert_eq!(
            storage
                .record_job_result("A", StreakUpdate::Keep, t(2))
                .unwrap(),
            2
        );

        storage.set_flagged("A", true).unwrap();
        assert!(storage.get_source_state("A").unwrap().unwrap().flagged);

        assert_eq!(
            storage
                .record_job_result("A", StreakUpdate::Reset, t(3))
                .unwrap(),
            0
        );
        let state = storage.get_source_state("A").unwrap().unwrap();
        assert!(!state.flagged);
        assert_eq!(state.last_success_at, Some(t(3)));
        assert_eq!(state.last_failure_at, Some(t(1)));
    }

    #[test]
    fn test_record_scheduled_roundtrip() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        storage.record_scheduled("A", t(0)).unwrap();
        storage.record_scheduled("A", t(15)).unwrap();
        storage.record_scheduled("B", t(5)).unwrap();

        let states = storage.load_source_states().unwrap();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].source, "A");
        assert_eq!(states[0].last_scheduled_at, Some(t(15)));
        assert_eq!(states[0].consecutive_failures, 0);
    }

    #[test]
    fn test_store_document_is_idempotent() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let doc = sample_document("Harbor Times", "https://harbor.example.com/news/reopen");

        let first = storage.store(&doc).unwrap();
        let second = storage.store(&doc).unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.id, second.id);
        assert_eq!(storage.count_documents(None).unwrap(), 1);
        assert!(storage
            .contains("Harbor Times", "https://harbor.example.com/news/reopen")
            .unwrap());
    }

    #[test]
    fn test_same_url_different_sources() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let url = "https://wire.example.com/story-1";

        storage.store(&sample_document("A", url)).unwrap();
        storage.store(&sample_document("B", url)).unwrap();

        assert_eq!(storage.count_documents(None).unwrap(), 2);
        assert_eq!(storage.count_documents(Some("A")).unwrap(), 1);
    }

    #[test]
    fn test_get_document_roundtrip() {
        let storage = SqliteStorage::new_in_memory().unwrap();
        let doc = sample_document("A", "https://a.example.com/story");
        storage.store(&doc).unwrap();

        let loaded = storage
            .get_document("A", "https://a.example.com/story")
            .unwrap()
            .unwrap();
        assert_eq!(loaded, doc);
        assert!(storage.get_document("A", "https://missing").unwrap().is_none());
    }
}
