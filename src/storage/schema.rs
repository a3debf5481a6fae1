//! Database schema definitions
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC strings
//! (`2024-01-01T00:00:00.000Z`) so they compare correctly as text.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per process lifetime
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Scheduled fetch-and-extract attempts
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    tier TEXT NOT NULL,
    domain TEXT NOT NULL,
    status TEXT NOT NULL,
    scheduled_at TEXT NOT NULL,
    attempt INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    reason_code TEXT,
    next_retry_at TEXT,
    run_id INTEGER REFERENCES runs(id),
    claimed_at TEXT,
    finished_at TEXT,
    documents INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_claim ON jobs(tier, status, scheduled_at);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

-- Single-flight: at most one outstanding job per source
CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_single_flight
    ON jobs(source) WHERE status IN ('pending', 'running', 'retrying');

-- Schedule and failure streak per source, reloaded at startup
CREATE TABLE IF NOT EXISTS source_state (
    source TEXT PRIMARY KEY,
    last_scheduled_at TEXT,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    last_success_at TEXT,
    last_failure_at TEXT,
    flagged INTEGER NOT NULL DEFAULT 0
);

-- Extracted documents, unique per source and canonical URL
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    canonical_url TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    author TEXT,
    published_at TEXT,
    category TEXT NOT NULL,
    tags TEXT NOT NULL,
    word_count INTEGER NOT NULL,
    complexity REAL NOT NULL,
    extraction_method TEXT NOT NULL,
    stored_at TEXT NOT NULL,
    UNIQUE(source, canonical_url)
);

CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)
}
