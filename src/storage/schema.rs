//! Database schema definitions
//!
//! Two databases: the job index shared by all jobs (`jobs.db`) and one
//! database per job (`job.db`) inside the job directory.

/// SQL schema for the job index
pub const INDEX_SCHEMA_SQL: &str = r#"
-- One row per research job
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    query TEXT NOT NULL,
    status TEXT NOT NULL,
    current_phase TEXT,
    job_dir TEXT NOT NULL,
    config_json TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);

-- Exactly one checkpoint per phase per job
CREATE TABLE IF NOT EXISTS phase_checkpoints (
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    phase TEXT NOT NULL,
    status TEXT NOT NULL,
    artifacts TEXT NOT NULL DEFAULT '[]',
    updated_at TEXT NOT NULL,
    PRIMARY KEY (job_id, phase)
);
"#;

/// SQL schema for a single job's database
pub const JOB_SCHEMA_SQL: &str = r#"
-- Every URL discovered by the job, keyed by canonical form
CREATE TABLE IF NOT EXISTS url_records (
    canonical_url TEXT PRIMARY KEY,
    original_url TEXT NOT NULL,
    host TEXT NOT NULL,
    depth INTEGER NOT NULL,
    status TEXT NOT NULL,
    source TEXT NOT NULL,
    content_hash TEXT,
    target_path TEXT,
    raw_path TEXT,
    duplicate_of TEXT,
    error_message TEXT,
    http_status INTEGER,
    attempts INTEGER NOT NULL DEFAULT 0,
    discovered_at TEXT NOT NULL,
    fetched_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_url_records_status ON url_records(status);
CREATE INDEX IF NOT EXISTS idx_url_records_host ON url_records(host);

-- First URL that produced each normalized content hash
CREATE TABLE IF NOT EXISTS fingerprints (
    content_hash TEXT PRIMARY KEY,
    canonical_url TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Politeness bookkeeping for resume
CREATE TABLE IF NOT EXISTS host_states (
    host TEXT PRIMARY KEY,
    last_request_at TEXT,
    request_count INTEGER NOT NULL DEFAULT 0
);
"#;

/// Pragmas applied to every file-backed connection
pub const PRAGMAS_SQL: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 5000;
";

/// Current schema version, recorded in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 1;

pub fn initialize_index_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(INDEX_SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

pub fn initialize_job_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(JOB_SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
