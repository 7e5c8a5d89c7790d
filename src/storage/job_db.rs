//! Per-job database: URL records, content fingerprints and host states
//!
//! One connection per job, serialized through a mutex. Every write is a
//! single statement or a transaction.

use crate::state::UrlStatus;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::schema::{initialize_job_schema, PRAGMAS_SQL};
use crate::storage::{
    format_timestamp, now_timestamp, parse_timestamp, HostState, StatusCounts, UrlRecord,
    UrlSource, UrlUpdate,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const URL_COLUMNS: &str = "canonical_url, original_url, host, depth, status, source, content_hash, \
     target_path, raw_path, duplicate_of, error_message, http_status, attempts, discovered_at, fetched_at";

fn url_record_from_row(row: &Row<'_>) -> rusqlite::Result<UrlRecord> {
    Ok(UrlRecord {
        canonical_url: row.get(0)?,
        original_url: row.get(1)?,
        host: row.get(2)?,
        depth: row.get(3)?,
        status: UrlStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(UrlStatus::Error),
        source: UrlSource::from_db_string(&row.get::<_, String>(5)?).unwrap_or(UrlSource::Link),
        content_hash: row.get(6)?,
        target_path: row.get(7)?,
        raw_path: row.get(8)?,
        duplicate_of: row.get(9)?,
        error_message: row.get(10)?,
        http_status: row.get(11)?,
        attempts: row.get(12)?,
        discovered_at: row.get(13)?,
        fetched_at: row.get(14)?,
    })
}

pub(crate) struct JobDb {
    conn: Mutex<Connection>,
    max_depth: u32,
}

impl JobDb {
    pub fn open(path: &Path, max_depth: u32) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(PRAGMAS_SQL)?;
        initialize_job_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            max_depth,
        })
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Inserts a pending record or returns the existing one unchanged
    ///
    /// `canonical_url` and `host` must already be canonical.
    pub fn record_url(
        &self,
        canonical_url: &str,
        original_url: &str,
        host: &str,
        depth: u32,
        source: UrlSource,
    ) -> StorageResult<(UrlRecord, bool)> {
        if depth > self.max_depth {
            return Err(StorageError::DepthExceeded {
                url: canonical_url.to_string(),
                depth,
                max_depth: self.max_depth,
            });
        }

        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO url_records (canonical_url, original_url, host, depth, status, source, discovered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(canonical_url) DO NOTHING",
            params![
                canonical_url,
                original_url,
                host,
                depth,
                UrlStatus::Pending.to_db_string(),
                source.to_db_string(),
                now_timestamp()
            ],
        )?;

        let record = fetch_url(&conn, canonical_url)?
            .ok_or_else(|| StorageError::UrlNotFound(canonical_url.to_string()))?;
        Ok((record, inserted == 1))
    }

    /// Moves a pending record to a terminal status
    pub fn update_url_status(&self, canonical_url: &str, update: &UrlUpdate) -> StorageResult<UrlRecord> {
        if !update.status.is_terminal() {
            return Err(StorageError::InvalidUpdate(format!(
                "{} is not a terminal status",
                update.status
            )));
        }

        let conn = self.lock()?;
        let fetched_at = matches!(update.status, UrlStatus::Fetched | UrlStatus::SkippedDuplicate)
            .then(now_timestamp);
        let changed = conn.execute(
            "UPDATE url_records SET
                status = ?1, content_hash = ?2, target_path = ?3, raw_path = ?4,
                duplicate_of = ?5, error_message = ?6, http_status = ?7, fetched_at = ?8
             WHERE canonical_url = ?9 AND status = ?10",
            params![
                update.status.to_db_string(),
                update.content_hash,
                update.target_path,
                update.raw_path,
                update.duplicate_of,
                update.error_message,
                update.http_status,
                fetched_at,
                canonical_url,
                UrlStatus::Pending.to_db_string()
            ],
        )?;

        let record = fetch_url(&conn, canonical_url)?
            .ok_or_else(|| StorageError::UrlNotFound(canonical_url.to_string()))?;
        if changed == 0 {
            return Err(StorageError::AlreadyTerminal {
                url: canonical_url.to_string(),
                status: record.status,
            });
        }
        Ok(record)
    }

    pub fn increment_attempts(&self, canonical_url: &str) -> StorageResult<u32> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE url_records SET attempts = attempts + 1 WHERE canonical_url = ?1",
            params![canonical_url],
        )?;
        if changed == 0 {
            return Err(StorageError::UrlNotFound(canonical_url.to_string()));
        }
        let attempts = conn.query_row(
            "SELECT attempts FROM url_records WHERE canonical_url = ?1",
            params![canonical_url],
            |row| row.get(0),
        )?;
        Ok(attempts)
    }

    pub fn get_url(&self, canonical_url: &str) -> StorageResult<Option<UrlRecord>> {
        let conn = self.lock()?;
        fetch_url(&conn, canonical_url)
    }

    /// Pending records, shallowest first, then in discovery order
    pub fn pending_urls(&self) -> StorageResult<Vec<UrlRecord>> {
        self.query_urls(
            &format!(
                "SELECT {} FROM url_records WHERE status = ?1 ORDER BY depth, rowid",
                URL_COLUMNS
            ),
            params![UrlStatus::Pending.to_db_string()],
        )
    }

    /// Up to `limit` fetched records, most recently fetched first
    pub fn sample_fetched(&self, limit: usize) -> StorageResult<Vec<UrlRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.query_urls(
            &format!(
                "SELECT {} FROM url_records WHERE status = ?1 ORDER BY fetched_at DESC, rowid DESC LIMIT ?2",
                URL_COLUMNS
            ),
            params![UrlStatus::Fetched.to_db_string(), limit],
        )
    }

    pub fn url_records(&self, status: Option<UrlStatus>) -> StorageResult<Vec<UrlRecord>> {
        match status {
            Some(status) => self.query_urls(
                &format!(
                    "SELECT {} FROM url_records WHERE status = ?1 ORDER BY rowid",
                    URL_COLUMNS
                ),
                params![status.to_db_string()],
            ),
            None => self.query_urls(
                &format!("SELECT {} FROM url_records ORDER BY rowid", URL_COLUMNS),
                params![],
            ),
        }
    }

    fn query_urls<P: rusqlite::Params>(&self, sql: &str, params: P) -> StorageResult<Vec<UrlRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let records = stmt
            .query_map(params, url_record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count_by_status(&self) -> StorageResult<StatusCounts> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM url_records GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = UrlStatus::from_db_string(&status) {
                counts.add(status, count as u64);
            }
        }
        Ok(counts)
    }

    /// Pages already fetched from `host` (duplicates included)
    pub fn fetched_for_host(&self, host: &str) -> StorageResult<u32> {
        let conn = self.lock()?;
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM url_records WHERE host = ?1 AND status IN (?2, ?3)",
            params![
                host,
                UrlStatus::Fetched.to_db_string(),
                UrlStatus::SkippedDuplicate.to_db_string()
            ],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Registers `hash` for `canonical_url` unless already registered
    ///
    /// Returns the URL that owned the hash before this call, if any.
    pub fn register_fingerprint(&self, hash: &str, canonical_url: &str) -> StorageResult<Option<String>> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT INTO fingerprints (content_hash, canonical_url, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(content_hash) DO NOTHING",
            params![hash, canonical_url, now_timestamp()],
        )?;
        if inserted == 1 {
            return Ok(None);
        }
        let owner: String = conn.query_row(
            "SELECT canonical_url FROM fingerprints WHERE content_hash = ?1",
            params![hash],
            |row| row.get(0),
        )?;
        Ok(Some(owner))
    }

    pub fn load_host_states(&self) -> StorageResult<Vec<HostState>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT host, last_request_at, request_count FROM host_states ORDER BY host")?;
        let states = stmt
            .query_map([], |row| {
                let last: Option<String> = row.get(1)?;
                Ok(HostState {
                    host: row.get(0)?,
                    last_request_at: last.as_deref().and_then(parse_timestamp),
                    request_count: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(states)
    }

    pub fn save_host_state(&self, state: &HostState) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO host_states (host, last_request_at, request_count) VALUES (?1, ?2, ?3)
             ON CONFLICT(host) DO UPDATE SET
                last_request_at = excluded.last_request_at,
                request_count = excluded.request_count",
            params![
                state.host,
                state.last_request_at.map(format_timestamp),
                state.request_count
            ],
        )?;
        Ok(())
    }

    /// Clears `raw_path` on every record and returns the cleared paths
    pub fn take_raw_paths(&self) -> StorageResult<Vec<String>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let paths = {
            let mut stmt =
                tx.prepare("SELECT raw_path FROM url_records WHERE raw_path IS NOT NULL")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };
        tx.execute("UPDATE url_records SET raw_path = NULL WHERE raw_path IS NOT NULL", [])?;
        tx.commit()?;
        Ok(paths)
    }
}

fn fetch_url(conn: &Connection, canonical_url: &str) -> StorageResult<Option<UrlRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM url_records WHERE canonical_url = ?1", URL_COLUMNS),
            params![canonical_url],
            url_record_from_row,
        )
        .optional()?;
    Ok(record)
}
