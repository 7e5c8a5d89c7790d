//! Job index: the `jobs` and `phase_checkpoints` tables in `jobs.db`

use crate::config::JobConfig;
use crate::state::{JobStatus, Phase, PhaseStatus};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::schema::{initialize_index_schema, PRAGMAS_SQL};
use crate::storage::{format_timestamp, JobFilter, JobId, JobRecord, PhaseCheckpoint};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};

const JOB_COLUMNS: &str =
    "id, query, status, current_phase, job_dir, config_json, created_at, updated_at";

/// Raw `jobs` row before decoding
struct JobRow {
    id: String,
    query: String,
    status: String,
    current_phase: Option<String>,
    job_dir: String,
    config_json: String,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            query: row.get(1)?,
            status: row.get(2)?,
            current_phase: row.get(3)?,
            job_dir: row.get(4)?,
            config_json: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_record(self, root: &Path) -> StorageResult<JobRecord> {
        let id = self
            .id
            .parse::<JobId>()
            .map_err(|e| StorageError::Corrupt(format!("job id '{}': {}", self.id, e)))?;
        let status = JobStatus::from_db_string(&self.status)
            .ok_or_else(|| StorageError::Corrupt(format!("job {} status '{}'", id, self.status)))?;
        let current_phase = match self.current_phase {
            Some(p) => Some(
                Phase::from_db_string(&p)
                    .ok_or_else(|| StorageError::Corrupt(format!("job {} phase '{}'", id, p)))?,
            ),
            None => None,
        };
        let config: JobConfig = serde_json::from_str(&self.config_json)?;

        Ok(JobRecord {
            id,
            query: self.query,
            status,
            current_phase,
            created_at: self.created_at,
            updated_at: self.updated_at,
            job_dir: root.join(self.job_dir),
            config,
        })
    }
}

pub(crate) struct JobIndex {
    conn: Connection,
}

impl JobIndex {
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(PRAGMAS_SQL)?;
        initialize_index_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn insert_job(
        &self,
        id: JobId,
        query: &str,
        relative_dir: &Path,
        config: &JobConfig,
        now: &str,
    ) -> StorageResult<()> {
        let config_json = serde_json::to_string(config)?;
        self.conn.execute(
            "INSERT INTO jobs (id, query, status, current_phase, job_dir, config_json, created_at, updated_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?5, ?6, ?6)",
            params![
                id.to_string(),
                query,
                JobStatus::Active.to_db_string(),
                relative_dir.to_string_lossy().into_owned(),
                config_json,
                now
            ],
        )?;
        Ok(())
    }

    pub fn get_job(&self, root: &Path, id: JobId) -> StorageResult<JobRecord> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id.to_string()],
                JobRow::from_row,
            )
            .optional()?
            .ok_or(StorageError::JobNotFound(id))?;
        row.into_record(root)
    }

    /// Relative job directory, `None` when the job is unknown
    pub fn job_dir(&self, id: JobId) -> StorageResult<Option<PathBuf>> {
        let dir: Option<String> = self
            .conn
            .query_row(
                "SELECT job_dir FROM jobs WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(dir.map(PathBuf::from))
    }

    pub fn set_status(&self, id: JobId, status: JobStatus, now: &str) -> StorageResult<()> {
        let changed = self.conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, id.to_string()],
        )?;
        if changed == 0 {
            return Err(StorageError::JobNotFound(id));
        }
        Ok(())
    }

    pub fn checkpoints(&self, id: JobId) -> StorageResult<Vec<PhaseCheckpoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT phase, status, artifacts, updated_at FROM phase_checkpoints WHERE job_id = ?1",
        )?;
        let rows = stmt
            .query_map(params![id.to_string()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut checkpoints = rows
            .into_iter()
            .map(|(phase, status, artifacts, updated_at)| {
                Ok(PhaseCheckpoint {
                    job_id: id,
                    phase: Phase::from_db_string(&phase)
                        .ok_or_else(|| StorageError::Corrupt(format!("phase '{}'", phase)))?,
                    status: PhaseStatus::from_db_string(&status)
                        .ok_or_else(|| StorageError::Corrupt(format!("phase status '{}'", status)))?,
                    artifacts: serde_json::from_str(&artifacts)?,
                    updated_at,
                })
            })
            .collect::<StorageResult<Vec<_>>>()?;

        checkpoints.sort_by_key(|c| c.phase);
        Ok(checkpoints)
    }

    /// Upserts the checkpoint of one phase and advances the job's current phase
    ///
    /// Fails with `PhaseOrder` unless the predecessor phase is done or skipped.
    pub fn checkpoint(
        &mut self,
        id: JobId,
        phase: Phase,
        status: PhaseStatus,
        artifacts: &[String],
        now: &str,
    ) -> StorageResult<PhaseCheckpoint> {
        let id_str = id.to_string();
        let artifacts_json = serde_json::to_string(artifacts)?;
        let tx = self.conn.transaction()?;

        let known: Option<String> = tx
            .query_row("SELECT id FROM jobs WHERE id = ?1", params![id_str], |row| {
                row.get(0)
            })
            .optional()?;
        if known.is_none() {
            return Err(StorageError::JobNotFound(id));
        }

        if let Some(predecessor) = phase.predecessor() {
            let previous: Option<String> = tx
                .query_row(
                    "SELECT status FROM phase_checkpoints WHERE job_id = ?1 AND phase = ?2",
                    params![id_str, predecessor.to_db_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let settled = previous
                .as_deref()
                .and_then(PhaseStatus::from_db_string)
                .map_or(false, |s| s.is_settled());
            if !settled {
                return Err(StorageError::PhaseOrder { phase, predecessor });
            }
        }

        tx.execute(
            "INSERT INTO phase_checkpoints (job_id, phase, status, artifacts, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(job_id, phase) DO UPDATE SET
                status = excluded.status,
                artifacts = excluded.artifacts,
                updated_at = excluded.updated_at",
            params![
                id_str,
                phase.to_db_string(),
                status.to_db_string(),
                artifacts_json,
                now
            ],
        )?;
        tx.execute(
            "UPDATE jobs SET current_phase = ?1, updated_at = ?2 WHERE id = ?3",
            params![phase.to_db_string(), now, id_str],
        )?;
        tx.commit()?;

        Ok(PhaseCheckpoint {
            job_id: id,
            phase,
            status,
            artifacts: artifacts.to_vec(),
            updated_at: now.to_string(),
        })
    }

    /// Lists jobs newest first
    pub fn list(&self, root: &Path, filter: &JobFilter) -> StorageResult<Vec<JobRecord>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            values.push(status.to_db_string().to_string());
            clauses.push(format!("status = ?{}", values.len()));
        }
        if let Some(date) = &filter.date {
            values.push(format_timestamp(date.start));
            clauses.push(format!("created_at >= ?{}", values.len()));
            values.push(format_timestamp(date.end));
            clauses.push(format!("created_at < ?{}", values.len()));
        }
        if let Some(term) = filter.search.as_deref().filter(|t| !t.trim().is_empty()) {
            values.push(format!("%{}%", escape_like(term.trim())));
            let n = values.len();
            clauses.push(format!(
                "(query LIKE ?{n} ESCAPE '\\' OR id LIKE ?{n} ESCAPE '\\')"
            ));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let limit = i64::try_from(filter.limit).unwrap_or(-1);
        let offset = i64::try_from(filter.offset).unwrap_or(0);

        let sql = format!(
            "SELECT {} FROM jobs {} ORDER BY created_at DESC, id DESC LIMIT {} OFFSET {}",
            JOB_COLUMNS, where_sql, limit, offset
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(|row| row.into_record(root)).collect()
    }

    /// Deletes the job row and its checkpoints in one transaction
    pub fn delete_job(&mut self, id: JobId) -> StorageResult<()> {
        let id_str = id.to_string();
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM phase_checkpoints WHERE job_id = ?1",
            params![id_str],
        )?;
        let removed = tx.execute("DELETE FROM jobs WHERE id = ?1", params![id_str])?;
        if removed == 0 {
            return Err(StorageError::JobNotFound(id));
        }
        tx.commit()?;
        Ok(())
    }
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
