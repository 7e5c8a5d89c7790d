//! `JobStore`: the single entry point for durable job state

use crate::config::JobConfig;
use crate::state::{JobStatus, Phase, PhaseStatus, UrlStatus};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::index::JobIndex;
use crate::storage::job_db::JobDb;
use crate::storage::{
    format_timestamp, now_timestamp, relative_job_dir, HostState, JobFilter, JobId, JobRecord,
    PhaseCheckpoint, StatusCounts, UrlRecord, UrlSource, UrlUpdate,
};
use crate::url::{canonicalize, host_key};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Name of the job index database under the data directory
pub const INDEX_FILE: &str = "jobs.db";
/// Name of the per-job database inside a job directory
pub const JOB_DB_FILE: &str = "job.db";
/// Job manifest written next to `job.db`
pub const MANIFEST_FILE: &str = "job.json";
pub const RAW_DIR: &str = "raw";
pub const CONTENT_DIR: &str = "content";

#[derive(Serialize)]
struct JobManifest<'a> {
    id: JobId,
    query: &'a str,
    created_at: &'a str,
    config: &'a JobConfig,
}

/// Durable store for jobs, phase checkpoints, URL records, fingerprints and
/// host states
///
/// Safe to share between tasks behind an `Arc`; each job database is opened
/// once and cached.
pub struct JobStore {
    root: PathBuf,
    index: Mutex<JobIndex>,
    jobs: Mutex<HashMap<JobId, Arc<JobDb>>>,
}

impl JobStore {
    /// Opens (creating if needed) the store rooted at `data_dir`
    pub fn open(data_dir: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let index = JobIndex::open(&data_dir.join(INDEX_FILE))?;
        debug!(data_dir = %data_dir.display(), "Opened job store");
        Ok(Self {
            root: data_dir.to_path_buf(),
            index: Mutex::new(index),
            jobs: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index(&self) -> StorageResult<MutexGuard<'_, JobIndex>> {
        self.index.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn job_db(&self, id: JobId) -> StorageResult<Arc<JobDb>> {
        let mut jobs = self.jobs.lock().map_err(|_| StorageError::LockPoisoned)?;
        if let Some(db) = jobs.get(&id) {
            return Ok(Arc::clone(db));
        }

        let job = self.index()?.get_job(&self.root, id)?;
        let db = Arc::new(JobDb::open(
            &job.job_dir.join(JOB_DB_FILE),
            job.config.max_depth,
        )?);
        jobs.insert(id, Arc::clone(&db));
        Ok(db)
    }

    fn forget_job_db(&self, id: JobId) -> StorageResult<()> {
        let mut jobs = self.jobs.lock().map_err(|_| StorageError::LockPoisoned)?;
        jobs.remove(&id);
        Ok(())
    }

    // ===== Jobs and checkpoints =====

    /// Creates a job: index row, dated job directory, manifest and job database
    pub fn create_job(&self, query: &str, config: &JobConfig) -> StorageResult<JobId> {
        let id = JobId::new();
        let created = Utc::now();
        let now = format_timestamp(created);
        let relative = relative_job_dir(id, created);
        let job_dir = self.root.join(&relative);

        std::fs::create_dir_all(job_dir.join(RAW_DIR))?;
        std::fs::create_dir_all(job_dir.join(CONTENT_DIR))?;
        let manifest = JobManifest {
            id,
            query,
            created_at: &now,
            config,
        };
        std::fs::write(
            job_dir.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&manifest)?,
        )?;

        let db = Arc::new(JobDb::open(&job_dir.join(JOB_DB_FILE), config.max_depth)?);
        self.index()?.insert_job(id, query, &relative, config, &now)?;
        self.jobs
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(id, db);

        info!(job_id = %id, job_dir = %job_dir.display(), "Created job");
        Ok(id)
    }

    pub fn load_job(&self, id: JobId) -> StorageResult<JobRecord> {
        self.index()?.get_job(&self.root, id)
    }

    /// Absolute directory of a job
    pub fn job_dir(&self, id: JobId) -> StorageResult<PathBuf> {
        self.index()?
            .job_dir(id)?
            .map(|rel| self.root.join(rel))
            .ok_or(StorageError::JobNotFound(id))
    }

    /// Checkpoints ordered by phase
    pub fn load_checkpoints(&self, id: JobId) -> StorageResult<Vec<PhaseCheckpoint>> {
        self.index()?.checkpoints(id)
    }

    /// Writes the checkpoint of `phase` and makes it the job's current phase
    ///
    /// # Errors
    ///
    /// * `PhaseOrder` - the predecessor phase is not done or skipped
    /// * `JobNotFound` - no such job
    pub fn checkpoint_phase(
        &self,
        id: JobId,
        phase: Phase,
        status: PhaseStatus,
        artifacts: &[String],
    ) -> StorageResult<PhaseCheckpoint> {
        let checkpoint = self
            .index()?
            .checkpoint(id, phase, status, artifacts, &now_timestamp())?;
        debug!(job_id = %id, phase = %phase, status = %status, "Phase checkpoint written");
        Ok(checkpoint)
    }

    pub fn set_job_status(&self, id: JobId, status: JobStatus) -> StorageResult<()> {
        self.index()?.set_status(id, status, &now_timestamp())?;
        info!(job_id = %id, status = %status, "Job status changed");
        Ok(())
    }

    /// Lists jobs newest first
    pub fn list_jobs(&self, filter: &JobFilter) -> StorageResult<Vec<JobRecord>> {
        self.index()?.list(&self.root, filter)
    }

    /// Deletes a job with every dependent record and artifact
    ///
    /// The job directory is renamed to a tombstone first, then the index rows
    /// are removed in one transaction. If that transaction fails the directory
    /// is renamed back, so the job is either fully present or fully gone.
    pub fn delete_job(&self, id: JobId) -> StorageResult<()> {
        let job_dir = self.job_dir(id)?;
        self.forget_job_db(id)?;

        let tombstone = job_dir.with_file_name(format!(".{}.deleting", id));
        let moved = if job_dir.exists() {
            std::fs::rename(&job_dir, &tombstone)?;
            true
        } else {
            warn!(job_id = %id, "Job directory already missing");
            false
        };

        if let Err(e) = self.index().and_then(|mut index| index.delete_job(id)) {
            if moved {
                if let Err(restore) = std::fs::rename(&tombstone, &job_dir) {
                    warn!(job_id = %id, error = %restore, "Failed to restore job directory");
                }
            }
            return Err(e);
        }

        if moved {
            if let Err(e) = std::fs::remove_dir_all(&tombstone) {
                warn!(job_id = %id, path = %tombstone.display(), error = %e, "Failed to remove job directory");
            }
        }

        info!(job_id = %id, "Deleted job");
        Ok(())
    }

    // ===== URL records =====

    /// Canonicalizes `url` and inserts it as a pending record at `depth`
    ///
    /// Idempotent: returns `(existing, false)` when the canonical URL is known.
    pub fn record_url(
        &self,
        id: JobId,
        url: &str,
        depth: u32,
        source: UrlSource,
    ) -> StorageResult<(UrlRecord, bool)> {
        let canonical = canonicalize(url)?;
        let host = host_key(&canonical).ok_or(crate::UrlError::MissingHost)?;
        let db = self.job_db(id)?;
        let (record, created) = db.record_url(canonical.as_str(), url, &host, depth, source)?;
        if created {
            debug!(job_id = %id, url = %record.canonical_url, depth, source = %source, "Recorded URL");
        }
        Ok((record, created))
    }

    pub fn update_url_status(
        &self,
        id: JobId,
        canonical_url: &str,
        update: &UrlUpdate,
    ) -> StorageResult<UrlRecord> {
        self.job_db(id)?.update_url_status(canonical_url, update)
    }

    pub fn increment_attempts(&self, id: JobId, canonical_url: &str) -> StorageResult<u32> {
        self.job_db(id)?.increment_attempts(canonical_url)
    }

    pub fn pending_urls(&self, id: JobId) -> StorageResult<Vec<UrlRecord>> {
        self.job_db(id)?.pending_urls()
    }

    pub fn sample_fetched(&self, id: JobId, limit: usize) -> StorageResult<Vec<UrlRecord>> {
        self.job_db(id)?.sample_fetched(limit)
    }

    pub fn url_records(&self, id: JobId, status: Option<UrlStatus>) -> StorageResult<Vec<UrlRecord>> {
        self.job_db(id)?.url_records(status)
    }

    pub fn get_url(&self, id: JobId, canonical_url: &str) -> StorageResult<Option<UrlRecord>> {
        self.job_db(id)?.get_url(canonical_url)
    }

    pub fn count_by_status(&self, id: JobId) -> StorageResult<StatusCounts> {
        self.job_db(id)?.count_by_status()
    }

    pub fn fetched_for_host(&self, id: JobId, host: &str) -> StorageResult<u32> {
        self.job_db(id)?.fetched_for_host(host)
    }

    // ===== Fingerprints and host states =====

    /// Returns the URL that already owned `hash`, if any
    pub fn register_fingerprint(
        &self,
        id: JobId,
        hash: &str,
        canonical_url: &str,
    ) -> StorageResult<Option<String>> {
        self.job_db(id)?.register_fingerprint(hash, canonical_url)
    }

    pub fn load_host_states(&self, id: JobId) -> StorageResult<Vec<HostState>> {
        self.job_db(id)?.load_host_states()
    }

    pub fn save_host_state(&self, id: JobId, state: &HostState) -> StorageResult<()> {
        self.job_db(id)?.save_host_state(state)
    }

    // ===== Raw payload cleanup =====

    /// Removes a job's raw payloads and clears their paths; returns files removed
    pub fn clean_raw(&self, id: JobId) -> StorageResult<usize> {
        let job_dir = self.job_dir(id)?;
        let paths = self.job_db(id)?.take_raw_paths()?;

        let mut removed = 0;
        for rel in paths {
            match std::fs::remove_file(job_dir.join(&rel)) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(job_id = %id, path = %rel, error = %e, "Failed to remove raw payload"),
            }
        }
        info!(job_id = %id, removed, "Cleaned raw payloads");
        Ok(removed)
    }

    /// `clean_raw` over every job; returns total files removed
    pub fn clean_all_raw(&self) -> StorageResult<usize> {
        let jobs = self.list_jobs(&JobFilter::default().unbounded())?;
        let mut total = 0;
        for job in jobs {
            total += self.clean_raw(job.id)?;
        }
        Ok(total)
    }
}
