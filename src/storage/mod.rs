//! Storage module: the durable job store
//!
//! Layout under the data directory:
//!
//! - `jobs.db` - job index (one row per job, plus phase checkpoints)
//! - `YYYY/MM/DD/<job-id>/job.db` - URL records, content fingerprints and
//!   host states of one job
//! - `YYYY/MM/DD/<job-id>/raw/`, `content/` - fetched payloads and extracted text
//! - phase artifacts (`collected_urls.json`, `bundle.md`, ...) next to `job.db`
//!
//! All state needed to resume a job lives here; in-memory structures elsewhere
//! are caches that can be rebuilt from it.

mod error;
mod index;
mod job_db;
mod schema;
mod store;

pub use error::{StorageError, StorageResult};
pub use store::{JobStore, CONTENT_DIR, INDEX_FILE, JOB_DB_FILE, MANIFEST_FILE, RAW_DIR};

use crate::config::JobConfig;
use crate::state::{JobStatus, Phase, PhaseStatus, UrlStatus};
use chrono::{DateTime, Datelike, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// Time-sortable job identifier (UUID v7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// A research job as stored in the index
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub query: String,
    pub status: JobStatus,
    pub current_phase: Option<Phase>,
    pub created_at: String,
    pub updated_at: String,
    /// Absolute path of the job directory
    pub job_dir: PathBuf,
    pub config: JobConfig,
}

/// One row per (job, phase)
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseCheckpoint {
    pub job_id: JobId,
    pub phase: Phase,
    pub status: PhaseStatus,
    /// Artifact paths relative to the job directory
    pub artifacts: Vec<String>,
    pub updated_at: String,
}

/// How a URL entered the job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlSource {
    /// User-supplied on the command line
    Seed,
    /// Output of URL collection or review
    Search,
    /// Extracted from a fetched page
    Link,
    /// Re-extracted from a stored page while resuming
    Resample,
}

impl UrlSource {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Search => "search",
            Self::Link => "link",
            Self::Resample => "resample",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "seed" => Some(Self::Seed),
            "search" => Some(Self::Search),
            "link" => Some(Self::Link),
            "resample" => Some(Self::Resample),
            _ => None,
        }
    }
}

impl fmt::Display for UrlSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// A discovered URL within a job
#[derive(Debug, Clone, PartialEq)]
pub struct UrlRecord {
    pub canonical_url: String,
    pub original_url: String,
    pub host: String,
    pub depth: u32,
    pub status: UrlStatus,
    pub source: UrlSource,
    pub content_hash: Option<String>,
    /// Extracted content, relative to the job directory
    pub target_path: Option<String>,
    /// Raw fetched payload, relative to the job directory
    pub raw_path: Option<String>,
    pub duplicate_of: Option<String>,
    pub error_message: Option<String>,
    pub http_status: Option<u16>,
    pub attempts: u32,
    pub discovered_at: String,
    pub fetched_at: Option<String>,
}

/// Terminal update applied to a pending URL record
#[derive(Debug, Clone, PartialEq)]
pub struct UrlUpdate {
    pub status: UrlStatus,
    pub content_hash: Option<String>,
    pub target_path: Option<String>,
    pub raw_path: Option<String>,
    pub duplicate_of: Option<String>,
    pub error_message: Option<String>,
    pub http_status: Option<u16>,
}

impl UrlUpdate {
    fn with_status(status: UrlStatus) -> Self {
        Self {
            status,
            content_hash: None,
            target_path: None,
            raw_path: None,
            duplicate_of: None,
            error_message: None,
            http_status: None,
        }
    }

    pub fn fetched(
        content_hash: impl Into<String>,
        target_path: impl Into<String>,
        raw_path: impl Into<String>,
        http_status: u16,
    ) -> Self {
        Self {
            content_hash: Some(content_hash.into()),
            target_path: Some(target_path.into()),
            raw_path: Some(raw_path.into()),
            http_status: Some(http_status),
            ..Self::with_status(UrlStatus::Fetched)
        }
    }

    pub fn duplicate(
        content_hash: impl Into<String>,
        duplicate_of: impl Into<String>,
        raw_path: impl Into<String>,
        http_status: u16,
    ) -> Self {
        Self {
            content_hash: Some(content_hash.into()),
            duplicate_of: Some(duplicate_of.into()),
            raw_path: Some(raw_path.into()),
            http_status: Some(http_status),
            ..Self::with_status(UrlStatus::SkippedDuplicate)
        }
    }

    pub fn error(message: impl Into<String>, http_status: Option<u16>) -> Self {
        Self {
            error_message: Some(message.into()),
            http_status,
            ..Self::with_status(UrlStatus::Error)
        }
    }

    pub fn filtered(reason: impl Into<String>) -> Self {
        Self {
            error_message: Some(reason.into()),
            ..Self::with_status(UrlStatus::SkippedFiltered)
        }
    }
}

/// Per-host politeness bookkeeping, persisted so a resumed job keeps it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostState {
    pub host: String,
    pub last_request_at: Option<DateTime<Utc>>,
    pub request_count: u32,
}

/// URL record counts of one job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub fetched: u64,
    pub error: u64,
    pub skipped_duplicate: u64,
    pub skipped_filtered: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: UrlStatus, count: u64) {
        match status {
            UrlStatus::Pending => self.pending += count,
            UrlStatus::Fetched => self.fetched += count,
            UrlStatus::Error => self.error += count,
            UrlStatus::SkippedDuplicate => self.skipped_duplicate += count,
            UrlStatus::SkippedFiltered => self.skipped_filtered += count,
        }
    }

    pub fn get(&self, status: UrlStatus) -> u64 {
        match status {
            UrlStatus::Pending => self.pending,
            UrlStatus::Fetched => self.fetched,
            UrlStatus::Error => self.error,
            UrlStatus::SkippedDuplicate => self.skipped_duplicate,
            UrlStatus::SkippedFiltered => self.skipped_filtered,
        }
    }

    pub fn total(&self) -> u64 {
        UrlStatus::all().iter().map(|s| self.get(*s)).sum()
    }

    pub fn terminal(&self) -> u64 {
        self.total() - self.pending
    }
}

/// Creation-date filter: a whole year, month or day (UTC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateFilter {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateFilter {
    /// Parses `YYYY`, `YYYY-MM` or `YYYY-MM-DD`
    pub fn parse(input: &str) -> Result<Self, StorageError> {
        let invalid = || StorageError::InvalidDate(input.to_string());
        let parts: Vec<&str> = input.trim().split('-').collect();
        let nums = parts
            .iter()
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        let (start, end) = match nums.as_slice() {
            [y] => {
                let year = *y as i32;
                (date(year, 1, 1), date(year + 1, 1, 1))
            }
            [y, m] => {
                let year = *y as i32;
                let start = date(year, *m, 1);
                let end = if *m == 12 { date(year + 1, 1, 1) } else { date(year, m + 1, 1) };
                (start, end)
            }
            [y, m, d] => {
                let start = date(*y as i32, *m, *d);
                (start, start.and_then(|s| s.succ_opt()))
            }
            _ => (None, None),
        };

        match (start, end) {
            (Some(start), Some(end)) => Ok(Self {
                start: Utc.from_utc_datetime(&start.and_hms_opt(0, 0, 0).ok_or_else(invalid)?),
                end: Utc.from_utc_datetime(&end.and_hms_opt(0, 0, 0).ok_or_else(invalid)?),
            }),
            _ => Err(invalid()),
        }
    }
}

fn date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Filter for listing and bulk-deleting jobs
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub date: Option<DateFilter>,
    /// Substring of the query text or the job id
    pub search: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            status: None,
            date: None,
            search: None,
            limit: 20,
            offset: 0,
        }
    }
}

impl JobFilter {
    /// Same filter without paging
    pub fn unbounded(&self) -> Self {
        Self {
            limit: usize::MAX,
            offset: 0,
            ..self.clone()
        }
    }
}

/// Formats a timestamp the way every table stores it
///
/// Fixed width and `Z` suffix keep string comparison equal to time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Job directory path relative to the data dir: `YYYY/MM/DD/<job-id>`
pub fn relative_job_dir(id: JobId, created: DateTime<Utc>) -> PathBuf {
    Path::new(&format!("{:04}", created.year()))
        .join(format!("{:02}", created.month()))
        .join(format!("{:02}", created.day()))
        .join(id.to_string())
}
