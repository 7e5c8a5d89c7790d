use crate::state::{Phase, UrlStatus};
use crate::storage::JobId;
use crate::UrlError;
use thiserror::Error;

/// Errors that can occur during job store operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("URL not recorded in job: {0}")]
    UrlNotFound(String),

    #[error("URL {url} is already {status}")]
    AlreadyTerminal { url: String, status: UrlStatus },

    #[error("Invalid URL update: {0}")]
    InvalidUpdate(String),

    #[error("Phase {phase} cannot start before {predecessor} is done or skipped")]
    PhaseOrder { phase: Phase, predecessor: Phase },

    #[error("URL {url} at depth {depth} exceeds max depth {max_depth}")]
    DepthExceeded {
        url: String,
        depth: u32,
        max_depth: u32,
    },

    #[error("Invalid URL: {0}")]
    Url(#[from] UrlError),

    #[error("Invalid date filter '{0}', expected YYYY, YYYY-MM or YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// True for failures of the store itself rather than a rejected request
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(_) | Self::Io(_) | Self::Json(_) | Self::Corrupt(_) | Self::LockPoisoned
        )
    }
}
