//! Gleaner: a resumable, deduplicating, host-polite research crawler
//!
//! This crate drives research jobs through an ordered set of phases (query
//! expansion, URL collection, review, crawling, bundling, analysis) and keeps
//! every piece of progress in a durable job store so an interrupted job can be
//! picked up again by any later process.

pub mod config;
pub mod crawler;
pub mod dedup;
pub mod output;
pub mod robots;
pub mod state;
pub mod storage;
pub mod url;
pub mod workflow;

use thiserror::Error;

/// Main error type for Gleaner operations
#[derive(Debug, Error)]
pub enum GleanerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{phase} phase failed: {message}")]
    Collaborator {
        phase: state::Phase,
        message: String,
    },

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Operation cancelled by user")]
    Cancelled,
}

impl GleanerError {
    /// Returns true when the error came from a user interrupt rather than a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Result type alias for Gleaner operations
pub type Result<T> = std::result::Result<T, GleanerError>;

// Re-export commonly used types
pub use config::{Config, JobConfig};
pub use state::{JobStatus, Phase, PhaseStatus, UrlStatus};
pub use storage::{JobId, JobStore};
pub use url::{canonicalize, host_key};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_error_names_phase() {
        let err = GleanerError::Collaborator {
            phase: Phase::UrlCollection,
            message: "search provider unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "URL_COLLECTION phase failed: search provider unavailable"
        );
    }

    #[test]
    fn test_is_cancelled() {
        assert!(GleanerError::Cancelled.is_cancelled());
        assert!(!GleanerError::Worker("boom".to_string()).is_cancelled());
    }
}
