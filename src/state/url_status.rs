//! URL record status definitions
//!
//! A URL record starts out `Pending` and moves exactly once to one of the
//! terminal statuses.
use std::fmt;

/// Represents the current status of a URL record in a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrlStatus {
    /// Discovered and waiting in the frontier
    Pending,

    /// Fetched and its content stored
    Fetched,

    /// Fetch failed permanently, or transiently past the retry budget
    Error,

    /// Fetched content matched an earlier URL of the same job
    SkippedDuplicate,

    /// Rejected before any network call (scope, SSRF, robots, host cap)
    SkippedFiltered,
}

impl UrlStatus {
    /// Returns true if this is a terminal status
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Returns true if this status was reached without fetching content
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::SkippedDuplicate | Self::SkippedFiltered)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetched => "fetched",
            Self::Error => "error",
            Self::SkippedDuplicate => "skipped_duplicate",
            Self::SkippedFiltered => "skipped_filtered",
        }
    }

    /// Parses a status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "fetched" => Some(Self::Fetched),
            "error" => Some(Self::Error),
            "skipped_duplicate" => Some(Self::SkippedDuplicate),
            "skipped_filtered" => Some(Self::SkippedFiltered),
            _ => None,
        }
    }

    /// Returns all statuses in lifecycle order
    pub fn all() -> [Self; 5] {
        [
            Self::Pending,
            Self::Fetched,
            Self::Error,
            Self::SkippedDuplicate,
            Self::SkippedFiltered,
        ]
    }
}

impl fmt::Display for UrlStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}
