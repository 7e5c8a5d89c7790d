//! Workflow phases and checkpoint statuses

use std::fmt;

/// A stage of the research workflow, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Initialization,
    QueryExpansion,
    UrlCollection,
    UrlReview,
    Crawling,
    Bundling,
    Analysis,
}

impl Phase {
    /// All phases in the order they run
    pub const ALL: [Phase; 7] = [
        Phase::Initialization,
        Phase::QueryExpansion,
        Phase::UrlCollection,
        Phase::UrlReview,
        Phase::Crawling,
        Phase::Bundling,
        Phase::Analysis,
    ];

    /// Position of this phase in the workflow
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// The phase that must be settled before this one may start
    pub fn predecessor(&self) -> Option<Phase> {
        match self.index() {
            0 => None,
            i => Some(Self::ALL[i - 1]),
        }
    }

    /// The phase that follows this one, `None` after the last phase
    pub fn successor(&self) -> Option<Phase> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// Optional phases write a `skipped` checkpoint instead of running
    pub fn is_optional(&self) -> bool {
        matches!(
            self,
            Self::QueryExpansion | Self::UrlReview | Self::Analysis
        )
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Initialization => "INITIALIZATION",
            Self::QueryExpansion => "QUERY_EXPANSION",
            Self::UrlCollection => "URL_COLLECTION",
            Self::UrlReview => "URL_REVIEW",
            Self::Crawling => "CRAWLING",
            Self::Bundling => "BUNDLING",
            Self::Analysis => "ANALYSIS",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.to_db_string() == s)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Status stored in a phase checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseStatus {
    /// Entered but not yet finished (or interrupted)
    Pending,
    /// Optional phase intentionally not run
    Skipped,
    Done,
    Failed,
}

impl PhaseStatus {
    /// A settled phase lets its successor start and is never re-run on resume
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Done | Self::Skipped)
    }

    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Skipped => "skipped",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "skipped" => Some(Self::Skipped),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}
