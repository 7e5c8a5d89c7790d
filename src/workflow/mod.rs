//! Research job workflow
//!
//! INITIALIZATION → QUERY_EXPANSION → URL_COLLECTION → URL_REVIEW →
//! CRAWLING → BUNDLING → ANALYSIS, each phase checkpointed in the job store
//! with its artifact files in the job directory.

pub mod artifacts;
mod collaborators;
mod manager;
mod observer;

pub use collaborators::{
    AcceptAllReviewer, Analyzer, BundleInput, Bundler, ChainedUrlCollector, ConcatBundler,
    FileUrlCollector, QueryExpander, StaticUrlCollector, UrlCollector, UrlReviewer,
};
pub use manager::{JobOutcome, PhaseWorkflowManager};
pub use observer::{LoggingObserver, SilentObserver, WorkflowObserver};
