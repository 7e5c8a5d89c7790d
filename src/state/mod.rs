//! State module for tracking job progress
//!
//! # Components
//!
//! - `UrlStatus`: lifecycle of a single URL record (pending, then one terminal status)
//! - `Phase` / `PhaseStatus`: ordered workflow stages and their checkpoint states
//! - `JobStatus`: lifecycle of a whole research job

mod job_status;
mod phase;
mod url_status;

// Re-export main types
pub use job_status::JobStatus;
pub use phase::{Phase, PhaseStatus};
pub use url_status::UrlStatus;
