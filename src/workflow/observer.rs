//! Progress reporting hooks for the phase workflow

use crate::crawler::CrawlReport;
use crate::state::JobStatus;
use crate::storage::{JobId, PhaseCheckpoint};
use tracing::{info, warn};

/// Receives workflow progress
///
/// Called after every persisted checkpoint, after each crawl run and once
/// when a run of the workflow ends.
pub trait WorkflowObserver: Send + Sync {
    fn on_checkpoint(&self, _checkpoint: &PhaseCheckpoint) {}

    fn on_crawl_report(&self, _job_id: JobId, _report: &CrawlReport) {}

    /// `status` is `active` when the run was interrupted
    fn on_job_end(&self, _job_id: JobId, _status: JobStatus) {}
}

/// Reports progress through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl WorkflowObserver for LoggingObserver {
    fn on_checkpoint(&self, checkpoint: &PhaseCheckpoint) {
        info!(
            job_id = %checkpoint.job_id,
            phase = %checkpoint.phase,
            status = %checkpoint.status,
            artifacts = ?checkpoint.artifacts,
            "Phase checkpoint"
        );
    }

    fn on_crawl_report(&self, job_id: JobId, report: &CrawlReport) {
        info!(
            job_id = %job_id,
            requests = report.requests,
            fetched = report.counts.fetched,
            duplicates = report.counts.skipped_duplicate,
            errors = report.counts.error,
            filtered = report.counts.skipped_filtered,
            pending = report.counts.pending,
            "Crawl progress"
        );
    }

    fn on_job_end(&self, job_id: JobId, status: JobStatus) {
        match status {
            JobStatus::Failed => warn!(job_id = %job_id, status = %status, "Job ended"),
            _ => info!(job_id = %job_id, status = %status, "Job ended"),
        }
    }
}

/// Ignores all progress
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentObserver;

impl WorkflowObserver for SilentObserver {}
