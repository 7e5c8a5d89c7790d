//! Job statistics for `--status` and `--list-jobs`
//!
//! This module provides functionality for extracting and displaying job
//! progress from the job store.

use crate::state::{PhaseStatus, UrlStatus};
use crate::storage::{JobId, JobRecord, JobStore, PhaseCheckpoint, StatusCounts};
use crate::Result;

/// Status report of one job
#[derive(Debug, Clone)]
pub struct JobStatistics {
    pub job: JobRecord,

    /// Checkpoints in phase order
    pub checkpoints: Vec<PhaseCheckpoint>,

    /// URL record counts by status
    pub counts: StatusCounts,

    /// Distinct hosts among the job's URL records
    pub unique_hosts: u64,
}

impl JobStatistics {
    /// Share of URL records that reached a terminal status, in percent
    pub fn progress_percent(&self) -> f64 {
        let total = self.counts.total();
        if total == 0 {
            0.0
        } else {
            self.counts.terminal() as f64 / total as f64 * 100.0
        }
    }
}

/// Loads statistics for a job
///
/// # Arguments
///
/// * `store` - The job store to query
/// * `job_id` - The job to report on
///
/// # Returns
///
/// * `Ok(JobStatistics)` - Successfully loaded statistics
/// * `Err(GleanerError)` - Unknown job or store failure
pub fn load_statistics(store: &JobStore, job_id: JobId) -> Result<JobStatistics> {
    let job = store.load_job(job_id)?;
    let checkpoints = store.load_checkpoints(job_id)?;
    let counts = store.count_by_status(job_id)?;

    let mut hosts: Vec<String> = store
        .url_records(job_id, None)?
        .into_iter()
        .map(|r| r.host)
        .collect();
    hosts.sort();
    hosts.dedup();

    Ok(JobStatistics {
        job,
        checkpoints,
        counts,
        unique_hosts: hosts.len() as u64,
    })
}

/// Prints a job status report to stdout
pub fn print_statistics(stats: &JobStatistics) {
    let job = &stats.job;
    println!("=== Job {} ===\n", job.id);

    println!("Overview:");
    println!("  Query: {}", job.query);
    println!("  Status: {}", job.status);
    println!(
        "  Current phase: {}",
        job.current_phase
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("  Created: {}", job.created_at);
    println!("  Updated: {}", job.updated_at);
    println!("  Directory: {}", job.job_dir.display());
    if let Some(hash) = &job.config.config_hash {
        println!("  Config hash: {}", hash);
    }
    println!();

    println!("Phases:");
    if stats.checkpoints.is_empty() {
        println!("  (none started)");
    }
    for checkpoint in &stats.checkpoints {
        let marker = match checkpoint.status {
            PhaseStatus::Done => "done",
            PhaseStatus::Skipped => "skipped",
            PhaseStatus::Failed => "FAILED",
            PhaseStatus::Pending => "in progress",
        };
        if checkpoint.artifacts.is_empty() {
            println!("  {:<16} {}", checkpoint.phase.to_string(), marker);
        } else {
            println!(
                "  {:<16} {} [{}]",
                checkpoint.phase.to_string(),
                marker,
                checkpoint.artifacts.join(", ")
            );
        }
    }
    println!();

    let total = stats.counts.total();
    println!("URLs ({} across {} hosts):", total, stats.unique_hosts);
    for status in UrlStatus::all() {
        let count = stats.counts.get(status);
        let percentage = if total > 0 {
            count as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        println!("  {:<18} {} ({:.1}%)", status.to_string(), count, percentage);
    }
    println!();

    println!(
        "Progress: {:.1}% ({} / {} URLs settled)",
        stats.progress_percent(),
        stats.counts.terminal(),
        total
    );
}

/// One line per job for `--list-jobs`
pub fn format_job_line(job: &JobRecord) -> String {
    let phase = job
        .current_phase
        .map(|p| p.to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}  {:<9}  {:<16}  {}  {}",
        job.id, job.status.to_string(), phase, job.created_at, job.query
    )
}

/// Prints a job listing to stdout
pub fn print_job_list(jobs: &[JobRecord]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }
    for job in jobs {
        println!("{}", format_job_line(job));
    }
}
