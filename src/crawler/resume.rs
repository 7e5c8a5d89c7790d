//! Rebuilding the frontier of a job from the store
//!
//! Workers keep nothing durable, so every crawl run starts here:
//!
//! 1. Pending URL records are queued again at their recorded depth
//! 2. A job with no records at all is seeded at depth 0 from its reviewed
//!    (or collected) URL artifact
//! 3. If nothing is pending but crawling is not done, a sample of fetched
//!    pages is re-parsed from their raw payloads and unknown links recorded
//!
//! Terminal records are never queued, so a finished crawl resumes with zero
//! fetches.

use crate::config::JobConfig;
use crate::crawler::frontier::{Frontier, FrontierEntry};
use crate::crawler::parser::extract_links;
use crate::crawler::pool::{CrawlContext, CrawlPool, CrawlReport};
use crate::state::{Phase, PhaseStatus};
use crate::storage::{JobId, JobStore, StorageError, UrlSource};
use crate::workflow::artifacts;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Frontier rebuilt for one crawl run
#[derive(Debug)]
pub struct ResumePlan {
    pub frontier: Frontier,
    /// Pending records re-queued
    pub pending: usize,
    /// Records created from re-parsed fetched pages
    pub resampled: usize,
    /// Depth-0 records created from the seed artifact
    pub seeded: usize,
}

pub struct ResumeController {
    store: Arc<JobStore>,
    job_id: JobId,
    max_depth: u32,
    resample_limit: usize,
}

impl ResumeController {
    pub fn new(store: Arc<JobStore>, job_id: JobId, config: &JobConfig) -> Self {
        Self {
            store,
            job_id,
            max_depth: config.max_depth,
            resample_limit: config.resample_limit as usize,
        }
    }

    /// Builds the frontier for the next crawl run
    pub fn prepare(&self) -> Result<ResumePlan> {
        let frontier = Frontier::new();
        let mut plan = ResumePlan {
            frontier,
            pending: 0,
            resampled: 0,
            seeded: 0,
        };

        if self.crawling_done()? {
            debug!(job_id = %self.job_id, "Crawling already done, nothing to resume");
            return Ok(plan);
        }

        if self.store.count_by_status(self.job_id)?.total() == 0 {
            plan.seeded = self.seed_from_artifacts()?;
        }

        let pending = self.store.pending_urls(self.job_id)?;
        plan.pending = pending.len();
        for record in &pending {
            plan.frontier.push(FrontierEntry::from(record));
        }

        if plan.pending == 0 {
            plan.resampled = self.resample(&plan.frontier)?;
        }

        info!(
            job_id = %self.job_id,
            pending = plan.pending,
            seeded = plan.seeded,
            resampled = plan.resampled,
            "Prepared crawl frontier"
        );
        Ok(plan)
    }

    /// Depth-0 URLs of the job, which define its crawl scope
    pub fn seeds(&self) -> Result<Vec<Url>> {
        let records = self.store.url_records(self.job_id, None)?;
        Ok(records
            .iter()
            .filter(|r| r.depth == 0)
            .filter_map(|r| Url::parse(&r.canonical_url).ok())
            .collect())
    }

    fn crawling_done(&self) -> Result<bool> {
        Ok(self
            .store
            .load_checkpoints(self.job_id)?
            .iter()
            .any(|c| c.phase == Phase::Crawling && c.status == PhaseStatus::Done))
    }

    fn seed_from_artifacts(&self) -> Result<usize> {
        let job_dir = self.store.job_dir(self.job_id)?;
        let mut created = 0;
        for url in artifacts::seed_urls(&job_dir)? {
            match self.store.record_url(self.job_id, &url, 0, UrlSource::Seed) {
                Ok((_, true)) => created += 1,
                Ok((_, false)) => {}
                Err(StorageError::Url(e)) => warn!(url = %url, error = %e, "Skipping invalid seed URL"),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(created)
    }

    fn resample(&self, frontier: &Frontier) -> Result<usize> {
        let job_dir = self.store.job_dir(self.job_id)?;
        let sample = self.store.sample_fetched(self.job_id, self.resample_limit)?;
        let mut created = 0;

        for record in sample.iter().filter(|r| r.depth < self.max_depth) {
            let Some(raw_path) = record.raw_path.as_deref() else {
                continue;
            };
            let bytes = match std::fs::read(job_dir.join(raw_path)) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(url = %record.canonical_url, "Raw payload cleaned, skipping resample");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let Ok(base) = Url::parse(&record.canonical_url) else {
                continue;
            };

            let html = String::from_utf8_lossy(&bytes);
            for link in extract_links(&html, &base) {
                match self
                    .store
                    .record_url(self.job_id, &link, record.depth + 1, UrlSource::Resample)
                {
                    Ok((new_record, true)) => {
                        frontier.push(FrontierEntry::from(&new_record));
                        created += 1;
                    }
                    Ok((_, false)) => {}
                    Err(StorageError::Url(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(created)
    }
}

/// Runs (or resumes) the crawl of a job to completion or cancellation
pub async fn crawl_job(ctx: CrawlContext) -> Result<CrawlReport> {
    let controller = ResumeController::new(Arc::clone(&ctx.store), ctx.job_id, &ctx.config);
    let plan = controller.prepare()?;

    if plan.frontier.is_empty() {
        return Ok(CrawlReport {
            counts: ctx.store.count_by_status(ctx.job_id)?,
            cancelled: ctx.cancel.is_cancelled(),
            ..CrawlReport::default()
        });
    }

    let seeds = controller.seeds()?;
    CrawlPool::new(ctx, plan.frontier, &seeds)?.run().await
}
