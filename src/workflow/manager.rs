//! Phase workflow manager
//!
//! Drives a job through its phases in order, persisting a checkpoint for
//! each one. A resumed job starts at the first phase that is neither done
//! nor skipped; skip decisions for optional phases are written once and
//! never re-decided.

use crate::config::JobConfig;
use crate::crawler::{
    crawl_job, ContentExtractor, CrawlContext, CrawlReport, Fetcher, PlainTextExtractor,
};
use crate::state::{JobStatus, Phase, PhaseStatus, UrlStatus};
use crate::storage::{JobId, JobRecord, JobStore, PhaseCheckpoint, MANIFEST_FILE};
use crate::workflow::artifacts::{
    self, ANALYSIS_FILE, BUNDLE_FILE, COLLECTED_URLS_FILE, QUERIES_FILE, REVIEWED_URLS_FILE,
};
use crate::workflow::collaborators::{
    dedup_preserving_order, AcceptAllReviewer, Analyzer, BundleInput, Bundler, ConcatBundler,
    QueryExpander, UrlCollector, UrlReviewer,
};
use crate::workflow::observer::{LoggingObserver, WorkflowObserver};
use crate::{GleanerError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a run of the workflow ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: JobId,
    /// `active` when interrupted
    pub status: JobStatus,
    /// Crawl report of this run, if the crawling phase ran
    pub crawl: Option<CrawlReport>,
}

impl JobOutcome {
    pub fn is_interrupted(&self) -> bool {
        self.status == JobStatus::Active
    }
}

enum PhaseResult {
    Done(Vec<String>),
    Skipped,
    Interrupted,
}

/// Runs research jobs phase by phase
pub struct PhaseWorkflowManager {
    store: Arc<JobStore>,
    collector: Arc<dyn UrlCollector>,
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn ContentExtractor>,
    expander: Option<Arc<dyn QueryExpander>>,
    reviewer: Arc<dyn UrlReviewer>,
    bundler: Arc<dyn Bundler>,
    analyzer: Option<Arc<dyn Analyzer>>,
    observer: Arc<dyn WorkflowObserver>,
    cancel: CancellationToken,
}

impl PhaseWorkflowManager {
    /// Creates a manager with default extractor, reviewer, bundler and a
    /// logging observer; no query expander and no analyzer
    pub fn new(
        store: Arc<JobStore>,
        collector: Arc<dyn UrlCollector>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            store,
            collector,
            fetcher,
            extractor: Arc::new(PlainTextExtractor),
            expander: None,
            reviewer: Arc::new(AcceptAllReviewer),
            bundler: Arc::new(ConcatBundler),
            analyzer: None,
            observer: Arc::new(LoggingObserver),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ContentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_expander(mut self, expander: Arc<dyn QueryExpander>) -> Self {
        self.expander = Some(expander);
        self
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn UrlReviewer>) -> Self {
        self.reviewer = reviewer;
        self
    }

    pub fn with_bundler(mut self, bundler: Arc<dyn Bundler>) -> Self {
        self.bundler = bundler;
        self
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn WorkflowObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Token that interrupts the workflow when cancelled
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Creates a job for `query` and runs it
    pub async fn start(&self, query: &str, config: JobConfig) -> Result<JobOutcome> {
        let job_id = self.store.create_job(query, &config)?;
        info!(job_id = %job_id, query, "Started job");
        self.drive(job_id).await
    }

    /// Continues a job from its first unsettled phase
    ///
    /// A completed job is returned as is; a failed job becomes active again
    /// and retries its failed phase.
    pub async fn resume(&self, job_id: JobId) -> Result<JobOutcome> {
        let job = self.store.load_job(job_id)?;
        match job.status {
            JobStatus::Completed => {
                info!(job_id = %job_id, "Job already completed");
                return Ok(JobOutcome {
                    job_id,
                    status: JobStatus::Completed,
                    crawl: None,
                });
            }
            JobStatus::Failed => {
                info!(job_id = %job_id, "Reactivating failed job");
                self.store.set_job_status(job_id, JobStatus::Active)?;
            }
            JobStatus::Active => {}
        }
        self.drive(job_id).await
    }

    async fn drive(&self, job_id: JobId) -> Result<JobOutcome> {
        let job = self.store.load_job(job_id)?;
        let settled: HashMap<Phase, PhaseStatus> = self
            .store
            .load_checkpoints(job_id)?
            .into_iter()
            .map(|c| (c.phase, c.status))
            .collect();

        let mut crawl_report = None;
        for phase in Phase::ALL {
            if settled.get(&phase).map_or(false, PhaseStatus::is_settled) {
                debug!(job_id = %job_id, phase = %phase, "Phase already settled");
                continue;
            }
            if self.cancel.is_cancelled() {
                return Ok(self.interrupted(job_id, crawl_report));
            }

            match self.step(&job, phase, &mut crawl_report).await {
                Ok(true) => {}
                Ok(false) => return Ok(self.interrupted(job_id, crawl_report)),
                Err(e) if e.is_cancelled() => return Ok(self.interrupted(job_id, crawl_report)),
                Err(e) => {
                    self.fail(job_id, phase, &e);
                    return Err(e);
                }
            }
        }

        self.store.set_job_status(job_id, JobStatus::Completed)?;
        self.observer.on_job_end(job_id, JobStatus::Completed);
        Ok(JobOutcome {
            job_id,
            status: JobStatus::Completed,
            crawl: crawl_report,
        })
    }

    /// Runs or skips one phase and checkpoints it; `false` when interrupted
    async fn step(
        &self,
        job: &JobRecord,
        phase: Phase,
        crawl_report: &mut Option<CrawlReport>,
    ) -> Result<bool> {
        let result = match self.skip_reason(&job.config, phase) {
            Some(reason) => {
                debug!(job_id = %job.id, phase = %phase, reason, "Skipping phase");
                PhaseResult::Skipped
            }
            None => {
                self.checkpoint(job.id, phase, PhaseStatus::Pending, &[])?;
                self.run_phase(job, phase, crawl_report).await?
            }
        };

        match result {
            PhaseResult::Done(artifacts) => {
                self.checkpoint(job.id, phase, PhaseStatus::Done, &artifacts)?;
            }
            PhaseResult::Skipped => {
                self.checkpoint(job.id, phase, PhaseStatus::Skipped, &[])?;
            }
            PhaseResult::Interrupted => return Ok(false),
        }
        Ok(true)
    }

    /// Why an optional phase does not run for this job, if it does not
    fn skip_reason(&self, config: &JobConfig, phase: Phase) -> Option<&'static str> {
        match phase {
            Phase::QueryExpansion if !config.expand_query => Some("disabled in job config"),
            Phase::QueryExpansion if self.expander.is_none() => Some("no query expander"),
            Phase::UrlReview if !config.review_urls => Some("disabled in job config"),
            Phase::Analysis if !config.analyze => Some("disabled in job config"),
            Phase::Analysis if self.analyzer.is_none() => Some("no analyzer"),
            _ => None,
        }
    }

    async fn run_phase(
        &self,
        job: &JobRecord,
        phase: Phase,
        crawl_report: &mut Option<CrawlReport>,
    ) -> Result<PhaseResult> {
        let dir = job.job_dir.as_path();
        match phase {
            Phase::Initialization => Ok(PhaseResult::Done(vec![MANIFEST_FILE.to_string()])),

            Phase::QueryExpansion => {
                let Some(expander) = &self.expander else {
                    return Ok(PhaseResult::Skipped);
                };
                let expanded = self.call(phase, expander.expand(&job.query)).await?;
                let mut queries = vec![job.query.clone()];
                queries.extend(expanded);
                let queries = dedup_preserving_order(queries);
                Ok(PhaseResult::Done(vec![artifacts::write_json(dir, QUERIES_FILE, &queries)?]))
            }

            Phase::UrlCollection => {
                let queries = artifacts::read_json::<Vec<String>>(dir, QUERIES_FILE)?
                    .unwrap_or_else(|| vec![job.query.clone()]);
                let urls = self.call(phase, self.collector.collect(&queries)).await?;
                let urls = dedup_preserving_order(urls);
                if urls.is_empty() {
                    return Err(collaborator_error(phase, anyhow::anyhow!("no URLs collected")));
                }
                Ok(PhaseResult::Done(vec![artifacts::write_json(
                    dir,
                    COLLECTED_URLS_FILE,
                    &urls,
                )?]))
            }

            Phase::UrlReview => {
                let collected = artifacts::read_json::<Vec<String>>(dir, COLLECTED_URLS_FILE)?
                    .unwrap_or_default();
                let reviewed = self
                    .call(phase, self.reviewer.review(&job.query, &collected))
                    .await?;
                Ok(PhaseResult::Done(vec![artifacts::write_json(
                    dir,
                    REVIEWED_URLS_FILE,
                    &reviewed,
                )?]))
            }

            Phase::Crawling => {
                let ctx = CrawlContext {
                    store: Arc::clone(&self.store),
                    job_id: job.id,
                    config: job.config.clone(),
                    fetcher: Arc::clone(&self.fetcher),
                    extractor: Arc::clone(&self.extractor),
                    cancel: self.cancel.clone(),
                };
                let report = crawl_job(ctx).await?;
                self.observer.on_crawl_report(job.id, &report);
                let cancelled = report.cancelled;
                *crawl_report = Some(report);
                if cancelled {
                    Ok(PhaseResult::Interrupted)
                } else {
                    Ok(PhaseResult::Done(Vec::new()))
                }
            }

            Phase::Bundling => {
                let records = self.store.url_records(job.id, Some(UrlStatus::Fetched))?;
                let input = BundleInput {
                    query: &job.query,
                    job_dir: dir,
                    records: &records,
                };
                let bundle = self.call(phase, self.bundler.bundle(&input)).await?;
                Ok(PhaseResult::Done(vec![artifacts::write_text(dir, BUNDLE_FILE, &bundle)?]))
            }

            Phase::Analysis => {
                let Some(analyzer) = &self.analyzer else {
                    return Ok(PhaseResult::Skipped);
                };
                let bundle = std::fs::read_to_string(dir.join(BUNDLE_FILE))?;
                let analysis = self.call(phase, analyzer.analyze(&job.query, &bundle)).await?;
                Ok(PhaseResult::Done(vec![artifacts::write_text(dir, ANALYSIS_FILE, &analysis)?]))
            }
        }
    }

    /// Awaits a collaborator, giving up with `Cancelled` once the job is cancelled
    async fn call<T, F>(&self, phase: Phase, call: F) -> Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        tokio::select! {
            biased;
            result = call => result.map_err(|e| collaborator_error(phase, e)),
            _ = self.cancel.cancelled() => Err(GleanerError::Cancelled),
        }
    }

    fn checkpoint(
        &self,
        job_id: JobId,
        phase: Phase,
        status: PhaseStatus,
        artifacts: &[String],
    ) -> Result<PhaseCheckpoint> {
        let checkpoint = self.store.checkpoint_phase(job_id, phase, status, artifacts)?;
        self.observer.on_checkpoint(&checkpoint);
        Ok(checkpoint)
    }

    /// Marks the phase and the job failed; store errors here are only logged
    fn fail(&self, job_id: JobId, phase: Phase, cause: &GleanerError) {
        error!(job_id = %job_id, phase = %phase, error = %cause, "Phase failed");
        if let Err(e) = self.checkpoint(job_id, phase, PhaseStatus::Failed, &[]) {
            warn!(job_id = %job_id, phase = %phase, error = %e, "Could not record failed checkpoint");
        }
        if let Err(e) = self.store.set_job_status(job_id, JobStatus::Failed) {
            warn!(job_id = %job_id, error = %e, "Could not mark job failed");
        }
        self.observer.on_job_end(job_id, JobStatus::Failed);
    }

    fn interrupted(&self, job_id: JobId, crawl: Option<CrawlReport>) -> JobOutcome {
        info!(job_id = %job_id, "Job interrupted, resume with --resume {}", job_id);
        self.observer.on_job_end(job_id, JobStatus::Active);
        JobOutcome {
            job_id,
            status: JobStatus::Active,
            crawl,
        }
    }
}

fn collaborator_error(phase: Phase, e: anyhow::Error) -> GleanerError {
    GleanerError::Collaborator {
        phase,
        message: format!("{:#}", e),
    }
}
