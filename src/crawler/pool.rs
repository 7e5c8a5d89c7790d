//! Crawl worker pool
//!
//! A bounded set of workers drains the frontier. For each entry a worker:
//!
//! 1. Validates the URL (scheme, SSRF, scope, host page cap)
//! 2. Checks robots.txt
//! 3. Claims the host from the rate limiter and fetches
//! 4. Re-checks the final URL after redirects, then stores raw and extracted
//!    content and deduplicates
//! 5. Records outbound links at `depth + 1` before marking the URL terminal
//!
//! Transient failures are retried with backoff up to `max_retries`. A failed
//! URL never stops the crawl; a store failure does.

use crate::config::JobConfig;
use crate::crawler::backoff::ExponentialBackoff;
use crate::crawler::fetcher::{classify_response, FetchError, FetchResponse, Fetcher};
use crate::crawler::frontier::{Frontier, FrontierEntry, Selection};
use crate::crawler::parser::{extract_links, ContentExtractor};
use crate::crawler::rate_limiter::{HostRateLimiter, PolitenessPolicy};
use crate::dedup::{fingerprint, normalize, Deduplicator};
use crate::robots::RobotsCache;
use crate::state::UrlStatus;
use crate::storage::{
    JobId, JobStore, StatusCounts, StorageError, UrlSource, UrlUpdate, CONTENT_DIR, RAW_DIR,
};
use crate::url::{FilterReason, ScopeRules, UrlValidator};
use crate::{GleanerError, Result};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

/// Upper bound on a single idle wait before a worker re-checks the frontier
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Everything a crawl of one job needs
#[derive(Clone)]
pub struct CrawlContext {
    pub store: Arc<JobStore>,
    pub job_id: JobId,
    /// Config snapshot of the job
    pub config: JobConfig,
    pub fetcher: Arc<dyn Fetcher>,
    pub extractor: Arc<dyn ContentExtractor>,
    pub cancel: CancellationToken,
}

/// Summary of one crawl run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Page requests sent in this run (robots.txt excluded)
    pub requests: u64,
    pub fetched: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub filtered: u64,
    /// Job-wide record counts after the run
    pub counts: StatusCounts,
    pub cancelled: bool,
}

#[derive(Default)]
struct RunStats {
    requests: AtomicU64,
    fetched: AtomicU64,
    duplicates: AtomicU64,
    errors: AtomicU64,
    filtered: AtomicU64,
}

impl RunStats {
    fn count(&self, status: UrlStatus) {
        let counter = match status {
            UrlStatus::Fetched => &self.fetched,
            UrlStatus::SkippedDuplicate => &self.duplicates,
            UrlStatus::Error => &self.errors,
            UrlStatus::SkippedFiltered => &self.filtered,
            UrlStatus::Pending => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct Shared {
    ctx: CrawlContext,
    frontier: Arc<Frontier>,
    limiter: Arc<HostRateLimiter>,
    robots: RobotsCache,
    validator: UrlValidator,
    scope: ScopeRules,
    dedup: Deduplicator,
    backoff: ExponentialBackoff,
    job_dir: PathBuf,
    stop: CancellationToken,
    stats: RunStats,
}

/// Bounded set of crawl workers for one job
pub struct CrawlPool {
    shared: Arc<Shared>,
}

impl CrawlPool {
    /// Builds a pool over `frontier`
    ///
    /// `seeds` are the job's depth-0 URLs; scope rules are derived from them.
    /// Host states persisted by earlier runs are restored into the limiter.
    pub fn new(ctx: CrawlContext, frontier: Frontier, seeds: &[Url]) -> Result<Self> {
        let job_dir = ctx.store.job_dir(ctx.job_id)?;
        let limiter = HostRateLimiter::new(PolitenessPolicy::from(&ctx.config))
            .with_store(Arc::clone(&ctx.store), ctx.job_id);
        limiter.restore(&ctx.store.load_host_states(ctx.job_id)?);

        let shared = Shared {
            frontier: Arc::new(frontier),
            limiter: Arc::new(limiter),
            robots: RobotsCache::new(ctx.config.robots_ttl(), ctx.config.fetch_timeout()),
            validator: UrlValidator::new(ctx.config.allow_private_hosts),
            scope: ScopeRules::new(ctx.config.scope, seeds),
            dedup: Deduplicator::new(Arc::clone(&ctx.store), ctx.config.dedup),
            backoff: ExponentialBackoff::default(),
            job_dir,
            stop: ctx.cancel.child_token(),
            stats: RunStats::default(),
            ctx,
        };
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    pub fn frontier(&self) -> &Frontier {
        &self.shared.frontier
    }

    /// Runs workers until the frontier drains or the job is cancelled
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlReport)` - Drained or cancelled; `cancelled` tells which
    /// * `Err(GleanerError)` - A store failure stopped the crawl
    pub async fn run(self) -> Result<CrawlReport> {
        let shared = self.shared;
        let workers = shared.ctx.config.concurrency.max(1);
        info!(
            job_id = %shared.ctx.job_id,
            workers,
            queued = shared.frontier.len(),
            "Starting crawl"
        );

        let mut set = JoinSet::new();
        for worker_id in 0..workers {
            let shared = Arc::clone(&shared);
            set.spawn(async move { worker_loop(shared, worker_id).await });
        }

        let mut failure: Option<GleanerError> = None;
        while let Some(joined) = set.join_next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(e) => Err(GleanerError::Worker(e.to_string())),
            };
            if let Err(e) = outcome {
                error!(job_id = %shared.ctx.job_id, error = %e, "Crawl worker failed");
                shared.stop.cancel();
                failure.get_or_insert(e);
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        let report = CrawlReport {
            requests: shared.stats.requests.load(Ordering::Relaxed),
            fetched: shared.stats.fetched.load(Ordering::Relaxed),
            duplicates: shared.stats.duplicates.load(Ordering::Relaxed),
            errors: shared.stats.errors.load(Ordering::Relaxed),
            filtered: shared.stats.filtered.load(Ordering::Relaxed),
            counts: shared.ctx.store.count_by_status(shared.ctx.job_id)?,
            cancelled: shared.ctx.cancel.is_cancelled(),
        };
        info!(
            job_id = %shared.ctx.job_id,
            requests = report.requests,
            fetched = report.fetched,
            duplicates = report.duplicates,
            errors = report.errors,
            filtered = report.filtered,
            pending = report.counts.pending,
            cancelled = report.cancelled,
            "Crawl finished"
        );
        Ok(report)
    }
}

async fn worker_loop(shared: Arc<Shared>, worker_id: u32) -> Result<()> {
    debug!(worker_id, "Worker started");
    loop {
        if shared.stop.is_cancelled() {
            break;
        }

        match shared.frontier.next(&shared.limiter) {
            Selection::Ready(entry) => {
                let host = entry.host.clone();
                let outcome = process_with_grace(&shared, entry).await;
                shared.frontier.finish(&host);
                outcome?;
            }
            Selection::Wait(delay) => {
                tokio::select! {
                    _ = shared.stop.cancelled() => break,
                    _ = sleep(delay) => {}
                    _ = shared.frontier.changed() => {}
                }
            }
            Selection::Idle => {
                tokio::select! {
                    _ = shared.stop.cancelled() => break,
                    _ = sleep(IDLE_POLL) => {}
                    _ = shared.frontier.changed() => {}
                }
            }
            Selection::Drained => break,
        }
    }
    debug!(worker_id, "Worker stopped");
    Ok(())
}

/// Processes one entry; once cancelled, in-flight work gets the grace
/// period and is then dropped, leaving the record pending
async fn process_with_grace(shared: &Shared, entry: FrontierEntry) -> Result<()> {
    let url = entry.canonical_url.clone();
    let work = process_entry(shared, entry);
    tokio::pin!(work);

    tokio::select! {
        result = &mut work => return result,
        _ = shared.stop.cancelled() => {}
    }

    match timeout(shared.ctx.config.cancel_grace(), &mut work).await {
        Ok(result) => result,
        Err(_) => {
            warn!(url = %url, "In-flight fetch abandoned after grace period");
            Ok(())
        }
    }
}

async fn process_entry(shared: &Shared, entry: FrontierEntry) -> Result<()> {
    let ctx = &shared.ctx;

    let url = match Url::parse(&entry.canonical_url) {
        Ok(url) => url,
        Err(e) => {
            return finish(shared, &entry, UrlUpdate::filtered(format!("invalid URL: {}", e)));
        }
    };

    if let Err(reason) = shared.validator.validate(&url) {
        return finish(shared, &entry, UrlUpdate::filtered(reason.to_string()));
    }
    if !shared.scope.allows(&url) {
        return finish(shared, &entry, UrlUpdate::filtered(FilterReason::OutOfScope.to_string()));
    }
    if let Some(cap) = ctx.config.max_pages_per_host {
        if ctx.store.fetched_for_host(ctx.job_id, &entry.host)? >= cap {
            let reason = FilterReason::HostCapReached(cap);
            return finish(shared, &entry, UrlUpdate::filtered(reason.to_string()));
        }
    }

    let rules = shared.robots.rules_for(ctx.fetcher.as_ref(), &url).await;
    if !rules.is_allowed(url.as_str(), &ctx.config.user_agent) {
        let reason = FilterReason::RobotsDisallowed;
        return finish(shared, &entry, UrlUpdate::filtered(reason.to_string()));
    }
    if let Some(delay) = rules.crawl_delay(&ctx.config.user_agent) {
        shared.limiter.set_min_delay(&entry.host, delay);
    }

    loop {
        let Some(claim) = shared.limiter.acquire(&entry.host, &shared.stop).await else {
            // cancelled before the request went out; the record stays pending
            return Ok(());
        };
        let attempts = ctx.store.increment_attempts(ctx.job_id, &entry.canonical_url)?;
        shared.stats.requests.fetch_add(1, Ordering::Relaxed);
        debug!(url = %entry.canonical_url, host = %entry.host, attempts, "Fetching");

        let result = ctx
            .fetcher
            .fetch(&url, ctx.config.fetch_timeout())
            .await
            .and_then(|response| classify_response(&response).map(|()| response));
        drop(claim);

        match result {
            Ok(response) => {
                if let Some(reason) = redirect_rejection(shared, &url, &response.final_url) {
                    return finish(shared, &entry, UrlUpdate::filtered(reason));
                }
                return handle_page(shared, &entry, &url, response).await;
            }
            Err(e) if e.is_blocked() => {
                return finish(shared, &entry, UrlUpdate::filtered(e.message));
            }
            Err(e) if e.is_transient() && attempts <= ctx.config.max_retries => {
                let delay = shared.backoff.delay(attempts.saturating_sub(1));
                warn!(
                    url = %entry.canonical_url,
                    host = %entry.host,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient fetch failure, retrying"
                );
                tokio::select! {
                    _ = shared.stop.cancelled() => return Ok(()),
                    _ = sleep(delay) => {}
                }
            }
            Err(e) => return finish(shared, &entry, fetch_failure(&e)),
        }
    }
}

/// Reason to discard a response whose redirect chain ended on a URL the
/// crawl would not have fetched directly
fn redirect_rejection(shared: &Shared, requested: &Url, final_url: &str) -> Option<String> {
    if final_url == requested.as_str() {
        return None;
    }
    let landed = match Url::parse(final_url) {
        Ok(landed) => landed,
        Err(e) => return Some(format!("invalid redirect target '{}': {}", final_url, e)),
    };
    let reason = match shared.validator.validate(&landed) {
        Err(reason) => reason,
        Ok(()) if !shared.scope.allows(&landed) => FilterReason::OutOfScope,
        Ok(()) => return None,
    };
    Some(format!("redirected to {}: {}", landed, reason))
}

fn fetch_failure(e: &FetchError) -> UrlUpdate {
    UrlUpdate::error(e.message.clone(), e.status)
}

async fn handle_page(
    shared: &Shared,
    entry: &FrontierEntry,
    url: &Url,
    response: FetchResponse,
) -> Result<()> {
    let ctx = &shared.ctx;
    let base = Url::parse(&response.final_url).unwrap_or_else(|_| url.clone());
    let html = response.text();

    let content = ctx.extractor.extract(&html, &base);
    let hash = fingerprint(&normalize(&content.text));

    let stem = file_stem(&entry.canonical_url);
    let raw_path = format!("{}/{}.html", RAW_DIR, stem);
    tokio::fs::write(shared.job_dir.join(&raw_path), &response.body).await?;

    let outcome = shared
        .dedup
        .check_and_register(ctx.job_id, &hash, &entry.canonical_url)?;
    if let Some(original) = outcome.original_url.filter(|_| outcome.is_duplicate) {
        let update = UrlUpdate::duplicate(hash, original, raw_path, response.status);
        return finish(shared, entry, update);
    }

    let target_path = format!("{}/{}.md", CONTENT_DIR, stem);
    tokio::fs::write(
        shared.job_dir.join(&target_path),
        content.to_markdown(&entry.canonical_url),
    )
    .await?;

    if entry.depth < ctx.config.max_depth {
        let discovered = record_links(shared, entry, &extract_links(&html, &base))?;
        debug!(url = %entry.canonical_url, discovered, "Recorded outbound links");
    }

    finish(
        shared,
        entry,
        UrlUpdate::fetched(hash, target_path, raw_path, response.status),
    )
}

/// Records links one level below `entry`; new records join the frontier
fn record_links(shared: &Shared, entry: &FrontierEntry, links: &[String]) -> Result<usize> {
    let ctx = &shared.ctx;
    let mut created = 0;
    for link in links {
        match ctx
            .store
            .record_url(ctx.job_id, link, entry.depth + 1, UrlSource::Link)
        {
            Ok((record, true)) => {
                shared.frontier.push(FrontierEntry::from(&record));
                created += 1;
            }
            Ok((_, false)) => {}
            Err(StorageError::Url(e)) => debug!(link = %link, error = %e, "Skipping unusable link"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(created)
}

/// Applies a terminal update; a record someone else already settled is left alone
fn finish(shared: &Shared, entry: &FrontierEntry, update: UrlUpdate) -> Result<()> {
    let ctx = &shared.ctx;
    match ctx
        .store
        .update_url_status(ctx.job_id, &entry.canonical_url, &update)
    {
        Ok(record) => {
            shared.stats.count(record.status);
            match record.status {
                UrlStatus::Error => warn!(
                    url = %record.canonical_url,
                    host = %record.host,
                    phase = "CRAWLING",
                    status = %record.status,
                    error = record.error_message.as_deref().unwrap_or_default(),
                    "URL failed"
                ),
                _ => info!(
                    url = %record.canonical_url,
                    host = %record.host,
                    phase = "CRAWLING",
                    status = %record.status,
                    reason = record.error_message.as_deref().unwrap_or_default(),
                    "URL settled"
                ),
            }
            Ok(())
        }
        Err(StorageError::AlreadyTerminal { url, status }) => {
            debug!(url = %url, status = %status, "URL already terminal");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Stable file name for a URL's stored payloads
fn file_stem(canonical_url: &str) -> String {
    let digest = Sha256::digest(canonical_url.as_bytes());
    hex::encode(&digest[..16])
}
