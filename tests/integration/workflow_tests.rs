//! Integration tests for the phase workflow
//!
//! Jobs run end to end against an in-memory fetcher with stub collaborators.

use async_trait::async_trait;
use gleaner::crawler::{FetchError, FetchResponse, Fetcher};
use gleaner::storage::{JobId, MANIFEST_FILE};
use gleaner::workflow::artifacts::{
    ANALYSIS_FILE, BUNDLE_FILE, COLLECTED_URLS_FILE, QUERIES_FILE, REVIEWED_URLS_FILE,
};
use gleaner::workflow::{
    Analyzer, PhaseWorkflowManager, QueryExpander, StaticUrlCollector, UrlCollector, UrlReviewer,
    WorkflowObserver,
};
use gleaner::{GleanerError, JobConfig, JobStatus, JobStore, Phase, PhaseStatus, UrlStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;

const HOME: &str = "https://docs.example/";
const GUIDE: &str = "https://docs.example/guide";
const FAQ: &str = "https://docs.example/faq";
const SPAM: &str = "https://spam.example/";

/// Serves a three-page site; optionally cancels a token after N requests
struct DocsSite {
    pages: HashMap<&'static str, String>,
    requests: AtomicUsize,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl DocsSite {
    fn new() -> Self {
        let mut pages = HashMap::new();
        pages.insert(
            HOME,
            format!(
                r#"<html><head><title>Docs</title></head><body><p>Welcome</p>
                <a href="{}">Guide</a><a href="{}">FAQ</a></body></html>"#,
                GUIDE, FAQ
            ),
        );
        pages.insert(
            GUIDE,
            "<html><head><title>Guide</title></head><body><p>How to crawl politely</p></body></html>"
                .to_string(),
        );
        pages.insert(
            FAQ,
            "<html><head><title>FAQ</title></head><body><p>Common questions</p></body></html>"
                .to_string(),
        );
        Self {
            pages,
            requests: AtomicUsize::new(0),
            cancel_after: None,
        }
    }

    fn cancel_after(mut self, requests: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((requests, token));
        self
    }
}

#[async_trait]
impl Fetcher for DocsSite {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchResponse, FetchError> {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/html".to_string());

        if url.path() == "/robots.txt" {
            return Ok(FetchResponse {
                status: 404,
                headers,
                body: Vec::new(),
                final_url: url.to_string(),
            });
        }

        let count = self.requests.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if count >= *after {
                token.cancel();
            }
        }

        let (status, body) = match self.pages.get(url.as_str()) {
            Some(html) => (200, html.clone()),
            None => (404, String::new()),
        };
        Ok(FetchResponse {
            status,
            headers,
            body: body.into_bytes(),
            final_url: url.to_string(),
        })
    }
}

struct EchoExpander;

#[async_trait]
impl QueryExpander for EchoExpander {
    async fn expand(&self, query: &str) -> anyhow::Result<Vec<String>> {
        Ok(vec![format!("{} tutorial", query), query.to_string()])
    }
}

/// Drops every URL on the spam host
struct SpamReviewer;

#[async_trait]
impl UrlReviewer for SpamReviewer {
    async fn review(&self, _query: &str, urls: &[String]) -> anyhow::Result<Vec<String>> {
        Ok(urls
            .iter()
            .filter(|u| !u.contains("spam.example"))
            .cloned()
            .collect())
    }
}

struct LengthAnalyzer;

#[async_trait]
impl Analyzer for LengthAnalyzer {
    async fn analyze(&self, query: &str, bundle: &str) -> anyhow::Result<String> {
        Ok(format!("{}: {} bytes of material", query, bundle.len()))
    }
}

/// Fails the first collection attempt
struct FlakyCollector {
    failed: AtomicBool,
}

#[async_trait]
impl UrlCollector for FlakyCollector {
    async fn collect(&self, _queries: &[String]) -> anyhow::Result<Vec<String>> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            anyhow::bail!("search backend unavailable");
        }
        Ok(vec![HOME.to_string()])
    }
}

#[derive(Default)]
struct RecordingObserver {
    checkpoints: Mutex<Vec<(Phase, PhaseStatus)>>,
    ends: Mutex<Vec<JobStatus>>,
}

impl RecordingObserver {
    fn phases_with(&self, status: PhaseStatus) -> Vec<Phase> {
        self.checkpoints
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| *s == status)
            .map(|(p, _)| *p)
            .collect()
    }
}

impl WorkflowObserver for RecordingObserver {
    fn on_checkpoint(&self, checkpoint: &gleaner::storage::PhaseCheckpoint) {
        self.checkpoints
            .lock()
            .unwrap()
            .push((checkpoint.phase, checkpoint.status));
    }

    fn on_job_end(&self, _job_id: JobId, status: JobStatus) {
        self.ends.lock().unwrap().push(status);
    }
}

fn fast_config() -> JobConfig {
    JobConfig {
        concurrency: 2,
        burst_threshold: 100,
        max_retries: 0,
        ..JobConfig::default()
    }
}

fn open_store() -> (TempDir, Arc<JobStore>) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(JobStore::open(dir.path()).unwrap());
    (dir, store)
}

fn checkpoint_status(store: &JobStore, id: JobId, phase: Phase) -> Option<PhaseStatus> {
    store
        .load_checkpoints(id)
        .unwrap()
        .into_iter()
        .find(|c| c.phase == phase)
        .map(|c| c.status)
}

#[tokio::test]
async fn test_full_run_produces_every_artifact() {
    let (_dir, store) = open_store();
    let observer = Arc::new(RecordingObserver::default());
    let manager = PhaseWorkflowManager::new(
        Arc::clone(&store),
        Arc::new(StaticUrlCollector::new([HOME, SPAM])),
        Arc::new(DocsSite::new()),
    )
    .with_expander(Arc::new(EchoExpander))
    .with_reviewer(Arc::new(SpamReviewer))
    .with_analyzer(Arc::new(LengthAnalyzer))
    .with_observer(observer.clone());

    let config = JobConfig {
        review_urls: true,
        analyze: true,
        ..fast_config()
    };
    let outcome = manager.start("web crawling", config).await.unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    let report = outcome.crawl.unwrap();
    assert_eq!(report.counts.fetched, 3);
    assert_eq!(report.counts.pending, 0);

    for phase in Phase::ALL {
        assert_eq!(
            checkpoint_status(&store, outcome.job_id, phase),
            Some(PhaseStatus::Done),
            "phase {}",
            phase
        );
    }

    let job = store.load_job(outcome.job_id).unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    for file in [
        MANIFEST_FILE,
        QUERIES_FILE,
        COLLECTED_URLS_FILE,
        REVIEWED_URLS_FILE,
        BUNDLE_FILE,
        ANALYSIS_FILE,
    ] {
        assert!(job.job_dir.join(file).is_file(), "missing {}", file);
    }

    let queries: Vec<String> =
        serde_json::from_str(&std::fs::read_to_string(job.job_dir.join(QUERIES_FILE)).unwrap())
            .unwrap();
    assert_eq!(queries, vec!["web crawling", "web crawling tutorial"]);

    let reviewed: Vec<String> = serde_json::from_str(
        &std::fs::read_to_string(job.job_dir.join(REVIEWED_URLS_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(reviewed, vec![HOME]);
    assert!(store.get_url(outcome.job_id, SPAM).unwrap().is_none());

    let bundle = std::fs::read_to_string(job.job_dir.join(BUNDLE_FILE)).unwrap();
    assert!(bundle.starts_with("# Research bundle: web crawling"));
    assert!(bundle.contains("How to crawl politely"));
    let analysis = std::fs::read_to_string(job.job_dir.join(ANALYSIS_FILE)).unwrap();
    assert!(analysis.starts_with("web crawling: "));

    assert_eq!(*observer.ends.lock().unwrap(), vec![JobStatus::Completed]);
}

#[tokio::test]
async fn test_optional_phases_skipped_without_collaborators() {
    let (_dir, store) = open_store();
    let manager = PhaseWorkflowManager::new(
        Arc::clone(&store),
        Arc::new(StaticUrlCollector::new([HOME])),
        Arc::new(DocsSite::new()),
    );

    let outcome = manager.start("crawlers", fast_config()).await.unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);

    let id = outcome.job_id;
    assert_eq!(checkpoint_status(&store, id, Phase::QueryExpansion), Some(PhaseStatus::Skipped));
    assert_eq!(checkpoint_status(&store, id, Phase::UrlReview), Some(PhaseStatus::Skipped));
    assert_eq!(checkpoint_status(&store, id, Phase::Analysis), Some(PhaseStatus::Skipped));
    assert_eq!(checkpoint_status(&store, id, Phase::Crawling), Some(PhaseStatus::Done));

    let job = store.load_job(id).unwrap();
    assert!(!job.job_dir.join(QUERIES_FILE).exists());
    assert!(!job.job_dir.join(ANALYSIS_FILE).exists());
}

#[tokio::test]
async fn test_failed_collaborator_then_resume() {
    let (_dir, store) = open_store();
    let observer = Arc::new(RecordingObserver::default());
    let manager = PhaseWorkflowManager::new(
        Arc::clone(&store),
        Arc::new(FlakyCollector {
            failed: AtomicBool::new(false),
        }),
        Arc::new(DocsSite::new()),
    )
    .with_observer(observer.clone());

    let err = manager.start("flaky", fast_config()).await.unwrap_err();
    assert!(matches!(
        err,
        GleanerError::Collaborator {
            phase: Phase::UrlCollection,
            ..
        }
    ));
    assert!(err.to_string().contains("search backend unavailable"));

    let jobs = store
        .list_jobs(&gleaner::storage::JobFilter::default())
        .unwrap();
    let id = jobs[0].id;
    assert_eq!(jobs[0].status, JobStatus::Failed);
    assert_eq!(checkpoint_status(&store, id, Phase::UrlCollection), Some(PhaseStatus::Failed));
    assert_eq!(checkpoint_status(&store, id, Phase::Initialization), Some(PhaseStatus::Done));

    observer.checkpoints.lock().unwrap().clear();
    let outcome = manager.resume(id).await.unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);

    // settled phases are not run again
    let rerun = observer.phases_with(PhaseStatus::Done);
    assert!(!rerun.contains(&Phase::Initialization));
    assert!(rerun.contains(&Phase::UrlCollection));
    assert_eq!(
        *observer.ends.lock().unwrap(),
        vec![JobStatus::Failed, JobStatus::Completed]
    );
}

#[tokio::test]
async fn test_interrupted_crawl_resumes_where_it_stopped() {
    let (_dir, store) = open_store();
    let config = JobConfig {
        concurrency: 1,
        ..fast_config()
    };

    let cancel = CancellationToken::new();
    let site = Arc::new(DocsSite::new().cancel_after(1, cancel.clone()));
    let manager = PhaseWorkflowManager::new(
        Arc::clone(&store),
        Arc::new(StaticUrlCollector::new([HOME])),
        site.clone(),
    )
    .with_cancel_token(cancel);

    let outcome = manager.start("docs", config).await.unwrap();
    assert!(outcome.is_interrupted());
    assert_eq!(outcome.status, JobStatus::Active);
    let id = outcome.job_id;
    assert_eq!(checkpoint_status(&store, id, Phase::Crawling), Some(PhaseStatus::Pending));
    assert_eq!(checkpoint_status(&store, id, Phase::Bundling), None);
    assert_eq!(store.load_job(id).unwrap().status, JobStatus::Active);

    let home = store.get_url(id, HOME).unwrap().unwrap();
    assert_eq!(home.status, UrlStatus::Fetched);
    assert!(store.count_by_status(id).unwrap().pending > 0);

    let site = Arc::new(DocsSite::new());
    let observer = Arc::new(RecordingObserver::default());
    let resumed = PhaseWorkflowManager::new(
        Arc::clone(&store),
        Arc::new(StaticUrlCollector::new(Vec::<String>::new())),
        site.clone(),
    )
    .with_observer(observer.clone())
    .resume(id)
    .await
    .unwrap();

    assert_eq!(resumed.status, JobStatus::Completed);
    assert_eq!(resumed.crawl.unwrap().counts.fetched, 3);
    // only the two pages left pending were requested
    assert_eq!(site.requests.load(Ordering::SeqCst), 2);
    assert!(!observer
        .phases_with(PhaseStatus::Done)
        .contains(&Phase::UrlCollection));
}

#[tokio::test]
async fn test_resume_completed_job_is_noop() {
    let (_dir, store) = open_store();
    let manager = PhaseWorkflowManager::new(
        Arc::clone(&store),
        Arc::new(StaticUrlCollector::new([HOME])),
        Arc::new(DocsSite::new()),
    );
    let outcome = manager.start("done", fast_config()).await.unwrap();
    assert_eq!(outcome.status, JobStatus::Completed);

    let site = Arc::new(DocsSite::new());
    let again = PhaseWorkflowManager::new(
        Arc::clone(&store),
        Arc::new(StaticUrlCollector::new([HOME])),
        site.clone(),
    )
    .resume(outcome.job_id)
    .await
    .unwrap();

    assert_eq!(again.status, JobStatus::Completed);
    assert!(again.crawl.is_none());
    assert_eq!(site.requests.load(Ordering::SeqCst), 0);
}
