//! Integration tests for the crawler
//!
//! Most tests drive `crawl_job` against an in-memory site with tokio's
//! clock paused, so politeness delays elapse instantly but stay measurable.
//! The wiremock tests at the end exercise the real HTTP fetcher.

use async_trait::async_trait;
use gleaner::crawler::{
    crawl_job, CrawlContext, CrawlReport, FetchError, FetchResponse, Fetcher, HttpFetcher,
    PlainTextExtractor,
};
use gleaner::robots::RobotsCache;
use gleaner::storage::{JobFilter, UrlRecord, UrlSource};
use gleaner::url::UrlValidator;
use gleaner::{JobConfig, JobId, JobStore, Phase, PhaseStatus, UrlStatus};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// An in-memory site keyed by canonical URL
///
/// `robots.txt` is never served (404, so everything is allowed) and is not
/// counted as a request.
#[derive(Default)]
struct FakeSite {
    pages: HashMap<String, String>,
    requests: Mutex<Vec<(String, Instant)>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// Cancel this token once this many pages have been requested
    cancel_after: Option<(usize, CancellationToken)>,
}

impl FakeSite {
    fn new() -> Self {
        Self::default()
    }

    fn page(mut self, url: &str, html: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), html.into());
        self
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn cancel_after(mut self, requests: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((requests, token));
        self
    }

    fn request_times(&self) -> Vec<Instant> {
        self.requests.lock().unwrap().iter().map(|(_, t)| *t).collect()
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for FakeSite {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchResponse, FetchError> {
        if url.path() == "/robots.txt" {
            return Ok(response(url, 404, ""));
        }

        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push((url.to_string(), Instant::now()));
            requests.len()
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some((after, token)) = &self.cancel_after {
            if count >= *after {
                token.cancel();
            }
        }

        match self.pages.get(url.as_str()) {
            Some(html) => Ok(response(url, 200, html)),
            None => Ok(response(url, 404, "not found")),
        }
    }
}

fn response(url: &Url, status: u16, body: &str) -> FetchResponse {
    let mut headers = HashMap::new();
    headers.insert("content-type".to_string(), "text/html; charset=utf-8".to_string());
    FetchResponse {
        status,
        headers,
        body: body.as_bytes().to_vec(),
        final_url: url.to_string(),
    }
}

fn html(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{}</title></head><body><p>{}</p></body></html>",
        title, body
    )
}

fn html_with_links(title: &str, links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|l| format!(r#"<a href="{}">{}</a>"#, l, l))
        .collect();
    format!(
        "<html><head><title>{}</title></head><body><p>About {}</p>{}</body></html>",
        title, title, anchors
    )
}

fn record(harness: &Harness, url: &str) -> UrlRecord {
    harness
        .store
        .get_url(harness.job_id, url)
        .unwrap()
        .unwrap()
}

fn test_config() -> JobConfig {
    JobConfig {
        concurrency: 2,
        max_depth: 2,
        max_retries: 0,
        cancel_grace_secs: 5,
        ..JobConfig::default()
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<JobStore>,
    job_id: JobId,
    config: JobConfig,
}

impl Harness {
    fn new(config: JobConfig, seeds: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JobStore::open(dir.path()).unwrap());
        let job_id = store.create_job("test crawl", &config).unwrap();
        for seed in seeds {
            store.record_url(job_id, seed, 0, UrlSource::Seed).unwrap();
        }
        Self {
            _dir: dir,
            store,
            job_id,
            config,
        }
    }

    async fn crawl(&self, fetcher: Arc<dyn Fetcher>, cancel: CancellationToken) -> CrawlReport {
        let ctx = CrawlContext {
            store: Arc::clone(&self.store),
            job_id: self.job_id,
            config: self.config.clone(),
            fetcher,
            extractor: Arc::new(PlainTextExtractor),
            cancel,
        };
        crawl_job(ctx).await.unwrap()
    }

    fn statuses(&self) -> BTreeMap<String, UrlStatus> {
        self.store
            .url_records(self.job_id, None)
            .unwrap()
            .into_iter()
            .map(|r| (r.canonical_url, r.status))
            .collect()
    }
}

/// Serves a scripted status sequence per URL; the last status repeats
#[derive(Default)]
struct ScriptedSite {
    scripts: HashMap<String, Vec<u16>>,
    requests: Mutex<HashMap<String, usize>>,
}

impl ScriptedSite {
    fn new() -> Self {
        Self::default()
    }

    fn script(mut self, url: &str, statuses: &[u16]) -> Self {
        self.scripts.insert(url.to_string(), statuses.to_vec());
        self
    }

    fn requests_for(&self, url: &str) -> usize {
        self.requests.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for ScriptedSite {
    async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchResponse, FetchError> {
        if url.path() == "/robots.txt" {
            return Ok(response(url, 404, ""));
        }

        let served = {
            let mut requests = self.requests.lock().unwrap();
            let count = requests.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count - 1
        };
        let status = self
            .scripts
            .get(url.as_str())
            .and_then(|statuses| statuses.get(served).or(statuses.last()))
            .copied()
            .unwrap_or(404);

        match status {
            200 => Ok(response(url, 200, &html("Scripted", url.as_str()))),
            other => Ok(response(url, other, "")),
        }
    }
}

/// A root page linking to five distinct pages, each linking back
fn small_site() -> FakeSite {
    let children: Vec<String> = (1..=5).map(|i| format!("https://a.example/p{}", i)).collect();
    let links: Vec<&str> = children.iter().map(String::as_str).collect();
    let mut site = FakeSite::new().page("https://a.example/", html_with_links("Home", &links));
    for (i, child) in children.iter().enumerate() {
        site = site.page(
            child,
            html_with_links(&format!("Page {}", i + 1), &["https://a.example/"]),
        );
    }
    site
}

#[tokio::test(start_paused = true)]
async fn test_burst_then_politeness_delay() {
    let seeds = [
        "https://a.example/1",
        "https://a.example/2",
        "https://a.example/3",
        "https://a.example/4",
    ];
    let config = JobConfig {
        burst_threshold: 3,
        delay_min_ms: 1000,
        delay_max_ms: 3000,
        ..test_config()
    };
    let harness = Harness::new(config, &seeds);
    let mut site = FakeSite::new();
    for (i, seed) in seeds.iter().enumerate() {
        site = site.page(seed, html(&format!("Doc {}", i), &format!("unique body {}", i)));
    }
    let site = Arc::new(site);

    let report = harness.crawl(site.clone(), CancellationToken::new()).await;
    assert_eq!(report.requests, 4);
    assert_eq!(report.counts.fetched, 4);

    let times = site.request_times();
    assert_eq!(times.len(), 4);
    // the first three go out without a politeness delay
    assert!(times[2] - times[0] < Duration::from_millis(1000));
    let gap = times[3] - times[2];
    assert!(gap >= Duration::from_millis(1000), "gap was {:?}", gap);
    assert!(gap < Duration::from_millis(4000), "gap was {:?}", gap);
}

#[tokio::test(start_paused = true)]
async fn test_five_urls_one_host_with_two_workers() {
    let seeds = [
        "https://a.example/1",
        "https://a.example/2",
        "https://a.example/3",
        "https://a.example/4",
        "https://a.example/5",
    ];
    let config = JobConfig {
        concurrency: 2,
        burst_threshold: 3,
        delay_min_ms: 1000,
        delay_max_ms: 3000,
        ..test_config()
    };
    let harness = Harness::new(config, &seeds);
    let mut site = FakeSite::new();
    for (i, seed) in seeds.iter().enumerate() {
        site = site.page(seed, html("Doc", &format!("distinct text {}", i)));
    }
    let site = Arc::new(site);

    let report = harness.crawl(site.clone(), CancellationToken::new()).await;
    assert_eq!(report.counts.fetched, 5);
    assert_eq!(report.counts.terminal(), 5);

    let times = site.request_times();
    assert_eq!(times.len(), 5);
    assert!(times[2] - times[0] < Duration::from_millis(1000));
    assert!(times[3] - times[2] >= Duration::from_secs(1));
    assert!(times[4] - times[3] >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_one_request_in_flight_per_host() {
    let seeds = [
        "https://a.example/1",
        "https://a.example/2",
        "https://a.example/3",
        "https://a.example/4",
        "https://a.example/5",
    ];
    let config = JobConfig {
        burst_threshold: 100,
        ..test_config()
    };
    let harness = Harness::new(config, &seeds);
    let mut site = FakeSite::new().with_latency(Duration::from_millis(200));
    for (i, seed) in seeds.iter().enumerate() {
        site = site.page(seed, html("Doc", &format!("body number {}", i)));
    }
    let site = Arc::new(site);

    let report = harness.crawl(site.clone(), CancellationToken::new()).await;
    assert_eq!(report.counts.fetched, 5);
    assert_eq!(site.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_bound_across_hosts() {
    let seeds = [
        "https://a.example/",
        "https://b.example/",
        "https://c.example/",
        "https://d.example/",
    ];
    let config = JobConfig {
        scope: gleaner::config::CrawlScope::Any,
        ..test_config()
    };
    let harness = Harness::new(config, &seeds);
    let mut site = FakeSite::new().with_latency(Duration::from_millis(200));
    for seed in &seeds {
        site = site.page(seed, html(seed, &format!("home of {}", seed)));
    }
    let site = Arc::new(site);

    harness.crawl(site.clone(), CancellationToken::new()).await;
    assert_eq!(site.request_count(), 4);
    assert_eq!(site.max_in_flight.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_content_is_skipped() {
    let seeds = [
        "https://a.example/copy",
        "https://b.example/copy",
        "https://c.example/copy",
    ];
    let harness = Harness::new(test_config(), &seeds);
    let mut site = FakeSite::new();
    for seed in &seeds {
        site = site.page(seed, html("Same", "The very same article text."));
    }

    let report = harness.crawl(Arc::new(site), CancellationToken::new()).await;
    assert_eq!(report.counts.fetched, 1);
    assert_eq!(report.counts.skipped_duplicate, 2);

    let records = harness.store.url_records(harness.job_id, None).unwrap();
    let original = records
        .iter()
        .find(|r| r.status == UrlStatus::Fetched)
        .unwrap();
    for record in records.iter().filter(|r| r.status == UrlStatus::SkippedDuplicate) {
        assert_eq!(record.duplicate_of.as_deref(), Some(original.canonical_url.as_str()));
        assert_eq!(record.content_hash, original.content_hash);
        assert!(record.target_path.is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn test_depth_zero_fetches_only_seeds() {
    let config = JobConfig {
        max_depth: 0,
        ..test_config()
    };
    let harness = Harness::new(config, &["https://a.example/"]);

    let site = Arc::new(small_site());
    let report = harness.crawl(site.clone(), CancellationToken::new()).await;

    assert_eq!(report.requests, 1);
    assert_eq!(site.request_count(), 1);
    let statuses = harness.statuses();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses["https://a.example/"], UrlStatus::Fetched);
}

#[tokio::test(start_paused = true)]
async fn test_links_are_followed_and_stored() {
    let harness = Harness::new(test_config(), &["https://a.example/"]);
    let report = harness
        .crawl(Arc::new(small_site()), CancellationToken::new())
        .await;

    assert_eq!(report.counts.fetched, 6);
    assert_eq!(report.counts.pending, 0);

    let job_dir = harness.store.job_dir(harness.job_id).unwrap();
    let child = harness
        .store
        .get_url(harness.job_id, "https://a.example/p3")
        .unwrap()
        .unwrap();
    assert_eq!(child.depth, 1);
    assert_eq!(child.source, UrlSource::Link);
    let content = std::fs::read_to_string(job_dir.join(child.target_path.unwrap())).unwrap();
    assert!(content.starts_with("# Page 3"));
    assert!(job_dir.join(child.raw_path.unwrap()).is_file());
}

#[tokio::test(start_paused = true)]
async fn test_missing_page_is_an_error() {
    let harness = Harness::new(test_config(), &["https://a.example/gone"]);
    let report = harness
        .crawl(Arc::new(FakeSite::new()), CancellationToken::new())
        .await;

    assert_eq!(report.counts.error, 1);
    let record = harness
        .store
        .get_url(harness.job_id, "https://a.example/gone")
        .unwrap()
        .unwrap();
    assert_eq!(record.status, UrlStatus::Error);
    assert_eq!(record.http_status, Some(404));
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried() {
    let url = "https://a.example/flaky";
    let config = JobConfig {
        max_retries: 3,
        burst_threshold: 100,
        ..test_config()
    };
    let harness = Harness::new(config, &[url]);
    let site = Arc::new(ScriptedSite::new().script(url, &[503, 503, 200]));

    let report = harness.crawl(site.clone(), CancellationToken::new()).await;
    assert_eq!(report.counts.fetched, 1);
    assert_eq!(report.requests, 3);
    assert_eq!(site.requests_for(url), 3);

    let record = record(&harness, url);
    assert_eq!(record.status, UrlStatus::Fetched);
    assert_eq!(record.attempts, 3);
    assert_eq!(record.http_status, Some(200));
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_is_an_error() {
    let url = "https://a.example/down";
    let config = JobConfig {
        max_retries: 2,
        burst_threshold: 100,
        ..test_config()
    };
    let harness = Harness::new(config, &[url]);
    let site = Arc::new(ScriptedSite::new().script(url, &[503]));

    let report = harness.crawl(site.clone(), CancellationToken::new()).await;
    assert_eq!(report.counts.error, 1);
    assert_eq!(site.requests_for(url), 3);

    let record = record(&harness, url);
    assert_eq!(record.status, UrlStatus::Error);
    assert_eq!(record.attempts, 3);
    assert_eq!(record.http_status, Some(503));
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_is_not_retried() {
    let url = "https://a.example/missing";
    let config = JobConfig {
        max_retries: 3,
        burst_threshold: 100,
        ..test_config()
    };
    let harness = Harness::new(config, &[url]);
    let site = Arc::new(ScriptedSite::new().script(url, &[404, 200]));

    harness.crawl(site.clone(), CancellationToken::new()).await;
    assert_eq!(site.requests_for(url), 1);

    let record = record(&harness, url);
    assert_eq!(record.status, UrlStatus::Error);
    assert_eq!(record.attempts, 1);
    assert_eq!(record.http_status, Some(404));
}

#[tokio::test(start_paused = true)]
async fn test_redirect_landing_is_rechecked() {
    struct MovingSite;

    #[async_trait]
    impl Fetcher for MovingSite {
        async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchResponse, FetchError> {
            let landed = match url.path() {
                "/robots.txt" => return Ok(response(url, 404, "")),
                "/moved" => Url::parse("https://elsewhere.example/landing").unwrap(),
                "/internal" => Url::parse("http://127.0.0.1/secret").unwrap(),
                _ => url.clone(),
            };
            Ok(response(&landed, 200, &html("Landed", landed.as_str())))
        }
    }

    let harness = Harness::new(
        test_config(),
        &[
            "https://a.example/stay",
            "https://a.example/moved",
            "https://a.example/internal",
        ],
    );
    let report = harness
        .crawl(Arc::new(MovingSite), CancellationToken::new())
        .await;
    assert_eq!(report.counts.fetched, 1);
    assert_eq!(report.counts.skipped_filtered, 2);

    for url in ["https://a.example/moved", "https://a.example/internal"] {
        let record = record(&harness, url);
        assert_eq!(record.status, UrlStatus::SkippedFiltered, "{}", url);
        assert!(record.target_path.is_none());
        assert!(record.raw_path.is_none());
        assert!(record
            .error_message
            .unwrap_or_default()
            .starts_with("redirected to"));
    }
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_and_resume_converge() {
    let config = JobConfig {
        concurrency: 1,
        burst_threshold: 100,
        ..test_config()
    };

    let reference = Harness::new(config.clone(), &["https://a.example/"]);
    reference
        .crawl(Arc::new(small_site()), CancellationToken::new())
        .await;

    let interrupted = Harness::new(config, &["https://a.example/"]);
    let cancel = CancellationToken::new();
    let first = interrupted
        .crawl(
            Arc::new(small_site().cancel_after(2, cancel.clone())),
            cancel,
        )
        .await;
    assert!(first.cancelled);
    assert!(first.counts.pending > 0);

    let second = interrupted
        .crawl(Arc::new(small_site()), CancellationToken::new())
        .await;
    assert!(!second.cancelled);
    assert_eq!(second.counts.pending, 0);
    assert_eq!(interrupted.statuses(), reference.statuses());
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_completion_fetches_nothing() {
    let harness = Harness::new(test_config(), &["https://a.example/"]);
    harness
        .crawl(Arc::new(small_site()), CancellationToken::new())
        .await;

    let site = Arc::new(small_site());
    let report = harness.crawl(site.clone(), CancellationToken::new()).await;
    assert_eq!(report.requests, 0);
    assert_eq!(site.request_count(), 0);
    assert_eq!(report.counts.fetched, 6);

    for (phase, status) in [
        (Phase::Initialization, PhaseStatus::Done),
        (Phase::QueryExpansion, PhaseStatus::Skipped),
        (Phase::UrlCollection, PhaseStatus::Done),
        (Phase::UrlReview, PhaseStatus::Skipped),
        (Phase::Crawling, PhaseStatus::Done),
    ] {
        harness
            .store
            .checkpoint_phase(harness.job_id, phase, status, &[])
            .unwrap();
    }
    let report = harness.crawl(site.clone(), CancellationToken::new()).await;
    assert_eq!(report.requests, 0);
    assert_eq!(site.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_robots_disallow_filters_url() {
    struct RobotsSite;

    #[async_trait]
    impl Fetcher for RobotsSite {
        async fn fetch(&self, url: &Url, _timeout: Duration) -> Result<FetchResponse, FetchError> {
            match url.path() {
                "/robots.txt" => Ok(response(url, 200, "User-agent: *\nDisallow: /private\n")),
                _ => Ok(response(url, 200, &html("Open", url.path()))),
            }
        }
    }

    let harness = Harness::new(
        test_config(),
        &["https://a.example/open", "https://a.example/private/doc"],
    );
    harness
        .crawl(Arc::new(RobotsSite), CancellationToken::new())
        .await;

    let statuses = harness.statuses();
    assert_eq!(statuses["https://a.example/open"], UrlStatus::Fetched);
    assert_eq!(statuses["https://a.example/private/doc"], UrlStatus::SkippedFiltered);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_record_url_creates_one_record() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(JobStore::open(dir.path()).unwrap());
    let job_id = store.create_job("race", &JobConfig::default()).unwrap();

    let variants = [
        "https://a.example/x",
        "https://A.EXAMPLE/x",
        "https://a.example/x#top",
        "https://a.example/x/",
        "https://a.example/./x",
        "https://a.example/x?utm_source=feed",
    ];
    let mut handles = Vec::new();
    for variant in variants.iter().cycle().take(24) {
        let store = Arc::clone(&store);
        let url = variant.to_string();
        handles.push(tokio::task::spawn_blocking(move || {
            store.record_url(job_id, &url, 0, UrlSource::Seed).unwrap().1
        }));
    }

    let mut created = 0;
    for handle in handles {
        if handle.await.unwrap() {
            created += 1;
        }
    }
    assert_eq!(created, 1);
    assert_eq!(store.count_by_status(job_id).unwrap().total(), 1);
}

#[test]
fn test_delete_job_removes_it_from_listing() {
    let dir = TempDir::new().unwrap();
    let store = JobStore::open(dir.path()).unwrap();
    let keep = store.create_job("keep me", &JobConfig::default()).unwrap();
    let doomed = store.create_job("drop me", &JobConfig::default()).unwrap();
    let drop_dir = store.job_dir(doomed).unwrap();

    store.delete_job(doomed).unwrap();

    let listed: Vec<JobId> = store
        .list_jobs(&JobFilter::default())
        .unwrap()
        .into_iter()
        .map(|j| j.id)
        .collect();
    assert_eq!(listed, vec![keep]);
    assert!(!drop_dir.exists());
    assert!(store.load_job(doomed).is_err());
    assert!(store.url_records(doomed, None).is_err());
}

#[tokio::test]
async fn test_http_fetcher_against_mock_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><title>Hi</title></html>", "text/html"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new("gleaner-test/1.0").unwrap();
    let timeout = Duration::from_secs(5);

    let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
    let ok = fetcher.fetch(&url, timeout).await.unwrap();
    assert!(ok.is_success());
    assert!(ok.is_html());
    assert!(ok.text().contains("Hi"));

    let url = Url::parse(&format!("{}/busy", server.uri())).unwrap();
    let busy = fetcher.fetch(&url, timeout).await.unwrap();
    let err = gleaner::crawler::classify_response(&busy).unwrap_err();
    assert!(err.is_transient());
    assert_eq!(err.status, Some(503));
}

#[tokio::test]
async fn test_robots_cache_with_http_fetcher() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "User-agent: *\nDisallow: /private\nCrawl-delay: 2\n",
        ))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new("gleaner-test/1.0").unwrap();
    let cache = RobotsCache::new(Duration::from_secs(3600), Duration::from_secs(5));

    let open = Url::parse(&format!("{}/open", server.uri())).unwrap();
    let private = Url::parse(&format!("{}/private/x", server.uri())).unwrap();

    let rules = cache.rules_for(&fetcher, &open).await;
    assert!(rules.is_allowed(open.as_str(), "gleaner-test/1.0"));
    assert_eq!(rules.crawl_delay("gleaner-test/1.0"), Some(Duration::from_secs(2)));

    // second lookup for the host is served from the cache
    let rules = cache.rules_for(&fetcher, &private).await;
    assert!(!rules.is_allowed(private.as_str(), "gleaner-test/1.0"));
}

#[tokio::test]
async fn test_full_crawl_over_http() {
    let server = MockServer::start().await;
    let base = server.uri();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(html_with_links("Home", &["/one", "/two"]), "text/html"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/one"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(html("One", "first page"), "text/html"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/two"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = JobConfig {
        allow_private_hosts: true,
        burst_threshold: 100,
        max_retries: 0,
        ..test_config()
    };
    let harness = Harness::new(config, &[format!("{}/", base).as_str()]);
    let fetcher = HttpFetcher::new("gleaner-test/1.0").unwrap();
    let report = harness
        .crawl(Arc::new(fetcher), CancellationToken::new())
        .await;

    assert_eq!(report.counts.fetched, 2);
    assert_eq!(report.counts.error, 1);
    assert_eq!(report.counts.pending, 0);
}

#[tokio::test]
async fn test_private_hosts_blocked_by_default() {
    let server = MockServer::start().await;
    let harness = Harness::new(test_config(), &[format!("{}/", server.uri()).as_str()]);
    let fetcher = HttpFetcher::new("gleaner-test/1.0").unwrap();
    let report = harness
        .crawl(Arc::new(fetcher), CancellationToken::new())
        .await;

    assert_eq!(report.requests, 0);
    assert_eq!(report.counts.skipped_filtered, 1);
}

#[tokio::test]
async fn test_crawl_completes_on_real_clock() {
    let config = JobConfig {
        burst_threshold: 100,
        ..test_config()
    };
    let harness = Harness::new(config, &["https://a.example/"]);
    let site = Arc::new(small_site());

    let report = tokio::time::timeout(
        Duration::from_secs(10),
        harness.crawl(site.clone(), CancellationToken::new()),
    )
    .await
    .expect("crawl should finish without a paused clock");
    assert_eq!(report.counts.fetched, 6);
    assert_eq!(site.request_count(), 6);
}

#[tokio::test]
async fn test_http_fetcher_follows_redirect() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("location", "/new"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>moved here</html>", "text/html"))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new("gleaner-test/1.0")
        .unwrap()
        .with_validator(UrlValidator::new(true));
    let url = Url::parse(&format!("{}/old", server.uri())).unwrap();
    let response = fetcher.fetch(&url, Duration::from_secs(5)).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.final_url, format!("{}/new", server.uri()));
    assert!(response.text().contains("moved here"));
}

#[tokio::test]
async fn test_http_fetcher_refuses_redirect_to_local_host() {
    let server = MockServer::start().await;
    let secret = format!("http://localhost:{}/secret", server.address().port());
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", secret.as_str()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secret"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>secret</html>", "text/html"))
        .expect(0)
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new("gleaner-test/1.0").unwrap();
    let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
    let err = fetcher.fetch(&url, Duration::from_secs(5)).await.unwrap_err();

    assert!(err.is_blocked(), "{:?}", err);
    assert!(err.message.contains("localhost"));
}

#[tokio::test]
async fn test_http_fetcher_detects_redirect_loop() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/b"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/a"))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new("gleaner-test/1.0")
        .unwrap()
        .with_validator(UrlValidator::new(true));
    let url = Url::parse(&format!("{}/a", server.uri())).unwrap();
    let err = fetcher.fetch(&url, Duration::from_secs(5)).await.unwrap_err();

    assert!(!err.is_transient());
    assert!(err.message.contains("redirect loop"));
}

#[tokio::test]
async fn test_crawl_filters_redirect_to_local_host() {
    let server = MockServer::start().await;
    let secret = format!("http://localhost:{}/secret", server.address().port());
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/start"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", secret.as_str()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/secret"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>secret</html>", "text/html"))
        .expect(0)
        .mount(&server)
        .await;

    // the seed itself is a loopback address, so the job must allow it
    let config = JobConfig {
        allow_private_hosts: true,
        burst_threshold: 100,
        ..test_config()
    };
    let seed = format!("{}/start", server.uri());
    let harness = Harness::new(config, &[seed.as_str()]);
    let fetcher = HttpFetcher::new("gleaner-test/1.0").unwrap();
    let report = harness
        .crawl(Arc::new(fetcher), CancellationToken::new())
        .await;

    assert_eq!(report.counts.skipped_filtered, 1);
    assert_eq!(report.counts.fetched, 0);
    let record = record(&harness, &seed);
    assert_eq!(record.status, UrlStatus::SkippedFiltered);
    assert!(record.error_message.unwrap_or_default().contains("refused"));
}
