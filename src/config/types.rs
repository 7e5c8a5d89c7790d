use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure for Gleaner
///
/// Every section is optional in the TOML file; missing keys fall back to the
/// defaults below.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub crawler: CrawlerConfig,
    pub politeness: PolitenessConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub output: OutputConfig,
    pub workflow: WorkflowConfig,
}

/// Crawl engine configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct CrawlerConfig {
    /// Number of concurrent crawl workers
    pub concurrency: u32,

    /// Maximum link depth from the seed URLs (seeds are depth 0)
    pub max_depth: u32,

    /// Maximum number of pages fetched from a single host
    pub max_pages_per_host: Option<u32>,

    /// Per-request timeout (seconds)
    pub fetch_timeout_secs: u64,

    /// Retries for transient fetch failures before a URL is marked `error`
    pub max_retries: u32,

    /// Which discovered links are followed
    pub scope: CrawlScope,

    /// Skip pages whose normalized content was already fetched in the job
    pub dedup: bool,

    /// Allow fetching loopback and private-network addresses
    pub allow_private_hosts: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            max_depth: 2,
            max_pages_per_host: None,
            fetch_timeout_secs: 30,
            max_retries: 3,
            scope: CrawlScope::default(),
            dedup: true,
            allow_private_hosts: false,
        }
    }
}

/// Per-host politeness configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PolitenessConfig {
    /// Requests to a host that go out without any delay
    pub burst_threshold: u32,

    /// Lower bound of the random delay between requests (milliseconds)
    pub delay_min_ms: u64,

    /// Upper bound of the random delay between requests (milliseconds)
    pub delay_max_ms: u64,

    /// How long a fetched robots.txt stays valid (hours)
    pub robots_ttl_hours: u64,
}

impl Default for PolitenessConfig {
    fn default() -> Self {
        Self {
            burst_threshold: 3,
            delay_min_ms: 1000,
            delay_max_ms: 3000,
            robots_ttl_hours: 24,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct UserAgentConfig {
    /// Name of the crawler
    pub crawler_name: String,

    /// Version of the crawler
    pub crawler_version: String,

    /// URL with information about the crawler
    pub contact_url: Option<String>,

    /// Email address for crawler-related contact
    pub contact_email: Option<String>,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "gleaner".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: None,
            contact_email: None,
        }
    }
}

impl UserAgentConfig {
    /// Renders the User-Agent header value
    ///
    /// Format: `{name}/{version} (+{url}; {email})`, with the parenthesized
    /// part shortened or omitted when contact details are missing.
    pub fn header_value(&self) -> String {
        let base = format!("{}/{}", self.crawler_name, self.crawler_version);
        match (&self.contact_url, &self.contact_email) {
            (Some(url), Some(email)) => format!("{} (+{}; {})", base, url, email),
            (Some(url), None) => format!("{} (+{})", base, url),
            (None, Some(email)) => format!("{} ({})", base, email),
            (None, None) => base,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Root directory holding the job index and all job directories
    pub data_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./gleaner-data"),
        }
    }
}

/// Workflow configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct WorkflowConfig {
    /// Run QUERY_EXPANSION when an expander is available
    pub expand_query: bool,

    /// Run URL_REVIEW before crawling
    pub review_urls: bool,

    /// Run ANALYSIS when an analyzer is available
    pub analyze: bool,

    /// Fetched records re-read on resume when no pending URLs are left
    pub resample_limit: u32,

    /// Grace period for in-flight fetches after cancellation (seconds)
    pub cancel_grace_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            expand_query: true,
            review_urls: false,
            analyze: false,
            resample_limit: 20,
            cancel_grace_secs: 5,
        }
    }
}

/// Which links a crawl follows, relative to the depth-0 seeds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlScope {
    /// Any host
    Any,
    /// Only hosts of the seed URLs
    #[default]
    Domain,
    /// Only URLs under a seed URL's directory on the same host
    Subdirectory,
}

impl fmt::Display for CrawlScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Any => "any",
            Self::Domain => "domain",
            Self::Subdirectory => "subdirectory",
        })
    }
}

impl FromStr for CrawlScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" => Ok(Self::Any),
            "domain" => Ok(Self::Domain),
            "subdirectory" => Ok(Self::Subdirectory),
            other => Err(format!(
                "unknown crawl scope '{}', expected any, domain or subdirectory",
                other
            )),
        }
    }
}

/// Immutable snapshot of the settings a job runs with
///
/// Stored as JSON next to the job row when the job is created. A resumed job
/// always uses its snapshot, never the current config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub concurrency: u32,
    pub max_depth: u32,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    pub burst_threshold: u32,
    pub dedup: bool,
    pub max_pages_per_host: Option<u32>,
    pub scope: CrawlScope,
    pub fetch_timeout_secs: u64,
    pub max_retries: u32,
    pub expand_query: bool,
    pub review_urls: bool,
    pub analyze: bool,
    pub robots_ttl_hours: u64,
    pub allow_private_hosts: bool,
    pub resample_limit: u32,
    pub cancel_grace_secs: u64,
    pub user_agent: String,
    /// SHA-256 of the config file the snapshot came from, if any
    pub config_hash: Option<String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for JobConfig {
    fn from(config: &Config) -> Self {
        Self {
            concurrency: config.crawler.concurrency,
            max_depth: config.crawler.max_depth,
            delay_min_ms: config.politeness.delay_min_ms,
            delay_max_ms: config.politeness.delay_max_ms,
            burst_threshold: config.politeness.burst_threshold,
            dedup: config.crawler.dedup,
            max_pages_per_host: config.crawler.max_pages_per_host,
            scope: config.crawler.scope,
            fetch_timeout_secs: config.crawler.fetch_timeout_secs,
            max_retries: config.crawler.max_retries,
            expand_query: config.workflow.expand_query,
            review_urls: config.workflow.review_urls,
            analyze: config.workflow.analyze,
            robots_ttl_hours: config.politeness.robots_ttl_hours,
            allow_private_hosts: config.crawler.allow_private_hosts,
            resample_limit: config.workflow.resample_limit,
            cancel_grace_secs: config.workflow.cancel_grace_secs,
            user_agent: config.user_agent.header_value(),
            config_hash: None,
        }
    }
}

impl JobConfig {
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    /// Politeness window as (min, max)
    pub fn politeness_window(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.delay_min_ms),
            Duration::from_millis(self.delay_max_ms),
        )
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn robots_ttl(&self) -> Duration {
        Duration::from_secs(self.robots_ttl_hours * 3600)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}
