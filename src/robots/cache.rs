//! Robots.txt caching layer
//!
//! One entry per host key, refetched once older than the job's robots TTL.

use crate::crawler::Fetcher;
use crate::robots::parser::ParsedRobots;
use crate::url::host_key;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

/// Cached robots.txt entry
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub robots: Arc<ParsedRobots>,
    pub fetched_at: Instant,
}

impl CachedRobots {
    pub fn new(robots: ParsedRobots) -> Self {
        Self {
            robots: Arc::new(robots),
            fetched_at: Instant::now(),
        }
    }

    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

/// `robots.txt` location for the origin of `url`
pub fn robots_url(url: &Url) -> Url {
    let mut robots = url.clone();
    robots.set_path("/robots.txt");
    robots.set_query(None);
    robots.set_fragment(None);
    robots
}

/// Per-job robots.txt cache
pub struct RobotsCache {
    ttl: Duration,
    fetch_timeout: Duration,
    entries: RwLock<HashMap<String, CachedRobots>>,
}

impl RobotsCache {
    pub fn new(ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            ttl,
            fetch_timeout,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Rules for the host of `url`, fetching them through `fetcher` when
    /// missing or stale
    ///
    /// A 4xx response, a server error or an unreachable host yields
    /// allow-all rules.
    pub async fn rules_for(&self, fetcher: &dyn Fetcher, url: &Url) -> Arc<ParsedRobots> {
        let Some(host) = host_key(url) else {
            return Arc::new(ParsedRobots::allow_all());
        };

        {
            let entries = self.entries.read().await;
            if let Some(cached) = entries.get(&host) {
                if !cached.is_stale(self.ttl) {
                    return Arc::clone(&cached.robots);
                }
            }
        }

        let robots = self.fetch(fetcher, url, &host).await;
        let cached = CachedRobots::new(robots);
        let rules = Arc::clone(&cached.robots);
        self.entries.write().await.insert(host, cached);
        rules
    }

    async fn fetch(&self, fetcher: &dyn Fetcher, url: &Url, host: &str) -> ParsedRobots {
        let target = robots_url(url);
        match fetcher.fetch(&target, self.fetch_timeout).await {
            Ok(response) if response.is_success() => {
                debug!(host, "Fetched robots.txt");
                ParsedRobots::from_content(&response.text())
            }
            Ok(response) => {
                debug!(host, status = response.status, "No usable robots.txt, allowing all");
                ParsedRobots::allow_all()
            }
            Err(e) => {
                info!(host, error = %e, "robots.txt unreachable, allowing all");
                ParsedRobots::allow_all()
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
