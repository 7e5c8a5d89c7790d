//! Crawl engine
//!
//! This module contains the crawling machinery of a job:
//! - HTTP fetching and failure classification
//! - Link and content extraction
//! - Per-host politeness and the round-robin frontier
//! - The bounded worker pool and frontier rebuilding on resume

mod backoff;
mod fetcher;
mod frontier;
mod parser;
mod pool;
mod rate_limiter;
mod resume;

pub use backoff::ExponentialBackoff;
pub use fetcher::{
    classify_response, FetchError, FetchErrorKind, FetchResponse, Fetcher, HttpFetcher,
    MAX_REDIRECTS,
};
pub use frontier::{Frontier, FrontierEntry, Selection};
pub use parser::{extract_links, ContentExtractor, ExtractedContent, PlainTextExtractor};
pub use pool::{CrawlContext, CrawlPool, CrawlReport};
pub use rate_limiter::{
    ClaimAttempt, HostClaim, HostRateLimiter, PolitenessPolicy, MAX_CRAWL_DELAY,
};
pub use resume::{crawl_job, ResumeController, ResumePlan};
