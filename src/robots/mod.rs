//! Robots.txt handling
//!
//! Rules are fetched per host through the crawl's `Fetcher`, cached for the
//! job's robots TTL, and checked before any politeness claim is made.

mod cache;
mod parser;

pub use cache::{robots_url, CachedRobots, RobotsCache};
pub use parser::{product_token, ParsedRobots};
