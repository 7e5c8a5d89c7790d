//! Configuration module for Gleaner
//!
//! This module handles loading, parsing, and validating TOML configuration
//! files, and turning a loaded [`Config`] into the [`JobConfig`] snapshot a
//! job carries for its whole life.
//!
//! # Example
//!
//! ```no_run
//! use gleaner::config::{load_config, JobConfig};
//! use std::path::Path;
//!
//! let config = load_config(Path::new("gleaner.toml")).unwrap();
//! let snapshot = JobConfig::from(&config);
//! println!("Crawl will use max depth: {}", snapshot.max_depth);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    Config, CrawlScope, CrawlerConfig, JobConfig, OutputConfig, PolitenessConfig,
    UserAgentConfig, WorkflowConfig,
};

pub use parser::{
    compute_config_hash, load_config, load_config_with_hash, load_or_default, parse_config,
};
pub use validation::MAX_DEPTH_LIMIT;
