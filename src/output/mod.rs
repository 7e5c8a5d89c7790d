//! Human-readable reports for the command line
//!
//! This module handles:
//! - Job status reports (`--status`)
//! - Job listings (`--list-jobs`)

pub mod stats;

pub use stats::{format_job_line, load_statistics, print_job_list, print_statistics, JobStatistics};
