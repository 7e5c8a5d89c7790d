//! Content deduplication
//!
//! Fetched content is normalized and hashed; the first URL of a job to
//! register a hash owns it, and later URLs with the same hash are marked
//! `skipped_duplicate` pointing at the owner.

use crate::storage::{JobId, JobStore, StorageResult};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// Whitespace entities that survive text extraction in some pages
const WHITESPACE_ENTITIES: &[&str] = &[
    "&nbsp;", "&#160;", "&#xa0;", "&#x20;", "&#32;", "&ensp;", "&emsp;", "&thinsp;",
];

/// Canonical text form used for hashing
///
/// Strips markup remnants (`<...>` tags and whitespace entities), lowercases,
/// collapses whitespace runs to a single space and trims.
pub fn normalize(raw_text: &str) -> String {
    let mut text = String::with_capacity(raw_text.len());
    let mut in_tag = false;
    for c in raw_text.chars() {
        match c {
            '<' => {
                in_tag = true;
                text.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            _ => text.push(c),
        }
    }

    let mut text = text.to_lowercase();
    for entity in WHITESPACE_ENTITIES {
        if text.contains(entity) {
            text = text.replace(entity, " ");
        }
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hex SHA-256 of already normalized text
pub fn fingerprint(canonical_text: &str) -> String {
    hex::encode(Sha256::digest(canonical_text.as_bytes()))
}

/// Result of a deduplication check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupOutcome {
    pub is_duplicate: bool,
    /// Owner of the hash when `is_duplicate` is true
    pub original_url: Option<String>,
}

impl DedupOutcome {
    fn unique() -> Self {
        Self {
            is_duplicate: false,
            original_url: None,
        }
    }
}

/// Checks content hashes against the job's fingerprint table
#[derive(Clone)]
pub struct Deduplicator {
    store: Arc<JobStore>,
    enabled: bool,
}

impl Deduplicator {
    pub fn new(store: Arc<JobStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Registers `hash` for `canonical_url` unless another URL already owns it
    ///
    /// Re-registering a URL's own hash (after an interruption between
    /// registration and the status update) is not a duplicate. With
    /// deduplication disabled every check is unique and nothing is written.
    pub fn check_and_register(
        &self,
        job_id: JobId,
        hash: &str,
        canonical_url: &str,
    ) -> StorageResult<DedupOutcome> {
        if !self.enabled {
            return Ok(DedupOutcome::unique());
        }

        match self.store.register_fingerprint(job_id, hash, canonical_url)? {
            Some(owner) if owner != canonical_url => {
                debug!(job_id = %job_id, url = canonical_url, original = %owner, "Duplicate content");
                Ok(DedupOutcome {
                    is_duplicate: true,
                    original_url: Some(owner),
                })
            }
            _ => Ok(DedupOutcome::unique()),
        }
    }
}
