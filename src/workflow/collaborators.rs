//! Collaborators the workflow delegates phase work to
//!
//! Query expansion, URL collection, review, bundling and analysis are
//! pluggable; errors from them fail the phase that called them.

use crate::storage::UrlRecord;
use anyhow::Context;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Turns a research query into the list of queries to search for
#[async_trait]
pub trait QueryExpander: Send + Sync {
    async fn expand(&self, query: &str) -> anyhow::Result<Vec<String>>;
}

/// Produces candidate URLs for a set of queries
#[async_trait]
pub trait UrlCollector: Send + Sync {
    async fn collect(&self, queries: &[String]) -> anyhow::Result<Vec<String>>;
}

/// Filters collected URLs before crawling
#[async_trait]
pub trait UrlReviewer: Send + Sync {
    async fn review(&self, query: &str, urls: &[String]) -> anyhow::Result<Vec<String>>;
}

/// What a bundler gets to work with
#[derive(Debug, Clone)]
pub struct BundleInput<'a> {
    pub query: &'a str,
    pub job_dir: &'a Path,
    /// Records with status `fetched`
    pub records: &'a [UrlRecord],
}

/// Combines crawled content into a single document
#[async_trait]
pub trait Bundler: Send + Sync {
    async fn bundle(&self, input: &BundleInput<'_>) -> anyhow::Result<String>;
}

/// Produces an analysis of the bundle
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, query: &str, bundle: &str) -> anyhow::Result<String>;
}

/// Reads URLs from a text file, one per line
///
/// Blank lines and lines starting with `#` are ignored. The file is read
/// when the collection phase runs, not when the collector is built.
#[derive(Debug, Clone)]
pub struct FileUrlCollector {
    path: PathBuf,
}

impl FileUrlCollector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl UrlCollector for FileUrlCollector {
    async fn collect(&self, _queries: &[String]) -> anyhow::Result<Vec<String>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading URL list {}", self.path.display()))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }
}

/// Returns a fixed URL list
#[derive(Debug, Clone, Default)]
pub struct StaticUrlCollector {
    urls: Vec<String>,
}

impl StaticUrlCollector {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl UrlCollector for StaticUrlCollector {
    async fn collect(&self, _queries: &[String]) -> anyhow::Result<Vec<String>> {
        Ok(self.urls.clone())
    }
}

/// Concatenates the results of several collectors, dropping repeats
#[derive(Default, Clone)]
pub struct ChainedUrlCollector {
    collectors: Vec<Arc<dyn UrlCollector>>,
}

impl ChainedUrlCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, collector: Arc<dyn UrlCollector>) -> Self {
        self.collectors.push(collector);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

#[async_trait]
impl UrlCollector for ChainedUrlCollector {
    async fn collect(&self, queries: &[String]) -> anyhow::Result<Vec<String>> {
        let mut urls = Vec::new();
        for collector in &self.collectors {
            urls.extend(collector.collect(queries).await?);
        }
        Ok(dedup_preserving_order(urls))
    }
}

/// Keeps every collected URL
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllReviewer;

#[async_trait]
impl UrlReviewer for AcceptAllReviewer {
    async fn review(&self, _query: &str, urls: &[String]) -> anyhow::Result<Vec<String>> {
        Ok(urls.to_vec())
    }
}

/// Joins the extracted content of every fetched page in discovery order
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcatBundler;

#[async_trait]
impl Bundler for ConcatBundler {
    async fn bundle(&self, input: &BundleInput<'_>) -> anyhow::Result<String> {
        let mut out = format!("# Research bundle: {}\n\n", input.query);
        out.push_str(&format!("{} pages\n", input.records.len()));

        for record in input.records {
            let Some(target) = record.target_path.as_deref() else {
                continue;
            };
            let path = input.job_dir.join(target);
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading extracted content {}", path.display()))?;
            out.push_str("\n---\n\n");
            out.push_str(content.trim_end());
            out.push('\n');
        }
        Ok(out)
    }
}

pub(crate) fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
