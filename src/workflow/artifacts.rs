//! Phase artifact files inside a job directory

use crate::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

pub const QUERIES_FILE: &str = "queries.json";
pub const COLLECTED_URLS_FILE: &str = "collected_urls.json";
pub const REVIEWED_URLS_FILE: &str = "reviewed_urls.json";
pub const BUNDLE_FILE: &str = "bundle.md";
pub const ANALYSIS_FILE: &str = "analysis.md";

/// Writes `value` as pretty JSON to `job_dir/name`, returning `name`
pub fn write_json<T: Serialize + ?Sized>(job_dir: &Path, name: &str, value: &T) -> Result<String> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(job_dir, name, json.as_bytes())?;
    Ok(name.to_string())
}

/// Reads a JSON artifact; `None` when the file does not exist
pub fn read_json<T: DeserializeOwned>(job_dir: &Path, name: &str) -> Result<Option<T>> {
    match std::fs::read(job_dir.join(name)) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Writes a text artifact, returning `name`
pub fn write_text(job_dir: &Path, name: &str, text: &str) -> Result<String> {
    write_atomic(job_dir, name, text.as_bytes())?;
    Ok(name.to_string())
}

/// Seed URLs for crawling: the reviewed list, or the collected one when
/// review was skipped
pub fn seed_urls(job_dir: &Path) -> Result<Vec<String>> {
    if let Some(urls) = read_json::<Vec<String>>(job_dir, REVIEWED_URLS_FILE)? {
        return Ok(urls);
    }
    Ok(read_json::<Vec<String>>(job_dir, COLLECTED_URLS_FILE)?.unwrap_or_default())
}

/// Writes through a temp file and renames it into place
fn write_atomic(job_dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let tmp = job_dir.join(format!(".{}.tmp", name));
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, job_dir.join(name))?;
    Ok(())
}
