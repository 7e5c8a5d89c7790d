//! HTTP fetching
//!
//! The crawl engine and the robots pre-flight both go through the [`Fetcher`]
//! trait. A fetcher reports any HTTP response it receives, whatever the
//! status; only transport failures come back as errors. Turning a response
//! into success or failure is [`classify_response`]'s job.
//!
//! [`HttpFetcher`] follows redirects itself so every hop passes the same
//! [`UrlValidator`] checks as a URL taken from the frontier.

use crate::url::UrlValidator;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{redirect::Policy, Client, Response};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use url::Url;

/// Maximum redirect hops followed before giving up
pub const MAX_REDIRECTS: usize = 10;

/// Raw response of one fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    /// Header names are lowercased; a repeated header keeps its first value
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// URL after redirects
    pub final_url: String,
}

impl FetchResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    /// True when the content type is HTML, or when none was sent
    pub fn is_html(&self) -> bool {
        match self.content_type() {
            None => true,
            Some(ct) => {
                let mime = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
                mime.is_empty() || mime == "text/html" || mime == "application/xhtml+xml"
            }
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Whether retrying a failed fetch can help
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Timeouts, connection failures, 408, 429 and 5xx
    Transient,
    /// Other 4xx, non-HTML content, undecodable bodies
    Permanent,
    /// A redirect pointed somewhere the URL guard refuses
    Blocked,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Blocked => write!(f, "blocked"),
        }
    }
}

/// A failed fetch
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind} fetch error: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
    /// HTTP status when a response was received
    pub status: Option<u16>,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Transient,
            message: message.into(),
            status: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Permanent,
            message: message.into(),
            status: None,
        }
    }

    pub fn blocked(message: impl Into<String>) -> Self {
        Self {
            kind: FetchErrorKind::Blocked,
            message: message.into(),
            status: None,
        }
    }

    /// Classifies a non-success HTTP status
    pub fn from_status(status: u16) -> Self {
        let kind = if status == 408 || status == 429 || status >= 500 {
            FetchErrorKind::Transient
        } else {
            FetchErrorKind::Permanent
        };
        Self {
            kind,
            message: format!("HTTP {}", status),
            status: Some(status),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == FetchErrorKind::Transient
    }

    pub fn is_blocked(&self) -> bool {
        self.kind == FetchErrorKind::Blocked
    }
}

/// Source of page responses
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetches `url`, giving up after `timeout`
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchResponse, FetchError>;
}

/// Turns a response into a crawlable page or a classified failure
///
/// | Condition | Result |
/// |-----------|--------|
/// | 2xx, HTML or no content type | Ok |
/// | 2xx, other content type | Permanent |
/// | 408, 429, 5xx | Transient |
/// | other status | Permanent |
pub fn classify_response(response: &FetchResponse) -> Result<(), FetchError> {
    if !response.is_success() {
        return Err(FetchError::from_status(response.status));
    }
    if !response.is_html() {
        let mut err = FetchError::permanent(format!(
            "non-HTML content: {}",
            response.content_type().unwrap_or_default()
        ));
        err.status = Some(response.status);
        return Err(err);
    }
    Ok(())
}

/// `Fetcher` backed by a shared reqwest client
///
/// Redirects are followed by hand, up to [`MAX_REDIRECTS`] hops. Each
/// `Location` target must pass the fetcher's [`UrlValidator`] before it is
/// requested, and a chain that revisits a URL is a permanent failure.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    validator: UrlValidator,
}

impl HttpFetcher {
    /// Builds an HTTP client sending `user_agent` on every request
    ///
    /// Redirects to private or local hosts are refused; use
    /// [`with_validator`](Self::with_validator) to change that.
    ///
    /// # Arguments
    ///
    /// * `user_agent` - Full User-Agent header value, e.g. from `JobConfig::user_agent`
    ///
    /// # Returns
    ///
    /// * `Ok(HttpFetcher)` - Client built
    /// * `Err(reqwest::Error)` - TLS backend or builder failure
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(10))
            .redirect(Policy::none()) // Handle redirects manually
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self {
            client,
            validator: UrlValidator::default(),
        })
    }

    /// Wraps an existing client, which should not follow redirects itself
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            validator: UrlValidator::default(),
        }
    }

    /// Replaces the guard applied to redirect targets
    pub fn with_validator(mut self, validator: UrlValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Resolves the `Location` of a redirect response and checks it
    ///
    /// # Returns
    ///
    /// * `Ok(Some(url))` - The next hop to request
    /// * `Ok(None)` - Not a followable redirect; the response is final
    /// * `Err(FetchError)` - Unusable or refused target
    fn next_hop(&self, current: &Url, response: &Response) -> Result<Option<Url>, FetchError> {
        if !response.status().is_redirection() {
            return Ok(None);
        }
        let Some(location) = response.headers().get(LOCATION) else {
            return Ok(None);
        };
        let location = location
            .to_str()
            .map_err(|_| FetchError::permanent("redirect location is not valid text"))?;
        let next = current.join(location).map_err(|e| {
            FetchError::permanent(format!("invalid redirect location '{}': {}", location, e))
        })?;
        self.validator
            .validate(&next)
            .map_err(|reason| FetchError::blocked(format!("redirect to {} refused: {}", next, reason)))?;
        Ok(Some(next))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchResponse, FetchError> {
        let deadline = Instant::now() + timeout;
        let mut current = url.clone();
        let mut visited = HashSet::from([url.to_string()]);

        for _ in 0..=MAX_REDIRECTS {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(FetchError::transient("request timed out"));
            }
            let response = self
                .client
                .get(current.as_str())
                .timeout(remaining)
                .send()
                .await
                .map_err(classify_transport_error)?;

            match self.next_hop(&current, &response)? {
                Some(next) => {
                    if !visited.insert(next.to_string()) {
                        return Err(FetchError::permanent(format!("redirect loop at {}", next)));
                    }
                    current = next;
                }
                None => return read_response(response, current).await,
            }
        }

        Err(FetchError::permanent(format!(
            "more than {} redirects",
            MAX_REDIRECTS
        )))
    }
}

async fn read_response(response: Response, final_url: Url) -> Result<FetchResponse, FetchError> {
    let status = response.status().as_u16();
    let headers = collect_headers(response.headers());
    let body = response
        .bytes()
        .await
        .map_err(classify_transport_error)?
        .to_vec();

    Ok(FetchResponse {
        status,
        headers,
        body,
        final_url: final_url.to_string(),
    })
}

/// Lowercased header map; the first value of a repeated header wins
fn collect_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut collected = HashMap::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            collected
                .entry(name.as_str().to_ascii_lowercase())
                .or_insert_with(|| value.to_string());
        }
    }
    collected
}

fn classify_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::transient("request timed out")
    } else if e.is_connect() {
        FetchError::transient(format!("connection failed: {}", e))
    } else if e.is_redirect() {
        FetchError::permanent(format!("redirect error: {}", e))
    } else if e.is_decode() {
        FetchError::permanent(format!("invalid body: {}", e))
    } else if e.is_builder() {
        FetchError::permanent(format!("invalid request: {}", e))
    } else {
        FetchError::transient(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, content_type: Option<&str>) -> FetchResponse {
        let mut headers = HashMap::new();
        if let Some(ct) = content_type {
            headers.insert("content-type".to_string(), ct.to_string());
        }
        FetchResponse {
            status,
            headers,
            body: b"<html></html>".to_vec(),
            final_url: "https://example.com/".to_string(),
        }
    }

    #[test]
    fn test_html_success() {
        assert!(classify_response(&response(200, Some("text/html; charset=utf-8"))).is_ok());
        assert!(classify_response(&response(200, Some("application/xhtml+xml"))).is_ok());
        assert!(classify_response(&response(200, None)).is_ok());
    }

    #[test]
    fn test_non_html_is_permanent() {
        let err = classify_response(&response(200, Some("application/pdf"))).unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Permanent);
        assert!(err.message.contains("application/pdf"));
    }

    #[test]
    fn test_status_classification() {
        for status in [408, 429, 500, 502, 503] {
            assert!(FetchError::from_status(status).is_transient(), "{}", status);
        }
        for status in [400, 401, 403, 404, 410] {
            assert!(!FetchError::from_status(status).is_transient(), "{}", status);
        }
        assert_eq!(FetchError::from_status(404).status, Some(404));
    }

    #[test]
    fn test_error_display() {
        let err = FetchError::transient("request timed out");
        assert_eq!(err.to_string(), "transient fetch error: request timed out");
    }

    #[test]
    fn test_repeated_header_keeps_first_value() {
        let mut headers = HeaderMap::new();
        headers.append("content-type", "text/html".parse().unwrap());
        headers.append("content-type", "text/plain".parse().unwrap());
        headers.insert("x-other", "1".parse().unwrap());

        let collected = collect_headers(&headers);
        assert_eq!(collected["content-type"], "text/html");
        assert_eq!(collected["x-other"], "1");
        assert_eq!(collected.len(), 2);
    }

    #[test]
    fn test_blocked_error() {
        let err = FetchError::blocked("redirect to http://localhost/ refused");
        assert!(err.is_blocked());
        assert!(!err.is_transient());
        assert!(err.to_string().starts_with("blocked fetch error"));
    }

    #[test]
    fn test_build_http_fetcher() {
        assert!(HttpFetcher::new("gleaner/0.3.0 (+https://example.com/bot)").is_ok());
    }
}
