use crate::UrlError;
use url::Url;

/// Extracts the politeness key of a URL: its lowercase host, plus the port
/// when it is not the scheme's default
///
/// Two URLs share rate limiting, robots rules and the page cap exactly when
/// their host keys are equal.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use gleaner::url::host_key;
///
/// let url = Url::parse("https://Example.com/path").unwrap();
/// assert_eq!(host_key(&url), Some("example.com".to_string()));
///
/// let url = Url::parse("http://example.com:8080/").unwrap();
/// assert_eq!(host_key(&url), Some("example.com:8080".to_string()));
/// ```
pub fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    if host.is_empty() {
        return None;
    }
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

/// Parses `url_str` and returns its host key
pub fn host_key_str(url_str: &str) -> Result<String, UrlError> {
    let url = Url::parse(url_str).map_err(|e| UrlError::Parse(e.to_string()))?;
    host_key(&url).ok_or(UrlError::MissingHost)
}

/// Scheme and authority of a URL, e.g. `https://example.com:8443`
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}
