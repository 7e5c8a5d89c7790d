//! Pre-fetch URL checks: scheme, SSRF protection and crawl scope
//!
//! A URL that fails any of these checks is marked `skipped_filtered` without
//! a network call.

use crate::config::CrawlScope;
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

/// Reason a URL was filtered before fetching
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterReason {
    DisallowedScheme(String),
    BlockedHost(String),
    PrivateAddress(IpAddr),
    OutOfScope,
    HostCapReached(u32),
    RobotsDisallowed,
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DisallowedScheme(scheme) => write!(f, "scheme '{}' is not allowed", scheme),
            Self::BlockedHost(host) => write!(f, "host '{}' is blocked", host),
            Self::PrivateAddress(ip) => write!(f, "address {} is not publicly routable", ip),
            Self::OutOfScope => f.write_str("outside crawl scope"),
            Self::HostCapReached(cap) => write!(f, "host page cap of {} reached", cap),
            Self::RobotsDisallowed => f.write_str("disallowed by robots.txt"),
        }
    }
}

/// Hostnames that always point at the local machine or cloud metadata
const BLOCKED_HOSTS: &[&str] = &[
    "localhost",
    "metadata.google.internal",
    "metadata.gke.internal",
    "instance-data",
];

const BLOCKED_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal"];

/// Scheme and SSRF checks for URLs about to be fetched
///
/// Only literal IP hosts are checked against private ranges; names are not
/// resolved.
#[derive(Debug, Clone)]
pub struct UrlValidator {
    allowed_schemes: HashSet<String>,
    allow_private: bool,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::new(false)
    }
}

impl UrlValidator {
    /// Creates a validator accepting http and https
    ///
    /// # Arguments
    ///
    /// * `allow_private` - Skip the host and address checks (local test servers)
    pub fn new(allow_private: bool) -> Self {
        Self {
            allowed_schemes: ["http", "https"].into_iter().map(String::from).collect(),
            allow_private,
        }
    }

    /// Checks a URL before it is fetched
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL, usually canonical
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Safe to request
    /// * `Err(FilterReason)` - Disallowed scheme, blocked host name or private address
    pub fn validate(&self, url: &Url) -> Result<(), FilterReason> {
        if !self.allowed_schemes.contains(url.scheme()) {
            return Err(FilterReason::DisallowedScheme(url.scheme().to_string()));
        }

        if self.allow_private {
            return Ok(());
        }

        match url.host() {
            None => Err(FilterReason::BlockedHost(String::new())),
            Some(Host::Ipv4(ip)) => check_ip(IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => check_ip(IpAddr::V6(ip)),
            Some(Host::Domain(name)) => {
                let name = name.trim_end_matches('.').to_lowercase();
                if BLOCKED_HOSTS.contains(&name.as_str())
                    || BLOCKED_SUFFIXES.iter().any(|s| name.ends_with(s))
                {
                    Err(FilterReason::BlockedHost(name))
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn check_ip(ip: IpAddr) -> Result<(), FilterReason> {
    if is_private_ip(&ip) {
        Err(FilterReason::PrivateAddress(ip))
    } else {
        Ok(())
    }
}

/// Returns true for addresses a crawler must not reach
///
/// Covers loopback, private, link-local, CGNAT, multicast, reserved,
/// benchmarking and "this network" ranges, plus IPv4-mapped IPv6 forms of
/// them.
///
/// # Arguments
///
/// * `ip` - Literal address taken from a URL host
///
/// # Returns
///
/// `true` if the address is not publicly routable
pub fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(v4: &Ipv4Addr) -> bool {
    let octets = v4.octets();
    v4.is_loopback()
        || v4.is_private()
        || v4.is_link_local()
        || v4.is_broadcast()
        || v4.is_multicast()
        // 0.0.0.0/8 "this network"
        || octets[0] == 0
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xC0) == 64)
        // 192.0.0.0/24
        || (octets[0] == 192 && octets[1] == 0 && octets[2] == 0)
        // 198.18.0.0/15 benchmarking
        || (octets[0] == 198 && (octets[1] & 0xFE) == 18)
        // 240.0.0.0/4 reserved
        || octets[0] >= 240
}

fn is_private_v6(v6: &Ipv6Addr) -> bool {
    if let Some(mapped) = v6.to_ipv4_mapped() {
        return is_private_v4(&mapped);
    }
    let first = v6.segments()[0];
    v6.is_loopback()
        || v6.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

/// Crawl scope rules derived from a job's depth-0 seed URLs
#[derive(Debug, Clone)]
pub struct ScopeRules {
    scope: CrawlScope,
    domains: HashSet<String>,
    prefixes: Vec<(String, String)>,
}

impl ScopeRules {
    /// Builds the rules for a job
    ///
    /// # Arguments
    ///
    /// * `scope` - The job's crawl scope
    /// * `seeds` - Depth-0 URLs; seeds without a host are ignored
    pub fn new<'a>(scope: CrawlScope, seeds: impl IntoIterator<Item = &'a Url>) -> Self {
        let mut domains = HashSet::new();
        let mut prefixes = Vec::new();

        for seed in seeds {
            let Some(host) = seed.host_str() else {
                continue;
            };
            let host = host.to_lowercase();
            domains.insert(host.strip_prefix("www.").unwrap_or(&host).to_string());
            prefixes.push((host, directory_prefix(seed.path())));
        }

        Self {
            scope,
            domains,
            prefixes,
        }
    }

    pub fn scope(&self) -> CrawlScope {
        self.scope
    }

    /// Returns true if `url` may be crawled under these rules
    ///
    /// # Arguments
    ///
    /// * `url` - Candidate URL
    ///
    /// # Returns
    ///
    /// `false` for a host-less URL, or one outside every seed's domain or
    /// directory as the scope requires
    pub fn allows(&self, url: &Url) -> bool {
        let Some(host) = url.host_str().map(str::to_lowercase) else {
            return false;
        };

        match self.scope {
            CrawlScope::Any => true,
            CrawlScope::Domain => self
                .domains
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{}", d))),
            CrawlScope::Subdirectory => self.prefixes.iter().any(|(seed_host, prefix)| {
                *seed_host == host
                    && (url.path() == prefix.trim_end_matches('/') || url.path().starts_with(prefix.as_str()))
            }),
        }
    }
}

/// Directory a seed path lives in, always ending with '/'
///
/// A last segment that looks like a file (`/docs/index.html`) is dropped; any
/// other path is treated as a directory (`/docs` -> `/docs/`).
fn directory_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, last)) if last.contains('.') => format!("{}/", parent),
        _ => format!("{}/", trimmed),
    }
}
