//! URL handling module for Gleaner
//!
//! This module provides URL canonicalization (the key URL records are stored
//! under), host-key extraction for politeness bookkeeping, and the pre-fetch
//! scheme/SSRF/scope checks.

mod domain;
mod normalize;
mod validate;

pub use domain::{host_key, host_key_str, origin_of};
pub use normalize::{canonical_string, canonicalize, canonicalize_url};
pub use validate::{is_private_ip, FilterReason, ScopeRules, UrlValidator};
