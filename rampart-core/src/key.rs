//! Cache and deduplication keys.

use std::fmt;
use std::sync::Arc;

use crate::request::Request;

/// Identity of a request for caching and in-flight collapsing.
///
/// Derived from method, URL and the `Accept` header (when present):
/// `METHOD|url[|Accept:<accept>]`. Two requests share a key iff they are
/// cache-equivalent; headers other than `Accept` never influence it, so the
/// derivation is deterministic and order-independent. This does not cover
/// full `Vary` negotiation, but it differentiates representations well
/// enough for most services.
///
/// The key is `Arc`-backed, so cloning is a reference-count bump.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(Arc<str>);

impl CacheKey {
    /// Derives the key for a canonicalized request.
    pub fn from_request(request: &Request) -> Self {
        let mut key = format!("{}|{}", request.method, request.url);
        if let Some(accept) = request.accept() {
            key.push_str("|Accept:");
            key.push_str(accept);
        }
        CacheKey(key.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
