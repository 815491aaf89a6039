//! Caching decisions, the `Cache-Control` policy parser and circuit breaker
//! configuration.

use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a response should be cached.
///
/// Produced by [`parse_cache_control`] or supplied through configuration
/// (default, force and client-error policies).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachingDecision {
    /// Whether the response may be stored at all.
    pub cacheable: bool,
    /// How long the stored entry stays valid.
    #[serde(default, with = "humantime_serde")]
    pub time_to_live: Duration,
    /// When set, the entry must not be served after expiry; otherwise it is
    /// eligible for stale-while-revalidate.
    #[serde(default)]
    pub must_revalidate: bool,
}

impl CachingDecision {
    /// Decision that forbids storing the response.
    pub fn disabled() -> Self {
        CachingDecision {
            cacheable: false,
            time_to_live: Duration::ZERO,
            must_revalidate: false,
        }
    }

    /// Cacheable decision with the given time-to-live and stale serving
    /// allowed.
    pub fn for_ttl(time_to_live: Duration) -> Self {
        CachingDecision {
            cacheable: true,
            time_to_live,
            must_revalidate: false,
        }
    }

    /// Toggles the must-revalidate directive.
    pub fn with_must_revalidate(mut self, must_revalidate: bool) -> Self {
        self.must_revalidate = must_revalidate;
        self
    }
}

static RE_NO_CACHING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"no-cache|no-store").expect("hardcoded regex"));
static RE_MAX_AGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"max-age=(\d+)").expect("hardcoded regex"));
static RE_MUST_REVALIDATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"must-revalidate").expect("hardcoded regex"));

/// Derives a caching decision from response headers (canonical, lower-cased
/// names).
///
/// Returns `None` when there is no `Cache-Control` header or it says nothing
/// we understand; the caller then falls back to its configured default.
pub fn parse_cache_control(headers: &HashMap<String, String>) -> Option<CachingDecision> {
    let header = headers.get("cache-control")?;

    if RE_NO_CACHING.is_match(header) {
        return Some(CachingDecision::disabled());
    }

    let captures = RE_MAX_AGE.captures(header)?;
    let seconds: u64 = captures.get(1)?.as_str().parse().ok()?;
    Some(CachingDecision {
        cacheable: true,
        time_to_live: Duration::from_secs(seconds),
        must_revalidate: RE_MUST_REVALIDATE.is_match(header),
    })
}

/// Rolling-window circuit breaker configuration.
///
/// The window is divided into `buckets` sub-windows; success and failure
/// counts older than the window roll off. The breaker opens once both the
/// call volume and the error-rate threshold are exceeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Rolling window duration.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Number of sub-windows the window is divided into.
    pub buckets: u32,
    /// Error rate (percent of calls in the window) at which the breaker
    /// opens.
    pub error_threshold: u8,
    /// Minimum number of calls in the window before the threshold applies.
    pub volume_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            window: Duration::from_secs(10),
            buckets: 10,
            error_threshold: 50,
            volume_threshold: 20,
        }
    }
}
