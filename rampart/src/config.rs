//! Pipeline configuration.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rampart_core::{BreakerConfig, CachingDecision, Error, RequestOverrides, Response};

/// Transform applied once to every freshly fetched response before it is
/// cached or returned. Cached payloads are already transformed and are never
/// run through it again.
pub type Postprocess = Arc<dyn Fn(Response) -> Result<Response, Error> + Send + Sync>;

/// Settings of a pipeline instance.
///
/// The defaults are deliberately conservative: two retries, collapsing and
/// stale serving on, a five second fallback time-to-live and circuit
/// breaking at a 50 % error rate.
#[derive(Clone)]
pub struct Config {
    /// Extra transport attempts after a retriable failure on the idempotent
    /// path.
    pub max_retries: u32,
    /// Pause between attempts. `None` retries immediately.
    pub retry_delay: Option<Duration>,
    /// Collapse concurrent identical idempotent requests onto one in-flight
    /// execution.
    pub collapse_identical_requests: bool,
    /// Serve expired entries while a background refresh runs, unless the
    /// entry demands revalidation.
    pub allow_serving_stale: bool,
    /// How long a cache retrieval may take before it counts as a miss.
    /// `None` waits indefinitely.
    pub cache_response_timeout: Option<Duration>,
    /// Upper bound on response body size in bytes. `None` is unlimited.
    pub max_response_size: Option<u64>,
    /// Transport timeout applied when the request does not carry its own.
    pub default_timeout: Option<Duration>,
    /// Fallback caching decision when the response headers say nothing.
    pub default_caching: CachingDecision,
    /// When set, overrides whatever the response headers say.
    pub force_caching: Option<CachingDecision>,
    /// Caching decision applied to captured client errors (4xx).
    pub client_error_caching: CachingDecision,
    /// Per-host circuit breaking. `None` disables it.
    pub circuit_breaking: Option<BreakerConfig>,
    /// Optional response transform, applied exactly once per payload.
    pub postprocess: Option<Postprocess>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_retries: 2,
            retry_delay: None,
            collapse_identical_requests: true,
            allow_serving_stale: true,
            cache_response_timeout: Some(Duration::from_millis(500)),
            max_response_size: Some(1024 * 1024),
            default_timeout: Some(Duration::from_secs(2)),
            default_caching: CachingDecision::for_ttl(Duration::from_secs(5)),
            force_caching: None,
            client_error_caching: CachingDecision::for_ttl(Duration::from_secs(60))
                .with_must_revalidate(true),
            circuit_breaking: Some(BreakerConfig::default()),
            postprocess: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .field("collapse_identical_requests", &self.collapse_identical_requests)
            .field("allow_serving_stale", &self.allow_serving_stale)
            .field("cache_response_timeout", &self.cache_response_timeout)
            .field("max_response_size", &self.max_response_size)
            .field("default_timeout", &self.default_timeout)
            .field("default_caching", &self.default_caching)
            .field("force_caching", &self.force_caching)
            .field("client_error_caching", &self.client_error_caching)
            .field("circuit_breaking", &self.circuit_breaking)
            .field("postprocess", &self.postprocess.as_ref().map(|_| "..."))
            .finish()
    }
}

impl Config {
    /// Sets the retry count.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the pause between retry attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Enables or disables in-flight request collapsing.
    pub fn collapse_identical_requests(mut self, enabled: bool) -> Self {
        self.collapse_identical_requests = enabled;
        self
    }

    /// Enables or disables stale serving.
    pub fn allow_serving_stale(mut self, enabled: bool) -> Self {
        self.allow_serving_stale = enabled;
        self
    }

    /// Sets the cache retrieval timeout.
    pub fn cache_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.cache_response_timeout = timeout;
        self
    }

    /// Sets the response size limit.
    pub fn max_response_size(mut self, limit: Option<u64>) -> Self {
        self.max_response_size = limit;
        self
    }

    /// Sets the fallback transport timeout.
    pub fn default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Sets the fallback caching decision.
    pub fn default_caching(mut self, decision: CachingDecision) -> Self {
        self.default_caching = decision;
        self
    }

    /// Forces a caching decision regardless of response headers.
    pub fn force_caching(mut self, decision: Option<CachingDecision>) -> Self {
        self.force_caching = decision;
        self
    }

    /// Sets the caching decision for captured client errors.
    pub fn client_error_caching(mut self, decision: CachingDecision) -> Self {
        self.client_error_caching = decision;
        self
    }

    /// Reconfigures or disables circuit breaking.
    pub fn circuit_breaking(mut self, config: Option<BreakerConfig>) -> Self {
        self.circuit_breaking = config;
        self
    }

    /// Installs a postprocess transform.
    pub fn postprocess<F>(mut self, transform: F) -> Self
    where
        F: Fn(Response) -> Result<Response, Error> + Send + Sync + 'static,
    {
        self.postprocess = Some(Arc::new(transform));
        self
    }

    /// This configuration with per-call overrides layered on top.
    pub fn apply(&self, overrides: &RequestOverrides) -> Config {
        let mut config = self.clone();
        if let Some(max_retries) = overrides.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(collapse) = overrides.collapse_identical_requests {
            config.collapse_identical_requests = collapse;
        }
        if let Some(stale) = overrides.allow_serving_stale {
            config.allow_serving_stale = stale;
        }
        if let Some(timeout) = overrides.cache_response_timeout {
            config.cache_response_timeout = Some(timeout);
        }
        if let Some(limit) = overrides.max_response_size {
            config.max_response_size = Some(limit);
        }
        if let Some(decision) = &overrides.default_caching {
            config.default_caching = decision.clone();
        }
        if let Some(decision) = &overrides.force_caching {
            config.force_caching = Some(decision.clone());
        }
        if let Some(decision) = &overrides.client_error_caching {
            config.client_error_caching = decision.clone();
        }
        if let Some(breaking) = &overrides.circuit_breaking {
            config.circuit_breaking = breaking.clone();
        }
        config
    }
}
