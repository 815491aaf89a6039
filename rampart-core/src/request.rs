//! Outbound request representation and canonicalization.

use std::collections::HashMap;
use std::time::Duration;

use http::Method;

use crate::policy::{BreakerConfig, CachingDecision};
use crate::transport::AbortHandle;

/// An outbound HTTP request as seen by the pipeline.
///
/// A bare URL string converts into a GET request with no headers; the
/// pipeline [canonicalizes](Request::canonicalize) every request once at the
/// start, after which it is treated as immutable.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method. Defaults to GET.
    pub method: Method,
    /// Target URL.
    pub url: String,
    /// Request headers. Canonicalization lower-cases the names and leaves
    /// values untouched.
    pub headers: HashMap<String, String>,
    /// Request body, sent verbatim by the transport.
    pub body: bytes::Bytes,
    /// Explicit idempotency override. When unset, GET/HEAD/OPTIONS are
    /// idempotent and everything else is not.
    pub idempotent: Option<bool>,
    /// Timeout for the transport call. Falls back to the pipeline default.
    pub timeout: Option<Duration>,
    /// Handle for aborting the outstanding transport call early.
    pub abort: Option<AbortHandle>,
    /// Per-call pipeline setting overrides.
    pub overrides: Option<RequestOverrides>,
}

impl Request {
    /// Creates a request with the given method and URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Request {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: bytes::Bytes::new(),
            idempotent: None,
            timeout: None,
            abort: None,
            overrides: None,
        }
    }

    /// Adds a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the request body.
    pub fn body(mut self, body: impl Into<bytes::Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Forces the idempotency classification.
    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    /// Sets the transport timeout for this call.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches an abort handle for early termination.
    pub fn abort_handle(mut self, handle: AbortHandle) -> Self {
        self.abort = Some(handle);
        self
    }

    /// Attaches per-call setting overrides.
    pub fn overrides(mut self, overrides: RequestOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Canonical form: header names lower-cased so every later stage finds
    /// what it looks for. Values are left untouched.
    pub fn canonicalize(mut self) -> Self {
        self.headers = self
            .headers
            .into_iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value))
            .collect();
        self
    }

    /// Whether repeating this request has no additional effect.
    ///
    /// An explicit flag wins. Otherwise GET, HEAD and OPTIONS qualify.
    /// PUT is idempotent by the RFC, but for retry and cache purposes it is
    /// better treated as if it were not.
    pub fn is_idempotent(&self) -> bool {
        if let Some(idempotent) = self.idempotent {
            return idempotent;
        }
        self.method == Method::GET || self.method == Method::HEAD || self.method == Method::OPTIONS
    }

    /// The `Accept` header value, if present (assumes canonical form).
    pub fn accept(&self) -> Option<&str> {
        self.headers.get("accept").map(String::as_str)
    }

    /// The target host (including port, when given), used as the default
    /// circuit breaker key.
    pub fn host(&self) -> &str {
        let rest = self
            .url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.url);
        rest.split(['/', '?']).next().unwrap_or(rest)
    }
}

impl From<&str> for Request {
    fn from(url: &str) -> Self {
        Request::new(Method::GET, url)
    }
}

impl From<String> for Request {
    fn from(url: String) -> Self {
        Request::new(Method::GET, url)
    }
}

/// Per-call overrides of pipeline settings.
///
/// A request carrying a non-empty set of overrides is re-routed through a
/// temporarily derived pipeline instance; the original instance is never
/// mutated.
#[derive(Debug, Clone, Default)]
pub struct RequestOverrides {
    /// Overrides the idempotent-path retry count.
    pub max_retries: Option<u32>,
    /// Enables or disables in-flight request collapsing.
    pub collapse_identical_requests: Option<bool>,
    /// Enables or disables serving of expired-but-stale entries.
    pub allow_serving_stale: Option<bool>,
    /// Overrides the cache response timeout.
    pub cache_response_timeout: Option<Duration>,
    /// Overrides the response size limit.
    pub max_response_size: Option<u64>,
    /// Overrides the fallback caching decision.
    pub default_caching: Option<CachingDecision>,
    /// Forces a caching decision regardless of response headers.
    pub force_caching: Option<CachingDecision>,
    /// Overrides the caching decision applied to captured 4xx errors.
    pub client_error_caching: Option<CachingDecision>,
    /// Reconfigures (`Some(Some(_))`) or disables (`Some(None)`) circuit
    /// breaking for the derived instance.
    pub circuit_breaking: Option<Option<BreakerConfig>>,
}

impl RequestOverrides {
    /// True when no override is set.
    pub fn is_empty(&self) -> bool {
        self.max_retries.is_none()
            && self.collapse_identical_requests.is_none()
            && self.allow_serving_stale.is_none()
            && self.cache_response_timeout.is_none()
            && self.max_response_size.is_none()
            && self.default_caching.is_none()
            && self.force_caching.is_none()
            && self.client_error_caching.is_none()
            && self.circuit_breaking.is_none()
    }
}
