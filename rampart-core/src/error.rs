//! Error taxonomy for the request pipeline.
//!
//! Two families live here:
//!
//! - [`Error`] - failures surfaced to callers of the pipeline, each variant
//!   carrying enough request context (method, URL) to diagnose without
//!   leaking a request object.
//! - [`CacheError`] - failures of the cache boundary. These are never
//!   surfaced: the pipeline logs them and treats the cache as having missed.

use std::time::Duration;

use http::{Method, StatusCode};
use thiserror::Error;

/// A failure raised by the pipeline or the underlying transport.
///
/// The type is `Clone` so that concurrent callers collapsed onto one
/// in-flight execution can all observe the same failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// Network-level failure reported by the transport.
    #[error("connection error during {method} {url}: {message}")]
    Connection {
        /// Request method.
        method: Method,
        /// Request URL.
        url: String,
        /// Transport-provided description of the failure.
        message: String,
        /// Cleared when the transport knows a repeat cannot succeed.
        retriable: bool,
    },

    /// The target answered with an error-indicating HTTP status (>= 400).
    ///
    /// Statuses in the 4xx range are unretriable: repeating a client error
    /// does not fix it. They are also the only error kind eligible for
    /// negative caching.
    #[error("HTTP error: status code {status} for {method} {url}")]
    Http {
        /// The error-indicating status code.
        status: StatusCode,
        /// Request method.
        method: Method,
        /// Request URL.
        url: String,
    },

    /// A timer elapsed before the transport call settled.
    #[error("{method} {url} timed out after {after:?}")]
    Timeout {
        /// Request method.
        method: Method,
        /// Request URL.
        url: String,
        /// The limit that elapsed.
        after: Duration,
    },

    /// The response body exceeded the configured size limit and the
    /// transfer was abandoned.
    #[error("response for {method} {url} exceeded {limit} bytes")]
    TooLarge {
        /// Request method.
        method: Method,
        /// Request URL.
        url: String,
        /// The configured maximum in bytes.
        limit: u64,
    },

    /// The caller aborted the outstanding request.
    #[error("{method} {url} was aborted by the caller")]
    Aborted {
        /// Request method.
        method: Method,
        /// Request URL.
        url: String,
    },

    /// The circuit breaker for the target is open; the call failed fast
    /// without reaching the transport.
    #[error("circuit open for {key}")]
    CircuitOpen {
        /// The breaker key, usually the target host.
        key: String,
    },

    /// The configured postprocess transform rejected the response.
    #[error("postprocessing failed for {method} {url}: {message}")]
    Postprocess {
        /// Request method.
        method: Method,
        /// Request URL.
        url: String,
        /// Description of the rejection.
        message: String,
    },
}

impl Error {
    /// The HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for HTTP status errors in the 4xx range.
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|status| status.is_client_error())
    }

    /// Whether an immediate repeat of the failed operation could succeed.
    ///
    /// Client errors, size-limit aborts, caller aborts and open circuits are
    /// unretriable; connection failures (unless flagged), server errors and
    /// transport timeouts are retriable.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Connection { retriable, .. } => *retriable,
            Error::Http { status, .. } => !status.is_client_error(),
            Error::Timeout { .. } => true,
            Error::TooLarge { .. }
            | Error::Aborted { .. }
            | Error::CircuitOpen { .. }
            | Error::Postprocess { .. } => false,
        }
    }
}

/// A failure of the cache boundary.
///
/// Cache errors are absorbed by the pipeline: a failed retrieval counts as a
/// miss, a failed store is skipped, and both are logged.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Internal cache error, state or computation failure.
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),

    /// Network interaction error while talking to a remote cache.
    #[error(transparent)]
    Connection(Box<dyn std::error::Error + Send + Sync>),

    /// The cache did not answer within the configured response timeout.
    #[error("cache did not answer within {0:?}")]
    Timeout(Duration),
}

/// Result of a cache boundary operation.
pub type CacheResult<T> = Result<T, CacheError>;
