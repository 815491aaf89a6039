#![warn(missing_docs)]
//! # rampart
//!
//! A resilience layer over any asynchronous HTTP transport. Rampart wraps
//! an injected [`Transport`] with the protections a service calling
//! flaky upstreams needs:
//!
//! - **Caching** with time-to-live, `Cache-Control` awareness and
//!   stale-while-revalidate serving
//! - **Collapsing** of concurrent identical requests onto one in-flight
//!   execution
//! - **Retry** of retriable failures with a bounded budget
//! - **Circuit breaking** per target host with fast-fail under persistent
//!   downstream failure
//! - **Negative caching** of 4xx responses so broken endpoints are not
//!   hammered
//!
//! ## Example
//!
//! ```no_run
//! use rampart::{Client, FnTransport, Request, Response, Error};
//! use http::StatusCode;
//!
//! # async fn example() -> Result<(), Error> {
//! let transport = FnTransport::new(|_request: Request| async move {
//!     // Delegate to a real HTTP client here.
//!     Ok(Response::new(StatusCode::OK).body("hello"))
//! });
//! let client = Client::new(transport);
//!
//! let response = client.get("http://api.example.com/things").await?;
//! assert_eq!(response.text(), "hello");
//! // A repeat within the entry's time-to-live is served from cache.
//! let _again = client.get("http://api.example.com/things").await?;
//! # Ok(())
//! # }
//! ```
//!
//! Only idempotent requests (GET, HEAD, OPTIONS, or anything explicitly
//! flagged) are cached, collapsed and retried; everything else goes
//! straight to the transport under the circuit breaker.

pub mod breaker;
pub mod client;
pub mod collapse;
pub mod config;
pub mod lru;
pub mod refresh;
pub mod retry;

pub use breaker::{BreakerRegistry, CircuitBreaker};
pub use client::{Client, ClientBuilder};
pub use collapse::Collapse;
pub use config::{Config, Postprocess};
pub use lru::LruCache;
pub use refresh::RefreshQueue;
pub use retry::{RetryPolicy, retry};

pub use rampart_core::{
    AbortHandle, BreakerConfig, Bytes, Cache, CacheEntry, CacheError, CacheKey, CacheResult,
    CacheStatus, CachedPayload, CachingDecision, Clock, EntryState, Error, FnTransport,
    ManualClock, NullCache, Request, RequestOverrides, Response, SystemClock, Transport,
    parse_cache_control,
};
