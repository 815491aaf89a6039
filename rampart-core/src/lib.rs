#![warn(missing_docs)]
//! # rampart-core
//!
//! Core traits and types for the Rampart resilient HTTP pipeline.
//!
//! This crate defines the boundaries the pipeline in `rampart` is built
//! against, keeping it **transport-agnostic** and **store-agnostic**:
//!
//! - [`Transport`] - the injected HTTP client that performs the actual
//!   network exchange
//! - [`Cache`] - the pluggable store for responses and captured client
//!   errors
//! - [`Clock`] - the time source expiry and breaker windows are computed
//!   against, replaceable in tests
//!
//! Alongside the traits live the data types that cross them: [`Request`]
//! and [`Response`], the [`CacheKey`] identity, the [`CacheEntry`] value
//! with its lifecycle states, the [`Error`] taxonomy and the caching
//! policy machinery ([`CachingDecision`], [`parse_cache_control`],
//! [`BreakerConfig`]).

pub mod cache;
pub mod clock;
pub mod error;
pub mod key;
pub mod policy;
pub mod request;
pub mod response;
pub mod transport;
pub mod value;

pub use cache::{Cache, NullCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CacheError, CacheResult, Error};
pub use key::CacheKey;
pub use policy::{BreakerConfig, CachingDecision, parse_cache_control};
pub use request::{Request, RequestOverrides};
pub use response::{CacheStatus, Response};
pub use transport::{AbortHandle, FnTransport, Transport};
pub use value::{CacheEntry, CachedPayload, EntryState};

pub use bytes::Bytes;
