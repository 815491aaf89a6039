//! Cache entry with expiration metadata.
//!
//! A [`CacheEntry`] wraps either a successful response or a captured client
//! error together with an absolute expiry and a stale-allowance flag. The
//! pipeline never mutates entries in place; refreshes replace them
//! wholesale.

use chrono::{DateTime, Utc};

use crate::error::Error;
use crate::response::Response;

/// What a cache entry records.
#[derive(Debug, Clone)]
pub enum CachedPayload {
    /// A successful response.
    Success(Response),
    /// A captured client error (4xx), re-raised on every hit until the
    /// entry expires.
    Failure(Error),
}

/// A single cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    payload: CachedPayload,
    expires: DateTime<Utc>,
    allow_stale: bool,
}

/// Lifecycle state of an entry at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Inside its time-to-live.
    Valid,
    /// Expired but eligible for stale serving while a refresh runs.
    Stale,
    /// Expired and not servable; treat as absent.
    Expired,
}

impl CacheEntry {
    /// Creates an entry.
    ///
    /// `allow_stale` is the inverse of the caching decision's
    /// must-revalidate directive.
    pub fn new(payload: CachedPayload, expires: DateTime<Utc>, allow_stale: bool) -> Self {
        CacheEntry {
            payload,
            expires,
            allow_stale,
        }
    }

    /// The recorded payload.
    pub fn payload(&self) -> &CachedPayload {
        &self.payload
    }

    /// Consumes the entry, returning the payload.
    pub fn into_payload(self) -> CachedPayload {
        self.payload
    }

    /// Absolute expiry time.
    pub fn expires(&self) -> DateTime<Utc> {
        self.expires
    }

    /// Whether the entry may be served after expiry.
    pub fn allow_stale(&self) -> bool {
        self.allow_stale
    }

    /// Evaluates the entry's lifecycle state at `now`.
    pub fn state_at(&self, now: DateTime<Utc>) -> EntryState {
        if now < self.expires {
            EntryState::Valid
        } else if self.allow_stale {
            EntryState::Stale
        } else {
            EntryState::Expired
        }
    }
}
