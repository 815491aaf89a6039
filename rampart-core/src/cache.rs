//! Cache boundary.

use async_trait::async_trait;

use crate::error::CacheResult;
use crate::key::CacheKey;
use crate::value::CacheEntry;

/// Pluggable cache store consulted by the pipeline for idempotent requests.
///
/// Implementations may be local or remote; cross-replica coherence is the
/// implementation's responsibility. Every operation is fallible, but the
/// pipeline absorbs cache failures: a failed or slow retrieval counts as a
/// miss, a failed store is skipped, and both are logged. Cache
/// unavailability must never fail the overall request.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Looks up an entry. `Ok(None)` is an ordinary miss.
    async fn retrieve(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>>;

    /// Stores an entry, replacing any previous one wholesale.
    async fn store(&self, key: &CacheKey, entry: CacheEntry) -> CacheResult<()>;

    /// Drops an entry if present.
    async fn evict(&self, key: &CacheKey) -> CacheResult<()>;
}

/// No-op cache for "caching disabled" configurations: always misses, stores
/// and evictions silently succeed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCache;

#[async_trait]
impl Cache for NullCache {
    async fn retrieve(&self, _key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        Ok(None)
    }

    async fn store(&self, _key: &CacheKey, _entry: CacheEntry) -> CacheResult<()> {
        Ok(())
    }

    async fn evict(&self, _key: &CacheKey) -> CacheResult<()> {
        Ok(())
    }
}
