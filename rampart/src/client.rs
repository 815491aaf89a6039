//! The request pipeline orchestrator.
//!
//! [`Client`] composes the engines around the injected transport:
//! canonicalization, idempotency classification, in-flight collapsing,
//! cache lookup and validity, retry and circuit breaking, postprocessing,
//! cache update and final resolution.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use http::Method;
use tracing::{Instrument, info_span};

use rampart_core::{
    Cache, CacheEntry, CacheError, CacheKey, CacheResult, CacheStatus, CachedPayload, Clock,
    EntryState, Error, NullCache, Request, RequestOverrides, Response, SystemClock, Transport,
    parse_cache_control,
};

use crate::breaker::BreakerRegistry;
use crate::collapse::Collapse;
use crate::config::Config;
use crate::lru::LruCache;
use crate::refresh::RefreshQueue;
use crate::retry::{RetryPolicy, retry};

/// The settled result of one pipeline execution, shared between collapsed
/// callers.
///
/// `expires` doubles as the already-cached marker: an outcome served from
/// the cache carries its entry's expiry and is never postprocessed or
/// stored again.
#[derive(Debug, Clone)]
struct Outcome {
    payload: Result<Response, Error>,
    expires: Option<DateTime<Utc>>,
    processed: bool,
}

impl Outcome {
    fn fresh(payload: Result<Response, Error>) -> Self {
        Outcome {
            payload,
            expires: None,
            processed: false,
        }
    }

    fn from_entry(entry: CacheEntry, status: CacheStatus) -> Self {
        let expires = Some(entry.expires());
        let payload = match entry.into_payload() {
            CachedPayload::Success(mut response) => {
                response.cache_status = status;
                Ok(response)
            }
            CachedPayload::Failure(error) => Err(error),
        };
        Outcome {
            payload,
            expires,
            processed: true,
        }
    }
}

/// Resilient request pipeline over an injected [`Transport`].
///
/// Cheap to clone; clones share the transport, cache, in-flight registry,
/// breakers and refresh queue.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    config: Arc<Config>,
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
    in_flight: Collapse<CacheKey, Outcome>,
    breakers: Option<Arc<BreakerRegistry>>,
    refreshes: RefreshQueue,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("breakers", &self.breakers)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

impl Client {
    /// Pipeline with the default configuration, the bundled LRU cache and
    /// the system clock.
    pub fn new(transport: impl Transport) -> Self {
        Client::builder(transport).build()
    }

    /// Starts building a customized pipeline.
    pub fn builder(transport: impl Transport) -> ClientBuilder {
        ClientBuilder {
            transport: Arc::new(transport),
            config: Config::default(),
            cache: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Runs a request through the full pipeline.
    ///
    /// A request carrying per-call overrides is routed through a derived
    /// pipeline instance built from the adjusted configuration; this
    /// instance is left untouched.
    pub async fn request(&self, request: impl Into<Request>) -> Result<Response, Error> {
        let mut request = request.into();
        let derived = match request.overrides.take() {
            Some(overrides) if !overrides.is_empty() => Some(self.with_overrides(&overrides)),
            _ => None,
        };
        let client = derived.as_ref().unwrap_or(self);

        let request = request.canonicalize();
        let span = info_span!("request", method = %request.method, url = %request.url);
        client.run(request).instrument(span).await
    }

    /// A derived pipeline with `overrides` layered over this instance's
    /// configuration. Shares the transport, cache, clock and refresh queue;
    /// collapsing and breaker state start fresh.
    pub fn with_overrides(&self, overrides: &RequestOverrides) -> Client {
        let config = Arc::new(self.config.apply(overrides));
        Client {
            transport: Arc::clone(&self.transport),
            cache: Arc::clone(&self.cache),
            clock: Arc::clone(&self.clock),
            in_flight: Collapse::new(),
            breakers: config
                .circuit_breaking
                .clone()
                .map(|breaking| Arc::new(BreakerRegistry::new(breaking, Arc::clone(&self.clock)))),
            refreshes: self.refreshes.clone(),
            config,
        }
    }

    /// Drops the cache entry for the given request, if any.
    pub async fn evict(&self, request: impl Into<Request>) -> CacheResult<()> {
        let request = request.into().canonicalize();
        let key = CacheKey::from_request(&request);
        self.cache.evict(&key).await
    }

    /// Waits until every background refresh spawned so far has finished.
    pub async fn wait_for_refreshes(&self) {
        self.refreshes.wait_idle().await;
    }

    async fn run(&self, request: Request) -> Result<Response, Error> {
        if !request.is_idempotent() {
            tracing::debug!("non-idempotent request, bypassing cache and collapsing");
            let outcome = self.fetch(request, false).await?;
            let outcome = self.postprocess(outcome)?;
            return outcome.payload;
        }

        let key = CacheKey::from_request(&request);
        let outcome = if self.config.collapse_identical_requests {
            let client = self.clone();
            let collapsed_key = key.clone();
            self.in_flight
                .run(key, move || client.execute_idempotent(request, collapsed_key))
                .await?
        } else {
            self.clone().execute_idempotent(request, key).await?
        };
        outcome.payload
    }

    /// The cached path: lookup, validity check, fetch on miss, postprocess
    /// and cache update. Runs at most once per key at a time when
    /// collapsing is enabled.
    async fn execute_idempotent(self, request: Request, key: CacheKey) -> Result<Outcome, Error> {
        if let Some(entry) = self.lookup(&key).await {
            match entry.state_at(self.clock.now()) {
                EntryState::Valid => {
                    tracing::debug!(key = %key, "cache hit");
                    return Ok(Outcome::from_entry(entry, CacheStatus::Cached));
                }
                EntryState::Stale if self.config.allow_serving_stale => {
                    tracing::debug!(key = %key, "serving stale, refreshing in background");
                    self.spawn_refresh(request, key);
                    return Ok(Outcome::from_entry(entry, CacheStatus::Stale));
                }
                EntryState::Stale | EntryState::Expired => {
                    tracing::debug!(key = %key, "cache entry expired");
                }
            }
        }

        let outcome = self.fetch(request, true).await?;
        let outcome = self.postprocess(outcome)?;
        Ok(self.update_cache(&key, outcome).await)
    }

    /// Bounded cache retrieval. Errors and timeouts count as misses.
    async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        let retrieval = self.cache.retrieve(key);
        let result = match self.config.cache_response_timeout {
            Some(limit) => match tokio::time::timeout(limit, retrieval).await {
                Ok(result) => result,
                Err(_) => Err(CacheError::Timeout(limit)),
            },
            None => retrieval.await,
        };
        match result {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(key = %key, %error, "cache retrieval failed, treating as miss");
                None
            }
        }
    }

    /// Transport invocation through the breaker and, on the idempotent
    /// path, the retry engine. Client errors (4xx) are captured as
    /// cacheable outcomes; everything else propagates.
    async fn fetch(&self, request: Request, with_retry: bool) -> Result<Outcome, Error> {
        let policy = RetryPolicy {
            max_retries: if with_retry { self.config.max_retries } else { 0 },
            delay: self.config.retry_delay,
        };
        let client = self.clone();
        let attempt_request = request.clone();
        let attempt = move || {
            let client = client.clone();
            let request = attempt_request.clone();
            async move { client.dispatch(request).await }
        };

        let result = match &self.breakers {
            Some(registry) => {
                registry
                    .call(request.host(), || retry(policy, attempt))
                    .await
            }
            None => retry(policy, attempt).await,
        };

        match result {
            Ok(response) => Ok(Outcome::fresh(Ok(response))),
            Err(error) if error.is_client_error() => {
                tracing::debug!(%error, "capturing client error for negative caching");
                Ok(Outcome::fresh(Err(error)))
            }
            Err(error) => Err(error),
        }
    }

    /// One transport call with timeout, abort, status and size guards.
    async fn dispatch(&self, request: Request) -> Result<Response, Error> {
        let method = request.method.clone();
        let url = request.url.clone();
        let timeout = request.timeout.or(self.config.default_timeout);
        let abort = request.abort.clone();

        let call = self.transport.send(request);
        let guarded = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::Timeout {
                        method: method.clone(),
                        url: url.clone(),
                        after: limit,
                    }),
                },
                None => call.await,
            }
        };
        let result = match abort {
            Some(handle) => tokio::select! {
                _ = handle.aborted() => Err(Error::Aborted {
                    method: method.clone(),
                    url: url.clone(),
                }),
                result = guarded => result,
            },
            None => guarded.await,
        };

        let response = result?;
        if response.status.as_u16() >= 400 {
            return Err(Error::Http {
                status: response.status,
                method,
                url,
            });
        }
        if let Some(limit) = self.config.max_response_size
            && response.body.len() as u64 > limit
        {
            return Err(Error::TooLarge { method, url, limit });
        }
        Ok(response)
    }

    /// Applies the configured transform to a fresh success payload, once.
    /// Cached outcomes and captured errors pass through untouched.
    fn postprocess(&self, mut outcome: Outcome) -> Result<Outcome, Error> {
        if outcome.processed {
            return Ok(outcome);
        }
        outcome.processed = true;
        let Some(transform) = &self.config.postprocess else {
            return Ok(outcome);
        };
        outcome.payload = match outcome.payload {
            Ok(response) => Ok(transform(response)?),
            Err(error) => Err(error),
        };
        Ok(outcome)
    }

    /// Stores a freshly computed outcome when the effective caching
    /// decision allows it. Storage failures are logged, never fatal.
    async fn update_cache(&self, key: &CacheKey, mut outcome: Outcome) -> Outcome {
        if outcome.expires.is_some() {
            return outcome;
        }
        let decision = match &outcome.payload {
            Err(_) => self.config.client_error_caching.clone(),
            Ok(response) => self
                .config
                .force_caching
                .clone()
                .or_else(|| parse_cache_control(&response.headers))
                .unwrap_or_else(|| self.config.default_caching.clone()),
        };
        if !decision.cacheable {
            return outcome;
        }

        let ttl = TimeDelta::from_std(decision.time_to_live).unwrap_or(TimeDelta::MAX);
        let expires = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let allow_stale = !decision.must_revalidate;
        let payload = match &outcome.payload {
            Ok(response) => CachedPayload::Success(response.clone()),
            Err(error) => CachedPayload::Failure(error.clone()),
        };
        if let Err(error) = self
            .cache
            .store(key, CacheEntry::new(payload, expires, allow_stale))
            .await
        {
            tracing::warn!(key = %key, %error, "cache store failed, skipping");
        }
        outcome.expires = Some(expires);
        outcome
    }

    /// Fire-and-forget refresh of a stale entry: full fetch, postprocess
    /// and cache update. Failures are logged and the stale entry is left in
    /// place.
    fn spawn_refresh(&self, request: Request, key: CacheKey) {
        let client = self.clone();
        let task_key = key.clone();
        self.refreshes.spawn(key, async move {
            let refreshed = match client.fetch(request, true).await {
                Ok(outcome) => client.postprocess(outcome),
                Err(error) => Err(error),
            };
            match refreshed {
                Ok(outcome) => {
                    client.update_cache(&task_key, outcome).await;
                }
                Err(error) => {
                    tracing::warn!(key = %task_key, %error, "background refresh failed");
                }
            }
        });
    }
}

// Verb shorthands.
impl Client {
    /// GET `url` through the pipeline.
    pub async fn get(&self, url: impl Into<String>) -> Result<Response, Error> {
        self.request(Request::new(Method::GET, url)).await
    }

    /// HEAD `url` through the pipeline.
    pub async fn head(&self, url: impl Into<String>) -> Result<Response, Error> {
        self.request(Request::new(Method::HEAD, url)).await
    }

    /// DELETE `url` through the pipeline.
    pub async fn delete(&self, url: impl Into<String>) -> Result<Response, Error> {
        self.request(Request::new(Method::DELETE, url)).await
    }

    /// POST `body` to `url` through the pipeline.
    pub async fn post(
        &self,
        url: impl Into<String>,
        body: impl Into<rampart_core::Bytes>,
    ) -> Result<Response, Error> {
        self.request(Request::new(Method::POST, url).body(body)).await
    }

    /// PUT `body` to `url` through the pipeline.
    pub async fn put(
        &self,
        url: impl Into<String>,
        body: impl Into<rampart_core::Bytes>,
    ) -> Result<Response, Error> {
        self.request(Request::new(Method::PUT, url).body(body)).await
    }

    /// PATCH `body` to `url` through the pipeline.
    pub async fn patch(
        &self,
        url: impl Into<String>,
        body: impl Into<rampart_core::Bytes>,
    ) -> Result<Response, Error> {
        self.request(Request::new(Method::PATCH, url).body(body)).await
    }
}

/// Configures and assembles a [`Client`].
pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    config: Config,
    cache: Option<Arc<dyn Cache>>,
    clock: Arc<dyn Clock>,
}

impl ClientBuilder {
    /// Sets the pipeline configuration.
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Installs a cache implementation. Defaults to the bundled
    /// [`LruCache`].
    pub fn cache(mut self, cache: impl Cache + 'static) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Disables caching entirely.
    pub fn no_cache(mut self) -> Self {
        self.cache = Some(Arc::new(NullCache));
        self
    }

    /// Replaces the time source. Mostly useful in tests.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Assembles the pipeline.
    pub fn build(self) -> Client {
        let config = Arc::new(self.config);
        Client {
            transport: self.transport,
            cache: self.cache.unwrap_or_else(|| Arc::new(LruCache::default())),
            in_flight: Collapse::new(),
            breakers: config
                .circuit_breaking
                .clone()
                .map(|breaking| Arc::new(BreakerRegistry::new(breaking, Arc::clone(&self.clock)))),
            refreshes: RefreshQueue::new(),
            clock: self.clock,
            config,
        }
    }
}
