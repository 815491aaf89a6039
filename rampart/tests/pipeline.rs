//! End-to-end pipeline behavior against a scripted transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use http::StatusCode;
use rampart::{
    AbortHandle, BreakerConfig, Cache, CacheEntry, CacheError, CacheKey, CacheResult, CacheStatus,
    CachingDecision, Client, Config, Error, FnTransport, ManualClock, Request, RequestOverrides,
    Response, Transport,
};
use tokio::sync::Semaphore;

/// Transport that counts invocations and answers 200 with body `hit-{n}`.
fn counting_transport(hits: Arc<AtomicUsize>) -> impl Transport {
    FnTransport::new(move |_request: Request| {
        let hits = Arc::clone(&hits);
        async move {
            let n = hits.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(StatusCode::OK).body(format!("hit-{n}")))
        }
    })
}

#[tokio::test]
async fn fresh_then_cached() {
    let hits = Arc::new(AtomicUsize::new(0));
    let client = Client::new(counting_transport(Arc::clone(&hits)));

    let first = client.get("http://svc/items").await.unwrap();
    assert_eq!(first.cache_status, CacheStatus::Fresh);
    assert_eq!(first.text(), "hit-0");

    let second = client.get("http://svc/items").await.unwrap();
    assert_eq!(second.cache_status, CacheStatus::Cached);
    assert_eq!(second.text(), "hit-0");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn stale_serving_triggers_one_background_refresh() {
    let hits = Arc::new(AtomicUsize::new(0));
    let clock = ManualClock::default();
    let client = Client::builder(counting_transport(Arc::clone(&hits)))
        .clock(clock.clone())
        .build();

    let first = client.get("http://svc/items").await.unwrap();
    assert_eq!(first.cache_status, CacheStatus::Fresh);

    clock.advance(Duration::from_secs(1));
    let second = client.get("http://svc/items").await.unwrap();
    assert_eq!(second.cache_status, CacheStatus::Cached);

    // Past the five second time-to-live: stale is served immediately and
    // exactly one refresh runs behind the scenes.
    clock.advance(Duration::from_secs(5));
    let third = client.get("http://svc/items").await.unwrap();
    assert_eq!(third.cache_status, CacheStatus::Stale);
    assert_eq!(third.text(), "hit-0");

    client.wait_for_refreshes().await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    let fourth = client.get("http://svc/items").await.unwrap();
    assert_eq!(fourth.cache_status, CacheStatus::Cached);
    assert_eq!(fourth.text(), "hit-1");
}

#[tokio::test]
async fn must_revalidate_blocks_on_a_fresh_fetch() {
    let hits = Arc::new(AtomicUsize::new(0));
    let clock = ManualClock::default();
    let config = Config::default().default_caching(
        CachingDecision::for_ttl(Duration::from_secs(5)).with_must_revalidate(true),
    );
    let client = Client::builder(counting_transport(Arc::clone(&hits)))
        .config(config)
        .clock(clock.clone())
        .build();

    client.get("http://svc/items").await.unwrap();
    clock.advance(Duration::from_secs(6));
    let after_expiry = client.get("http://svc/items").await.unwrap();
    assert_eq!(after_expiry.cache_status, CacheStatus::Fresh);
    assert_eq!(after_expiry.text(), "hit-1");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn client_errors_are_negatively_cached() {
    let hits = Arc::new(AtomicUsize::new(0));
    let clock = ManualClock::default();
    let counter = Arc::clone(&hits);
    let transport = FnTransport::new(move |_request: Request| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(StatusCode::NOT_FOUND))
        }
    });
    let client = Client::builder(transport).clock(clock.clone()).build();

    let first = client.get("http://svc/missing").await.unwrap_err();
    assert_eq!(first.status(), Some(StatusCode::NOT_FOUND));
    // Unretriable, so a single transport call despite the retry budget.
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // Re-raised from the cache without touching the transport.
    let second = client.get("http://svc/missing").await.unwrap_err();
    assert_eq!(second.status(), Some(StatusCode::NOT_FOUND));
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // The sixty second error entry demands revalidation once expired.
    clock.advance(Duration::from_secs(61));
    client.get("http://svc/missing").await.unwrap_err();
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn accept_header_differentiates_cache_entries() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let transport = FnTransport::new(move |request: Request| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let accept = request.accept().unwrap_or("none").to_string();
            Ok(Response::new(StatusCode::OK).body(accept))
        }
    });
    let client = Client::new(transport);

    let json = client
        .request(Request::from("http://svc/doc").header("Accept", "application/json"))
        .await
        .unwrap();
    let xml = client
        .request(Request::from("http://svc/doc").header("Accept", "text/xml"))
        .await
        .unwrap();
    assert_eq!(json.cache_status, CacheStatus::Fresh);
    assert_eq!(xml.cache_status, CacheStatus::Fresh);
    assert_eq!(json.text(), "application/json");
    assert_eq!(xml.text(), "text/xml");
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_identical_requests_collapse() {
    let hits = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let counter = Arc::clone(&hits);
    let transport_gate = Arc::clone(&gate);
    let transport = FnTransport::new(move |_request: Request| {
        let counter = Arc::clone(&counter);
        let gate = Arc::clone(&transport_gate);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let _permit = gate.acquire().await;
            Ok(Response::new(StatusCode::OK).body(format!("hit-{n}")))
        }
    });
    let client = Client::new(transport);

    let mut callers = Vec::new();
    for _ in 0..3 {
        let client = client.clone();
        callers.push(tokio::spawn(async move {
            client.get("http://svc/slow").await
        }));
    }
    tokio::task::yield_now().await;
    gate.add_permits(1);

    for caller in callers {
        let response = caller.await.unwrap().unwrap();
        assert_eq!(response.text(), "hit-0");
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn collapsing_is_key_sensitive() {
    let hits = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let counter = Arc::clone(&hits);
    let transport_gate = Arc::clone(&gate);
    let transport = FnTransport::new(move |_request: Request| {
        let counter = Arc::clone(&counter);
        let gate = Arc::clone(&transport_gate);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let _permit = gate.acquire().await;
            Ok(Response::new(StatusCode::OK))
        }
    });
    let client = Client::new(transport);

    let mut callers = Vec::new();
    for url in ["http://svc/a", "http://svc/b"] {
        let client = client.clone();
        callers.push(tokio::spawn(async move { client.get(url).await }));
    }
    tokio::task::yield_now().await;
    gate.add_permits(2);

    for caller in callers {
        caller.await.unwrap().unwrap();
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn non_idempotent_requests_bypass_cache_and_collapsing() {
    let hits = Arc::new(AtomicUsize::new(0));
    let client = Client::new(counting_transport(Arc::clone(&hits)));

    let first = client.post("http://svc/orders", "payload").await.unwrap();
    let second = client.post("http://svc/orders", "payload").await.unwrap();
    assert_eq!(first.cache_status, CacheStatus::Fresh);
    assert_eq!(second.cache_status, CacheStatus::Fresh);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn retry_recovers_from_transient_server_errors() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let transport = FnTransport::new(move |_request: Request| {
        let counter = Arc::clone(&counter);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Ok(Response::new(StatusCode::INTERNAL_SERVER_ERROR))
            } else {
                Ok(Response::new(StatusCode::OK).body("recovered"))
            }
        }
    });
    let client = Client::new(transport);

    let response = client.get("http://svc/flaky").await.unwrap();
    assert_eq!(response.text(), "recovered");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unretriable_failures_are_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let transport = FnTransport::new(move |_request: Request| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(StatusCode::BAD_REQUEST))
        }
    });
    let client = Client::builder(transport).no_cache().build();

    let error = client.get("http://svc/broken").await.unwrap_err();
    assert_eq!(error.status(), Some(StatusCode::BAD_REQUEST));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn open_circuit_fails_fast_per_host() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let transport = FnTransport::new(move |request: Request| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            if request.host() == "down" {
                Err(Error::Connection {
                    method: request.method,
                    url: request.url,
                    message: "refused".into(),
                    retriable: true,
                })
            } else {
                Ok(Response::new(StatusCode::OK))
            }
        }
    });
    let config = Config::default()
        .max_retries(0)
        .circuit_breaking(Some(BreakerConfig {
            volume_threshold: 4,
            ..BreakerConfig::default()
        }));
    let client = Client::builder(transport)
        .config(config)
        .no_cache()
        .clock(ManualClock::default())
        .build();

    for _ in 0..4 {
        let error = client.get("http://down/resource").await.unwrap_err();
        assert!(matches!(error, Error::Connection { .. }));
    }
    assert_eq!(hits.load(Ordering::SeqCst), 4);

    // Breaker for the failing host is open: fast fail, no transport call.
    let rejected = client.get("http://down/resource").await.unwrap_err();
    assert!(matches!(rejected, Error::CircuitOpen { .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 4);

    // A different host is unaffected.
    client.get("http://up/resource").await.unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 5);
}

struct FailingCache;

#[async_trait]
impl Cache for FailingCache {
    async fn retrieve(&self, _key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        Err(CacheError::Internal("cache down".into()))
    }

    async fn store(&self, _key: &CacheKey, _entry: CacheEntry) -> CacheResult<()> {
        Err(CacheError::Internal("cache down".into()))
    }

    async fn evict(&self, _key: &CacheKey) -> CacheResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn cache_failures_never_fail_the_request() {
    let hits = Arc::new(AtomicUsize::new(0));
    let client = Client::builder(counting_transport(Arc::clone(&hits)))
        .cache(FailingCache)
        .build();

    let first = client.get("http://svc/items").await.unwrap();
    let second = client.get("http://svc/items").await.unwrap();
    assert_eq!(first.cache_status, CacheStatus::Fresh);
    assert_eq!(second.cache_status, CacheStatus::Fresh);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

struct SlowCache;

#[async_trait]
impl Cache for SlowCache {
    async fn retrieve(&self, _key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(None)
    }

    async fn store(&self, _key: &CacheKey, _entry: CacheEntry) -> CacheResult<()> {
        Ok(())
    }

    async fn evict(&self, _key: &CacheKey) -> CacheResult<()> {
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn unresponsive_cache_counts_as_a_miss() {
    let hits = Arc::new(AtomicUsize::new(0));
    let client = Client::builder(counting_transport(Arc::clone(&hits)))
        .cache(SlowCache)
        .build();

    let response = client.get("http://svc/items").await.unwrap();
    assert_eq!(response.cache_status, CacheStatus::Fresh);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_cancels_an_outstanding_request() {
    let gate = Arc::new(Semaphore::new(0));
    let transport_gate = Arc::clone(&gate);
    let transport = FnTransport::new(move |_request: Request| {
        let gate = Arc::clone(&transport_gate);
        async move {
            let _permit = gate.acquire().await;
            Ok(Response::new(StatusCode::OK))
        }
    });
    let client = Client::new(transport);

    let handle = AbortHandle::new();
    let request = Request::from("http://svc/slow").abort_handle(handle.clone());
    let caller = {
        let client = client.clone();
        tokio::spawn(async move { client.request(request).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.abort();

    let error = caller.await.unwrap().unwrap_err();
    assert!(matches!(error, Error::Aborted { .. }));
}

#[tokio::test]
async fn per_call_overrides_leave_the_instance_untouched() {
    let hits = Arc::new(AtomicUsize::new(0));
    let client = Client::new(counting_transport(Arc::clone(&hits)));

    let no_caching = RequestOverrides {
        default_caching: Some(CachingDecision::disabled()),
        ..RequestOverrides::default()
    };
    for expected in ["hit-0", "hit-1"] {
        let response = client
            .request(Request::from("http://svc/live").overrides(no_caching.clone()))
            .await
            .unwrap();
        assert_eq!(response.cache_status, CacheStatus::Fresh);
        assert_eq!(response.text(), expected);
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // The base instance still caches.
    client.get("http://svc/live").await.unwrap();
    let cached = client.get("http://svc/live").await.unwrap();
    assert_eq!(cached.cache_status, CacheStatus::Cached);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn postprocess_runs_once_per_outcome() {
    let hits = Arc::new(AtomicUsize::new(0));
    let config = Config::default().postprocess(|mut response| {
        let decorated = format!("{}!", response.text());
        response.body = decorated.into();
        Ok(response)
    });
    let client = Client::builder(counting_transport(Arc::clone(&hits)))
        .config(config)
        .build();

    let fresh = client.get("http://svc/items").await.unwrap();
    assert_eq!(fresh.text(), "hit-0!");
    // The cached copy was transformed before storage and is not
    // transformed again.
    let cached = client.get("http://svc/items").await.unwrap();
    assert_eq!(cached.text(), "hit-0!");
}

#[tokio::test]
async fn failed_refresh_keeps_serving_the_stale_entry() {
    let hits = Arc::new(AtomicUsize::new(0));
    let clock = ManualClock::default();
    let counter = Arc::clone(&hits);
    let transport = FnTransport::new(move |request: Request| {
        let counter = Arc::clone(&counter);
        async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(Response::new(StatusCode::OK).body("hit-0"))
            } else {
                Err(Error::Connection {
                    method: request.method,
                    url: request.url,
                    message: "refused".into(),
                    retriable: false,
                })
            }
        }
    });
    let client = Client::builder(transport)
        .config(Config::default().max_retries(0))
        .clock(clock.clone())
        .build();

    client.get("http://svc/items").await.unwrap();
    clock.advance(Duration::from_secs(6));

    let stale = client.get("http://svc/items").await.unwrap();
    assert_eq!(stale.cache_status, CacheStatus::Stale);
    client.wait_for_refreshes().await;
    assert_eq!(hits.load(Ordering::SeqCst), 2);

    // Refresh failed, the stale entry is still served.
    let still_stale = client.get("http://svc/items").await.unwrap();
    assert_eq!(still_stale.cache_status, CacheStatus::Stale);
    assert_eq!(still_stale.text(), "hit-0");
}

#[tokio::test]
async fn oversized_responses_are_rejected_without_retry() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let transport = FnTransport::new(move |_request: Request| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(StatusCode::OK).body("far too large a body"))
        }
    });
    let client = Client::builder(transport)
        .config(Config::default().max_response_size(Some(5)))
        .build();

    let error = client.get("http://svc/huge").await.unwrap_err();
    assert!(matches!(error, Error::TooLarge { limit: 5, .. }));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disabled_cache_fetches_every_time() {
    let hits = Arc::new(AtomicUsize::new(0));
    let client = Client::builder(counting_transport(Arc::clone(&hits)))
        .no_cache()
        .build();

    client.get("http://svc/items").await.unwrap();
    let second = client.get("http://svc/items").await.unwrap();
    assert_eq!(second.cache_status, CacheStatus::Fresh);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

fn header_transport(hits: Arc<AtomicUsize>, cache_control: &'static str) -> impl Transport {
    FnTransport::new(move |_request: Request| {
        let hits = Arc::clone(&hits);
        async move {
            let n = hits.fetch_add(1, Ordering::SeqCst);
            Ok(Response::new(StatusCode::OK)
                .header("Cache-Control", cache_control)
                .body(format!("hit-{n}")))
        }
    })
}

#[tokio::test]
async fn max_age_outranks_the_default_time_to_live() {
    let hits = Arc::new(AtomicUsize::new(0));
    let clock = ManualClock::default();
    let client = Client::builder(header_transport(Arc::clone(&hits), "max-age=60"))
        .clock(clock.clone())
        .build();

    client.get("http://svc/items").await.unwrap();
    // Beyond the five second default, inside the header's max-age.
    clock.advance(Duration::from_secs(30));
    let response = client.get("http://svc/items").await.unwrap();
    assert_eq!(response.cache_status, CacheStatus::Cached);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn no_store_is_honored() {
    let hits = Arc::new(AtomicUsize::new(0));
    let client = Client::new(header_transport(Arc::clone(&hits), "no-store"));

    client.get("http://svc/items").await.unwrap();
    let second = client.get("http://svc/items").await.unwrap();
    assert_eq!(second.cache_status, CacheStatus::Fresh);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn force_caching_outranks_response_headers() {
    let hits = Arc::new(AtomicUsize::new(0));
    let config =
        Config::default().force_caching(Some(CachingDecision::for_ttl(Duration::from_secs(60))));
    let client = Client::builder(header_transport(Arc::clone(&hits), "no-store"))
        .config(config)
        .build();

    client.get("http://svc/items").await.unwrap();
    let second = client.get("http://svc/items").await.unwrap();
    assert_eq!(second.cache_status, CacheStatus::Cached);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn evict_forces_the_next_fetch() {
    let hits = Arc::new(AtomicUsize::new(0));
    let client = Client::new(counting_transport(Arc::clone(&hits)));

    client.get("http://svc/items").await.unwrap();
    client.evict("http://svc/items").await.unwrap();
    let refetched = client.get("http://svc/items").await.unwrap();
    assert_eq!(refetched.cache_status, CacheStatus::Fresh);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
