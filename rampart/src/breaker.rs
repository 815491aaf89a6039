//! Per-key circuit breaking over a rolling error-rate window.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use rampart_core::{BreakerConfig, Clock, Error, Response};

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    successes: u32,
    failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Open { since: DateTime<Utc> },
    Probing,
}

#[derive(Debug)]
struct BreakerState {
    // Front bucket is the current sub-window.
    buckets: Vec<Bucket>,
    rotated_at: DateTime<Utc>,
    phase: Phase,
}

/// What the breaker allows before a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Preflight {
    /// Closed, call proceeds and is counted.
    Allowed,
    /// Open long enough; exactly one probe call may test recovery.
    Probe,
    /// Open, fail fast.
    Rejected,
}

/// A single rolling-window breaker.
///
/// Counts successes and failures in `buckets` sub-windows of the configured
/// window. The breaker opens once the call volume reaches the volume
/// threshold and the failure share reaches the error threshold. After one
/// bucket width of open time a single probe call is let through; its
/// success closes the breaker and clears the window, its failure re-opens
/// it.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// Creates a closed breaker with an empty window starting at `now`.
    pub fn new(config: BreakerConfig, now: DateTime<Utc>) -> Self {
        let buckets = vec![Bucket::default(); config.buckets.max(1) as usize];
        CircuitBreaker {
            config,
            state: Mutex::new(BreakerState {
                buckets,
                rotated_at: now,
                phase: Phase::Closed,
            }),
        }
    }

    fn bucket_width(&self) -> TimeDelta {
        let width = self.config.window / self.config.buckets.max(1);
        TimeDelta::from_std(width).unwrap_or(TimeDelta::MAX)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rotate(state: &mut BreakerState, width: TimeDelta, now: DateTime<Utc>) {
        let count = state.buckets.len();
        let elapsed = now - state.rotated_at;
        if elapsed < width {
            return;
        }
        let steps = (elapsed.num_milliseconds() / width.num_milliseconds().max(1)) as usize;
        if steps >= count {
            // The whole window rolled past; start clean.
            state.buckets.fill(Bucket::default());
            state.rotated_at = now;
            return;
        }
        state.buckets.rotate_right(steps);
        for bucket in state.buckets.iter_mut().take(steps) {
            *bucket = Bucket::default();
        }
        state.rotated_at += width * steps as i32;
    }

    fn preflight(&self, now: DateTime<Utc>) -> Preflight {
        let width = self.bucket_width();
        let mut state = self.lock();
        Self::rotate(&mut state, width, now);
        match state.phase {
            Phase::Closed => Preflight::Allowed,
            Phase::Open { since } if now - since >= width => {
                state.phase = Phase::Probing;
                Preflight::Probe
            }
            Phase::Open { .. } | Phase::Probing => Preflight::Rejected,
        }
    }

    fn record_success(&self, now: DateTime<Utc>) {
        let width = self.bucket_width();
        let mut state = self.lock();
        Self::rotate(&mut state, width, now);
        if state.phase == Phase::Probing {
            state.phase = Phase::Closed;
            state.buckets.fill(Bucket::default());
            state.rotated_at = now;
            return;
        }
        state.buckets[0].successes += 1;
    }

    fn record_failure(&self, now: DateTime<Utc>) {
        let width = self.bucket_width();
        let mut state = self.lock();
        Self::rotate(&mut state, width, now);
        if state.phase == Phase::Probing {
            state.phase = Phase::Open { since: now };
            return;
        }
        state.buckets[0].failures += 1;
        let (successes, failures) = state
            .buckets
            .iter()
            .fold((0u64, 0u64), |(s, f), bucket| {
                (s + u64::from(bucket.successes), f + u64::from(bucket.failures))
            });
        let volume = successes + failures;
        if state.phase == Phase::Closed
            && volume >= u64::from(self.config.volume_threshold)
            && failures * 100 >= u64::from(self.config.error_threshold) * volume
        {
            state.phase = Phase::Open { since: now };
        }
    }

    /// Whether the breaker is currently letting ordinary calls through.
    pub fn is_closed(&self) -> bool {
        self.lock().phase == Phase::Closed
    }

    /// Reverts an admitted probe that never settled. The breaker goes back
    /// to open so a later call gets the next probe slot.
    fn cancel_probe(&self, now: DateTime<Utc>) {
        let mut state = self.lock();
        if state.phase == Phase::Probing {
            state.phase = Phase::Open { since: now };
        }
    }

    fn is_idle(&self, now: DateTime<Utc>) -> bool {
        let width = self.bucket_width();
        let mut state = self.lock();
        Self::rotate(&mut state, width, now);
        state.phase == Phase::Closed
            && state
                .buckets
                .iter()
                .all(|bucket| bucket.successes == 0 && bucket.failures == 0)
    }
}

/// Lazily populated registry of per-key breakers.
///
/// Keys are typically target hosts. The registry grows with key
/// cardinality; callers handling many distinct hosts should invoke
/// [`prune_idle`](BreakerRegistry::prune_idle) periodically.
pub struct BreakerRegistry {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Creates an empty registry.
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        BreakerRegistry {
            config,
            clock,
            breakers: DashMap::new(),
        }
    }

    /// Runs `operation` under the breaker for `key`.
    ///
    /// An open breaker rejects the call with [`Error::CircuitOpen`] without
    /// invoking the operation; otherwise the call runs and its outcome is
    /// counted toward the key's window.
    pub async fn call<F, Fut>(&self, key: &str, operation: F) -> Result<Response, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Response, Error>>,
    {
        let breaker = self
            .breakers
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone(), self.clock.now())))
            .clone();

        let mut probe = None;
        match breaker.preflight(self.clock.now()) {
            Preflight::Rejected => {
                tracing::debug!(key, "circuit open, failing fast");
                return Err(Error::CircuitOpen { key: key.to_string() });
            }
            Preflight::Probe => {
                tracing::debug!(key, "probing open circuit");
                probe = Some(ProbeGuard {
                    breaker: Arc::clone(&breaker),
                    clock: Arc::clone(&self.clock),
                    armed: true,
                });
            }
            Preflight::Allowed => {}
        }

        let result = operation().await;
        if let Some(guard) = &mut probe {
            guard.armed = false;
        }
        match &result {
            Ok(_) => breaker.record_success(self.clock.now()),
            Err(_) => breaker.record_failure(self.clock.now()),
        }
        result
    }

    /// Drops breakers that are closed with an empty window. Bounds registry
    /// growth under high key cardinality.
    pub fn prune_idle(&self) {
        let now = self.clock.now();
        self.breakers.retain(|_, breaker| !breaker.is_idle(now));
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// True when no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

/// Keeps an admitted probe from wedging the breaker: if the probe call is
/// dropped before it settles (the caller cancelled the surrounding future),
/// the breaker would otherwise stay in its probing phase and reject every
/// later call.
struct ProbeGuard {
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    armed: bool,
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.cancel_probe(self.clock.now());
        }
    }
}

impl std::fmt::Debug for BreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerRegistry")
            .field("config", &self.config)
            .field("keys", &self.breakers.len())
            .finish()
    }
}
