//! In-flight request collapsing.
//!
//! Concurrent operations with the same key share a single execution and all
//! observe its result. The registry holds only live executions; once one
//! settles, the next request with that key starts fresh.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use rampart_core::Error;

type SharedExecution<T> = Shared<BoxFuture<'static, Result<T, Error>>>;

/// Registry of in-flight executions keyed by `K`.
///
/// `T` must be `Clone` so every collapsed caller gets its own copy of the
/// settled result; [`Error`] is `Clone` for the same reason.
pub struct Collapse<K, T> {
    in_flight: Arc<DashMap<K, SharedExecution<T>>>,
}

impl<K, T> Clone for Collapse<K, T> {
    fn clone(&self) -> Self {
        Collapse {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<K, T> Default for Collapse<K, T>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Collapse {
            in_flight: Arc::new(DashMap::new()),
        }
    }
}

impl<K, T> Collapse<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live executions.
    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    /// True when nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Runs `operation` under `key`, joining an execution already in flight
    /// for that key instead of starting a second one.
    pub async fn run<F, Fut>(&self, key: K, operation: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>> + Send + 'static,
    {
        let execution = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(occupied) => occupied.get().clone(),
            Entry::Vacant(vacant) => {
                let registry = Arc::clone(&self.in_flight);
                let future = operation();
                let execution = async move {
                    let result = future.await;
                    // Deregister before anyone observes the result, so a
                    // follow-up request starts a fresh execution.
                    registry.remove(&key);
                    result
                }
                .boxed()
                .shared();
                vacant.insert(execution.clone());
                execution
            }
        };
        execution.await
    }
}
