//! Background refresh tasks for stale cache entries.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rampart_core::CacheKey;
use tokio::task::JoinHandle;
use tracing::{Instrument, info_span};

/// Tracks detached refresh tasks by cache key.
///
/// At most one refresh runs per key: a stale hit while a refresh for the
/// same key is still running does not spawn a second one. Tasks are
/// fire-and-forget; their failures are handled inside the task itself and
/// never reach any caller.
#[derive(Clone, Default)]
pub struct RefreshQueue {
    running: Arc<DashMap<CacheKey, JoinHandle<()>>>,
}

impl RefreshQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` for `key` unless a refresh for that key is still
    /// running.
    pub fn spawn<F>(&self, key: CacheKey, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let entry = self.running.entry(key.clone());
        if let Entry::Occupied(occupied) = &entry
            && !occupied.get().is_finished()
        {
            tracing::debug!(key = %key, "refresh already running, skipping");
            return;
        }

        let running = Arc::clone(&self.running);
        let span = info_span!("background_refresh", key = %key);
        let handle = tokio::spawn(
            async move {
                task.await;
                running.remove(&key);
            }
            .instrument(span),
        );
        match entry {
            Entry::Occupied(mut occupied) => {
                occupied.insert(handle);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(handle);
            }
        }
    }

    /// Waits until every spawned refresh has finished. Test helper and
    /// shutdown aid.
    pub async fn wait_idle(&self) {
        loop {
            self.running.retain(|_, handle| !handle.is_finished());
            if self.running.is_empty() {
                return;
            }
            tokio::task::yield_now().await;
        }
    }
}

impl std::fmt::Debug for RefreshQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshQueue")
            .field("running", &self.running.len())
            .finish()
    }
}
