//! Bounded retry of retriable failures.

use std::future::Future;
use std::time::Duration;

use rampart_core::{Error, Response};

/// How many extra attempts to make and how long to pause between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one fails.
    pub max_retries: u32,
    /// Pause before each repeat. `None` retries immediately.
    pub delay: Option<Duration>,
}

/// Runs `attempt` up to `1 + max_retries` times, stopping early on success
/// or on an [unretriable](Error::is_retriable) failure.
pub async fn retry<F, Fut>(policy: RetryPolicy, mut attempt: F) -> Result<Response, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Response, Error>>,
{
    let mut remaining = policy.max_retries;
    loop {
        match attempt().await {
            Ok(response) => return Ok(response),
            Err(error) if error.is_retriable() && remaining > 0 => {
                remaining -= 1;
                tracing::debug!(%error, remaining, "retrying after failure");
                if let Some(delay) = policy.delay {
                    tokio::time::sleep(delay).await;
                }
            }
            Err(error) => return Err(error),
        }
    }
}
