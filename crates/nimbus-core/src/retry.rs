//! Bounded polling helper behind the core's eventual-consistency fences.
//!
//! One explicit policy per call site instead of ad hoc sleep loops: the
//! timeout and interval are data, so tests can run the same code with
//! millisecond policies.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryError {
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// Polls `poll` until it yields `Some(value)` or the policy's timeout
/// elapses. The first probe happens immediately; expiry raises, it never
/// silently continues.
pub async fn wait_until<T, F, Fut>(policy: RetryPolicy, mut poll: F) -> Result<T, RetryError>
    where F: FnMut() -> Fut,
          Fut: Future<Output = Option<T>>
{
    let deadline = Instant::now() + policy.timeout;
    loop {
        if let Some(value) = poll().await {
            return Ok(value);
        }
        if Instant::now() >= deadline {
            return Err(RetryError::TimedOut(policy.timeout));
        }
        sleep(policy.interval).await;
    }
}
