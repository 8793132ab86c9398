//! Bounded retry for calls to external collaborators.

use std::future::Future;

use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::Result;

/// Run `call` until it succeeds, fails permanently, or the policy's attempts
/// are exhausted.
///
/// Only errors for which [`RagError::is_transient`](crate::RagError::is_transient)
/// holds are retried. The last error is returned once attempts run out.
/// Dropping the returned future cancels the in-flight call and any pending
/// backoff.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < max_attempts => {
                let wait = policy.backoff(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts,
                    wait_ms = wait.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
