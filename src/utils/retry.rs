//! Fixed-interval retry for store writes and image pulls.

use std::time::Duration;

use tracing::debug;

use crate::{EdgeTaskError, Result};

/// Runs `op` up to `attempts` times, sleeping `interval` between failures.
///
/// Returns the first success, or the last error once attempts are exhausted.
/// `attempts` of zero is treated as one.
pub async fn retry<T, F, Fut>(
    attempts: usize,
    interval: Duration,
    op: F,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_if(attempts, interval, |_| true, op).await
}

/// Like [`retry`], but gives up at once on an error `should_retry` rejects.
pub async fn retry_if<T, F, Fut, P>(
    attempts: usize,
    interval: Duration,
    mut should_retry: P,
    mut op: F,
) -> Result<T>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: FnMut(&EdgeTaskError) -> bool,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && should_retry(&err) => {
                debug!(attempt, attempts, error = %err, "attempt failed, retrying");
                attempt += 1;
                if !interval.is_zero() {
                    tokio::time::sleep(interval).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
}
