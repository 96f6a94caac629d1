//! Retry with backoff, independent of what is being retried.
//!
//! The chunk processor wraps a whole rasterise-and-extract attempt in
//! [`retry`]; nothing in here knows about PDFs.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Exponential backoff: the wait after failed attempt `n` (1-based) is
/// `base × 2ⁿ`. With a 1 s base that is 2 s, 4 s, 8 s, …
pub fn exponential_backoff(base: Duration) -> impl Fn(u32) -> Duration + Send + Sync + Clone {
    move |attempt| base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Run `op` up to `max_attempts` times, sleeping `backoff(n)` after failed
/// attempt `n`. No sleep follows the last attempt.
///
/// `op` receives the 1-based attempt number. Returns the first success, or
/// the error from the final attempt. `max_attempts == 0` is treated as 1.
pub async fn retry<T, E, F, Fut, B>(max_attempts: u32, backoff: B, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    B: Fn(u32) -> Duration,
    E: std::fmt::Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt >= max_attempts => return Err(e),
            Err(e) => {
                let wait = backoff(attempt);
                warn!(
                    "attempt {}/{} failed: {} (retrying in {:?})",
                    attempt, max_attempts, e, wait
                );
                sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
