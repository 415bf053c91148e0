// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use std::future::Future;
use std::time::Duration;

/// Run `op` up to `attempts` times, doubling the pause after each failure
/// that `retryable` accepts. The last error is returned as is.
pub async fn retry_with_backoff<T, E, F, Fut, R>(attempts: u32, base_delay: Duration, retryable: R, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut delay = base_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts && retryable(&e) => {
                tracing::warn!("Attempt {}/{} failed: {}. Retrying in {:?}", attempt, attempts, e, delay);
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
