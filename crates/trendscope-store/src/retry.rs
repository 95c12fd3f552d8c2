//! Bounded exponential backoff for archive writes.

use std::future::Future;
use std::time::Duration;

use crate::error::StoreError;

const MAX_DELAY_MS: u64 = 30_000;

/// Runs `operation`, retrying [`StoreError::Unavailable`] up to
/// `max_retries` more times.
///
/// The n-th retry sleeps `backoff_base_ms * 2^(n-1)` milliseconds, capped at
/// 30 s, with ±25 % jitter. Any other error is returned immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    max_retries: u32,
    backoff_base_ms: u64,
    mut operation: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retriable() || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                let computed = backoff_base_ms.saturating_mul(1u64 << (attempt - 1).min(10));
                let capped = computed.min(MAX_DELAY_MS);
                #[allow(
                    clippy::cast_possible_truncation,
                    clippy::cast_sign_loss,
                    clippy::cast_precision_loss
                )]
                let delay_ms = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
                tracing::warn!(
                    attempt,
                    max_retries,
                    delay_ms,
                    error = %err,
                    "archive store unavailable, retrying after backoff"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}
