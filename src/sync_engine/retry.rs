//! Retry/backoff wrapper (spec §4.3 step 7): up to 2 retries on HTTP 429
//! or 5xx, `min(2s, 2^attempt · 150ms · jitter[0.85,1.15])`.

use crate::providers::UpstreamError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

const MAX_RETRIES: u32 = 2;
const BASE_DELAY_MS: u64 = 150;
const MAX_DELAY_MS: u64 = 2000;

pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = 2u64.saturating_pow(attempt) * BASE_DELAY_MS;
    let capped = exp.min(MAX_DELAY_MS);
    let jitter = rand::thread_rng().gen_range(0.85..=1.15);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

/// Runs `op` up to `MAX_RETRIES + 1` times, retrying only on retryable
/// upstream errors. The provider's concurrency permit is re-acquired by
/// the caller on every attempt (spec §5 "Retries never bypass
/// semaphores") — this helper only owns the sleep/attempt bookkeeping.
pub async fn with_retry<F, Fut, T>(mut op: F) -> Result<T, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                tracing::debug!(attempt, "retrying after retryable upstream error");
                tokio::time::sleep(backoff_delay(attempt)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
