//! Bounded retry with exponential backoff and full jitter.
//!
//! Attempt `n` (0-based) that fails transiently sleeps a uniformly random
//! duration in `[0, min(max_delay, base_delay * 2^n)]` before attempt `n + 1`.
//! Errors the classifier rejects are returned at once.

use std::{fmt::Display, future::Future, time::Duration};

use rand::Rng;

use crate::{config::RetryPolicy, error::TransportError};

/// Upper bound of the jitter window after attempt `attempt`.
pub fn backoff_ceiling(policy: &RetryPolicy, attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let ms = policy.base_delay_ms.saturating_mul(factor).min(policy.max_delay_ms);
    Duration::from_millis(ms)
}

pub fn jittered_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let ceiling = backoff_ceiling(policy, attempt).as_millis() as u64;
    if ceiling == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
}

pub async fn retry<T, E, F, Fut, C>(policy: &RetryPolicy, is_transient: C, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: Display,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !is_transient(&err) => return Err(err),
            Err(err) if attempt + 1 >= attempts => {
                tracing::warn!(
                    target: "styx_inbox",
                    event = "retry_exhausted",
                    attempts,
                    error = %err
                );
                return Err(err);
            }
            Err(err) => {
                let delay = jittered_delay(policy, attempt);
                tracing::debug!(
                    target: "styx_inbox",
                    event = "retry_backoff",
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// [`retry`] with [`TransportError::is_transient`] as the classifier.
pub async fn retry_transport<T, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    retry(policy, TransportError::is_transient, op).await
}
