use std::{future::Future, time::Duration};

use log::{info, warn};

use crate::config::FetchSettings;

/// Bounded retry with exponential backoff and optional chunk shrinking.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Floor for the adaptive chunk size
    pub min_chunk_size: u64,
}

impl RetryPolicy {
    pub fn from_settings(settings: &FetchSettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
            max_delay: Duration::from_millis(settings.retry_max_delay_ms),
            min_chunk_size: settings.min_chunk_size.max(1),
        }
    }

    /// Delay after the failed attempt number `attempt` (0-based): base * 2^attempt, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Halve a chunk size without going under the floor (or above the input).
    pub fn shrink(&self, chunk_size: u64) -> u64 {
        (chunk_size / 2).max(self.min_chunk_size).min(chunk_size)
    }
}

/// Error returned once every attempt has failed.
#[derive(Debug)]
pub struct RetryFailure {
    pub attempts: u32,
    pub last_error: anyhow::Error,
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// When `initial_chunk` is given, each retry passes a halved chunk size
/// (never below `min_chunk_size`) so that oversized range queries can
/// succeed on a narrower window. Without it, `op` always receives `None`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    initial_chunk: Option<u64>,
    mut op: F,
) -> Result<T, RetryFailure>
where
    F: FnMut(Option<u64>) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut chunk = initial_chunk;
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        match op(chunk).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(
                    "{}: attempt {}/{} failed: {:#}",
                    what,
                    attempt + 1,
                    policy.max_attempts,
                    e
                );
                last_error = Some(e);

                if attempt + 1 < policy.max_attempts {
                    tokio::time::sleep(policy.delay_for(attempt)).await;

                    if let Some(current) = chunk {
                        let next = policy.shrink(current);
                        if next != current {
                            info!("{}: retrying with chunk size {} (was {})", what, next, current);
                        }
                        chunk = Some(next);
                    }
                }
            },
        }
    }

    Err(RetryFailure {
        attempts: policy.max_attempts,
        last_error: last_error.unwrap_or_else(|| anyhow::anyhow!("{} was never attempted", what)),
    })
}
