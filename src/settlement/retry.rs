use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Retry with Backoff
// ============================================================================
//
// Runs an operation up to `max_attempts` times, sleeping between failures.
// A multiplier of 1.0 gives the fixed spacing used for processor retries;
// larger multipliers back off exponentially up to `max_delay`.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Same delay between every attempt
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Short exponential backoff for writes that must not be given up lightly
    pub fn ledger_write() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

/// Result of a retry operation
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded on the given attempt
    Success { value: T, attempts: u32 },
    /// Operation failed on every attempt; carries the last error
    Failed { error: E, attempts: u32 },
}

/// Execute an operation, retrying failures with backoff
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return RetryResult::Success {
                    value,
                    attempts: attempt,
                };
            }
            Err(error) => {
                if attempt >= config.max_attempts {
                    return RetryResult::Failed {
                        error,
                        attempts: attempt,
                    };
                }

                tracing::debug!(
                    attempt = attempt,
                    error = %error,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying after delay"
                );

                if !delay.is_zero() {
                    sleep(delay).await;
                }

                delay = Duration::from_secs_f64(delay.as_secs_f64() * config.multiplier)
                    .min(config.max_delay);
            }
        }
    }
}
