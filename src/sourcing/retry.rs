//! Retry with exponential backoff around a single source call
//!
//! Only transient failures (transport errors, HTTP 429 and 5xx) are retried.
//! Everything else is returned immediately.

use crate::config::RetrySettings;
use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        RetryPolicy {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay,
        }
    }

    /// Delay after failed attempt `attempt` (1-based): base, 2x base, 4x base...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
/// The closure receives the 1-based attempt number.
pub async fn retry_with_backoff<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt, "Succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    "Attempt failed, retrying: {}",
                    err
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValuationError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        }
    }

    fn server_error() -> ValuationError {
        ValuationError::Http {
            source_id: "a".to_string(),
            status: 503,
        }
    }

    #[test]
    fn test_delays_double() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
    }

    #[test]
    fn test_from_settings_keeps_at_least_one_attempt() {
        let policy = RetryPolicy::from_settings(&RetrySettings {
            max_attempts: 0,
            base_delay: Duration::from_millis(10),
        });

        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_first_success_short_circuits() {
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(&instant(), "test_op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ValuationError>(42) }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let result = retry_with_backoff(&instant(), "test_op", |attempt| async move {
            if attempt < 3 {
                Err(server_error())
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry_with_backoff(&instant(), "test_op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(server_error()) }
        })
        .await;

        assert!(matches!(result, Err(ValuationError::Http { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_fail_immediately() {
        let calls = AtomicU32::new(0);

        let result: Result<()> = retry_with_backoff(&instant(), "test_op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ValuationError::Http {
                    source_id: "a".to_string(),
                    status: 404,
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
