use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

// ============================================================================
// Bounded Retry With Exponential Backoff
// ============================================================================
//
// Only failures that report themselves as transient are retried. A permanent
// failure is returned on the attempt that produced it, and the number of
// attempts is never larger than `max_attempts`.
//
// ============================================================================

/// Classifies a failure as worth another attempt or not
pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Ceiling for any single delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::persist()
    }
}

impl RetryConfig {
    /// Writes of an ingested order. Short enough to stay inside a
    /// per-message deadline.
    pub fn persist() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }

    /// Waiting for a dependency to come up: one probe per second for 30s.
    pub fn startup_probe() -> Self {
        Self {
            max_attempts: 30,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
            multiplier: 1.0,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

/// Why a retried operation gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// The error was not transient; no further attempt was made
    Permanent { attempts: u32, error: E },
    /// Every attempt failed with a transient error
    Exhausted { attempts: u32, error: E },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Permanent { attempts, .. } | RetryError::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    /// The last error observed
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Permanent { error, .. } | RetryError::Exhausted { error, .. } => error,
        }
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of
/// attempts. The operation receives the 1-based attempt number.
pub async fn retry_on_transient<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display + IsTransient,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt = attempt,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !error.is_transient() {
            return Err(RetryError::Permanent {
                attempts: attempt,
                error,
            });
        }

        if attempt >= max_attempts {
            tracing::warn!(
                operation = operation_name,
                attempts = attempt,
                error = %error,
                "Giving up after transient failures"
            );
            return Err(RetryError::Exhausted {
                attempts: attempt,
                error,
            });
        }

        let delay = config.delay_after(attempt);
        tracing::warn!(
            operation = operation_name,
            attempt = attempt,
            max_attempts = max_attempts,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "Transient failure, retrying after delay"
        );
        sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Flaky,
        Broken,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl IsTransient for TestError {
        fn is_transient(&self) -> bool {
            matches!(self, TestError::Flaky)
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_grows_and_is_capped() {
        let config = RetryConfig::persist();

        assert_eq!(config.delay_after(1), Duration::from_millis(100));
        assert_eq!(config.delay_after(2), Duration::from_millis(200));
        assert_eq!(config.delay_after(3), Duration::from_millis(400));
        assert_eq!(config.delay_after(10), Duration::from_secs(2));
    }

    #[test]
    fn test_startup_probe_is_constant() {
        let config = RetryConfig::startup_probe();

        assert_eq!(config.delay_after(1), Duration::from_secs(1));
        assert_eq!(config.delay_after(29), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_until_success() {
        let calls = AtomicU32::new(0);

        let result = retry_on_transient(&fast(), "flaky", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(TestError::Flaky)
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result = retry_on_transient(&fast(), "broken", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TestError::Broken) }
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, RetryError::Permanent { attempts: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let calls = AtomicU32::new(0);

        let result = retry_on_transient(&fast(), "always_flaky", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(TestError::Flaky) }
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts(), 3);
        assert!(matches!(err.into_inner(), TestError::Flaky));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_zero_max_attempts_still_runs_once() {
        let config = RetryConfig {
            max_attempts: 0,
            ..fast()
        };

        let result = retry_on_transient(&config, "once", |_| async { Err::<(), _>(TestError::Flaky) }).await;

        assert_eq!(result.unwrap_err().attempts(), 1);
    }
}
