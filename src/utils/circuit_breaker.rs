use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

// ============================================================================
// Circuit Breaker
// ============================================================================
//
// Guards a remote dependency (the dead-letter producer) so that a broker
// outage fails fast instead of stalling every call on a send timeout.
//
// Closed   -> Open      after `failure_threshold` consecutive failures
// Open     -> HalfOpen  once `open_duration` has passed since the last failure
// HalfOpen -> Closed    after `success_threshold` consecutive successes
// HalfOpen -> Open      on any failure
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Numeric form for gauges: 0 closed, 1 open, 2 half-open
    pub fn as_gauge(self) -> i64 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_duration: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker {0} is open")]
    Open(&'static str),

    #[error(transparent)]
    Inner(E),
}

struct Counters {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
}

#[derive(Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    counters: Arc<Mutex<Counters>>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            counters: Arc::new(Mutex::new(Counters {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure: None,
            })),
        }
    }

    /// Run `operation` unless the circuit is open.
    pub async fn call<F, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.admit().await?;

        match operation.await {
            Ok(value) => {
                self.on_success().await;
                Ok(value)
            }
            Err(err) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Inner(err))
            }
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.counters.lock().await.state
    }

    async fn admit<E>(&self) -> Result<(), CircuitBreakerError<E>> {
        let mut c = self.counters.lock().await;
        if c.state != CircuitState::Open {
            return Ok(());
        }

        let cooled_down = c
            .last_failure
            .map_or(true, |at| at.elapsed() >= self.config.open_duration);
        if !cooled_down {
            return Err(CircuitBreakerError::Open(self.name));
        }

        self.transition(&mut c, CircuitState::HalfOpen);
        c.consecutive_successes = 0;
        Ok(())
    }

    async fn on_success(&self) {
        let mut c = self.counters.lock().await;
        c.consecutive_failures = 0;

        if c.state == CircuitState::HalfOpen {
            c.consecutive_successes += 1;
            if c.consecutive_successes >= self.config.success_threshold {
                self.transition(&mut c, CircuitState::Closed);
                c.consecutive_successes = 0;
                c.last_failure = None;
            }
        }
    }

    async fn on_failure(&self) {
        let mut c = self.counters.lock().await;
        c.consecutive_failures += 1;
        c.consecutive_successes = 0;
        c.last_failure = Some(Instant::now());

        let trips = match c.state {
            CircuitState::Closed => c.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trips {
            self.transition(&mut c, CircuitState::Open);
        }
    }

    fn transition(&self, c: &mut Counters, to: CircuitState) {
        let from = c.state;
        c.state = to;

        if to == CircuitState::Open {
            tracing::warn!(
                breaker = self.name,
                from = ?from,
                failures = c.consecutive_failures,
                "Circuit breaker opened"
            );
        } else {
            tracing::info!(breaker = self.name, from = ?from, to = ?to, "Circuit breaker state changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(failures: u32, open_for: Duration, successes: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: failures,
                open_duration: open_for,
                success_threshold: successes,
            },
        )
    }

    #[tokio::test]
    async fn test_opens_after_consecutive_failures() {
        let cb = breaker(3, Duration::from_secs(60), 1);

        for _ in 0..3 {
            assert!(cb.call(async { Err::<(), _>("broker down") }).await.is_err());
        }

        assert_eq!(cb.state().await, CircuitState::Open);
        let result = cb.call(async { Ok::<_, &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open("test"))));
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let cb = breaker(2, Duration::from_secs(60), 1);

        let _ = cb.call(async { Err::<(), _>("e") }).await;
        let _ = cb.call(async { Ok::<_, &str>(()) }).await;
        let _ = cb.call(async { Err::<(), _>("e") }).await;

        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_success_threshold() {
        let cb = breaker(1, Duration::from_millis(30), 2);

        let _ = cb.call(async { Err::<(), _>("e") }).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(cb.call(async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(cb.state().await, CircuitState::HalfOpen);

        assert!(cb.call(async { Ok::<_, &str>(()) }).await.is_ok());
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_failure_while_half_open_reopens() {
        let cb = breaker(1, Duration::from_millis(30), 2);

        let _ = cb.call(async { Err::<(), _>("e") }).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = cb.call(async { Err::<(), _>("still down") }).await;

        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[test]
    fn test_gauge_values() {
        assert_eq!(CircuitState::Closed.as_gauge(), 0);
        assert_eq!(CircuitState::Open.as_gauge(), 1);
        assert_eq!(CircuitState::HalfOpen.as_gauge(), 2);
    }
}
