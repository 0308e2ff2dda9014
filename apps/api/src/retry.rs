//! Bounded-timeout, capped exponential-backoff retry for capability calls.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound on a single attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
pub enum AttemptFailure<E> {
    Error(E),
    TimedOut(Duration),
}

impl<E: fmt::Display> fmt::Display for AttemptFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptFailure::Error(e) => write!(f, "{e}"),
            AttemptFailure::TimedOut(d) => write!(f, "timed out after {}ms", d.as_millis()),
        }
    }
}

/// The call gave up: either attempts ran out, or the last error was not retryable.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last: AttemptFailure<E>,
    pub retryable: bool,
}

impl RetryPolicy {
    /// Sleep before attempt `attempt + 1` (1-based): base, 2×base, 4×base… capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Runs `call` until it succeeds, returns a non-retryable error, or
    /// `max_attempts` is reached. Timeouts are always retryable.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, RetryExhausted<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let failure = match tokio::time::timeout(self.attempt_timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if !is_retryable(&e) => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last: AttemptFailure::Error(e),
                        retryable: false,
                    });
                }
                Ok(Err(e)) => AttemptFailure::Error(e),
                Err(_) => AttemptFailure::TimedOut(self.attempt_timeout),
            };

            if attempt >= max_attempts {
                return Err(RetryExhausted {
                    attempts: attempt,
                    last: failure,
                    retryable: true,
                });
            }

            let delay = self.delay_for(attempt);
            warn!(
                "{operation} attempt {attempt}/{max_attempts} failed ({failure}), retrying after {}ms...",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            attempt_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            attempt_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(30), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, RetryExhausted<String>> = fast_policy(3)
            .run(
                "flaky",
                || async {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("failure {n}"))
                    } else {
                        Ok(n)
                    }
                },
                |_| true,
            )
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let err = fast_policy(3)
            .run(
                "down",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("connection refused".to_string())
                },
                |_| true,
            )
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 3);
        assert!(err.retryable);
        assert_eq!(err.last.to_string(), "connection refused");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_stops_immediately() {
        let calls = AtomicU32::new(0);
        let err = fast_policy(5)
            .run(
                "bad request",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("400".to_string())
                },
                |_| false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(!err.retryable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_attempt_times_out() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(10),
            attempt_timeout: Duration::from_millis(50),
        };
        let err = policy
            .run(
                "hang",
                || async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<(), String>(())
                },
                |_| true,
            )
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(matches!(err.last, AttemptFailure::TimedOut(_)));
    }
}
