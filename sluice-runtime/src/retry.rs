//! Retry logic for workflow activities
//!
//! Implements retry strategies with exponential backoff and jitter to avoid
//! thundering herd problems. Uses the "full jitter" algorithm:
//! delay = random(0, base * 2^attempt)

use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};

/// Retry strategy for failed activities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// No retries
    None,

    /// Fixed delay between retries
    Fixed,

    /// Exponential backoff
    Exponential,

    /// Exponential backoff with jitter
    ExponentialWithJitter,
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Initial delay before first retry (base delay for exponential backoff)
    pub initial_delay: Duration,

    /// Maximum delay between retries (caps exponential growth)
    pub max_delay: Duration,

    /// Maximum total elapsed time across all attempts
    pub max_elapsed: Duration,

    /// Retry strategy to use
    pub strategy: RetryStrategy,

    /// Multiplier for exponential backoff (typically 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_elapsed: Duration::from_secs(300),
            strategy: RetryStrategy::ExponentialWithJitter,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculate the delay for a given zero-based attempt number.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        match self.strategy {
            RetryStrategy::None => Duration::from_secs(0),
            RetryStrategy::Fixed => self.initial_delay,
            RetryStrategy::Exponential => {
                let delay =
                    self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
                Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
            }
            RetryStrategy::ExponentialWithJitter => self.calculate_delay_with_jitter(attempt),
        }
    }

    /// Full jitter: `delay = random(0, min(cap, base * multiplier^attempt))`.
    pub fn calculate_delay_with_jitter(&self, attempt: u32) -> Duration {
        let exponential_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = exponential_delay.min(self.max_delay.as_secs_f64());

        let jittered_delay_ms = if capped_delay > 0.0 {
            let max_ms = (capped_delay * 1000.0) as u64;
            rand::thread_rng().gen_range(0..=max_ms)
        } else {
            0
        };

        Duration::from_millis(jittered_delay_ms)
    }

    /// Check if total elapsed time exceeds `max_elapsed`.
    pub fn is_elapsed_exceeded(&self, start: Instant) -> bool {
        start.elapsed() >= self.max_elapsed
    }

    /// Execute a function with retry logic.
    ///
    /// Automatically retries transient errors with backoff. Stops when the
    /// function succeeds, a non-retryable error occurs, `max_attempts` is
    /// reached, or `max_elapsed` is exceeded. The function must be
    /// repeatable/idempotent.
    pub async fn execute_with_retry<F, Fut, T>(&self, mut f: F) -> crate::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        let start = Instant::now();
        let mut attempt = 0;

        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;

                    if !Self::is_retryable(&e) {
                        tracing::debug!(error = %e, "Non-retryable error, failing immediately");
                        return Err(e);
                    }

                    if attempt >= self.max_attempts {
                        tracing::debug!(
                            attempt,
                            max_attempts = self.max_attempts,
                            "Max attempts reached"
                        );
                        return Err(e);
                    }

                    if self.is_elapsed_exceeded(start) {
                        tracing::debug!(
                            elapsed_ms = start.elapsed().as_millis(),
                            max_elapsed_ms = self.max_elapsed.as_millis(),
                            "Max elapsed time exceeded"
                        );
                        return Err(e);
                    }

                    let delay = self.calculate_delay(attempt - 1);
                    tracing::debug!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Classify an error as transient (retryable) or permanent.
    ///
    /// Image pulls, missed heartbeats, deadline misses, and storage
    /// transport faults are transient. Business-logic failures,
    /// cancellation, and container lifecycle errors are permanent: the
    /// workflow records them on the execution row instead of retrying.
    pub fn is_retryable(error: &crate::Error) -> bool {
        use crate::Error;

        match error {
            Error::Internal(_)
            | Error::Timeout(_)
            | Error::HeartbeatTimeout(_)
            | Error::PullFailed(_) => true,

            Error::Execution(_)
            | Error::NotFound(_)
            | Error::NotReady(_)
            | Error::TenantViolation(_)
            | Error::CreateFailed(_)
            | Error::StartFailed(_)
            | Error::LogsFailed(_)
            | Error::WaitFailed(_)
            | Error::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
        assert_eq!(policy.max_elapsed, Duration::from_secs(300));
    }

    #[test]
    fn test_fixed_delay() {
        let policy = RetryPolicy {
            strategy: RetryStrategy::Fixed,
            initial_delay: Duration::from_secs(5),
            ..Default::default()
        };

        assert_eq!(policy.calculate_delay(0), Duration::from_secs(5));
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_delay_caps_at_max() {
        let policy = RetryPolicy {
            strategy: RetryStrategy::Exponential,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            ..Default::default()
        };

        assert_eq!(policy.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(policy.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(policy.calculate_delay(2), Duration::from_secs(4));
        assert_eq!(policy.calculate_delay(10), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_within_bounds() {
        let policy = RetryPolicy {
            strategy: RetryStrategy::ExponentialWithJitter,
            initial_delay: Duration::from_secs(2),
            ..Default::default()
        };

        for _ in 0..50 {
            let delay = policy.calculate_delay_with_jitter(0);
            assert!(delay <= Duration::from_secs(2));
        }
    }

    #[test]
    fn test_retry_classification() {
        assert!(RetryPolicy::is_retryable(&crate::Error::Internal(
            "connection reset".to_string()
        )));
        assert!(RetryPolicy::is_retryable(&crate::Error::PullFailed(
            "registry unavailable".to_string()
        )));
        assert!(RetryPolicy::is_retryable(&crate::Error::HeartbeatTimeout(
            "run-container".to_string()
        )));

        assert!(!RetryPolicy::is_retryable(&crate::Error::NotReady(
            "current status DRAFT".to_string()
        )));
        assert!(!RetryPolicy::is_retryable(&crate::Error::Cancelled));
        assert!(!RetryPolicy::is_retryable(&crate::Error::Execution(
            "bad ast".to_string()
        )));
    }

    #[tokio::test]
    async fn test_execute_with_retry_recovers_from_transient() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let attempts = AtomicU32::new(0);

        let result = policy
            .execute_with_retry(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(crate::Error::Internal("transient".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_execute_with_retry_bails_on_permanent() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);

        let result: crate::Result<()> = policy
            .execute_with_retry(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(crate::Error::NotReady("current status DRAFT".to_string())) }
            })
            .await;

        assert!(matches!(result, Err(crate::Error::NotReady(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
