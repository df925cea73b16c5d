//! Bounded retry combinators
//!
//! The attempt budget and the backoff schedule are explicit parameters of every
//! call. The connection manager derives both from a [`RetryPolicy`].

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempt budget with a linear `retry × base_delay` schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,

    /// Wait before the first retry; retry `n` waits `n × base_delay`
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn linear(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay before retry number `retry` (1-based; 0 means first attempt)
    pub fn delay(&self, retry: u32) -> Duration {
        self.base_delay.saturating_mul(retry)
    }

    /// Backoff function usable with [`with_retry_if`]
    pub fn backoff_fn(&self) -> impl Fn(u32) -> Duration {
        let policy = *self;
        move |retry| policy.delay(retry)
    }
}

/// Run `operation` up to `max_attempts` times, sleeping `backoff(retry)` before each retry.
///
/// `operation` receives the 1-based attempt number. Returns the first success, the
/// first error `should_retry` rejects, or the last error once the budget is spent.
/// A budget of zero is treated as one attempt.
///
/// # Example
///
/// ```no_run
/// use ratecast::utils::retry::{with_retry_if, RetryPolicy};
/// use std::time::Duration;
///
/// # async fn connect() -> Result<(), String> { Ok(()) }
/// # async fn run() -> Result<(), String> {
/// let policy = RetryPolicy::linear(5, Duration::from_secs(5));
/// with_retry_if(policy.max_attempts, policy.backoff_fn(), |_attempt| connect(), |_| true).await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_retry_if<T, E, F, Fut, B, P>(
    max_attempts: u32,
    backoff: B,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    B: Fn(u32) -> Duration,
    E: Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt >= max_attempts {
                    warn!(attempt, max_attempts, error = %e, "Retry budget exhausted");
                    return Err(e);
                }
                if !should_retry(&e) {
                    warn!(attempt, error = %e, "Non-retryable error encountered");
                    return Err(e);
                }

                let delay = backoff(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, will retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast(_retry: u32) -> Duration {
        Duration::from_millis(1)
    }

    fn always<E>(_: &E) -> bool {
        true
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let result = with_retry_if(3, fast, |_| async { Ok::<_, String>(42) }, always).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result = with_retry_if(
            5,
            fast,
            move |_| {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        return Err("Simulated failure".to_string());
                    }
                    Ok(7)
                }
            },
            always,
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_runs_exact_budget() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<(), String> = with_retry_if(
            5,
            fast,
            move |attempt| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("failure {attempt}")) }
            },
            always,
        )
        .await;

        assert_eq!(result.unwrap_err(), "failure 5");
        assert_eq!(attempts.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_retry_if_stops_on_rejected_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);

        let result: Result<(), String> = with_retry_if(
            5,
            fast,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("validation error".to_string()) }
            },
            |e| !e.contains("validation"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_budget_still_attempts_once() {
        let result = with_retry_if(0, fast, |_| async { Ok::<_, String>(1) }, always).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::linear(5, Duration::from_secs(5));
        let backoff = policy.backoff_fn();

        assert_eq!(backoff(0), Duration::ZERO);
        assert_eq!(backoff(1), Duration::from_secs(5));
        assert_eq!(backoff(2), Duration::from_secs(10));
        assert_eq!(backoff(4), Duration::from_secs(20));
    }
}
