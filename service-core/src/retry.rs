//! Retry policy for outbound calls to flaky collaborators.
//!
//! A policy is a small value object (attempt budget, base delay, optional
//! jitter) whose `run` drives any fallible async operation through a
//! cancellable timer, so retries stop promptly on process shutdown.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the initial one.
    pub max_attempts: u32,
    /// Delay slept between consecutive attempts.
    pub base_delay: Duration,
    /// Whether to add up to 25% jitter to each delay.
    pub add_jitter: bool,
}

/// Why a retried operation did not produce a value.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt failed; carries the last error.
    Exhausted(E),
    /// The cancellation token fired while waiting to retry.
    Cancelled,
}

impl RetryPolicy {
    /// A policy with a fixed delay between attempts and no jitter.
    pub fn fixed(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            add_jitter: false,
        }
    }

    pub fn with_jitter(mut self) -> Self {
        self.add_jitter = true;
        self
    }

    fn delay_for(&self, _attempt: u32) -> Duration {
        let mut delay = self.base_delay;

        if self.add_jitter {
            let jitter_ms = (self.base_delay.as_millis() as f64 * 0.25 * jitter_fraction()) as u64;
            delay += Duration::from_millis(jitter_ms);
        }

        delay
    }

    /// Run `f` until it succeeds, the attempt budget is spent, or `cancel`
    /// fires. The token is only consulted between attempts; an in-flight
    /// attempt is left to finish.
    pub async fn run<T, E, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        mut f: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0u32;

        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            operation,
                            attempt = attempt + 1,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(err) => {
                    attempt += 1;

                    if attempt >= self.max_attempts {
                        warn!(
                            operation,
                            attempt,
                            error = %err,
                            "operation failed after max attempts"
                        );
                        return Err(RetryError::Exhausted(err));
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed, retrying after delay"
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            warn!(operation, attempt, "retry loop cancelled by shutdown");
                            return Err(RetryError::Cancelled);
                        }
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Pseudo-random jitter fraction (0.0 to 1.0) without external dependencies.
fn jitter_fraction() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn fixed_policy_has_constant_delay() {
        let policy = RetryPolicy::fixed(5, Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(2));
    }

    #[test]
    fn jitter_stays_within_a_quarter_of_the_base() {
        let policy = RetryPolicy::fixed(5, Duration::from_secs(2)).with_jitter();
        for attempt in 1..5 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_millis(2500));
        }
    }

    #[tokio::test]
    async fn success_on_first_attempt_calls_once() {
        let policy = RetryPolicy::fixed(3, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let result = policy
            .run("test_op", &cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::convert::Infallible>(42)
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_the_attempt_budget_with_spaced_attempts() {
        let policy = RetryPolicy::fixed(3, Duration::from_secs(2));
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let started = tokio::time::Instant::now();
        let result: Result<(), _> = policy
            .run("test_op", &cancel, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("still down")
            })
            .await;

        assert!(matches!(result, Err(RetryError::Exhausted("still down"))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Two sleeps between three attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop_between_attempts() {
        let policy = RetryPolicy::fixed(10, Duration::from_secs(60));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Result<(), _> = policy
            .run("test_op", &cancel, || async { Err::<(), _>("down") })
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
    }
}
