//! Retry with exponential backoff for transient check failures

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::version::error::CheckError;

/// `attempts` tries in total; the delay before retry `n` is `base_delay * 2^(n-1)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Delay before the retry following failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's attempts are used up. The last error is returned.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, CheckError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CheckError>>,
{
    let mut attempt = 1;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "Attempt {}/{} for {} failed: {}; retrying in {:?}",
                    attempt,
                    policy.attempts,
                    e.tool(),
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::error::SourceError;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[rstest]
    #[case(1, 100)]
    #[case(2, 200)]
    #[case(3, 400)]
    #[case(4, 800)]
    fn delay_doubles_per_attempt(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));

        assert_eq!(policy.delay_after(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }

    fn network_error() -> CheckError {
        CheckError::network("node", SourceError::NotFound("node".to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(3, Duration::from_secs(1));
        let started = tokio::time::Instant::now();

        let result = retry_with_backoff(policy, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(network_error())
            } else {
                Ok("22.0.0")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "22.0.0");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_last_attempt_with_last_error() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(2, Duration::from_millis(10));

        let result: Result<(), _> = retry_with_backoff(policy, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CheckError::Timeout {
                tool: "node".to_string(),
                timeout: Duration::from_secs(1),
            })
        })
        .await;

        assert!(matches!(result, Err(CheckError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy::new(5, Duration::from_secs(60));

        let result: Result<(), _> = retry_with_backoff(policy, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CheckError::Interrupted {
                tool: "node".to_string(),
                reason: "panicked".to_string(),
            })
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
