//! Exponential backoff for API calls

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Result, VoxtaskError};

/// Retry budget and backoff base
///
/// Attempt `i` (0-indexed) waits `base_delay * 2^i` before attempt `i + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Create a policy; a budget of zero still makes one attempt
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Policy that never retries
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay to wait after the failed attempt `attempt` (0-indexed)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Every delay the policy would wait if all attempts failed
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_attempts.saturating_sub(1))
            .map(|attempt| self.delay_for(attempt))
            .collect()
    }

    /// Whether an error class is worth another attempt
    ///
    /// Network failures, timeouts, 5xx and 401 are retried; 401 because the
    /// refresh path may resolve it. Other 4xx and malformed responses are not.
    pub fn is_retryable(&self, err: &VoxtaskError) -> bool {
        match err {
            VoxtaskError::Network(_) | VoxtaskError::Timeout => true,
            VoxtaskError::Http { status, .. } => *status == 401 || *status >= 500,
            _ => false,
        }
    }

    /// Run `op` until it succeeds, the budget is spent, or `retryable`
    /// rejects the error
    ///
    /// `op` receives the 0-indexed attempt number.
    pub async fn run<T, F, Fut, P>(&self, mut op: F, retryable: P) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&VoxtaskError) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let last_attempt = attempt + 1 >= self.max_attempts;
                    if last_attempt || !retryable(&err) {
                        return Err(err);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "request failed, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn server_error() -> VoxtaskError {
        VoxtaskError::Http {
            status: 503,
            message: "unavailable".into(),
            details: None,
        }
    }

    #[test]
    fn test_backoff_schedule_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(1000));
        assert_eq!(
            policy.schedule(),
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(2000),
                Duration::from_millis(4000)
            ]
        );
        assert!(RetryPolicy::no_retry().schedule().is_empty());
    }

    #[test]
    fn test_retryable_classes() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable(&VoxtaskError::Timeout));
        assert!(policy.is_retryable(&VoxtaskError::Network("reset".into())));
        assert!(policy.is_retryable(&server_error()));
        assert!(policy.is_retryable(&VoxtaskError::Http {
            status: 401,
            message: String::new(),
            details: None
        }));
        assert!(!policy.is_retryable(&VoxtaskError::Http {
            status: 422,
            message: String::new(),
            details: None
        }));
        assert!(!policy.is_retryable(&VoxtaskError::SessionExpired("x".into())));
        assert!(!policy.is_retryable(&VoxtaskError::InvalidServerResponse { status: 502 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_between_attempts_only() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let calls = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let result: Result<()> = policy
            .run(
                |_| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(server_error())
                    }
                },
                |err| policy.is_retryable(err),
            )
            .await;

        assert!(matches!(result, Err(VoxtaskError::Http { status: 503, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms + 200ms, nothing after the final attempt
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_client_error() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<()> = policy
            .run(
                |_| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(VoxtaskError::Http {
                            status: 404,
                            message: "missing".into(),
                            details: None,
                        })
                    }
                },
                |err| policy.is_retryable(err),
            )
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_recovers_after_transient_failure() {
        let policy = RetryPolicy::default();

        let result = policy
            .run(
                |attempt| async move {
                    if attempt == 0 {
                        Err(VoxtaskError::Timeout)
                    } else {
                        Ok(attempt)
                    }
                },
                |err| policy.is_retryable(err),
            )
            .await;

        assert_eq!(result.unwrap(), 1);
    }
}
