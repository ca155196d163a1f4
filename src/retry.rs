//! Fetch retry policy with linear backoff.

use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::config::QueryConfig;
use crate::error::FetchError;

/// Retry behavior for a failed fetch.
///
/// A fetch is attempted `retry_count + 1` times in total; the delay before
/// retry `n` is `retry_delay * n` (linear, not exponential). Once attempts
/// are exhausted the last error is propagated.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retry_count: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            retry_count: 0,
            retry_delay: Duration::ZERO,
        }
    }

    /// The delay applied before retry `n` (1-based).
    #[must_use]
    pub fn delay_before(&self, retry: u32) -> Duration {
        self.retry_delay * retry
    }

    /// Runs `attempt` until it succeeds or attempts are exhausted.
    ///
    /// Backoff sleeps race `cancel`; cancellation surfaces the last error
    /// (or a generic failure if no attempt ran) without further retries.
    pub(crate) async fn run<T, F>(
        &self,
        attempt: F,
        cancel: &CancellationToken,
    ) -> Result<T, FetchError>
    where
        F: Fn() -> BoxFuture<'static, Result<T, FetchError>>,
    {
        let mut last_error: Option<FetchError> = None;

        for n in 0..=self.retry_count {
            if n > 0 {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.delay_before(n)) => {}
                }
            }

            match attempt().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    tracing::debug!(attempt = n + 1, %error, "fetch attempt failed");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| FetchError::Failed("fetch cancelled".to_string())))
    }
}

impl From<&QueryConfig> for RetryPolicy {
    fn from(config: &QueryConfig) -> Self {
        Self {
            retry_count: config.retry_count,
            retry_delay: config.retry_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn counting_attempt(
        calls: Arc<AtomicU32>,
        fail_first: u32,
    ) -> impl Fn() -> BoxFuture<'static, Result<u32, FetchError>> {
        move || {
            let calls = calls.clone();
            Box::pin(async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= fail_first {
                    Err(FetchError::Failed(format!("attempt {n}")))
                } else {
                    Ok(n)
                }
            })
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            retry_count: 3,
            retry_delay: Duration::from_millis(1),
        };

        let result = policy
            .run(counting_attempt(calls.clone(), 0), &CancellationToken::new())
            .await;

        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_invoke_exactly_retry_count_plus_one() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            retry_count: 3,
            retry_delay: Duration::from_millis(1),
        };

        let result = policy
            .run(counting_attempt(calls.clone(), u32::MAX), &CancellationToken::new())
            .await;

        assert_eq!(result.unwrap_err(), FetchError::Failed("attempt 4".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_recovers_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            retry_count: 3,
            retry_delay: Duration::from_millis(1),
        };

        let result = policy
            .run(counting_attempt(calls.clone(), 2), &CancellationToken::new())
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_linear_backoff_delays() {
        let policy = RetryPolicy {
            retry_count: 3,
            retry_delay: Duration::from_millis(20),
        };
        // retries wait 20ms, 40ms, 60ms: 120ms total across 4 attempts
        let start = Instant::now();
        let _ = policy
            .run(
                counting_attempt(Arc::new(AtomicU32::new(0)), u32::MAX),
                &CancellationToken::new(),
            )
            .await;
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(110),
            "expected linear backoff to take at least ~120ms, took {elapsed:?}"
        );
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            retry_count: 5,
            retry_delay: Duration::from_secs(60),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let start = Instant::now();
        let result = policy
            .run(counting_attempt(calls.clone(), u32::MAX), &cancel)
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1, "no retry after cancellation");
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_policy_from_config() {
        let config = QueryConfig::default().with_retry(2, Duration::from_millis(5));
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.retry_count, 2);
        assert_eq!(policy.retry_delay, Duration::from_millis(5));
        assert_eq!(policy.delay_before(2), Duration::from_millis(10));
    }
}
