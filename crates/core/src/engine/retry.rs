//! Retrying provider calls after transient network failures.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::config::RetryConfig;
use crate::fetcher::FetchError;
use crate::job::JobId;
use crate::metrics;

/// Runs `attempt` until it succeeds, fails with a non-retryable error, or
/// the policy's attempts are used up. Cancellation wins over both the call
/// in flight and any backoff sleep.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryConfig,
    token: &CancellationToken,
    job_id: JobId,
    operation: &'static str,
    mut attempt: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut tries = 0;

    loop {
        if token.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        tries += 1;

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => Err(FetchError::Cancelled),
            result = attempt() => result,
        };

        match result {
            Err(e) if e.is_retryable() && tries < max_attempts => {
                let delay = policy.delay_for_retry(tries);
                warn!(
                    job_id = %job_id,
                    operation,
                    attempt = tries,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying after network error"
                );
                metrics::FETCH_RETRIES.inc();
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    async fn flaky(calls: &AtomicU32, failures: u32) -> Result<u32, FetchError> {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= failures {
            Err(FetchError::network("timed out"))
        } else {
            Ok(n)
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            &RetryConfig::immediate(3),
            &CancellationToken::new(),
            JobId::new(),
            "fetch",
            || flaky(&calls, 2),
        )
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result = with_retry(
            &RetryConfig::immediate(3),
            &CancellationToken::new(),
            JobId::new(),
            "fetch",
            || flaky(&calls, 10),
        )
        .await;
        assert!(matches!(result, Err(FetchError::Network { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_at_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry(
            &RetryConfig::immediate(5),
            &CancellationToken::new(),
            JobId::new(),
            "resolve",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(FetchError::not_found("no such track"))
            },
        )
        .await;
        assert!(matches!(result, Err(FetchError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let calls = AtomicU32::new(0);
        let token = CancellationToken::new();
        let policy = RetryConfig {
            max_attempts: 5,
            initial_delay_ms: 60_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 1.0,
        };

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            with_retry(&policy, &token, JobId::new(), "fetch", || flaky(&calls, 10)),
        )
        .await
        .expect("cancellation should end the backoff sleep");

        assert!(matches!(result, Err(FetchError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
