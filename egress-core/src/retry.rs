use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::client::EgressError;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Bounded exponential backoff for outbound API calls.
///
/// The delay after failed attempt `k` (0-indexed) is `base * 2^k`, capped at
/// `max`. There is no jitter and no sleep after the final attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base: Duration,
    max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base: DEFAULT_BASE_DELAY,
            max: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base: Duration, max: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            max,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base: Duration) -> Self {
        self.base = base;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let max_ms = self.max.as_millis().min(u128::from(u64::MAX)) as u64;
        let shift = attempt.min(16);
        Duration::from_millis(base_ms.saturating_mul(1u64 << shift).min(max_ms))
    }

    /// Runs `call` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Exhaustion is reported as
    /// [`EgressError::Exhausted`] wrapping the last transient failure.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, EgressError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EgressError>>,
    {
        let mut attempt = 0u32;
        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };
            if attempt.saturating_add(1) >= self.max_attempts {
                return Err(EgressError::Exhausted {
                    attempts: self.max_attempts,
                    last: Box::new(err),
                });
            }
            let delay = self.delay(attempt);
            warn!(
                operation,
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use std::cell::Cell;

    fn api_error(status: StatusCode) -> EgressError {
        EgressError::Api {
            status,
            body: String::new(),
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default().with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn delay_doubles_from_base_unit() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (0..5).map(|attempt| policy.delay(attempt)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(16),
            ]
        );
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100), Duration::from_millis(300));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(300));
        assert_eq!(policy.delay(40), Duration::from_millis(300));
    }

    #[test]
    fn zero_attempts_is_clamped_to_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
    }

    #[tokio::test]
    async fn succeeds_on_fifth_attempt_without_sixth() {
        let calls = Cell::new(0u32);
        let result = fast_policy()
            .run("test", || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 5 {
                        Err(api_error(StatusCode::SERVICE_UNAVAILABLE))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 5);
        assert_eq!(calls.get(), 5);
    }

    #[tokio::test]
    async fn exhaustion_is_an_explicit_error() {
        let calls = Cell::new(0u32);
        let err = fast_policy()
            .run("test", || {
                calls.set(calls.get() + 1);
                async { Err::<(), _>(api_error(StatusCode::TOO_MANY_REQUESTS)) }
            })
            .await
            .expect_err("expected exhaustion");
        assert_eq!(calls.get(), 5);
        match err {
            EgressError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 5);
                assert!(matches!(
                    *last,
                    EgressError::Api { status, .. } if status == StatusCode::TOO_MANY_REQUESTS
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn fatal_status_is_not_retried() {
        let calls = Cell::new(0u32);
        let err = fast_policy()
            .run("test", || {
                calls.set(calls.get() + 1);
                async { Err::<(), _>(api_error(StatusCode::NOT_FOUND)) }
            })
            .await
            .expect_err("expected fatal error");
        assert_eq!(calls.get(), 1);
        assert!(matches!(err, EgressError::Api { status, .. } if status == StatusCode::NOT_FOUND));
    }
}
