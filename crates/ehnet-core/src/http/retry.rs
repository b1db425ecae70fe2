//! Bounded retry with linear backoff
//!
//! A request is attempted at most `max_retries + 1` times on one tier. Only
//! network errors in the retryable set are retried; every other outcome,
//! including HTTP error statuses and soft blocks, returns at once. The delay
//! before retry `n` (0-based) is `(n + 1) * backoff_unit`.

use crate::http::error::EhError;
use crate::http::tier::TierId;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Upper bound accepted by [`RetryPolicy::validate`]
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Retry policy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Step of the linear backoff
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_unit: Duration::from_millis(1500),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom settings
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Set the backoff step
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// No retries at all
    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.backoff_unit.saturating_mul(retry.saturating_add(1))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(format!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}, got {}",
                self.max_retries
            ));
        }
        Ok(())
    }
}

/// Decision on whether to retry a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the request after the specified delay
    Retry { delay: Duration },
    /// Do not retry the request
    NoRetry,
}

/// One dispatched attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub tier: TierId,
    /// 0-based attempt index on this tier
    pub index: u32,
    pub error: Option<EhError>,
}

/// Retry bookkeeping for one request on one tier
#[derive(Debug)]
pub struct RetryHandler {
    policy: RetryPolicy,
    retries: u32,
}

impl RetryHandler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, retries: 0 }
    }

    /// Determine if a request should be retried based on the error
    pub fn should_retry(&mut self, error: &EhError) -> RetryDecision {
        if self.retries >= self.policy.max_retries || !error.is_retryable() {
            return RetryDecision::NoRetry;
        }
        let delay = self.policy.delay_for(self.retries);
        self.retries += 1;
        RetryDecision::Retry { delay }
    }

    /// Retries granted so far
    pub fn retries(&self) -> u32 {
        self.retries
    }
}

/// Execute a request with retry logic
pub async fn execute_with_retry<F, Fut, T>(
    tier: TierId,
    policy: &RetryPolicy,
    request_fn: F,
) -> Result<T, EhError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EhError>>,
{
    execute_with_retry_observed(tier, policy, request_fn, |_| {}).await
}

/// [`execute_with_retry`], reporting every attempt to `observer`
pub async fn execute_with_retry_observed<F, Fut, T, O>(
    tier: TierId,
    policy: &RetryPolicy,
    mut request_fn: F,
    mut observer: O,
) -> Result<T, EhError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EhError>>,
    O: FnMut(&Attempt),
{
    let mut handler = RetryHandler::new(*policy);
    let mut index = 0;

    loop {
        match request_fn().await {
            Ok(response) => {
                observer(&Attempt {
                    tier,
                    index,
                    error: None,
                });
                if index > 0 {
                    debug!(%tier, attempt = index, "request succeeded after retry");
                }
                return Ok(response);
            }
            Err(error) => {
                observer(&Attempt {
                    tier,
                    index,
                    error: Some(error.clone()),
                });
                match handler.should_retry(&error) {
                    RetryDecision::Retry { delay } => {
                        warn!(
                            %tier,
                            attempt = index,
                            delay_ms = delay.as_millis() as u64,
                            error = %error,
                            "request failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        index += 1;
                    }
                    RetryDecision::NoRetry => {
                        if error.is_retryable() {
                            warn!(%tier, attempts = index + 1, error = %error, "retries exhausted");
                        } else {
                            debug!(%tier, attempt = index, error = %error, "not retrying");
                        }
                        return Err(error);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::error::NetworkErrorCode;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn timeout() -> EhError {
        EhError::network(NetworkErrorCode::TimedOut, "deadline elapsed")
    }

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.delay_for(0), Duration::from_millis(1500));
        assert_eq!(policy.delay_for(1), Duration::from_millis(3000));
    }

    #[test]
    fn test_retry_handler_max_retries() {
        let mut handler = RetryHandler::new(RetryPolicy::new(2));
        assert!(matches!(handler.should_retry(&timeout()), RetryDecision::Retry { .. }));
        assert!(matches!(handler.should_retry(&timeout()), RetryDecision::Retry { .. }));
        assert_eq!(handler.should_retry(&timeout()), RetryDecision::NoRetry);
        assert_eq!(handler.retries(), 2);
    }

    #[test]
    fn test_non_retryable_error() {
        let mut handler = RetryHandler::new(RetryPolicy::default());
        let error = EhError::HttpStatus {
            code: 500,
            body_snippet: String::new(),
        };
        assert_eq!(handler.should_retry(&error), RetryDecision::NoRetry);
        assert_eq!(handler.should_retry(&EhError::SoftBlockSadPanda), RetryDecision::NoRetry);
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::new(MAX_RETRIES_LIMIT).validate().is_ok());
        assert!(RetryPolicy::new(MAX_RETRIES_LIMIT + 1).validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_timing() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<(), EhError> =
            execute_with_retry(TierId::Primary, &RetryPolicy::default(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(timeout()) }
            })
            .await;
        assert_eq!(result, Err(timeout()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(4500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_retry() {
        let calls = AtomicU32::new(0);
        let mut attempts = Vec::new();
        let result = execute_with_retry_observed(
            TierId::PrimaryNoRedirect,
            &RetryPolicy::default(),
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(EhError::network(NetworkErrorCode::NetworkConnectionLost, "reset"))
                    } else {
                        Ok(n)
                    }
                }
            },
            |attempt| attempts.push(attempt.clone()),
        )
        .await;
        assert_eq!(result, Ok(1));
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].index, 0);
        assert!(attempts[0].error.is_some());
        assert_eq!(attempts[1].index, 1);
        assert_eq!(attempts[1].error, None);
        assert_eq!(attempts[1].tier, TierId::PrimaryNoRedirect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_returns_immediately() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let result: Result<(), EhError> =
            execute_with_retry(TierId::Primary, &RetryPolicy::default(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EhError::network(NetworkErrorCode::Other, "redirect loop")) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
