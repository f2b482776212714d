//! Bounded retry with exponential backoff and a per-call timeout.
//!
//! Every provider call goes through [`with_retry`]; a call that exceeds the
//! timeout is reported as an error of the call's own type and never hangs
//! the workflow.

use std::future::Future;
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::error::{CreateEventError, ProviderError};

/// Errors [`with_retry`] knows how to classify.
pub trait Retryable: Sized {
    fn is_retryable(&self) -> bool;
    fn timed_out(after: Duration) -> Self;
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        ProviderError::is_retryable(self)
    }

    fn timed_out(after: Duration) -> Self {
        ProviderError::Timeout(after)
    }
}

impl Retryable for CreateEventError {
    fn is_retryable(&self) -> bool {
        match self {
            CreateEventError::Conflict => false,
            CreateEventError::Provider(e) => e.is_retryable(),
        }
    }

    fn timed_out(after: Duration) -> Self {
        CreateEventError::Provider(ProviderError::Timeout(after))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra tries after the first call.
    pub max_retries: u32,
    pub base: Duration,
    pub max: Duration,
    /// Deadline for each individual try.
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            max_retries: config.provider_retry_budget,
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            timeout: config.provider_timeout(),
        }
    }

    /// Delay before retry number `retry` (zero-based): `base * 2^retry`,
    /// capped at `max`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(16)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SchedulerConfig::default())
    }
}

/// Run `op` until it succeeds, fails permanently, or the retry budget runs out.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut retry = 0;
    loop {
        let result = match tokio::time::timeout(policy.timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(policy.timeout)),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && retry < policy.max_retries => {
                let delay = policy.delay_for(retry);
                tracing::warn!(call = what, retry = retry + 1, ?delay, error = %e, "Retrying provider call");
                tokio::time::sleep(delay).await;
                retry += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base: Duration::from_millis(1),
            max: Duration::from_millis(4),
            timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn delay_doubles_up_to_cap() {
        let p = RetryPolicy {
            max_retries: 5,
            base: Duration::from_millis(200),
            max: Duration::from_millis(1000),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(p.delay_for(0), Duration::from_millis(200));
        assert_eq!(p.delay_for(1), Duration::from_millis(400));
        assert_eq!(p.delay_for(2), Duration::from_millis(800));
        assert_eq!(p.delay_for(3), Duration::from_millis(1000));
        assert_eq!(p.delay_for(40), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, ProviderError> = with_retry(&fast(), "test", move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(ProviderError::Transient("flaky".into()))
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn budget_is_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), ProviderError> = with_retry(&fast(), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::Transient("down".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), CreateEventError> = with_retry(&fast(), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CreateEventError::Conflict)
        })
        .await;
        assert_eq!(result, Err(CreateEventError::Conflict));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..fast()
        };
        let result: Result<(), ProviderError> = with_retry(&policy, "test", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(ProviderError::Timeout(policy.timeout)));
    }
}
