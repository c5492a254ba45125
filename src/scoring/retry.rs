//! Per-call timeout and retry with exponential back-off and jitter.
//!
//! [`call_with_retry`] wraps one backend call. Each attempt runs under
//! [`CallPolicy::timeout`]; transient errors ([`BackendError::is_retriable`])
//! are retried up to `max_retries` extra times, everything else is returned
//! immediately so the dispatcher can move on to the next backend.

use std::future::Future;
use std::time::Duration;

use crate::config::CurationSettings;
use crate::scoring::BackendError;

const MAX_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

impl CallPolicy {
    pub fn from_settings(settings: &CurationSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            max_retries: settings.scoring.max_retries,
            backoff_base_ms: settings.scoring.backoff_base_ms,
        }
    }

    /// Sleep before retry number `attempt` (1-based): base × 2^(attempt-1) ± 25 %.
    fn delay(&self, attempt: u32) -> Duration {
        let computed = self
            .backoff_base_ms
            .saturating_mul(1u64 << (attempt.saturating_sub(1)).min(10));
        let capped = computed.min(MAX_DELAY_MS);
        let jittered = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
        Duration::from_millis(jittered)
    }
}

/// Run `operation` under `policy`. Returns the number of attempts made with the result.
pub async fn call_with_retry<T, F, Fut>(
    policy: &CallPolicy,
    backend: &str,
    mut operation: F,
) -> (u32, Result<T, BackendError>)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = match tokio::time::timeout(policy.timeout, operation()).await {
            Ok(r) => r,
            Err(_) => Err(BackendError::Timeout(policy.timeout)),
        };
        match result {
            Ok(value) => return (attempt, Ok(value)),
            Err(err) => {
                if !err.is_retriable() || attempt > policy.max_retries {
                    return (attempt, Err(err));
                }
                let delay = policy.delay(attempt);
                tracing::warn!(
                    backend,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient scoring error; retrying after back-off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> CallPolicy {
        CallPolicy {
            timeout: Duration::from_millis(200),
            max_retries,
            backoff_base_ms: 1,
        }
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (attempts, res) = call_with_retry(&policy(3), "t", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(BackendError::Unavailable("503".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(res.unwrap(), 42);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn auth_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let (attempts, res) = call_with_retry(&policy(3), "t", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(BackendError::Auth("401".into()))
        })
        .await;
        assert!(matches!(res, Err(BackendError::Auth(_))));
        assert_eq!(attempts, 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_call_times_out_after_all_attempts() {
        let p = CallPolicy {
            timeout: Duration::from_millis(20),
            max_retries: 1,
            backoff_base_ms: 1,
        };
        let (attempts, res) = call_with_retry(&p, "t", || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, BackendError>(())
        })
        .await;
        assert!(matches!(res, Err(BackendError::Timeout(_))));
        assert_eq!(attempts, 2);
    }
}
