//! Bounded exponential backoff for platform RPCs.
//!
//! Chunk retry lives in the dispatcher; this covers the control-plane calls
//! (project resolution, describe, upload-URL issuance, close) that the core
//! makes directly. Transient transport failures are retried with capped
//! exponential delay; semantic errors surface immediately.

use depot_api::{ApiError, ApiResult};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::warn;

/// Backoff settings for one class of RPC calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub tries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), growing exponentially
    /// up to `max_delay`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let delay_ms = base.saturating_mul(1 << attempt.min(10));
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, the error is not transient, or attempts run
/// out. The last error is returned unchanged.
pub async fn retry_rpc<'a, T, F>(label: &str, policy: &RetryPolicy, mut op: F) -> ApiResult<T>
where
    F: FnMut() -> Pin<Box<dyn Future<Output = ApiResult<T>> + Send + 'a>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < policy.tries => {
                let delay = policy.delay(attempt);
                warn!(
                    target: "uploader::rpc",
                    call = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "RPC failed, backing off before retry"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            tries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(10), Duration::from_secs(2));
        assert_eq!(policy.delay(30), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn semantic_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();
        let result: ApiResult<()> = retry_rpc("test", &policy, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {
                Err(ApiError::Api {
                    code: 404,
                    message: "no such file".into(),
                    error_detail: None,
                })
            })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let policy = RetryPolicy::default();
        let result = retry_rpc("test", &policy, || Box::pin(async { Ok(41 + 1) })).await;
        assert_eq!(result.unwrap(), 42);
    }
}
