//! Bounded retry with backoff, per-call timeouts and cancellation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::api::ApiClient;
use crate::error::ApiError;
use crate::schema::{ContentHasher, raw};

/// Default maximum number of attempts per remote call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Retry and timeout settings for remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Deadline for one attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// A policy without delays, for tests.
    #[must_use]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (1-based).
    ///
    /// Exponential backoff capped at `max_delay`, scaled by a jitter factor
    /// in `[0.5, 1)`. A server retry-after hint acts as a floor.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, seed: &str, retry_after: Option<Duration>) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay);
        let jitter = 0.5 + ContentHasher::new().jitter(seed, attempt) / 2.0;
        let delay = backoff.mul_f64(jitter);
        match retry_after {
            Some(floor) if floor > delay => floor,
            _ => delay,
        }
    }
}

/// Runs `op` under the policy. `label` names the call in logs; `seed`
/// drives the backoff jitter.
///
/// Cancellation is checked before each attempt and while waiting between
/// attempts, never inside an issued call. Non-transient errors return
/// immediately.
///
/// # Errors
///
/// Returns the first non-transient error, [`ApiError::RetriesExhausted`]
/// after the attempt cap, or [`ApiError::Cancelled`].
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    label: &str,
    seed: &str,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        attempt += 1;

        let outcome = match tokio::time::timeout(policy.call_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(ApiError::Timeout {
                operation: label.to_string(),
                timeout_secs: policy.call_timeout.as_secs(),
            }),
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) => e,
        };

        if attempt >= max_attempts {
            warn!("{label}: giving up after {attempt} attempts: {err}");
            return Err(ApiError::RetriesExhausted {
                attempts: attempt,
                last: Box::new(err),
            });
        }

        let delay = policy.delay_for(attempt, seed, err.retry_after_secs().map(Duration::from_secs));
        debug!("{label}: attempt {attempt} failed ({err}), retrying in {delay:?}");
        tokio::select! {
            () = cancel.cancelled() => return Err(ApiError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

/// The API client with the retry policy and cancellation token applied to
/// every call.
#[derive(Clone)]
pub struct Remote {
    client: Arc<dyn ApiClient>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote").field("policy", &self.policy).finish_non_exhaustive()
    }
}

impl Remote {
    /// Wraps a client.
    #[must_use]
    pub fn new(client: Arc<dyn ApiClient>, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        Self { client, policy, cancel }
    }

    /// The cancellation token shared by every call.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// GET with retry.
    ///
    /// # Errors
    ///
    /// See [`with_retry`].
    pub async fn get(&self, path: &str, query: &[(String, String)]) -> Result<serde_json::Value, ApiError> {
        let label = format!("GET {path}");
        let seed = query.iter().fold(label.clone(), |seed, (k, v)| format!("{seed}&{k}={v}"));
        with_retry(&self.policy, &self.cancel, &label, &seed, || self.client.get(path, query)).await
    }

    /// POST with retry.
    ///
    /// # Errors
    ///
    /// See [`with_retry`].
    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
        let label = format!("POST {path}");
        let seed = body_seed(&label, body);
        with_retry(&self.policy, &self.cancel, &label, &seed, || self.client.post(path, body)).await
    }

    /// PATCH with retry.
    ///
    /// # Errors
    ///
    /// See [`with_retry`].
    pub async fn patch(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
        let label = format!("PATCH {path}");
        let seed = body_seed(&label, body);
        with_retry(&self.policy, &self.cancel, &label, &seed, || self.client.patch(path, body)).await
    }

    /// PUT with retry.
    ///
    /// # Errors
    ///
    /// See [`with_retry`].
    pub async fn put(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, ApiError> {
        let label = format!("PUT {path}");
        let seed = body_seed(&label, body);
        with_retry(&self.policy, &self.cancel, &label, &seed, || self.client.put(path, body)).await
    }

    /// DELETE with retry.
    ///
    /// # Errors
    ///
    /// See [`with_retry`].
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        let label = format!("DELETE {path}");
        with_retry(&self.policy, &self.cancel, &label, &label, || self.client.delete(path)).await
    }
}

/// Jitter seed for a call with a body, so that concurrent calls to one
/// endpoint back off differently.
fn body_seed(label: &str, body: &serde_json::Value) -> String {
    format!("{label} {}", ContentHasher::new().fingerprint(&raw(body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::api::MockApiClient;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn server_error() -> ApiError {
        ApiError::from_status(503, "/x", "unavailable", None)
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let mut mock = MockApiClient::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        mock.expect_get().times(3).returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(server_error())
            } else {
                Ok(json!({"id": "r-1"}))
            }
        });

        let remote = Remote::new(Arc::new(mock), RetryPolicy::immediate(5), CancellationToken::new());
        let body = remote.get("/analytics/v1/reports/r-1", &[]).await.expect("third attempt succeeds");
        assert_eq!(body["id"], json!("r-1"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_validation_error_not_retried() {
        let mut mock = MockApiClient::new();
        mock.expect_post()
            .times(1)
            .returning(|_, _| Err(ApiError::from_status(400, "/x", "bad", None)));

        let remote = Remote::new(Arc::new(mock), RetryPolicy::immediate(5), CancellationToken::new());
        let err = remote.post("/analytics/v1/budgets", &json!({})).await.expect_err("fails");
        assert!(matches!(err, ApiError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_conflict_not_retried() {
        let mut mock = MockApiClient::new();
        mock.expect_post()
            .times(1)
            .returning(|_, _| Err(ApiError::from_status(409, "/x", "exists", None)));

        let remote = Remote::new(Arc::new(mock), RetryPolicy::immediate(5), CancellationToken::new());
        let err = remote.post("/analytics/v1/labels", &json!({})).await.expect_err("fails");
        assert!(matches!(err, ApiError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let mut mock = MockApiClient::new();
        mock.expect_delete().times(3).returning(|_| Err(server_error()));

        let remote = Remote::new(Arc::new(mock), RetryPolicy::immediate(3), CancellationToken::new());
        let err = remote.delete("/analytics/v1/labels/l-1").await.expect_err("fails");
        match err {
            ApiError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(last.is_transient());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_hint_is_floor() {
        let mut mock = MockApiClient::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        mock.expect_get().times(2).returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(ApiError::from_status(429, "/x", "", Some(7)))
            } else {
                Ok(json!({}))
            }
        });

        let remote = Remote::new(Arc::new(mock), RetryPolicy::default(), CancellationToken::new());
        let started = tokio::time::Instant::now();
        remote.get("/analytics/v1/alerts", &[]).await.expect("succeeds after wait");
        assert!(started.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let mut mock = MockApiClient::new();
        mock.expect_get().times(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let remote = Remote::new(Arc::new(mock), RetryPolicy::immediate(5), cancel);
        let err = remote.get("/analytics/v1/alerts", &[]).await.expect_err("cancelled");
        assert!(matches!(err, ApiError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_is_transient() {
        let policy = RetryPolicy {
            max_attempts: 2,
            call_timeout: Duration::from_millis(100),
            ..RetryPolicy::immediate(2)
        };
        let cancel = CancellationToken::new();
        let err = with_retry(&policy, &cancel, "slow", "slow", || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<(), ApiError>(())
        })
        .await
        .expect_err("times out");
        match err {
            ApiError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, ApiError::Timeout { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_same_endpoint_calls_back_off_differently() {
        let policy = RetryPolicy::default();
        let first = body_seed("POST /analytics/v1/labels", &json!({"name": "prod", "color": "blue"}));
        let second = body_seed("POST /analytics/v1/labels", &json!({"name": "dev", "color": "teal"}));
        assert_ne!(first, second);
        assert_ne!(policy.delay_for(1, &first, None), policy.delay_for(1, &second, None));
        assert_eq!(
            first,
            body_seed("POST /analytics/v1/labels", &json!({"color": "blue", "name": "prod"}))
        );
    }

    #[test]
    fn test_delay_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..10 {
            let delay = policy.delay_for(attempt, "seed", None);
            assert!(delay <= policy.max_delay);
        }
        let first = policy.delay_for(1, "seed", None);
        assert!(first >= Duration::from_millis(250) && first < Duration::from_millis(500));
        assert_eq!(
            policy.delay_for(1, "seed", Some(Duration::from_secs(60))),
            Duration::from_secs(60)
        );
    }
}
