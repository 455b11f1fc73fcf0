//! Retry executor with exponential backoff
//!
//! Generic over the operation's output and error; the error decides whether
//! it is worth another attempt through `Retryable`, and the policy can
//! override that with its own predicate.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::ApiError;

/// Errors the executor can reason about.
pub trait Retryable {
    /// Whether the failure may go away on its own (network blip, 5xx).
    fn is_transient(&self) -> bool;

    /// Label for the `api_retries_total` counter.
    fn retry_label(&self) -> &'static str {
        "error"
    }
}

impl Retryable for ApiError {
    fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    fn retry_label(&self) -> &'static str {
        self.kind.label()
    }
}

pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Called before each re-attempt with the 1-based retry number, the delay
/// that was waited and the error that caused it.
pub type RetryObserver<E> = Arc<dyn Fn(u32, Duration, &E) + Send + Sync>;

pub struct RetryPolicy<E> {
    /// Re-attempts after the first try; 3 means up to 4 calls.
    pub retries: u32,
    pub base_delay: Duration,
    /// `base_delay * 2^attempt` when true, constant `base_delay` otherwise.
    pub exponential: bool,
    is_retryable: RetryPredicate<E>,
    on_retry: Option<RetryObserver<E>>,
}

impl<E: Retryable + 'static> Default for RetryPolicy<E> {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(1000),
            exponential: true,
            is_retryable: Arc::new(|e: &E| e.is_transient()),
            on_retry: None,
        }
    }
}

impl<E: Retryable + 'static> RetryPolicy<E> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<E> RetryPolicy<E> {
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_exponential(mut self, exponential: bool) -> Self {
        self.exponential = exponential;
        self
    }

    /// Replace the retry-eligibility predicate.
    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.is_retryable = Arc::new(predicate);
        self
    }

    pub fn on_retry(mut self, observer: impl Fn(u32, Duration, &E) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    pub fn should_retry(&self, error: &E) -> bool {
        (self.is_retryable)(error)
    }

    /// Wait before re-attempt number `attempt` (counted from 0).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.base_delay;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            retries: self.retries,
            base_delay: self.base_delay,
            exponential: self.exponential,
            is_retryable: self.is_retryable.clone(),
            on_retry: self.on_retry.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retries", &self.retries)
            .field("base_delay", &self.base_delay)
            .field("exponential", &self.exponential)
            .field("on_retry", &self.on_retry.is_some())
            .finish_non_exhaustive()
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's retries are used up. Returns the last error on failure.
pub async fn execute<T, E, F, Fut>(policy: &RetryPolicy<E>, mut operation: F) -> Result<T, E>
where
    E: Retryable,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        let error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if attempt >= policy.retries || !policy.should_retry(&error) {
            return Err(error);
        }

        let delay = policy.delay_for(attempt);
        debug!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            kind = error.retry_label(),
            "transient failure, backing off"
        );
        tokio::time::sleep(delay).await;

        crate::metrics::record_retry(error.retry_label());
        if let Some(observer) = &policy.on_retry {
            observer(attempt + 1, delay, &error);
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn err(kind: ErrorKind) -> ApiError {
        ApiError::new(kind, "test")
    }

    #[test]
    fn default_policy_values() {
        let policy: RetryPolicy<ApiError> = RetryPolicy::new();
        assert_eq!(policy.retries, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(1000));
        assert!(policy.exponential);
        assert!(policy.should_retry(&err(ErrorKind::Network)));
        assert!(policy.should_retry(&err(ErrorKind::ServerError)));
        assert!(policy.should_retry(&err(ErrorKind::Unavailable)));
        assert!(!policy.should_retry(&err(ErrorKind::NotFound)));
        assert!(!policy.should_retry(&err(ErrorKind::AuthInvalid)));
    }

    #[test]
    fn exponential_and_constant_delays() {
        let policy: RetryPolicy<ApiError> =
            RetryPolicy::new().with_base_delay(Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));

        let constant = policy.with_exponential(false);
        assert_eq!(constant.delay_for(3), Duration::from_millis(100));
    }

    #[test]
    fn huge_attempt_saturates() {
        let policy: RetryPolicy<ApiError> = RetryPolicy::new();
        assert_eq!(policy.delay_for(40), Duration::from_millis(1000).saturating_mul(u32::MAX));
    }

    #[tokio::test(start_paused = true)]
    async fn backs_off_base_then_double() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let policy = RetryPolicy::new()
            .with_base_delay(Duration::from_millis(500))
            .on_retry(move |attempt, delay, e: &ApiError| {
                seen_clone.lock().unwrap().push((attempt, delay, e.kind));
            });

        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result = execute(&policy, || async {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(err(ErrorKind::Unavailable)),
                1 => Err(err(ErrorKind::Network)),
                _ => Ok("done"),
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(1500) && elapsed < Duration::from_millis(1510),
            "expected 500ms + 1000ms of backoff, got {elapsed:?}"
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (1, Duration::from_millis(500), ErrorKind::Unavailable),
                (2, Duration::from_millis(1000), ErrorKind::Network),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retries_with_last_error() {
        let policy = RetryPolicy::new().with_retries(3);
        let calls = AtomicU32::new(0);

        let result: Result<(), ApiError> = execute(&policy, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(ApiError::new(ErrorKind::ServerError, format!("attempt {n}")))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4, "retries = 3 means four calls");
        assert_eq!(result.unwrap_err().message, "attempt 3");
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_short_circuits() {
        let observed = Arc::new(AtomicU32::new(0));
        let observed_clone = observed.clone();
        let policy = RetryPolicy::new().on_retry(move |_, _, _: &ApiError| {
            observed_clone.fetch_add(1, Ordering::SeqCst);
        });
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<(), ApiError> = execute(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(err(ErrorKind::Validation))
        })
        .await;

        assert_eq!(result.unwrap_err().kind, ErrorKind::Validation);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(observed.load(Ordering::SeqCst), 0);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_predicate_overrides_kind() {
        let policy = RetryPolicy::new()
            .with_retries(1)
            .retry_if(|e: &ApiError| e.kind == ErrorKind::RateLimited);
        let calls = AtomicU32::new(0);

        let result = execute(&policy, || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(err(ErrorKind::RateLimited))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[derive(Debug)]
    struct Flaky;

    impl Retryable for Flaky {
        fn is_transient(&self) -> bool {
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn works_with_any_retryable_error() {
        let policy = RetryPolicy::new().with_retries(2).with_exponential(false);
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<(), Flaky> = execute(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky)
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(2000) && elapsed < Duration::from_millis(2010),
            "expected two constant 1s delays, got {elapsed:?}"
        );
    }
}
