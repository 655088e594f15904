//! Retry + circuit breaker around a downstream call.
//!
//! ## Call Flow
//!
//! ```text
//! call(op)
//!   for attempt in 1..=attempts:
//!     breaker.try_acquire() ──open──→ DependencyUnavailable(BreakerOpen)
//!     timeout(op())
//!       Ok(v)                    → success        → return Ok(v)
//!       Err(e), not worthy       → success        → return Rejected(e)
//!       Err(e) / timed out       → failure        → backoff, next attempt
//!   DependencyUnavailable(last cause)
//! ```
//!
//! Every attempt is recorded on the breaker, so a burst of retries against a
//! dead dependency opens the circuit during the call itself and the remaining
//! attempts are skipped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;

use crate::breaker::CircuitBreaker;
use crate::classify::{AllFailures, FailureClassifier};
use crate::error::{CallError, Unavailable};
use crate::retry::RetryPolicy;

/// Metric names as constants for consistency.
pub mod names {
    pub const DOWNSTREAM_CALLS_TOTAL: &str = "downstream_calls_total";
}

/// Calls one dependency with per-attempt timeout, bounded retries and a shared
/// circuit breaker.
pub struct ResilientCaller<E> {
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    classifier: Arc<dyn FailureClassifier<E>>,
}

impl<E> Clone for ResilientCaller<E> {
    fn clone(&self) -> Self {
        Self {
            breaker: Arc::clone(&self.breaker),
            retry: self.retry,
            attempt_timeout: self.attempt_timeout,
            classifier: Arc::clone(&self.classifier),
        }
    }
}

impl<E: 'static> ResilientCaller<E> {
    /// Caller with the default retry policy, a 2 second attempt timeout and
    /// every error treated as breaker-worthy.
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            breaker,
            retry: RetryPolicy::default(),
            attempt_timeout: Duration::from_secs(2),
            classifier: Arc::new(AllFailures),
        }
    }
}

impl<E> ResilientCaller<E> {
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_classifier(mut self, classifier: impl FailureClassifier<E> + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Upper bound on the duration of one [`call`](Self::call).
    pub fn worst_case(&self) -> Duration {
        self.retry.worst_case(self.attempt_timeout)
    }

    /// Runs `op` until it succeeds, fails with a non-breaker-worthy error,
    /// the retries run out or the breaker refuses the next attempt.
    pub async fn call<T, F, Fut>(&self, mut op: F) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let dependency = self.breaker.name();
        let attempts = self.retry.attempts();
        let mut last = Unavailable::BreakerOpen;
        let mut made = 0;

        for attempt in 1..=attempts {
            let Ok(permit) = self.breaker.try_acquire() else {
                tracing::debug!(dependency, attempt, "circuit open, skipping call");
                last = Unavailable::BreakerOpen;
                break;
            };
            made = attempt;

            match tokio::time::timeout(self.attempt_timeout, op()).await {
                Ok(Ok(value)) => {
                    permit.success();
                    self.count("success");
                    return Ok(value);
                }
                Ok(Err(e)) if !self.classifier.is_breaker_worthy(&e) => {
                    permit.success();
                    self.count("rejected");
                    return Err(CallError::Rejected(e));
                }
                Ok(Err(e)) => {
                    permit.failure();
                    tracing::warn!(dependency, attempt, attempts, error = %e, "downstream attempt failed");
                    last = Unavailable::Failed(e);
                }
                Err(_) => {
                    permit.failure();
                    tracing::warn!(
                        dependency,
                        attempt,
                        attempts,
                        timeout_ms = self.attempt_timeout.as_millis() as u64,
                        "downstream attempt timed out"
                    );
                    last = Unavailable::TimedOut(self.attempt_timeout);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.retry.delay_for(attempt)).await;
            }
        }

        self.count(if made == 0 { "short_circuited" } else { "failed" });
        Err(CallError::DependencyUnavailable {
            dependency: dependency.to_string(),
            attempts: made,
            cause: last,
        })
    }

    fn count(&self, outcome: &'static str) {
        counter!(
            names::DOWNSTREAM_CALLS_TOTAL,
            "dependency" => self.breaker.name().to_string(),
            "outcome" => outcome
        )
        .increment(1);
    }
}

impl<E> std::fmt::Debug for ResilientCaller<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientCaller")
            .field("breaker", &self.breaker)
            .field("retry", &self.retry)
            .field("attempt_timeout", &self.attempt_timeout)
            .finish()
    }
}
