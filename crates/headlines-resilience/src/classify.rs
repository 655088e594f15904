//! Deciding which failures count against the breaker.
//!
//! A breaker-worthy failure is retried and recorded as a failure. Anything
//! else (a validation error, a 404) is returned to the caller unchanged and
//! counts as proof that the dependency is alive.

/// Classifies the error of one attempt.
pub trait FailureClassifier<E>: Send + Sync {
    fn is_breaker_worthy(&self, error: &E) -> bool;
}

impl<E, F> FailureClassifier<E> for F
where
    F: Fn(&E) -> bool + Send + Sync,
{
    fn is_breaker_worthy(&self, error: &E) -> bool {
        self(error)
    }
}

/// Treats every error as breaker-worthy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllFailures;

impl<E> FailureClassifier<E> for AllFailures {
    fn is_breaker_worthy(&self, _error: &E) -> bool {
        true
    }
}

/// Transient HTTP status codes: any 5xx, 408 Request Timeout and
/// 429 Too Many Requests.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 500..=599 | 408 | 429)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_status() {
        for status in [500, 502, 503, 504, 408, 429] {
            assert!(is_transient_status(status), "{status}");
        }
        for status in [200, 400, 401, 404, 422] {
            assert!(!is_transient_status(status), "{status}");
        }
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |e: &u16| is_transient_status(*e);
        assert!(classifier.is_breaker_worthy(&503));
        assert!(!classifier.is_breaker_worthy(&404));
        assert!(FailureClassifier::<u16>::is_breaker_worthy(&AllFailures, &404));
    }
}
