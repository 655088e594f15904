//! Error types for resilient calls.

use std::time::Duration;

/// Why a dependency is considered unavailable.
#[derive(Debug, thiserror::Error)]
pub enum Unavailable<E> {
    #[error("circuit breaker is open")]
    BreakerOpen,

    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),

    #[error("{0}")]
    Failed(E),
}

/// Error returned by [`ResilientCaller::call`](crate::ResilientCaller::call).
///
/// Breaker-open, retries exhausted and attempt timeouts all surface as
/// `DependencyUnavailable`, so callers apply one fallback policy to all of
/// them.
#[derive(Debug, thiserror::Error)]
pub enum CallError<E> {
    #[error("dependency `{dependency}` unavailable after {attempts} attempt(s): {cause}")]
    DependencyUnavailable {
        dependency: String,
        attempts: u32,
        cause: Unavailable<E>,
    },

    /// The dependency answered with a failure that is not breaker-worthy.
    #[error("dependency rejected the call: {0}")]
    Rejected(E),
}

impl<E> CallError<E> {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CallError::DependencyUnavailable { .. })
    }

    /// `true` if no attempt was made because the circuit was open.
    pub fn is_breaker_open(&self) -> bool {
        matches!(
            self,
            CallError::DependencyUnavailable {
                cause: Unavailable::BreakerOpen,
                attempts: 0,
                ..
            }
        )
    }
}
