//! Resilience primitives for downstream calls.
//!
//! - **[`RetryPolicy`]**: bounded retries with exponential backoff
//! - **[`CircuitBreaker`]**: Closed / Open / HalfOpen state shared by all
//!   callers of one dependency
//! - **[`FailureClassifier`]**: decides which failures count against the
//!   breaker
//! - **[`ResilientCaller`]**: per-attempt timeout + retry + breaker
//! - **[`BreakerRegistry`]**: one breaker per dependency name

pub mod breaker;
pub mod caller;
pub mod classify;
pub mod error;
pub mod registry;
pub mod retry;

pub use breaker::{BreakerConfig, BreakerOpen, BreakerState, CircuitBreaker, Permit};
pub use caller::ResilientCaller;
pub use classify::{AllFailures, FailureClassifier, is_transient_status};
pub use error::{CallError, Unavailable};
pub use registry::BreakerRegistry;
pub use retry::RetryPolicy;
