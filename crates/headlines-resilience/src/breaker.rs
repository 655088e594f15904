//! Circuit breaker.
//!
//! ## States
//!
//! ```text
//!            failure_threshold consecutive failures
//!   Closed ───────────────────────────────────────→ Open
//!     ↑                                              │ cool_down elapsed
//!     │ probe succeeds                               ↓
//!     └──────────────────────────────────────── HalfOpen ──probe fails──→ Open
//! ```
//!
//! State is shared by every caller of one dependency and is read under the
//! lock on each admission, so a transition is visible to the next call.

use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use tokio::time::Instant;

/// Metric names as constants for consistency.
pub mod names {
    pub const BREAKER_TRANSITIONS_TOTAL: &str = "breaker_transitions_total";
}

/// Circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failed attempts that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing.
    pub cool_down: Duration,
    /// Probes admitted at once while half-open.
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cool_down: Duration::from_secs(20),
            half_open_probes: 1,
        }
    }
}

/// Returned when the breaker refuses a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker is open")]
pub struct BreakerOpen;

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
    /// Bumped on every state change; permits from an earlier round are
    /// ignored when they resolve.
    round: u64,
}

/// Circuit breaker guarding one dependency.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config: BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                half_open_probes: config.half_open_probes.max(1),
                ..config
            },
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probes_in_flight: 0,
                round: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state. An open circuit whose cool-down has elapsed still
    /// reports `Open` until the next admission moves it to `HalfOpen`.
    pub fn state(&self) -> BreakerState {
        self.inner.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Asks to make one attempt. The returned permit must be resolved with
    /// [`Permit::success`] or [`Permit::failure`]; dropping it unresolved
    /// frees a probe slot without changing state.
    pub fn try_acquire(&self) -> Result<Permit<'_>, BreakerOpen> {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => Ok(Permit::new(self, false, inner.round)),
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .is_none_or(|at| at.elapsed() >= self.config.cool_down);
                if !cooled {
                    return Err(BreakerOpen);
                }
                self.transition(&mut inner, BreakerState::HalfOpen);
                inner.probes_in_flight = 1;
                Ok(Permit::new(self, true, inner.round))
            }
            BreakerState::HalfOpen => {
                if inner.probes_in_flight >= self.config.half_open_probes {
                    return Err(BreakerOpen);
                }
                inner.probes_in_flight += 1;
                Ok(Permit::new(self, true, inner.round))
            }
        }
    }

    /// Forces the circuit closed and clears the failure count.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.probes_in_flight = 0;
        inner.opened_at = None;
        self.transition(&mut inner, BreakerState::Closed);
    }

    fn on_success(&self, probe: bool, round: u64) {
        let mut inner = self.inner.lock();
        if round != inner.round {
            return;
        }
        if probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen if probe => {
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.probes_in_flight = 0;
                self.transition(&mut inner, BreakerState::Closed);
            }
            _ => {}
        }
    }

    fn on_failure(&self, probe: bool, round: u64) {
        let mut inner = self.inner.lock();
        if round != inner.round {
            return;
        }
        if probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    self.open(&mut inner);
                }
            }
            BreakerState::HalfOpen if probe => {
                inner.consecutive_failures += 1;
                inner.probes_in_flight = 0;
                self.open(&mut inner);
            }
            _ => {}
        }
    }

    fn on_abandoned(&self, probe: bool, round: u64) {
        if probe {
            let mut inner = self.inner.lock();
            // Slots of an earlier round were already released.
            if round == inner.round {
                inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
            }
        }
    }

    fn open(&self, inner: &mut Inner) {
        inner.opened_at = Some(Instant::now());
        self.transition(inner, BreakerState::Open);
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.round = inner.round.wrapping_add(1);

        counter!(
            names::BREAKER_TRANSITIONS_TOTAL,
            "dependency" => self.name.clone(),
            "state" => to.as_str()
        )
        .increment(1);

        match to {
            BreakerState::Open => tracing::warn!(
                dependency = %self.name,
                from = %from,
                failures = inner.consecutive_failures,
                cool_down_secs = self.config.cool_down.as_secs_f64(),
                "circuit breaker opened"
            ),
            BreakerState::HalfOpen => tracing::info!(
                dependency = %self.name,
                "circuit breaker half-open, probing"
            ),
            BreakerState::Closed => tracing::info!(
                dependency = %self.name,
                from = %from,
                "circuit breaker closed"
            ),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("consecutive_failures", &inner.consecutive_failures)
            .field("probes_in_flight", &inner.probes_in_flight)
            .finish()
    }
}

/// Admission to make one attempt against the dependency.
#[must_use = "a permit must be resolved with success() or failure()"]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    round: u64,
    resolved: bool,
}

impl<'a> Permit<'a> {
    fn new(breaker: &'a CircuitBreaker, probe: bool, round: u64) -> Self {
        Self {
            breaker,
            probe,
            round,
            resolved: false,
        }
    }

    /// Whether this attempt is a half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.probe, self.round);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.probe, self.round);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_abandoned(self.probe, self.round);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: threshold,
                cool_down: Duration::from_secs(20),
                half_open_probes: 1,
            },
        )
    }

    #[test]
    fn test_opens_after_threshold() {
        let breaker = breaker(3);
        for _ in 0..2 {
            breaker.try_acquire().unwrap().failure();
        }
        assert_eq!(breaker.state(), BreakerState::Closed);
        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn test_success_resets_count() {
        let breaker = breaker(3);
        breaker.try_acquire().unwrap().failure();
        breaker.try_acquire().unwrap().failure();
        breaker.try_acquire().unwrap().success();
        assert_eq!(breaker.consecutive_failures(), 0);
        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_admits_one_probe() {
        let breaker = breaker(1);
        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(19)).await;
        assert!(breaker.try_acquire().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        let probe = breaker.try_acquire().unwrap();
        assert!(probe.is_probe());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert_eq!(breaker.try_acquire().err(), Some(BreakerOpen));

        probe.success();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_restarts_cool_down() {
        let breaker = breaker(1);
        breaker.try_acquire().unwrap().failure();
        tokio::time::advance(Duration::from_secs(20)).await;

        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.try_acquire().is_err());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(breaker.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_frees_slot() {
        let breaker = breaker(1);
        breaker.try_acquire().unwrap().failure();
        tokio::time::advance(Duration::from_secs(20)).await;

        drop(breaker.try_acquire().unwrap());
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        let probe = breaker.try_acquire().unwrap();
        assert!(probe.is_probe());
        probe.failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn test_late_outcome_does_not_reopen() {
        let breaker = breaker(1);
        let early = breaker.try_acquire().unwrap();
        breaker.try_acquire().unwrap().failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        // Admitted while closed, resolved after opening: ignored.
        early.success();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_from_earlier_round_is_ignored() {
        let breaker = CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: 1,
                cool_down: Duration::from_secs(20),
                half_open_probes: 2,
            },
        );
        breaker.try_acquire().unwrap().failure();
        tokio::time::advance(Duration::from_secs(20)).await;

        let first = breaker.try_acquire().unwrap();
        let second = breaker.try_acquire().unwrap();
        assert!(first.is_probe() && second.is_probe());
        first.failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        tokio::time::advance(Duration::from_secs(20)).await;
        let third = breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);

        // Resolves after the circuit reopened and went half-open again.
        second.success();
        assert_eq!(breaker.state(), BreakerState::HalfOpen);
        assert_eq!(breaker.consecutive_failures(), 2);

        // Its slot is not freed twice: one more probe fits, then none.
        let fourth = breaker.try_acquire().unwrap();
        assert!(breaker.try_acquire().is_err());
        drop(fourth);

        third.success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn test_reset() {
        let breaker = breaker(1);
        breaker.try_acquire().unwrap().failure();
        breaker.reset();
        assert_eq!(breaker.state(), BreakerState::Closed);
        assert!(breaker.try_acquire().is_ok());
    }
}
