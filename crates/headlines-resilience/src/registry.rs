//! Process-wide breakers, one per dependency name.

use std::sync::Arc;

use dashmap::DashMap;

use crate::breaker::{BreakerConfig, BreakerState, CircuitBreaker};

/// Hands out the shared breaker of each dependency.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
        }
    }

    /// Breaker for `dependency`, created with the default config on first use.
    pub fn breaker(&self, dependency: &str) -> Arc<CircuitBreaker> {
        self.breaker_with(dependency, self.default_config)
    }

    /// Breaker for `dependency`, created with `config` on first use. An
    /// existing breaker keeps its original config.
    pub fn breaker_with(&self, dependency: &str, config: BreakerConfig) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(dependency) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .breakers
            .entry(dependency.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(dependency, config)));
        Arc::clone(entry.value())
    }

    pub fn get(&self, dependency: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(dependency).map(|b| Arc::clone(b.value()))
    }

    /// Current state of every registered breaker, sorted by name.
    pub fn states(&self) -> Vec<(String, BreakerState)> {
        let mut states: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}
