//! Background cache warmer.
//!
//! Periodically re-queries the system of record for a fixed set of window
//! shapes and writes each result under the same key the accessor reads
//! (`articles:latest:10`, ...). Warming is purely additive: it never
//! invalidates, never touches the recency index, and a failed cycle is logged
//! and retried on the next tick.

use std::sync::Arc;
use std::time::Duration;

use headlines_storage::{DynSource, Entity, StorageError, WindowQuery};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::counters::{Counters, MetricsCounters, names};
use crate::error::KvError;
use crate::keys;
use crate::kv::DynKv;

/// Errors that abort a single warming cycle.
#[derive(Debug, thiserror::Error)]
pub enum WarmError {
    #[error("failed to query `{key}`: {source}")]
    Source {
        key: String,
        #[source]
        source: StorageError,
    },
    #[error("failed to encode `{key}`: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to store `{key}`: {source}")]
    Cache {
        key: String,
        #[source]
        source: KvError,
    },
}

/// Per-entity prefill: every entity inside `window` is written under its own
/// `{kind}:{id}` key, on a schedule separate from the list windows.
#[derive(Debug, Clone)]
pub struct PrefillConfig {
    pub window: WindowQuery,
    pub ttl: Duration,
    /// Time between prefill passes; the first pass runs after the warmer's
    /// initial delay.
    pub period: Duration,
}

/// Configuration for the cache warmer.
#[derive(Debug, Clone)]
pub struct WarmerConfig {
    /// Delay before the first cycle, letting dependent stores start.
    pub initial_delay: Duration,
    /// Time between cycles.
    pub period: Duration,
    /// TTL of warmed lists. Should exceed `period` so reads between cycles hit.
    pub ttl: Duration,
    /// Window shapes refreshed every cycle.
    pub windows: Vec<WindowQuery>,
    pub prefill: Option<PrefillConfig>,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        let last_two_weeks = time::Duration::days(14);
        Self {
            initial_delay: Duration::from_secs(5),
            period: Duration::from_secs(120),
            ttl: Duration::from_secs(30 * 60),
            windows: [5, 10, 20]
                .into_iter()
                .map(|n| WindowQuery::top(n).with_since(last_two_weeks))
                .collect(),
            prefill: None,
        }
    }
}

/// What one cycle wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub keys: Vec<String>,
}

/// Handle to a running warmer task.
pub struct WarmerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WarmerHandle {
    /// Signals the warmer to stop and waits for it to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "cache warmer task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Cache warmer for one entity type.
pub struct CacheWarmer<E: Entity> {
    kv: DynKv,
    source: DynSource<E>,
    config: WarmerConfig,
    counters: Arc<dyn Counters>,
}

impl<E: Entity> CacheWarmer<E> {
    pub fn new(kv: DynKv, source: DynSource<E>, config: WarmerConfig) -> Self {
        Self {
            kv,
            source,
            config,
            counters: Arc::new(MetricsCounters),
        }
    }

    #[must_use]
    pub fn with_counters(mut self, counters: Arc<dyn Counters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn config(&self) -> &WarmerConfig {
        &self.config
    }

    /// Runs one warming cycle over the list windows. Stops at the first
    /// failure.
    pub async fn warm_once(&self) -> Result<WarmReport, WarmError> {
        let mut report = WarmReport::default();

        for window in &self.config.windows {
            let key = keys::window_key::<E>(window);
            let items = self
                .source
                .query_window(window)
                .await
                .map_err(|source| WarmError::Source {
                    key: key.clone(),
                    source,
                })?;
            self.write(&key, &items, self.config.ttl).await?;
            report.keys.push(key);
        }

        Ok(report)
    }

    /// Runs one prefill pass. Returns how many entities were written; `0`
    /// when prefill is not configured.
    pub async fn prefill_once(&self) -> Result<usize, WarmError> {
        let Some(ref prefill) = self.config.prefill else {
            return Ok(0);
        };
        let key = keys::window_key::<E>(&prefill.window);
        let items = self
            .source
            .query_window(&prefill.window)
            .await
            .map_err(|source| WarmError::Source { key, source })?;
        for item in &items {
            self.write(&keys::entity_key::<E>(item.id()), item, prefill.ttl)
                .await?;
        }
        Ok(items.len())
    }

    async fn write<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), WarmError> {
        let bytes = serde_json::to_vec(value).map_err(|source| WarmError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.kv
            .set(key, bytes, ttl)
            .await
            .map_err(|source| WarmError::Cache {
                key: key.to_string(),
                source,
            })
    }

    /// Start the warmer in a background task.
    ///
    /// Returns a handle that stops the task.
    pub fn start(self) -> WarmerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            info!(
                namespace = E::COLLECTION,
                initial_delay_ms = self.config.initial_delay.as_millis() as u64,
                period_secs = self.config.period.as_secs(),
                windows = self.config.windows.len(),
                "Cache warmer started"
            );

            let first = Instant::now() + self.config.initial_delay;
            let mut ticker = interval_at(first, self.config.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            let prefill = self.config.prefill.as_ref().map(|p| p.period);
            let mut prefill_ticker = interval_at(first, prefill.unwrap_or(self.config.period));
            prefill_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_cycle().await,
                    _ = prefill_ticker.tick(), if prefill.is_some() => self.run_prefill().await,
                    changed = shutdown_rx.changed() => {
                        // A dropped handle counts as a shutdown request.
                        if changed.is_err() || *shutdown_rx.borrow() {
                            info!(namespace = E::COLLECTION, "Cache warmer shutting down");
                            break;
                        }
                    }
                }
            }
        });

        WarmerHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    async fn run_cycle(&self) {
        match self.warm_once().await {
            Ok(report) => {
                self.counters
                    .increment(names::CACHE_WARM_CYCLES_TOTAL, E::COLLECTION);
                info!(namespace = E::COLLECTION, keys = ?report.keys, "Cache warmed");
            }
            Err(e) => {
                self.counters
                    .increment(names::CACHE_WARM_FAILURES_TOTAL, E::COLLECTION);
                warn!(namespace = E::COLLECTION, error = %e, "Cache warmer iteration failed");
            }
        }
        debug!(namespace = E::COLLECTION, "Cache warmer cycle finished");
    }

    async fn run_prefill(&self) {
        match self.prefill_once().await {
            Ok(prefilled) => {
                info!(namespace = E::COLLECTION, prefilled, "Cache prefilled");
            }
            Err(e) => {
                self.counters
                    .increment(names::CACHE_PREFILL_FAILURES_TOTAL, E::COLLECTION);
                warn!(namespace = E::COLLECTION, error = %e, "Cache prefill failed");
            }
        }
    }
}
