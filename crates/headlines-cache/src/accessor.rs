//! Cache-aside accessor: read-through and write-through over a system of record.
//!
//! ## Read Path
//!
//! ```text
//! get(key) → KV hit ──────────────────────────────→ value   (hit counter)
//!              │ miss / KV down
//!              ↓
//!          source read → None ──────────────────────→ None    (nothing cached)
//!              │ Some(value)                 │ error
//!              ↓                             ↓
//!          KV set (+ stale shadow)       stale shadow? → value (stale counter)
//!          recency touch + trim              │ none
//!              ↓                             ↓
//!            value (miss counter)       SourceUnavailable
//! ```
//!
//! Concurrent misses on one key are not coalesced: each reads the source and
//! rewrites the entry, and since all of them read the same authority the last
//! write wins harmlessly.
//!
//! ## Graceful Degradation
//!
//! Key-value failures never fail a request. Reads fall through to the source,
//! writes to the cache are skipped with a warning, and recency maintenance
//! errors are logged and left for the next trim.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use headlines_storage::{DynSource, Entity, EntityId, StorageError, WindowQuery};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::counters::{Counters, MetricsCounters, names};
use crate::error::{CacheError, CacheResult, KvError};
use crate::keys;
use crate::kv::DynKv;
use crate::recency::RecencyIndex;

/// Expiry policy for one kind of cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// How long a filled entry is served.
    pub ttl: Duration,
    /// Extra lifetime of the `stale:` shadow copy beyond `ttl`; `None`
    /// disables stale fallback.
    pub stale_ttl: Option<Duration>,
}

impl CachePolicy {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            stale_ttl: None,
        }
    }

    #[must_use]
    pub fn with_stale(mut self, stale_ttl: Duration) -> Self {
        self.stale_ttl = (!stale_ttl.is_zero()).then_some(stale_ttl);
        self
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

/// Where a read was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    Cache,
    Source,
    Stale,
}

/// Result of a write-through.
///
/// The source write succeeded; `cache_warning` is set when mirroring into the
/// cache did not.
#[derive(Debug)]
pub struct WriteOutcome<T> {
    pub value: T,
    pub cache_warning: Option<CacheError>,
}

/// Cache-aside accessor for one entity type.
pub struct CacheAside<E: Entity> {
    kv: DynKv,
    source: DynSource<E>,
    recency: Option<RecencyIndex>,
    entity_policy: CachePolicy,
    list_policy: CachePolicy,
    counters: Arc<dyn Counters>,
}

impl<E: Entity> CacheAside<E> {
    /// Creates an accessor with default policies, no recency tracking and
    /// counters reported to the `metrics` facade.
    pub fn new(kv: DynKv, source: DynSource<E>) -> Self {
        Self {
            kv,
            source,
            recency: None,
            entity_policy: CachePolicy::default(),
            list_policy: CachePolicy::new(Duration::from_secs(300)),
            counters: Arc::new(MetricsCounters),
        }
    }

    /// Track filled keys in `lru:{collection}` and evict beyond `capacity`.
    #[must_use]
    pub fn with_recency(mut self, capacity: usize) -> Self {
        let shadows = self.has_stale_policy();
        self.recency = Some(
            RecencyIndex::new(self.kv.clone(), E::COLLECTION, capacity)
                .with_shadow_eviction(shadows),
        );
        self
    }

    #[must_use]
    pub fn with_entity_policy(mut self, policy: CachePolicy) -> Self {
        self.entity_policy = policy;
        self.refresh_recency();
        self
    }

    #[must_use]
    pub fn with_list_policy(mut self, policy: CachePolicy) -> Self {
        self.list_policy = policy;
        self.refresh_recency();
        self
    }

    #[must_use]
    pub fn with_counters(mut self, counters: Arc<dyn Counters>) -> Self {
        self.counters = counters;
        self
    }

    fn refresh_recency(&mut self) {
        let shadows = self.has_stale_policy();
        self.recency = self
            .recency
            .take()
            .map(|index| index.with_shadow_eviction(shadows));
    }

    pub fn namespace(&self) -> &'static str {
        E::COLLECTION
    }

    pub fn recency(&self) -> Option<&RecencyIndex> {
        self.recency.as_ref()
    }

    pub fn source(&self) -> &DynSource<E> {
        &self.source
    }

    /// Reads one entity. `Ok(None)` means the source has no such entity.
    pub async fn get(&self, id: EntityId) -> CacheResult<Option<E>> {
        self.get_traced(id).await.map(|read| read.map(|(value, _)| value))
    }

    /// Like [`get`](Self::get), also reporting where the value came from.
    pub async fn get_traced(&self, id: EntityId) -> CacheResult<Option<(E, ReadSource)>> {
        let key = keys::entity_key::<E>(id);
        let source = Arc::clone(&self.source);
        self.read_through(&key, self.entity_policy, || async move {
            source.find_by_id(id).await
        })
        .await
    }

    /// Reads a list for the given window shape, keyed on every window field.
    pub async fn get_window(&self, window: &WindowQuery) -> CacheResult<Vec<E>> {
        let key = keys::window_key::<E>(window);
        let source = Arc::clone(&self.source);
        let window = *window;
        let read = self
            .read_through(&key, self.list_policy, || async move {
                source.query_window(&window).await.map(Some)
            })
            .await?;
        Ok(read.map(|(list, _)| list).unwrap_or_default())
    }

    /// Writes through: source first, then mirrors the stored value into the
    /// cache. Only a source failure is an error.
    pub async fn put(&self, entity: E) -> CacheResult<WriteOutcome<E>> {
        let saved = self.source.save(entity).await.map_err(CacheError::from)?;
        let key = keys::entity_key::<E>(saved.id());

        let cache_warning = match encode(&key, &saved) {
            Ok(bytes) => self.store(&key, bytes, self.entity_policy, false).await.err(),
            Err(e) => Some(e),
        };
        if let Some(ref warning) = cache_warning {
            tracing::warn!(
                key = %key,
                error = %warning,
                "write-through to cache failed; source write kept"
            );
        }

        Ok(WriteOutcome {
            value: saved,
            cache_warning,
        })
    }

    /// Deletes from the source, then drops the cached entity.
    pub async fn remove(&self, id: EntityId) -> CacheResult<bool> {
        let existed = self.source.delete(id).await.map_err(CacheError::from)?;
        let key = keys::entity_key::<E>(id);
        if let Err(e) = self.invalidate(&key).await {
            tracing::warn!(key = %key, error = %e, "cache invalidation after delete failed");
        }
        Ok(existed)
    }

    /// Drops a cached value (and its stale shadow). Returns `true` if an
    /// entry was present.
    pub async fn invalidate(&self, key: &str) -> Result<bool, KvError> {
        let existed = self.kv.delete(key).await?;
        if self.has_stale_policy() {
            self.kv.delete(&keys::stale_key(key)).await?;
        }
        if let Some(ref index) = self.recency {
            index.forget(key).await?;
        }
        tracing::debug!(key = %key, existed, "cache invalidated");
        Ok(existed)
    }

    /// Drops every tracked key starting with `prefix`. Returns how many were
    /// dropped. Without a recency index nothing is tracked and this is a no-op.
    pub async fn invalidate_tracked(&self, prefix: &str) -> Result<usize, KvError> {
        let Some(ref index) = self.recency else {
            return Ok(0);
        };
        let mut dropped = 0;
        for key in index.members().await? {
            if key.starts_with(prefix) {
                self.invalidate(&key).await?;
                dropped += 1;
            }
        }
        Ok(dropped)
    }

    /// Drops the cached list for `window`.
    pub async fn invalidate_window(&self, window: &WindowQuery) -> Result<bool, KvError> {
        self.invalidate(&keys::window_key::<E>(window)).await
    }

    fn has_stale_policy(&self) -> bool {
        self.entity_policy.stale_ttl.is_some() || self.list_policy.stale_ttl.is_some()
    }

    async fn read_through<T, F, Fut>(
        &self,
        key: &str,
        policy: CachePolicy,
        load: F,
    ) -> CacheResult<Option<(T, ReadSource)>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, StorageError>>,
    {
        let namespace = E::COLLECTION;
        let mut cache_up = true;

        match self.kv.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => {
                    tracing::debug!(key = %key, "cache hit");
                    self.counters.increment(names::CACHE_HITS_TOTAL, namespace);
                    return Ok(Some((value, ReadSource::Cache)));
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Failed to deserialize cached value");
                    if let Err(e) = self.kv.delete(key).await {
                        tracing::debug!(key = %key, error = %e, "undecodable entry cleanup failed");
                    }
                }
            },
            Ok(None) => tracing::debug!(key = %key, "cache miss"),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cache unavailable, reading source");
                cache_up = false;
            }
        }

        let value = match load().await {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(None),
            Err(e) => {
                if cache_up && policy.stale_ttl.is_some() {
                    if let Some(value) = self.read_stale::<T>(key).await {
                        tracing::warn!(key = %key, error = %e, "source unavailable, serving stale copy");
                        self.counters
                            .increment(names::CACHE_STALE_SERVED_TOTAL, namespace);
                        return Ok(Some((value, ReadSource::Stale)));
                    }
                }
                return Err(CacheError::from(e));
            }
        };

        self.counters.increment(names::CACHE_MISSES_TOTAL, namespace);

        if cache_up {
            match encode(key, &value) {
                Ok(bytes) => {
                    if let Err(e) = self.store(key, bytes, policy, true).await {
                        tracing::warn!(key = %key, error = %e, "cache fill failed");
                    }
                }
                Err(e) => tracing::warn!(key = %key, error = %e, "cache fill skipped"),
            }
        }

        Ok(Some((value, ReadSource::Source)))
    }

    async fn read_stale<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.kv.get(&keys::stale_key(key)).await.ok()??;
        serde_json::from_slice(&bytes).ok()
    }

    /// Writes the entry and its shadow. Read fills (`track`) also record the
    /// key as recently used; write-through mirrors leave the index alone.
    async fn store(
        &self,
        key: &str,
        bytes: Vec<u8>,
        policy: CachePolicy,
        track: bool,
    ) -> CacheResult<()> {
        if let Some(stale_ttl) = policy.stale_ttl {
            self.kv
                .set(&keys::stale_key(key), bytes.clone(), policy.ttl + stale_ttl)
                .await?;
        }
        self.kv.set(key, bytes, policy.ttl).await?;

        if let Some(index) = self.recency.as_ref().filter(|_| track) {
            match index.touch_and_trim(key).await {
                Ok(report) if !report.evicted.is_empty() => {
                    self.counters.increment_by(
                        names::CACHE_EVICTIONS_TOTAL,
                        E::COLLECTION,
                        report.evicted.len() as u64,
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "recency index update failed");
                }
            }
        }
        Ok(())
    }
}

impl<E: Entity> std::fmt::Debug for CacheAside<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAside")
            .field("namespace", &E::COLLECTION)
            .field("mode", &self.kv.mode())
            .field("recency", &self.recency)
            .field("entity_policy", &self.entity_policy)
            .field("list_policy", &self.list_policy)
            .finish()
    }
}

fn encode<T: Serialize>(key: &str, value: &T) -> CacheResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|source| CacheError::Serialization {
        key: key.to_string(),
        source,
    })
}
