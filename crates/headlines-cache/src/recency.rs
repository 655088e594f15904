//! Bounded recency index (LRU) layered on a scored set.
//!
//! The key-value store has no per-namespace capacity limit, so each cached
//! namespace keeps a scored set `lru:{namespace}` of the keys it filled,
//! scored by last use. After a touch grows the set past `capacity`, the
//! lowest-scored members are evicted: their cache entries are deleted first,
//! then the members are removed from the set.
//!
//! ## Concurrency
//!
//! There is no lock. The scored set is the only source of ordering truth and
//! every step is idempotent:
//!
//! - concurrent touches of one key converge on the highest score
//! - concurrent trims may pick the same victims; deleting an absent entry or
//!   removing an absent member is a no-op
//! - a crash between delete and removal leaves a member without an entry,
//!   which only costs a cache miss
//!
//! The capacity is therefore a soft target: the set can briefly exceed it
//! while touches and trims interleave.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::KvResult;
use crate::keys;
use crate::kv::DynKv;

/// Default number of keys a namespace keeps hot.
pub const DEFAULT_CAPACITY: usize = 30;

static LAST_SCORE: AtomicU64 = AtomicU64::new(0);

/// Next recency score: wall-clock microseconds, forced strictly increasing
/// within this process so back-to-back touches never tie.
///
/// Microsecond timestamps stay below 2^53, so they survive the round trip
/// through Redis' `f64` scores exactly.
pub fn next_score() -> f64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);
    let previous = LAST_SCORE
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(now.max(last + 1))
        })
        .unwrap_or(now);
    now.max(previous + 1) as f64
}

/// Outcome of a trim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimReport {
    /// Keys whose entries were deleted and whose membership was removed.
    pub evicted: Vec<String>,
    /// Victims left in the index because deleting their entry failed; the
    /// next trim retries them.
    pub deferred: usize,
}

impl TrimReport {
    pub fn is_empty(&self) -> bool {
        self.evicted.is_empty() && self.deferred == 0
    }
}

/// Recency index for one cache namespace.
#[derive(Clone)]
pub struct RecencyIndex {
    kv: DynKv,
    set: String,
    namespace: String,
    capacity: usize,
    evict_shadows: bool,
}

impl RecencyIndex {
    /// Creates the index `lru:{namespace}` holding at most `capacity` keys.
    pub fn new(kv: DynKv, namespace: impl Into<String>, capacity: usize) -> Self {
        let namespace = namespace.into();
        Self {
            kv,
            set: keys::recency_set(&namespace),
            namespace,
            capacity: capacity.max(1),
            evict_shadows: false,
        }
    }

    /// Also delete each victim's `stale:` shadow on eviction.
    #[must_use]
    pub fn with_shadow_eviction(mut self, enabled: bool) -> Self {
        self.evict_shadows = enabled;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Marks `key` as used now. Returns `true` if the key was not tracked yet
    /// (and the index may have grown past capacity).
    pub async fn touch(&self, key: &str) -> KvResult<bool> {
        self.kv.scored_set_add(&self.set, key, next_score()).await
    }

    /// Touches `key` and trims if the touch added a member.
    pub async fn touch_and_trim(&self, key: &str) -> KvResult<TrimReport> {
        if self.touch(key).await? {
            self.trim().await
        } else {
            Ok(TrimReport::default())
        }
    }

    /// Evicts the least recently touched keys beyond capacity.
    pub async fn trim(&self) -> KvResult<TrimReport> {
        let size = self.kv.scored_set_size(&self.set).await?;
        if size <= self.capacity {
            return Ok(TrimReport::default());
        }

        let excess = size - self.capacity;
        let victims = self
            .kv
            .scored_set_range_by_rank(&self.set, 0, excess as isize - 1)
            .await?;

        let mut evicted = Vec::with_capacity(victims.len());
        let mut deferred = 0;
        for victim in victims {
            // Entry first, membership second: an interruption leaves a ghost
            // member (harmless miss), never an untracked entry.
            match self.delete_entry(&victim).await {
                Ok(()) => evicted.push(victim),
                Err(e) => {
                    tracing::warn!(
                        namespace = %self.namespace,
                        key = %victim,
                        error = %e,
                        "eviction delete failed, keeping key tracked"
                    );
                    deferred += 1;
                }
            }
        }

        if !evicted.is_empty() {
            self.kv.scored_set_remove(&self.set, &evicted).await?;
            tracing::debug!(
                namespace = %self.namespace,
                evicted = evicted.len(),
                size,
                capacity = self.capacity,
                "recency index trimmed"
            );
        }

        Ok(TrimReport { evicted, deferred })
    }

    async fn delete_entry(&self, key: &str) -> KvResult<()> {
        self.kv.delete(key).await?;
        if self.evict_shadows {
            self.kv.delete(&keys::stale_key(key)).await?;
        }
        Ok(())
    }

    /// Number of tracked keys.
    pub async fn len(&self) -> KvResult<usize> {
        self.kv.scored_set_size(&self.set).await
    }

    /// Tracked keys, least recently used first.
    pub async fn members(&self) -> KvResult<Vec<String>> {
        self.kv.scored_set_range_by_rank(&self.set, 0, -1).await
    }

    /// Stops tracking `key` without touching its entry (after an invalidation).
    pub async fn forget(&self, key: &str) -> KvResult<()> {
        self.kv
            .scored_set_remove(&self.set, &[key.to_string()])
            .await
            .map(|_| ())
    }
}

impl std::fmt::Debug for RecencyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecencyIndex")
            .field("set", &self.set)
            .field("capacity", &self.capacity)
            .field("mode", &self.kv.mode())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalKv;
    use crate::kv::KvStore;
    use std::sync::Arc;
    use std::time::Duration;

    async fn filled(kv: &LocalKv, index: &RecencyIndex, key: &str) -> TrimReport {
        kv.set(key, key.as_bytes().to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        index.touch_and_trim(key).await.unwrap()
    }

    #[test]
    fn test_scores_strictly_increase() {
        let mut last = next_score();
        for _ in 0..1000 {
            let next = next_score();
            assert!(next > last);
            last = next;
        }
    }

    #[tokio::test]
    async fn test_evicts_least_recently_touched() {
        let kv = LocalKv::new();
        let index = RecencyIndex::new(Arc::new(kv.clone()), "letters", 2);

        filled(&kv, &index, "a").await;
        filled(&kv, &index, "b").await;
        let report = filled(&kv, &index, "c").await;

        assert_eq!(report.evicted, vec!["a"]);
        assert!(kv.get("a").await.unwrap().is_none());
        assert!(kv.get("b").await.unwrap().is_some());
        assert!(kv.get("c").await.unwrap().is_some());
        assert_eq!(index.members().await.unwrap(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_retouch_protects_key() {
        let kv = LocalKv::new();
        let index = RecencyIndex::new(Arc::new(kv.clone()), "letters", 2);

        filled(&kv, &index, "a").await;
        filled(&kv, &index, "b").await;
        // Re-touching an existing key does not grow the index.
        assert!(index.touch_and_trim("a").await.unwrap().is_empty());
        let report = filled(&kv, &index, "c").await;

        assert_eq!(report.evicted, vec!["b"]);
        assert!(kv.get("a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_trim_tolerates_ghost_members() {
        let kv = LocalKv::new();
        let index = RecencyIndex::new(Arc::new(kv.clone()), "ghosts", 1);

        // Tracked but never (or no longer) cached.
        index.touch("gone").await.unwrap();
        let report = filled(&kv, &index, "live").await;

        assert_eq!(report.evicted, vec!["gone"]);
        assert_eq!(index.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_trims_are_idempotent() {
        let kv = LocalKv::new();
        let index = RecencyIndex::new(Arc::new(kv.clone()), "race", 3);
        for i in 0..10 {
            let key = format!("k{i}");
            kv.set(&key, vec![0], Duration::from_secs(60)).await.unwrap();
            index.touch(&key).await.unwrap();
        }

        let (a, b) = tokio::join!(index.trim(), index.trim());
        a.unwrap();
        b.unwrap();

        assert_eq!(index.len().await.unwrap(), 3);
        assert_eq!(index.members().await.unwrap(), vec!["k7", "k8", "k9"]);
        assert_eq!(kv.len(), 3);
    }

    #[tokio::test]
    async fn test_shadow_eviction() {
        let kv = LocalKv::new();
        let index =
            RecencyIndex::new(Arc::new(kv.clone()), "shadowed", 1).with_shadow_eviction(true);
        kv.set("stale:old", vec![1], Duration::from_secs(60))
            .await
            .unwrap();
        filled(&kv, &index, "old").await;
        filled(&kv, &index, "new").await;

        assert!(kv.get("old").await.unwrap().is_none());
        assert!(kv.get("stale:old").await.unwrap().is_none());
    }
}
