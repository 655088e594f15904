//! Single-instance key-value backend on DashMap.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::KvResult;
use crate::kv::{KvStore, resolve_rank_range};

/// A cached entry with TTL support.
///
/// The data is wrapped in `Arc` to allow cheap cloning on cache hits.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    /// Create a new cached entry.
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    /// Check if this entry has expired.
    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// Score wrapper with a total order, so it can key a `BTreeSet`.
#[derive(Clone, Copy, Debug)]
struct OrdScore(f64);

impl PartialEq for OrdScore {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrdScore {}

impl PartialOrd for OrdScore {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrdScore {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Sorted set with Redis ordering: by score, then by member bytes.
#[derive(Debug, Default)]
struct ScoredSet {
    scores: HashMap<String, OrdScore>,
    order: BTreeSet<(OrdScore, String)>,
}

impl ScoredSet {
    fn add(&mut self, member: &str, score: f64) -> bool {
        let score = OrdScore(score);
        match self.scores.insert(member.to_string(), score) {
            Some(previous) => {
                self.order.remove(&(previous, member.to_string()));
                self.order.insert((score, member.to_string()));
                false
            }
            None => {
                self.order.insert((score, member.to_string()));
                true
            }
        }
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.order.remove(&(score, member.to_string()));
                true
            }
            None => false,
        }
    }

    fn range(&self, start: isize, stop: isize) -> Vec<String> {
        match resolve_rank_range(self.order.len(), start, stop) {
            Some((from, to)) => self
                .order
                .iter()
                .skip(from)
                .take(to - from + 1)
                .map(|(_, member)| member.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// In-memory store: values in one DashMap, scored sets in another.
///
/// Expired values are dropped lazily on read. Cloning shares the maps.
#[derive(Clone, Debug, Default)]
pub struct LocalKv {
    entries: Arc<DashMap<String, CachedEntry>>,
    sets: Arc<DashMap<String, ScoredSet>>,
}

impl LocalKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired value. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.entries.len())
    }

    /// Start background expiry sweeping.
    ///
    /// Reads only drop the entry they hit, so values nobody reads again
    /// (warmed lists, stale shadows, prefilled entities) are removed here.
    /// Abort the returned handle to stop sweeping.
    pub fn start_sweeper(&self, period: Duration) -> JoinHandle<()> {
        let kv = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                let removed = kv.purge_expired();
                if removed > 0 {
                    tracing::debug!(removed, remaining = kv.len(), "expired cache entries swept");
                }
            }
        })
    }
}

#[async_trait]
impl KvStore for LocalKv {
    async fn get(&self, key: &str) -> KvResult<Option<Arc<Vec<u8>>>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(Arc::clone(&entry.data)));
            }
        } else {
            return Ok(None);
        }
        // Expired: the read guard is released above, so removal cannot deadlock.
        self.entries.remove_if(key, |_, entry| entry.is_expired());
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> KvResult<()> {
        self.entries
            .insert(key.to_string(), CachedEntry::new(value, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired()))
    }

    async fn scored_set_add(&self, set: &str, member: &str, score: f64) -> KvResult<bool> {
        Ok(self
            .sets
            .entry(set.to_string())
            .or_default()
            .add(member, score))
    }

    async fn scored_set_remove(&self, set: &str, members: &[String]) -> KvResult<usize> {
        let removed = match self.sets.get_mut(set) {
            Some(mut zset) => members.iter().filter(|m| zset.remove(m)).count(),
            None => return Ok(0),
        };
        self.sets.remove_if(set, |_, zset| zset.len() == 0);
        Ok(removed)
    }

    async fn scored_set_remove_range_by_rank(
        &self,
        set: &str,
        start: isize,
        stop: isize,
    ) -> KvResult<usize> {
        let removed = match self.sets.get_mut(set) {
            Some(mut zset) => {
                let victims = zset.range(start, stop);
                for member in &victims {
                    zset.remove(member);
                }
                victims.len()
            }
            None => return Ok(0),
        };
        self.sets.remove_if(set, |_, zset| zset.len() == 0);
        Ok(removed)
    }

    async fn scored_set_range_by_rank(
        &self,
        set: &str,
        start: isize,
        stop: isize,
    ) -> KvResult<Vec<String>> {
        Ok(self
            .sets
            .get(set)
            .map(|zset| zset.range(start, stop))
            .unwrap_or_default())
    }

    async fn scored_set_size(&self, set: &str) -> KvResult<usize> {
        Ok(self.sets.get(set).map(|zset| zset.len()).unwrap_or(0))
    }

    fn mode(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_delete() {
        let kv = LocalKv::new();
        kv.set("k", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(Arc::new(b"v".to_vec())));

        assert!(kv.delete("k").await.unwrap());
        assert!(kv.get("k").await.unwrap().is_none());
        // Deleting again is a no-op, not an error.
        assert!(!kv.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_entries_read_as_absent() {
        let kv = LocalKv::new();
        kv.set("short", b"v".to_vec(), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(kv.get("short").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(kv.get("short").await.unwrap().is_none());
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let kv = LocalKv::new();
        kv.set("a", b"1".to_vec(), Duration::from_millis(1))
            .await
            .unwrap();
        kv.set("b", b"2".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(kv.purge_expired(), 1);
        assert_eq!(kv.len(), 1);
    }

    #[tokio::test]
    async fn test_scored_set_orders_by_score_then_member() {
        let kv = LocalKv::new();
        assert!(kv.scored_set_add("z", "c", 3.0).await.unwrap());
        assert!(kv.scored_set_add("z", "b", 1.0).await.unwrap());
        assert!(kv.scored_set_add("z", "a", 1.0).await.unwrap());

        let all = kv.scored_set_range_by_rank("z", 0, -1).await.unwrap();
        assert_eq!(all, vec!["a", "b", "c"]);

        // Re-scoring moves the member and reports it as not new.
        assert!(!kv.scored_set_add("z", "a", 5.0).await.unwrap());
        let all = kv.scored_set_range_by_rank("z", 0, -1).await.unwrap();
        assert_eq!(all, vec!["b", "c", "a"]);
        assert_eq!(kv.scored_set_size("z").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_scored_set_removals() {
        let kv = LocalKv::new();
        for (i, m) in ["a", "b", "c", "d"].iter().enumerate() {
            kv.scored_set_add("z", m, i as f64).await.unwrap();
        }

        let removed = kv
            .scored_set_remove("z", &["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        assert_eq!(
            kv.scored_set_remove_range_by_rank("z", 0, 0).await.unwrap(),
            1
        );
        assert_eq!(
            kv.scored_set_range_by_rank("z", 0, -1).await.unwrap(),
            vec!["c", "d"]
        );

        assert_eq!(
            kv.scored_set_remove_range_by_rank("z", 0, -1).await.unwrap(),
            2
        );
        assert_eq!(kv.scored_set_size("z").await.unwrap(), 0);
        assert_eq!(kv.scored_set_remove("z", &["c".into()]).await.unwrap(), 0);
    }

    #[test]
    fn test_len_counts_values_not_sets() {
        use tokio_test::block_on;

        let kv = LocalKv::new();
        assert!(kv.is_empty());
        block_on(kv.set("a", vec![1], Duration::from_secs(60))).unwrap();
        block_on(kv.scored_set_add("lru:articles", "a", 1.0)).unwrap();
        assert_eq!(kv.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_drops_unread_expired_values() {
        let kv = LocalKv::new();
        kv.set("warm", vec![1], Duration::from_millis(20)).await.unwrap();
        kv.set("keep", vec![2], Duration::from_secs(60)).await.unwrap();

        let sweeper = kv.start_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.abort();

        // Nothing read "warm"; the sweeper removed it.
        assert_eq!(kv.len(), 1);
        assert!(kv.get("keep").await.unwrap().is_some());
    }
}
