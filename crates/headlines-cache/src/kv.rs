//! The key-value store contract the cache layer is built on.
//!
//! Modeled on the subset of Redis the cache needs: plain values with a TTL and
//! scored sets. Rank arguments follow Redis conventions: zero-based,
//! inclusive on both ends, negative values count from the end.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::KvResult;

/// Shared key-value store.
///
/// Implementations must treat deleting or removing absent keys and members as
/// a successful no-op; concurrent trims rely on it.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the value stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> KvResult<Option<Arc<Vec<u8>>>>;

    /// Stores `value` under `key`, replacing any previous value, expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> KvResult<()>;

    /// Deletes `key`. Returns `false` if nothing was stored.
    async fn delete(&self, key: &str) -> KvResult<bool>;

    /// Inserts `member` or updates its score. Returns `true` if the member is new.
    async fn scored_set_add(&self, set: &str, member: &str, score: f64) -> KvResult<bool>;

    /// Removes the given members. Returns how many were present.
    async fn scored_set_remove(&self, set: &str, members: &[String]) -> KvResult<usize>;

    /// Removes members by rank (lowest score first). Returns how many were removed.
    async fn scored_set_remove_range_by_rank(
        &self,
        set: &str,
        start: isize,
        stop: isize,
    ) -> KvResult<usize>;

    /// Lists members by rank, lowest score first.
    async fn scored_set_range_by_rank(
        &self,
        set: &str,
        start: isize,
        stop: isize,
    ) -> KvResult<Vec<String>>;

    /// Number of members in the set (`0` if it does not exist).
    async fn scored_set_size(&self, set: &str) -> KvResult<usize>;

    /// Short label for logs and health output (`local`, `redis`).
    fn mode(&self) -> &'static str;
}

/// Type alias for a shared key-value store trait object.
pub type DynKv = Arc<dyn KvStore>;

/// Resolves a Redis-style inclusive rank range against a collection of `len`
/// items. Returns `None` when the range selects nothing.
pub(crate) fn resolve_rank_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let len_i = len as isize;
    let start = if start < 0 { (len_i + start).max(0) } else { start };
    let stop = if stop < 0 { len_i + stop } else { stop.min(len_i - 1) };
    if start > stop || start >= len_i || stop < 0 {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[cfg(test)]
mod tests {
    use super::resolve_rank_range;

    #[test]
    fn test_rank_range_basic() {
        assert_eq!(resolve_rank_range(5, 0, 1), Some((0, 1)));
        assert_eq!(resolve_rank_range(5, 0, -1), Some((0, 4)));
        assert_eq!(resolve_rank_range(5, -2, -1), Some((3, 4)));
    }

    #[test]
    fn test_rank_range_clamps_and_empties() {
        assert_eq!(resolve_rank_range(3, 0, 99), Some((0, 2)));
        assert_eq!(resolve_rank_range(3, -99, 0), Some((0, 0)));
        assert_eq!(resolve_rank_range(3, 5, 9), None);
        assert_eq!(resolve_rank_range(3, 2, 1), None);
        assert_eq!(resolve_rank_range(0, 0, -1), None);
    }
}
