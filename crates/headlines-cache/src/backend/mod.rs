//! Key-value backends.
//!
//! ## Cache Modes
//!
//! - **Local**: Single-instance mode using only DashMap
//! - **Redis**: Multi-instance mode; every instance shares one keyspace, so
//!   recency indexes and evictions are visible to all of them
//!
//! If Redis is unavailable at startup the server falls back to local mode.

pub mod local;
pub mod redis_kv;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::error::KvResult;
use crate::kv::KvStore;

pub use self::local::{CachedEntry, LocalKv};
pub use self::redis_kv::RedisKv;

/// Cache backend selected at startup.
#[derive(Clone)]
pub enum CacheBackend {
    /// Single-instance: local DashMap only
    Local(LocalKv),

    /// Multi-instance: Redis
    Redis(RedisKv),
}

impl CacheBackend {
    /// Create a new local-only cache backend.
    pub fn new_local() -> Self {
        CacheBackend::Local(LocalKv::new())
    }

    /// Create a new Redis-backed cache backend.
    pub fn new_redis(pool: deadpool_redis::Pool) -> Self {
        CacheBackend::Redis(RedisKv::new(pool))
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        match self {
            CacheBackend::Local(kv) => CacheStats {
                local_entries: Some(kv.len()),
                mode: "local".to_string(),
            },
            CacheBackend::Redis(_) => CacheStats {
                local_entries: None,
                mode: "redis".to_string(),
            },
        }
    }

    /// Start sweeping expired values of the local backend. Redis expires keys
    /// itself, so there is nothing to run in that mode.
    pub fn start_sweeper(&self, period: Duration) -> Option<JoinHandle<()>> {
        match self {
            CacheBackend::Local(kv) => Some(kv.start_sweeper(period)),
            CacheBackend::Redis(_) => None,
        }
    }

    /// Check if Redis is available (for health checks).
    pub async fn is_redis_available(&self) -> bool {
        match self {
            CacheBackend::Local(_) => false,
            CacheBackend::Redis(kv) => kv.is_available().await,
        }
    }

    fn inner(&self) -> &dyn KvStore {
        match self {
            CacheBackend::Local(kv) => kv,
            CacheBackend::Redis(kv) => kv,
        }
    }
}

#[async_trait]
impl KvStore for CacheBackend {
    async fn get(&self, key: &str) -> KvResult<Option<Arc<Vec<u8>>>> {
        self.inner().get(key).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> KvResult<()> {
        self.inner().set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        self.inner().delete(key).await
    }

    async fn scored_set_add(&self, set: &str, member: &str, score: f64) -> KvResult<bool> {
        self.inner().scored_set_add(set, member, score).await
    }

    async fn scored_set_remove(&self, set: &str, members: &[String]) -> KvResult<usize> {
        self.inner().scored_set_remove(set, members).await
    }

    async fn scored_set_remove_range_by_rank(
        &self,
        set: &str,
        start: isize,
        stop: isize,
    ) -> KvResult<usize> {
        self.inner()
            .scored_set_remove_range_by_rank(set, start, stop)
            .await
    }

    async fn scored_set_range_by_rank(
        &self,
        set: &str,
        start: isize,
        stop: isize,
    ) -> KvResult<Vec<String>> {
        self.inner().scored_set_range_by_rank(set, start, stop).await
    }

    async fn scored_set_size(&self, set: &str) -> KvResult<usize> {
        self.inner().scored_set_size(set).await
    }

    fn mode(&self) -> &'static str {
        self.inner().mode()
    }
}

/// Cache statistics.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Values held in process; `None` when the data lives in Redis.
    pub local_entries: Option<usize>,
    pub mode: String,
}
