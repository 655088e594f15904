//! Multi-instance key-value backend on Redis.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Connection, Pool};
use redis::AsyncCommands;

use crate::error::{KvError, KvResult};
use crate::kv::KvStore;

/// Redis-backed store shared by every instance of a service.
///
/// Scored-set operations map one-to-one onto `ZADD`/`ZREM`/`ZRANGE`/
/// `ZREMRANGEBYRANK`/`ZCARD`, so ordering and tie-breaking come from Redis.
#[derive(Clone)]
pub struct RedisKv {
    pool: Pool,
}

impl RedisKv {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Check if Redis is reachable (for health checks).
    pub async fn is_available(&self) -> bool {
        self.pool.get().await.is_ok()
    }

    async fn conn(&self) -> KvResult<Connection> {
        self.pool.get().await.map_err(|e| {
            tracing::warn!(error = %e, "Failed to get Redis connection");
            KvError::unavailable(e.to_string())
        })
    }
}

fn command_error(op: &'static str, key: &str, e: redis::RedisError) -> KvError {
    tracing::warn!(key = %key, error = %e, "Redis {op} error");
    if e.is_io_error() || e.is_connection_dropped() || e.is_timeout() {
        KvError::unavailable(e.to_string())
    } else {
        KvError::command(e.to_string())
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> KvResult<Option<Arc<Vec<u8>>>> {
        let mut conn = self.conn().await?;
        let data: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| command_error("GET", key, e))?;
        Ok(data.map(Arc::new))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> KvResult<()> {
        let mut conn = self.conn().await?;
        // PSETEX rejects a zero expiry.
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        conn.pset_ex::<_, _, ()>(key, value, ttl_ms)
            .await
            .map_err(|e| command_error("PSETEX", key, e))?;
        tracing::debug!(key = %key, ttl_ms = %ttl_ms, "cache set (redis)");
        Ok(())
    }

    async fn delete(&self, key: &str) -> KvResult<bool> {
        let mut conn = self.conn().await?;
        let removed: usize = conn
            .del(key)
            .await
            .map_err(|e| command_error("DEL", key, e))?;
        Ok(removed > 0)
    }

    async fn scored_set_add(&self, set: &str, member: &str, score: f64) -> KvResult<bool> {
        let mut conn = self.conn().await?;
        let added: usize = conn
            .zadd(set, member, score)
            .await
            .map_err(|e| command_error("ZADD", set, e))?;
        Ok(added > 0)
    }

    async fn scored_set_remove(&self, set: &str, members: &[String]) -> KvResult<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        conn.zrem(set, members)
            .await
            .map_err(|e| command_error("ZREM", set, e))
    }

    async fn scored_set_remove_range_by_rank(
        &self,
        set: &str,
        start: isize,
        stop: isize,
    ) -> KvResult<usize> {
        let mut conn = self.conn().await?;
        conn.zremrangebyrank(set, start, stop)
            .await
            .map_err(|e| command_error("ZREMRANGEBYRANK", set, e))
    }

    async fn scored_set_range_by_rank(
        &self,
        set: &str,
        start: isize,
        stop: isize,
    ) -> KvResult<Vec<String>> {
        let mut conn = self.conn().await?;
        conn.zrange(set, start, stop)
            .await
            .map_err(|e| command_error("ZRANGE", set, e))
    }

    async fn scored_set_size(&self, set: &str) -> KvResult<usize> {
        let mut conn = self.conn().await?;
        conn.zcard(set)
            .await
            .map_err(|e| command_error("ZCARD", set, e))
    }

    fn mode(&self) -> &'static str {
        "redis"
    }
}
