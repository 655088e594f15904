pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod profanity;
pub mod server;

pub use config::{
    AppConfig, CacheConfig, FallbackPolicy, ProfanityConfig, RedisConfig, ServerConfig,
    WarmerSettings,
};
pub use error::ApiError;
pub use headlines_cache::CacheBackend;
pub use observability::init_tracing;
pub use profanity::{ProfanityClient, ProfanityError};
pub use server::{AppState, HeadlinesServer, build_app};

/// Create a cache backend based on configuration.
///
/// ## Cache Modes
///
/// - **Redis disabled**: Returns local-only cache (DashMap)
/// - **Redis enabled**: Attempts to connect to Redis, falls back to local on failure
///
/// ## Graceful Degradation
///
/// If Redis connection fails, the system automatically falls back to local-only mode.
/// This allows the server to start and run even if Redis is unavailable.
pub async fn create_cache_backend(config: &RedisConfig) -> CacheBackend {
    use std::time::Duration;

    if !config.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return CacheBackend::new_local();
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&config.url);
    let timeout = Duration::from_millis(config.timeout_ms);
    let mut pool_config = redis_config.pool.take().unwrap_or_default();
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);
    redis_config.pool = Some(pool_config);

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return CacheBackend::new_local();
        }
    };

    // Test connection
    match pool.get().await {
        Ok(_) => {
            tracing::info!("Connected to Redis");
            CacheBackend::new_redis(pool)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to local cache."
            );
            CacheBackend::new_local()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_redis_uses_local_backend() {
        let backend = create_cache_backend(&RedisConfig::default()).await;
        assert_eq!(backend.stats().mode, "local");
    }

    #[tokio::test]
    async fn test_unreachable_redis_falls_back_to_local() {
        let config = RedisConfig {
            enabled: true,
            url: "redis://127.0.0.1:1".into(),
            timeout_ms: 200,
            ..RedisConfig::default()
        };
        let backend = create_cache_backend(&config).await;
        assert_eq!(backend.stats().mode, "local");
    }
}
