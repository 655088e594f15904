//! Redis-backed cache tests.
//!
//! Uses testcontainers to spin up a real Redis instance, so these are ignored
//! by default. Run with `cargo test -p headlines-cache -- --ignored`.

use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::{Config as PoolConfig, Runtime};
use headlines_cache::{CacheAside, CacheBackend, KvStore, RecencyIndex};
use headlines_storage::{Article, MemoryStore};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let port = container.get_host_port_ipv4(6379).await.expect("get port");
            (container, format!("redis://127.0.0.1:{port}"))
        })
        .await;
    url.clone()
}

async fn backend() -> CacheBackend {
    let pool = PoolConfig::from_url(redis_url().await)
        .create_pool(Some(Runtime::Tokio1))
        .expect("create pool");
    CacheBackend::new_redis(pool)
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_values_and_ttl() {
    let kv = backend().await;
    assert!(kv.is_redis_available().await);
    assert_eq!(kv.stats().mode, "redis");

    kv.set("it:value", b"hello".to_vec(), Duration::from_millis(200))
        .await
        .unwrap();
    assert_eq!(
        kv.get("it:value").await.unwrap().as_deref(),
        Some(&b"hello".to_vec())
    );

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(kv.get("it:value").await.unwrap().is_none());
    assert!(!kv.delete("it:value").await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_scored_set_ranks() {
    let kv = backend().await;
    let set = "it:scores";

    assert!(kv.scored_set_add(set, "a", 1.0).await.unwrap());
    assert!(kv.scored_set_add(set, "b", 2.0).await.unwrap());
    assert!(kv.scored_set_add(set, "c", 3.0).await.unwrap());
    // Re-scoring is not a new member.
    assert!(!kv.scored_set_add(set, "a", 4.0).await.unwrap());

    assert_eq!(kv.scored_set_range_by_rank(set, 0, -1).await.unwrap(), ["b", "c", "a"]);
    assert_eq!(kv.scored_set_range_by_rank(set, -1, -1).await.unwrap(), ["a"]);
    assert_eq!(kv.scored_set_remove_range_by_rank(set, 0, 0).await.unwrap(), 1);
    assert_eq!(
        kv.scored_set_remove(set, &["c".to_string(), "zzz".to_string()])
            .await
            .unwrap(),
        1
    );
    assert_eq!(kv.scored_set_size(set).await.unwrap(), 1);
    assert_eq!(kv.scored_set_remove(set, &[]).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_recency_is_shared_between_instances() {
    let first: Arc<dyn KvStore> = Arc::new(backend().await);
    let second: Arc<dyn KvStore> = Arc::new(backend().await);
    let store = Arc::new(
        MemoryStore::with_entities((1..=4).map(|i| Article::new(format!("A{i}"), ""))).await,
    );

    // Two instances sharing one namespace and capacity.
    let a = CacheAside::new(first, store.clone()).with_recency(3);
    let b = CacheAside::new(second.clone(), store).with_recency(3);

    a.get(1).await.unwrap();
    b.get(2).await.unwrap();
    a.get(3).await.unwrap();
    b.get(4).await.unwrap();

    let index = RecencyIndex::new(second.clone(), "articles", 3);
    assert_eq!(
        index.members().await.unwrap(),
        ["article:2", "article:3", "article:4"]
    );
    assert!(second.get("article:1").await.unwrap().is_none());
    assert!(second.get("article:4").await.unwrap().is_some());
}
