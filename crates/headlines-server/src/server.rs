use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use headlines_cache::{CacheAside, CacheBackend, CacheWarmer, DynKv, WarmerHandle, keys};
use headlines_resilience::BreakerRegistry;
use headlines_storage::{Article, Comment, DynSource, MemoryStore};
use tower_http::trace::TraceLayer;

use crate::{
    config::{AppConfig, WarmerSettings},
    create_cache_backend, handlers, middleware as app_middleware,
    profanity::{self, ProfanityClient, ProfanityError},
};

/// Shared state of every request handler.
#[derive(Clone)]
pub struct AppState {
    pub articles: Arc<CacheAside<Article>>,
    pub comments: Arc<CacheAside<Comment>>,
    pub profanity: Arc<ProfanityClient>,
    pub breakers: Arc<BreakerRegistry>,
    pub cache: CacheBackend,
    pub warmer: Arc<WarmerSettings>,
    pub article_source: DynSource<Article>,
}

impl AppState {
    /// Wires accessors, breaker and profanity client over the given backend
    /// and systems of record.
    pub fn new(
        cfg: &AppConfig,
        cache: CacheBackend,
        articles: DynSource<Article>,
        comments: DynSource<Comment>,
    ) -> Result<Self, ProfanityError> {
        let kv: DynKv = Arc::new(cache.clone());
        let capacity = cfg.cache.recency_capacity;

        let article_cache = CacheAside::new(kv.clone(), articles.clone())
            .with_entity_policy(cfg.cache.entity_policy())
            .with_list_policy(cfg.cache.list_policy())
            .with_recency(capacity);
        let comment_cache = CacheAside::new(kv, comments)
            .with_entity_policy(cfg.cache.entity_policy())
            .with_list_policy(cfg.cache.list_policy())
            .with_recency(capacity);

        let breakers = Arc::new(BreakerRegistry::default());
        let breaker = breakers.breaker_with(profanity::DEPENDENCY, cfg.profanity.breaker_config());
        let profanity = ProfanityClient::new(&cfg.profanity, breaker)?;

        Ok(Self {
            articles: Arc::new(article_cache),
            comments: Arc::new(comment_cache),
            profanity: Arc::new(profanity),
            breakers,
            cache,
            warmer: Arc::new(cfg.warmer.clone()),
            article_source: articles,
        })
    }

    /// Drops the cached "latest N" lists after an article write: every size a
    /// request filled (tracked in the recency index) plus the warmed sizes,
    /// which the warmer writes untracked.
    pub async fn invalidate_latest(&self) {
        let prefix = keys::latest_prefix::<Article>();
        if let Err(e) = self.articles.invalidate_tracked(&prefix).await {
            tracing::warn!(prefix = %prefix, error = %e, "latest articles invalidation failed");
        }
        for &top in &self.warmer.windows {
            let window = self.warmer.latest_window(top);
            if let Err(e) = self.articles.invalidate_window(&window).await {
                tracing::warn!(top, error = %e, "latest articles invalidation failed");
            }
        }
    }

    /// Starts the article warmer if enabled.
    pub fn start_warmer(&self) -> Option<WarmerHandle> {
        if !self.warmer.enabled {
            tracing::info!("Cache warmer disabled");
            return None;
        }
        let kv: DynKv = Arc::new(self.cache.clone());
        let warmer = CacheWarmer::new(
            kv,
            self.article_source.clone(),
            self.warmer.to_warmer_config(),
        );
        Some(warmer.start())
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        // Articles
        .route("/api/articles", post(handlers::create_article))
        .route("/api/articles/latest", get(handlers::latest_articles))
        .route(
            "/api/articles/{id}",
            get(handlers::get_article)
                .put(handlers::update_article)
                .delete(handlers::delete_article),
        )
        // Comments
        .route("/api/comments", post(handlers::create_comment))
        .route(
            "/api/comments/{article_id}",
            get(handlers::comments_for_article),
        )
        // Operations
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::prometheus))
        .layer(middleware::from_fn(app_middleware::track_requests))
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let req_id = req
                    .extensions()
                    .get::<axum::http::HeaderValue>()
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                tracing::info_span!(
                    "http.request",
                    http.method = %req.method(),
                    http.target = %req.uri(),
                    request_id = %req_id
                )
            }),
        )
        .with_state(state)
}

pub struct HeadlinesServer {
    addr: SocketAddr,
    sweep_interval: Duration,
    state: AppState,
}

impl HeadlinesServer {
    /// Builds the server: cache backend (Redis or local), in-memory systems
    /// of record, accessors and profanity client.
    pub async fn build(cfg: &AppConfig) -> Result<Self, ProfanityError> {
        let cache = create_cache_backend(&cfg.redis).await;
        let articles: DynSource<Article> = Arc::new(MemoryStore::new());
        let comments: DynSource<Comment> = Arc::new(MemoryStore::new());
        let state = AppState::new(cfg, cache, articles, comments)?;
        Ok(Self {
            addr: cfg.addr(),
            sweep_interval: cfg.cache.sweep_interval(),
            state,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let warmer = self.state.start_warmer();
        let sweeper = self.state.cache.start_sweeper(self.sweep_interval);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);
        let served = axum::serve(listener, build_app(self.state))
            .with_graceful_shutdown(shutdown_signal())
            .await;

        if let Some(handle) = warmer {
            handle.stop().await;
        }
        if let Some(handle) = sweeper {
            handle.abort();
        }
        served?;
        Ok(())
    }
}

async fn shutdown_signal() {
    // Wait for Ctrl+C
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
