use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::IntoResponse,
};
use headlines_cache::WriteOutcome;
use headlines_storage::{Article, Comment, EntityId, WindowQuery};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::metrics;
use crate::server::AppState;

/// Response header set when a write reached the source but not the cache.
pub const CACHE_WARNING_HEADER: &str = "x-cache-warning";

/// Default size of `GET /api/articles/latest`.
const DEFAULT_TOP: usize = 10;
/// Largest accepted `top`.
const MAX_TOP: usize = 100;

#[derive(Debug, Deserialize)]
pub struct ArticleInput {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub continent: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentInput {
    pub article_id: EntityId,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct LatestParams {
    pub top: Option<usize>,
}

#[derive(Serialize)]
struct BreakerStatus {
    dependency: String,
    state: &'static str,
}

// ---- Articles ----

pub async fn get_article(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> Result<Json<Article>, ApiError> {
    state
        .articles
        .get(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound {
            kind: "article",
            id,
        })
}

pub async fn latest_articles(
    State(state): State<AppState>,
    Query(params): Query<LatestParams>,
) -> Result<Json<Vec<Article>>, ApiError> {
    let top = params.top.unwrap_or(DEFAULT_TOP);
    if top == 0 || top > MAX_TOP {
        return Err(ApiError::BadRequest(format!(
            "top must be between 1 and {MAX_TOP}"
        )));
    }
    let window = state.warmer.latest_window(top);
    Ok(Json(state.articles.get_window(&window).await?))
}

pub async fn create_article(
    State(state): State<AppState>,
    Json(input): Json<ArticleInput>,
) -> Result<impl IntoResponse, ApiError> {
    if input.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Title is required.".into()));
    }
    let mut article = Article::new(input.title, input.content);
    if let Some(continent) = input.continent {
        article.continent = continent;
    }

    let outcome = state.articles.put(article).await?;
    state.invalidate_latest().await;
    Ok((StatusCode::CREATED, written(outcome)))
}

pub async fn update_article(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
    Json(input): Json<ArticleInput>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(mut article) = state.articles.get(id).await? else {
        return Err(ApiError::NotFound {
            kind: "article",
            id,
        });
    };
    article.title = input.title;
    article.content = input.content;
    if let Some(continent) = input.continent {
        article.continent = continent;
    }

    let outcome = state.articles.put(article).await?;
    state.invalidate_latest().await;
    Ok(written(outcome))
}

pub async fn delete_article(
    State(state): State<AppState>,
    Path(id): Path<EntityId>,
) -> Result<StatusCode, ApiError> {
    if !state.articles.remove(id).await? {
        return Err(ApiError::NotFound {
            kind: "article",
            id,
        });
    }
    state.invalidate_latest().await;
    Ok(StatusCode::NO_CONTENT)
}

// ---- Comments ----

pub async fn comments_for_article(
    State(state): State<AppState>,
    Path(article_id): Path<EntityId>,
) -> Result<Json<Vec<Comment>>, ApiError> {
    let window = WindowQuery::children_of(article_id);
    Ok(Json(state.comments.get_window(&window).await?))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Json(input): Json<CommentInput>,
) -> Result<impl IntoResponse, ApiError> {
    if input.text.trim().is_empty() {
        return Err(ApiError::BadRequest("Text is required.".into()));
    }

    if state.profanity.contains_profanity(&input.text).await? {
        return Err(ApiError::BadRequest(
            "Comment rejected due to profanity.".into(),
        ));
    }

    let mut comment = Comment::new(input.article_id, input.text);
    if let Some(user_name) = input.user_name.filter(|name| !name.trim().is_empty()) {
        comment.user_name = user_name;
    }

    let outcome = state.comments.put(comment).await?;
    let window = WindowQuery::children_of(input.article_id);
    if let Err(e) = state.comments.invalidate_window(&window).await {
        tracing::warn!(article_id = input.article_id, error = %e, "comment list invalidation failed");
    }
    Ok((StatusCode::CREATED, written(outcome)))
}

// ---- Operations ----

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.cache.stats();
    let breakers: Vec<BreakerStatus> = state
        .breakers
        .states()
        .into_iter()
        .map(|(dependency, s)| BreakerStatus {
            dependency,
            state: s.as_str(),
        })
        .collect();
    let body = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "cache": {
            "mode": stats.mode,
            "localEntries": stats.local_entries,
        },
        "breakers": breakers,
    });
    (StatusCode::OK, Json(body))
}

pub async fn prometheus() -> impl IntoResponse {
    match metrics::render_metrics() {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response(),
    }
}

/// JSON body plus `X-Cache-Warning` when the cache mirror failed.
fn written<T: Serialize>(outcome: WriteOutcome<T>) -> (HeaderMap, Json<T>) {
    let mut headers = HeaderMap::new();
    if let Some(warning) = outcome.cache_warning {
        let value = HeaderValue::from_str(&warning.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("cache write failed"));
        headers.insert(CACHE_WARNING_HEADER, value);
    }
    (headers, Json(outcome.value))
}
