//! HTTP error mapping.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use headlines_cache::CacheError;
use headlines_storage::StorageError;
use serde_json::json;

use crate::profanity::ProfanityError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("{0}")]
    BadRequest(String),

    /// The system of record (or a required dependency) is unreachable.
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    BadGateway(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CacheError> for ApiError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::SourceUnavailable(_) => Self::Unavailable(e.to_string()),
            CacheError::Storage(StorageError::NotFound { kind, id }) => Self::NotFound { kind, id },
            _ => Self::Internal(e.to_string()),
        }
    }
}

impl From<ProfanityError> for ApiError {
    fn from(e: ProfanityError) -> Self {
        match e {
            ProfanityError::Unavailable(_) => Self::Unavailable(e.to_string()),
            _ => Self::BadGateway(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
