use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::metrics;

// Request ID middleware: propagate X-Request-Id or generate one.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    // Keep an incoming id; otherwise generate one.
    let req_id_value = match req.headers().get(&header_name) {
        Some(value) => value.clone(),
        None => HeaderValue::from_str(&Uuid::new_v4().to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("unknown")),
    };

    // Add to request extensions for downstream usage (e.g., logging)
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;

    res.headers_mut().insert(header_name, req_id_value);

    res
}

// Counts requests per service for `http_requests_total`.
pub async fn track_requests(req: Request<Body>, next: Next) -> Response {
    let service = service_of(req.uri().path());
    let res = next.run(req).await;
    if let Some(service) = service {
        metrics::record_http_request(service, res.status().as_u16());
    }
    res
}

fn service_of(path: &str) -> Option<&'static str> {
    if path.starts_with("/api/articles") {
        Some("articles")
    } else if path.starts_with("/api/comments") {
        Some("comments")
    } else {
        None
    }
}
