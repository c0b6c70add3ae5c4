//! API Middleware - Authentication, rate limiting, request ids, timeouts

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Extension;
use tokio::sync::RwLock;

use crate::auth::{AuthError, Claims, JwtKeys};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Paths reachable without a bearer token.
const PUBLIC_PATHS: &[&str] = &["/health"];

/// JWT authentication middleware. Inserts the decoded [`Claims`].
pub async fn auth_middleware(mut request: Request, next: Next) -> Response {
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let Some(keys) = request.extensions().get::<Arc<JwtKeys>>().cloned() else {
        tracing::error!("auth middleware installed without JWT keys");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let claims: Result<Claims, AuthError> = match token {
        Some(token) => keys.verify(token.trim()),
        None => Err(AuthError::MissingToken),
    };

    match claims {
        Ok(claims) => {
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(path = %request.uri().path(), "rejected request: {}", e);
            e.into_response()
        }
    }
}

/// Sliding-window rate limiter
pub struct RateLimiter {
    requests: RwLock<HashMap<String, Vec<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_seconds: u64) -> Self {
        Self {
            requests: RwLock::new(HashMap::new()),
            max_requests,
            window: Duration::from_secs(window_seconds),
        }
    }

    pub async fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        let entry = requests.entry(key.to_string()).or_default();
        entry.retain(|t| now.duration_since(*t) < self.window);

        if entry.len() >= self.max_requests {
            return false;
        }

        entry.push(now);
        true
    }
}

pub async fn rate_limit_middleware(
    Extension(limiter): Extension<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client_ip = request
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if !limiter.check(&client_ip).await {
        tracing::warn!("Rate limit exceeded for {}", client_ip);
        return (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(serde_json::json!({ "error": "rate limit exceeded" })),
        )
            .into_response();
    }

    next.run(request).await
}

/// Per-request deadline, installed as an extension.
#[derive(Debug, Clone, Copy)]
pub struct RequestTimeout(pub Duration);

pub async fn timeout_middleware(request: Request, next: Next) -> Response {
    let timeout = request
        .extensions()
        .get::<RequestTimeout>()
        .map(|t| t.0)
        .unwrap_or(Duration::from_secs(30));

    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "request timed out");
            (
                StatusCode::REQUEST_TIMEOUT,
                axum::Json(serde_json::json!({ "error": "request timed out" })),
            )
                .into_response()
        }
    }
}

/// Tags the request and response with an id, reusing a caller-supplied one.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let header_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &header_value {
        request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
    }

    let mut response = next.run(request).await;

    if let Some(value) = header_value {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rate_limiter_window() {
        let limiter = RateLimiter::new(2, 60);
        assert!(limiter.check("a").await);
        assert!(limiter.check("a").await);
        assert!(!limiter.check("a").await);
        assert!(limiter.check("b").await);
    }
}
