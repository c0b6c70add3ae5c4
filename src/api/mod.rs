//! API Layer - HTTP surface of SmartSQL
//!
//! Assistant chat plus the student and instructor endpoints it leans on.

pub mod assistant;
pub mod instructor;
pub mod middleware;
pub mod student;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::assistant::{Assistant, AssistantError, Role};
use crate::auth::{AuthError, Claims, JwtKeys};
use crate::config::ServerConfig;
use crate::store::{Store, StoreError, UserRecord};

/// Success envelope for the non-assistant endpoints.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { status: "success".to_string(), data }
    }
}

/// Every failure a handler can return. The body is always `{"error": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Assistant(#[from] AssistantError),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    BadRequest(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Auth(e) => e.into_response(),
            ApiError::Store(e) => e.into_response(),
            ApiError::Assistant(e) => e.into_response(),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, Json(serde_json::json!({ "error": msg }))).into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": msg }))).into_response(),
        }
    }
}

/// Load the caller's user record. The stored role wins over the token's.
pub async fn current_user(store: &Store, claims: &Claims) -> Result<UserRecord, ApiError> {
    let user_id = claims.user_id()?;
    let user = store
        .find_user(user_id)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("user {} not found", user_id)))?;
    if user.role != claims.role {
        tracing::warn!(user_id, token_role = %claims.role, stored_role = %user.role, "token role does not match stored role");
    }
    Ok(user)
}

/// Like [`current_user`], but only for one role.
pub async fn require_role(store: &Store, claims: &Claims, role: Role) -> Result<UserRecord, ApiError> {
    let user = current_user(store, claims).await?;
    if user.role != role {
        return Err(ApiError::Forbidden(format!("only {} accounts may use this endpoint", role.as_str().to_lowercase())));
    }
    Ok(user)
}

/// Create the main API router
pub fn router(orchestrator: Arc<Assistant>, store: Store, keys: Arc<JwtKeys>, server: &ServerConfig) -> Router {
    let rate_limiter = Arc::new(middleware::RateLimiter::new(server.rate_limit_per_minute.max(1), 60));
    let timeout = middleware::RequestTimeout(Duration::from_millis(server.request_timeout_ms.max(1)));

    Router::new()
        .route("/health", get(health_check))
        .route("/assistant/chat", post(assistant::chat_handler))
        .nest("/api/student", student::routes())
        .nest("/api/instructor", instructor::routes())
        .layer(axum::middleware::from_fn(middleware::auth_middleware))
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware))
        .layer(axum::middleware::from_fn(middleware::timeout_middleware))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(Extension(orchestrator))
        .layer(Extension(store))
        .layer(Extension(keys))
        .layer(Extension(rate_limiter))
        .layer(Extension(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

async fn health_check(Extension(store): Extension<Store>) -> impl IntoResponse {
    let (status, state, database) = match sqlx::query("SELECT 1").execute(store.pool()).await {
        Ok(_) => (StatusCode::OK, "healthy", "ok"),
        Err(e) => {
            tracing::warn!("health check could not reach the database: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "degraded", "unavailable")
        }
    };
    (
        status,
        Json(serde_json::json!({
            "status": state,
            "database": database,
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
