//! `POST /assistant/chat`

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::http::HeaderMap;
use axum::{Extension, Json};

use crate::api::middleware::REQUEST_ID_HEADER;
use crate::api::{current_user, ApiError};
use crate::assistant::{Assistant, CallerContext, ChatRequest, ChatResponse};
use crate::auth::Claims;
use crate::store::Store;

pub async fn chat_handler(
    Extension(assistant): Extension<Arc<Assistant>>,
    Extension(store): Extension<Store>,
    Extension(claims): Extension<Claims>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(request) = payload?;
    let user = current_user(&store, &claims).await?;
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    let caller = CallerContext::new(user.user_id, user.role, request.selected_student_id);
    let response = assistant.chat(request_id, caller, &request).await?;
    Ok(Json(response))
}
