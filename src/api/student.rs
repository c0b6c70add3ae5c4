//! Student endpoints

use axum::extract::rejection::JsonRejection;
use axum::extract::Path;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;

use crate::api::{require_role, ApiError, ApiResponse};
use crate::assistant::Role;
use crate::auth::Claims;
use crate::store::{CourseSummary, Store, SubmissionOutcome};

#[derive(Debug, Deserialize)]
pub struct SubmitAnswer {
    #[serde(default)]
    pub answer: String,
}

pub fn routes() -> Router {
    Router::new()
        .route("/courses", get(list_courses))
        .route("/courses/:course_id/enroll", post(enroll))
        .route("/exercises/:exercise_id/submit", post(submit_exercise))
}

async fn list_courses(
    Extension(store): Extension<Store>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<Vec<CourseSummary>>>, ApiError> {
    let user = require_role(&store, &claims, Role::Student).await?;
    let courses = store.student_courses(user.user_id).await?;
    Ok(Json(ApiResponse::success(courses)))
}

async fn enroll(
    Extension(store): Extension<Store>,
    Extension(claims): Extension<Claims>,
    Path(course_id): Path<i64>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let user = require_role(&store, &claims, Role::Student).await?;
    store.enroll(user.user_id, course_id).await?;
    Ok(Json(ApiResponse::success(serde_json::json!({ "course_id": course_id, "status": "enrolled" }))))
}

async fn submit_exercise(
    Extension(store): Extension<Store>,
    Extension(claims): Extension<Claims>,
    Path(exercise_id): Path<i64>,
    payload: Result<Json<SubmitAnswer>, JsonRejection>,
) -> Result<Json<ApiResponse<SubmissionOutcome>>, ApiError> {
    let Json(body) = payload?;
    let user = require_role(&store, &claims, Role::Student).await?;
    let outcome = store.submit_exercise(user.user_id, exercise_id, &body.answer).await?;
    Ok(Json(ApiResponse::success(outcome)))
}
