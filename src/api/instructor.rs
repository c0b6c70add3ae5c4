//! Instructor endpoints

use axum::routing::get;
use axum::{Extension, Json, Router};

use crate::api::{require_role, ApiError, ApiResponse};
use crate::assistant::Role;
use crate::auth::Claims;
use crate::store::{Store, StudentSummary};

pub fn routes() -> Router {
    Router::new().route("/my-students", get(my_students))
}

/// Students with an active enrollment in one of the caller's courses.
/// These are the valid `selected_student_id` values for chat.
async fn my_students(
    Extension(store): Extension<Store>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ApiResponse<Vec<StudentSummary>>>, ApiError> {
    let user = require_role(&store, &claims, Role::Instructor).await?;
    let students = store.instructor_students(user.user_id).await?;
    Ok(Json(ApiResponse::success(students)))
}
