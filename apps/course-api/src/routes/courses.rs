//! Course catalogue and enrollment endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use diveshop_common::id::{has_prefix, prefix};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::enrollment::EnrollmentResult;
use crate::error::{body_rejection, ApiError, ApiErrorBody, FieldError};
use crate::models::course::{Course, CourseDetail};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/courses", get(list_courses))
        .route("/courses/{course_id}", get(get_course))
        .route("/courses/{course_id}/enroll", post(enroll))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CourseListResponse {
    pub data: Vec<Course>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CourseDetailResponse {
    pub data: CourseDetail,
}

// ---------------------------------------------------------------------------
// GET /api/courses
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/courses",
    tag = "Courses",
    responses(
        (status = 200, description = "Active courses", body = CourseListResponse),
    ),
)]
pub async fn list_courses(
    State(state): State<AppState>,
) -> Result<Json<CourseListResponse>, ApiError> {
    let data = state.store.list_courses().await?;
    Ok(Json(CourseListResponse { data }))
}

// ---------------------------------------------------------------------------
// GET /api/courses/:course_id
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/courses/{course_id}",
    tag = "Courses",
    params(("course_id" = String, Path, description = "Course ID")),
    responses(
        (status = 200, description = "Course with its sessions", body = CourseDetailResponse),
        (status = 404, description = "Not found", body = ApiErrorBody),
    ),
)]
pub async fn get_course(
    State(state): State<AppState>,
    Path(course_id): Path<String>,
) -> Result<Json<CourseDetailResponse>, ApiError> {
    let course = state
        .store
        .find_course(&course_id)
        .await?
        .filter(|c| c.is_active)
        .ok_or_else(|| ApiError::not_found("Course not found"))?;

    let sessions = state.store.list_session_summaries(&course.id).await?;

    Ok(Json(CourseDetailResponse {
        data: CourseDetail { course, sessions },
    }))
}

// ---------------------------------------------------------------------------
// POST /api/courses/:course_id/enroll
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct EnrollRequest {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/courses/{course_id}/enroll",
    tag = "Enrollments",
    security(("bearer" = [])),
    params(("course_id" = String, Path, description = "Course ID")),
    request_body = EnrollRequest,
    responses(
        (status = 201, description = "Enrolled or waitlisted", body = EnrollmentResult),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Account suspended", body = ApiErrorBody),
        (status = 404, description = "Course or session not found", body = ApiErrorBody),
        (status = 409, description = "Duplicate enrollment or session busy", body = ApiErrorBody),
    ),
)]
pub async fn enroll(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(course_id): Path<String>,
    body: Result<Json<EnrollRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<EnrollmentResult>), ApiError> {
    // --- Validation ---
    let Json(body) = body.map_err(|rejection| body_rejection(rejection, "sessionId"))?;
    let session_id = match body.session_id.as_deref().map(str::trim) {
        None | Some("") => {
            return Err(ApiError::validation(vec![FieldError::new(
                "sessionId",
                "is required",
            )]))
        }
        Some(id) if !has_prefix(id, prefix::COURSE_SESSION) => {
            return Err(ApiError::validation(vec![FieldError::new(
                "sessionId",
                "is not a course session ID",
            )]))
        }
        Some(id) => id,
    };

    let result = state
        .enrollments
        .enroll_in_course(&course_id, session_id, &user.id)
        .await?;

    Ok((StatusCode::CREATED, Json(result)))
}
