//! Enrollment lifecycle endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::enrollment::CancelOutcome;
use crate::error::{body_rejection, ApiError, ApiErrorBody, FieldError};
use crate::models::enrollment::Enrollment;
use crate::models::refund::Refund;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/enrollments", get(list_my_enrollments))
        .route("/enrollments/{enrollment_id}/cancel", post(cancel_enrollment))
        .route("/enrollments/{enrollment_id}/drop", post(drop_enrollment))
        .route("/enrollments/{enrollment_id}/payment", put(record_payment))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EnrollmentListResponse {
    pub data: Vec<Enrollment>,
}

/// Result of a cancel or drop.
#[derive(Debug, Serialize, ToSchema)]
pub struct WithdrawResponse {
    pub enrollment: Enrollment,
    pub refund: Option<Refund>,
}

/// Tell the notification service about promotions once they are committed.
async fn notify_promotions(state: &AppState, outcome: &CancelOutcome) {
    for promoted in &outcome.promoted {
        state.notifier.waitlist_promoted(promoted).await;
    }
}

// ---------------------------------------------------------------------------
// GET /api/enrollments
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/enrollments",
    tag = "Enrollments",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Caller's enrollments, newest first", body = EnrollmentListResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn list_my_enrollments(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<EnrollmentListResponse>, ApiError> {
    let data = state.store.list_user_enrollments(&user.id).await?;
    Ok(Json(EnrollmentListResponse { data }))
}

// ---------------------------------------------------------------------------
// POST /api/enrollments/:enrollment_id/cancel
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/enrollments/{enrollment_id}/cancel",
    tag = "Enrollments",
    security(("bearer" = [])),
    params(("enrollment_id" = String, Path, description = "Enrollment ID")),
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Enrollment cancelled", body = WithdrawResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Not the owner or an admin", body = ApiErrorBody),
        (status = 404, description = "Enrollment not found", body = ApiErrorBody),
        (status = 409, description = "Already cancelled or dropped", body = ApiErrorBody),
    ),
)]
pub async fn cancel_enrollment(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
    Path(enrollment_id): Path<String>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    let Json(body) = body.unwrap_or_default();
    let reason = body
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    if reason.is_some_and(|r| r.chars().count() > 500) {
        return Err(ApiError::validation(vec![FieldError::new(
            "reason",
            "must be at most 500 characters",
        )]));
    }

    let outcome = state
        .enrollments
        .cancel(&enrollment_id, &user.id, reason)
        .await?;
    notify_promotions(&state, &outcome).await;

    Ok(Json(WithdrawResponse {
        enrollment: outcome.enrollment,
        refund: outcome.refund,
    }))
}

// ---------------------------------------------------------------------------
// POST /api/enrollments/:enrollment_id/drop
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/enrollments/{enrollment_id}/drop",
    tag = "Enrollments",
    security(("bearer" = [])),
    params(("enrollment_id" = String, Path, description = "Enrollment ID")),
    responses(
        (status = 200, description = "Student dropped", body = WithdrawResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Admin only", body = ApiErrorBody),
        (status = 404, description = "Enrollment not found", body = ApiErrorBody),
        (status = 409, description = "Enrollment is not enrolled", body = ApiErrorBody),
    ),
)]
pub async fn drop_enrollment(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(enrollment_id): Path<String>,
) -> Result<Json<WithdrawResponse>, ApiError> {
    auth.require_admin()?;

    let outcome = state
        .enrollments
        .drop_enrollment(&enrollment_id, &auth.user.id)
        .await?;
    notify_promotions(&state, &outcome).await;

    Ok(Json(WithdrawResponse {
        enrollment: outcome.enrollment,
        refund: outcome.refund,
    }))
}

// ---------------------------------------------------------------------------
// PUT /api/enrollments/:enrollment_id/payment
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordPaymentRequest {
    #[serde(rename = "orderId")]
    pub order_id: Option<String>,
}

#[utoipa::path(
    put,
    path = "/api/enrollments/{enrollment_id}/payment",
    tag = "Enrollments",
    security(("bearer" = [])),
    params(("enrollment_id" = String, Path, description = "Enrollment ID")),
    request_body = RecordPaymentRequest,
    responses(
        (status = 200, description = "Payment recorded", body = Enrollment),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Admin only", body = ApiErrorBody),
        (status = 404, description = "Enrollment or order not found", body = ApiErrorBody),
        (status = 409, description = "Not payable", body = ApiErrorBody),
    ),
)]
pub async fn record_payment(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(enrollment_id): Path<String>,
    body: Result<Json<RecordPaymentRequest>, JsonRejection>,
) -> Result<Json<Enrollment>, ApiError> {
    auth.require_admin()?;
    let Json(body) = body.map_err(|rejection| body_rejection(rejection, "orderId"))?;

    let order_id = body
        .order_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ApiError::validation(vec![FieldError::new("orderId", "is required")]))?;

    let enrollment = state
        .enrollments
        .record_payment(&enrollment_id, order_id, &auth.user.id)
        .await?;

    Ok(Json(enrollment))
}
