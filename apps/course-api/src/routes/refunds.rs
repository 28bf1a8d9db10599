//! Refund listing and admin review.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::enrollment::RefundAction;
use crate::error::{ApiError, ApiErrorBody};
use crate::models::refund::Refund;
use crate::store::RefundScope;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/refunds", get(list_refunds))
        .route("/refunds/{refund_id}/approve", post(approve_refund))
        .route("/refunds/{refund_id}/reject", post(reject_refund))
        .route("/refunds/{refund_id}/process", post(process_refund))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RefundListResponse {
    pub data: Vec<Refund>,
}

#[utoipa::path(
    get,
    path = "/api/refunds",
    tag = "Refunds",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Refunds, newest first; admins see all", body = RefundListResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn list_refunds(
    AuthUser { user }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<RefundListResponse>, ApiError> {
    let scope = if user.is_admin() {
        RefundScope::All
    } else {
        RefundScope::User(user.id)
    };
    let data = state.store.list_refunds(scope).await?;
    Ok(Json(RefundListResponse { data }))
}

async fn review(
    auth: AuthUser,
    state: AppState,
    refund_id: String,
    action: RefundAction,
) -> Result<Json<Refund>, ApiError> {
    auth.require_admin()?;
    let refund = state
        .enrollments
        .review_refund(&refund_id, action, &auth.user.id)
        .await?;
    Ok(Json(refund))
}

#[utoipa::path(
    post,
    path = "/api/refunds/{refund_id}/approve",
    tag = "Refunds",
    security(("bearer" = [])),
    params(("refund_id" = String, Path, description = "Refund ID")),
    responses(
        (status = 200, description = "Refund approved", body = Refund),
        (status = 403, description = "Admin only", body = ApiErrorBody),
        (status = 404, description = "Refund not found", body = ApiErrorBody),
        (status = 409, description = "Refund is not pending", body = ApiErrorBody),
    ),
)]
pub async fn approve_refund(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(refund_id): Path<String>,
) -> Result<Json<Refund>, ApiError> {
    review(auth, state, refund_id, RefundAction::Approve).await
}

#[utoipa::path(
    post,
    path = "/api/refunds/{refund_id}/reject",
    tag = "Refunds",
    security(("bearer" = [])),
    params(("refund_id" = String, Path, description = "Refund ID")),
    responses(
        (status = 200, description = "Refund rejected", body = Refund),
        (status = 403, description = "Admin only", body = ApiErrorBody),
        (status = 404, description = "Refund not found", body = ApiErrorBody),
        (status = 409, description = "Refund is not pending", body = ApiErrorBody),
    ),
)]
pub async fn reject_refund(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(refund_id): Path<String>,
) -> Result<Json<Refund>, ApiError> {
    review(auth, state, refund_id, RefundAction::Reject).await
}

#[utoipa::path(
    post,
    path = "/api/refunds/{refund_id}/process",
    tag = "Refunds",
    security(("bearer" = [])),
    params(("refund_id" = String, Path, description = "Refund ID")),
    responses(
        (status = 200, description = "Refund paid out", body = Refund),
        (status = 403, description = "Admin only", body = ApiErrorBody),
        (status = 404, description = "Refund not found", body = ApiErrorBody),
        (status = 409, description = "Refund is not approved", body = ApiErrorBody),
    ),
)]
pub async fn process_refund(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(refund_id): Path<String>,
) -> Result<Json<Refund>, ApiError> {
    review(auth, state, refund_id, RefundAction::Process).await
}
