//! Audit log query endpoint.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::models::audit_log::{AuditLogEntry, AuditLogQuery};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/audit-logs", get(list_audit_logs))
}

#[derive(Debug, Deserialize)]
pub struct AuditLogParams {
    pub actor_id: Option<String>,
    pub entity: Option<String>,
    pub entity_id: Option<String>,
    pub before: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditLogResponse {
    pub data: Vec<AuditLogEntry>,
    pub has_more: bool,
}

#[utoipa::path(
    get,
    path = "/api/audit-logs",
    tag = "Audit Log",
    security(("bearer" = [])),
    params(
        ("actor_id" = Option<String>, Query, description = "Filter by actor user ID"),
        ("entity" = Option<String>, Query, description = "Filter by entity type"),
        ("entity_id" = Option<String>, Query, description = "Filter by entity ID"),
        ("before" = Option<String>, Query, description = "Cursor: audit log entry ID"),
        ("limit" = Option<i64>, Query, description = "Number of entries (1-100, default 50)"),
    ),
    responses(
        (status = 200, description = "Audit log entries", body = AuditLogResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Forbidden", body = ApiErrorBody),
    ),
)]
pub async fn list_audit_logs(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<AuditLogParams>,
) -> Result<Json<AuditLogResponse>, ApiError> {
    auth.require_admin()?;

    let limit = params.limit.unwrap_or(50).clamp(1, 100);

    // Fetch one extra row to learn whether another page exists.
    let query = AuditLogQuery {
        actor_id: params.actor_id,
        entity: params.entity,
        entity_id: params.entity_id,
        before: params.before,
        limit: limit + 1,
    };
    let rows = state.store.list_audit_logs(&query).await?;

    let has_more = rows.len() as i64 > limit;
    let data: Vec<AuditLogEntry> = rows.into_iter().take(limit as usize).collect();

    Ok(Json(AuditLogResponse { data, has_more }))
}
