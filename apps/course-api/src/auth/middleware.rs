//! Bearer token extraction.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::auth::tokens;
use crate::error::ApiError;
use crate::models::user::User;
use crate::AppState;

/// Authenticated user extracted from the `Authorization: Bearer <jwt>` header.
///
/// Suspended accounts still authenticate; the enrollment service rejects
/// their mutations with 403.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
}

impl AuthUser {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.user.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Administrator access required"))
        }
    }
}

/// Rejection returned when the bearer token is missing or invalid.
pub struct AuthError {
    message: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": "UNAUTHORIZED",
                "message": self.message
            }
        });
        (StatusCode::UNAUTHORIZED, Json(body)).into_response()
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError {
                message: "Missing Authorization header",
            })
            .map_err(IntoResponse::into_response)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AuthError {
                message: "Invalid Authorization header format",
            })
            .map_err(IntoResponse::into_response)?;

        let claims = tokens::verify_token(token, &state.config.auth_jwt_secret)
            .map_err(IntoResponse::into_response)?;

        let user = state
            .store
            .find_user(&claims.sub)
            .await
            .map_err(|e| ApiError::from(e).into_response())?
            .ok_or(AuthError {
                message: "Unknown user",
            })
            .map_err(IntoResponse::into_response)?;

        Ok(AuthUser { user })
    }
}
