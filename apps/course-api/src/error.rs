use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::enrollment::EnrollmentError;
use crate::store::StoreError;

/// Structured API error returned to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldError>>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Application-level error type that converts into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<Vec<FieldError>>,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "CONFLICT", message)
    }

    /// Lock contention that outlasted every retry.
    pub fn busy(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "BUSY", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    pub fn validation(details: Vec<FieldError>) -> Self {
        Self {
            details: Some(details),
            ..Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", "Validation failed")
        }
    }
}

/// Report an unreadable JSON body as a validation error on the field the
/// endpoint requires.
pub fn body_rejection(rejection: JsonRejection, field: &str) -> ApiError {
    tracing::debug!(%rejection, field, "rejected request body");
    let message = match rejection {
        JsonRejection::MissingJsonContentType(_) => "is required",
        _ => "must be sent in a JSON object body",
    };
    ApiError::validation(vec![FieldError::new(field, message)])
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<EnrollmentError> for ApiError {
    fn from(err: EnrollmentError) -> Self {
        match err {
            EnrollmentError::NotFound(message) => Self::not_found(message),
            EnrollmentError::Forbidden(message) => Self::forbidden(message),
            EnrollmentError::Conflict(message) => Self::conflict(message),
            EnrollmentError::Validation(message) => Self::bad_request(message),
            err @ EnrollmentError::Busy => Self::busy(err.to_string()),
            EnrollmentError::Store(err) => err.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(?err, "store error");
        Self::internal("An internal error occurred")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrollment_errors_map_to_status_codes() {
        let cases = [
            (EnrollmentError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (EnrollmentError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (EnrollmentError::Conflict("x".into()), StatusCode::CONFLICT),
            (EnrollmentError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (EnrollmentError::Busy, StatusCode::CONFLICT),
            (
                EnrollmentError::Store(StoreError::Database("x".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn busy_has_its_own_code() {
        let err = ApiError::from(EnrollmentError::Busy);
        assert_eq!(err.code, "BUSY");
    }

    #[test]
    fn store_errors_are_masked() {
        let err = ApiError::from(StoreError::Database("relation missing".into()));
        assert_eq!(err.message, "An internal error occurred");
    }
}
