pub mod audit_log;
pub mod courses;
pub mod enrollments;
pub mod health;
pub mod refunds;

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().merge(health::router()).nest(
        "/api",
        courses::router()
            .merge(enrollments::router())
            .merge(refunds::router())
            .merge(audit_log::router()),
    )
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Courses
        courses::list_courses,
        courses::get_course,
        // Enrollments
        courses::enroll,
        enrollments::list_my_enrollments,
        enrollments::cancel_enrollment,
        enrollments::drop_enrollment,
        enrollments::record_payment,
        // Refunds
        refunds::list_refunds,
        refunds::approve_refund,
        refunds::reject_refund,
        refunds::process_refund,
        // Audit Log
        audit_log::list_audit_logs,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            // Models
            crate::models::course::Course,
            crate::models::course::CourseDetail,
            crate::models::course::SessionSummary,
            crate::models::enrollment::Enrollment,
            crate::models::refund::Refund,
            crate::models::audit_log::AuditLogEntry,
            crate::models::status::EnrollmentStatus,
            crate::models::status::RefundStatus,
            crate::enrollment::EnrollmentResult,
            // Route request/response types
            health::HealthResponse,
            courses::CourseListResponse,
            courses::CourseDetailResponse,
            courses::EnrollRequest,
            enrollments::EnrollmentListResponse,
            enrollments::WithdrawResponse,
            enrollments::CancelRequest,
            enrollments::RecordPaymentRequest,
            refunds::RefundListResponse,
            audit_log::AuditLogResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Courses", description = "Course catalogue"),
        (name = "Enrollments", description = "Enrollment, cancellation and payment"),
        (name = "Refunds", description = "Refund review"),
        (name = "Audit Log", description = "Audit log"),
    )
)]
pub struct ApiDoc;
