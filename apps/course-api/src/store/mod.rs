//! Storage seam for the enrollment workflow.
//!
//! Handlers and services only see [`Store`] and [`StoreTx`]. Everything that
//! must be atomic runs on a single [`StoreTx`], which holds the session lock
//! from [`StoreTx::lock_session`] until `commit` or `rollback`.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::audit_log::{AuditLogEntry, AuditLogQuery, NewAuditLog};
use crate::models::course::{Course, CourseSession, SessionSummary};
use crate::models::enrollment::{Enrollment, NewEnrollment};
use crate::models::order::Order;
use crate::models::refund::{NewRefund, Refund};
use crate::models::status::{EnrollmentStatus, OrderStatus, RefundStatus};
use crate::models::user::User;

/// Unique index allowing one non-cancelled enrollment per user and session.
pub const ACTIVE_ENROLLMENT_INDEX: &str = "uq_enrollments_active_user";
/// Unique index allowing each order to pay for a single enrollment.
pub const ORDER_ENROLLMENT_INDEX: &str = "uq_enrollments_order";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("lock not acquired within the lock timeout")]
    LockTimeout,

    #[error("transaction could not be serialized")]
    SerializationFailure,

    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("row not found: {0}")]
    RowNotFound(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("connection pool error: {0}")]
    Pool(String),
}

impl StoreError {
    /// Failures caused by a competing transaction; the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::LockTimeout | StoreError::SerializationFailure
        )
    }
}

/// Whose refunds to list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundScope {
    User(String),
    All,
}

/// Lock-free reads plus the entry point for transactional work.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction bounded by the configured lock timeout.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;

    async fn find_user(&self, user_id: &str) -> Result<Option<User>, StoreError>;

    /// Active courses, ordered by title.
    async fn list_courses(&self) -> Result<Vec<Course>, StoreError>;

    async fn find_course(&self, course_id: &str) -> Result<Option<Course>, StoreError>;

    /// Active sessions of a course ordered by start time, each with a live
    /// count of enrolled students.
    async fn list_session_summaries(
        &self,
        course_id: &str,
    ) -> Result<Vec<SessionSummary>, StoreError>;

    /// A user's enrollments, newest first.
    async fn list_user_enrollments(&self, user_id: &str) -> Result<Vec<Enrollment>, StoreError>;

    /// Refunds, newest first.
    async fn list_refunds(&self, scope: RefundScope) -> Result<Vec<Refund>, StoreError>;

    /// Audit entries, newest first, at most `query.limit` rows.
    async fn list_audit_logs(&self, query: &AuditLogQuery)
        -> Result<Vec<AuditLogEntry>, StoreError>;
}

/// One atomic unit of work. Dropping without `commit` discards all writes.
#[async_trait]
pub trait StoreTx: Send {
    async fn find_user(&mut self, user_id: &str) -> Result<Option<User>, StoreError>;

    async fn find_course(&mut self, course_id: &str) -> Result<Option<Course>, StoreError>;

    /// Fetch a session and hold its lock until the transaction ends.
    async fn lock_session(&mut self, session_id: &str)
        -> Result<Option<CourseSession>, StoreError>;

    async fn count_enrolled(&mut self, session_id: &str) -> Result<i64, StoreError>;

    /// The user's enrollment in the session that is not cancelled, if any.
    async fn find_active_enrollment(
        &mut self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<Enrollment>, StoreError>;

    async fn find_enrollment(&mut self, enrollment_id: &str)
        -> Result<Option<Enrollment>, StoreError>;

    async fn insert_enrollment(
        &mut self,
        enrollment: NewEnrollment<'_>,
    ) -> Result<Enrollment, StoreError>;

    async fn update_enrollment_status(
        &mut self,
        enrollment_id: &str,
        status: EnrollmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Enrollment, StoreError>;

    async fn set_enrollment_payment(
        &mut self,
        enrollment_id: &str,
        order_id: &str,
        paid_amount_cents: i64,
        at: DateTime<Utc>,
    ) -> Result<Enrollment, StoreError>;

    /// 1-based rank of a waitlisted enrollment within its session.
    async fn waitlist_position(&mut self, enrollment: &Enrollment) -> Result<i64, StoreError>;

    /// Oldest waitlisted enrollment of the session.
    async fn next_waitlisted(&mut self, session_id: &str) -> Result<Option<Enrollment>, StoreError>;

    async fn find_order(&mut self, order_id: &str) -> Result<Option<Order>, StoreError>;

    /// Fetch an order and hold its row lock until the transaction ends.
    async fn lock_order(&mut self, order_id: &str) -> Result<Option<Order>, StoreError>;

    /// The enrollment, in any status, that the order already pays for.
    async fn find_enrollment_by_order(
        &mut self,
        order_id: &str,
    ) -> Result<Option<Enrollment>, StoreError>;

    async fn update_order_status(
        &mut self,
        order_id: &str,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError>;

    async fn insert_refund(&mut self, refund: NewRefund<'_>) -> Result<Refund, StoreError>;

    /// Fetch a refund and hold its row lock until the transaction ends.
    async fn lock_refund(&mut self, refund_id: &str) -> Result<Option<Refund>, StoreError>;

    async fn update_refund_status(
        &mut self,
        refund_id: &str,
        status: RefundStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<Refund, StoreError>;

    async fn insert_audit_log(&mut self, entry: NewAuditLog<'_>) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
