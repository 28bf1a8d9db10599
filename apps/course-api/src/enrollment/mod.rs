//! Course enrollment: capacity checks, waitlisting, cancellation with
//! waitlist promotion, payment recording and refund review.
//!
//! Every public operation is one store transaction. Attempts that lose a race
//! for the session lock are retried with linear backoff before surfacing as
//! [`EnrollmentError::Busy`].

pub mod error;
mod workflow;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use utoipa::ToSchema;

pub use error::EnrollmentError;

use crate::models::enrollment::Enrollment;
use crate::models::refund::Refund;
use crate::models::status::{EnrollmentStatus, RefundStatus};
use crate::store::{Store, StoreTx};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Sleep before retry `n` is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(25),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EnrollmentResult {
    pub enrollment: Enrollment,
    /// 1-based rank in the session waitlist; `None` when enrolled.
    pub waitlist_position: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub enrollment: Enrollment,
    pub refund: Option<Refund>,
    /// Waitlisted enrollments that took the freed seats.
    pub promoted: Vec<Enrollment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundAction {
    Approve,
    Reject,
    Process,
}

impl RefundAction {
    pub fn target_status(self) -> RefundStatus {
        match self {
            RefundAction::Approve => RefundStatus::Approved,
            RefundAction::Reject => RefundStatus::Rejected,
            RefundAction::Process => RefundStatus::Processed,
        }
    }

    fn audit_action(self) -> &'static str {
        match self {
            RefundAction::Approve => "refund.approve",
            RefundAction::Reject => "refund.reject",
            RefundAction::Process => "refund.process",
        }
    }
}

pub struct EnrollmentService {
    store: Arc<dyn Store>,
    retry: RetryPolicy,
}

impl EnrollmentService {
    pub fn new(store: Arc<dyn Store>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Claim a seat in a session, or a waitlist spot when it is full.
    pub async fn enroll(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<EnrollmentResult, EnrollmentError> {
        self.enroll_checked(None, session_id, user_id).await
    }

    /// Like [`enroll`](Self::enroll), but the session must belong to `course_id`.
    pub async fn enroll_in_course(
        &self,
        course_id: &str,
        session_id: &str,
        user_id: &str,
    ) -> Result<EnrollmentResult, EnrollmentError> {
        self.enroll_checked(Some(course_id), session_id, user_id).await
    }

    async fn enroll_checked(
        &self,
        course_id: Option<&str>,
        session_id: &str,
        user_id: &str,
    ) -> Result<EnrollmentResult, EnrollmentError> {
        let result = self
            .with_retry("enroll", || async {
                let mut tx = self.store.begin().await?;
                let result =
                    workflow::enroll(tx.as_mut(), course_id, session_id, user_id).await;
                finish(tx, result).await
            })
            .await?;

        tracing::info!(
            enrollment_id = %result.enrollment.id,
            session_id,
            user_id,
            status = %result.enrollment.status,
            "enrollment created"
        );
        Ok(result)
    }

    /// Cancel an enrollment on behalf of its owner or an admin. A paid seat
    /// opens a pending refund; a freed seat goes to the waitlist.
    pub async fn cancel(
        &self,
        enrollment_id: &str,
        actor_id: &str,
        reason: Option<&str>,
    ) -> Result<CancelOutcome, EnrollmentError> {
        let outcome = self
            .withdraw(enrollment_id, actor_id, EnrollmentStatus::Cancelled, reason)
            .await?;
        tracing::info!(
            enrollment_id,
            actor_id,
            refund_id = outcome.refund.as_ref().map(|r| r.id.as_str()),
            promoted = outcome.promoted.len(),
            "enrollment cancelled"
        );
        Ok(outcome)
    }

    /// Admin removal of an enrolled student. No refund is opened.
    pub async fn drop_enrollment(
        &self,
        enrollment_id: &str,
        actor_id: &str,
    ) -> Result<CancelOutcome, EnrollmentError> {
        let outcome = self
            .withdraw(enrollment_id, actor_id, EnrollmentStatus::Dropped, None)
            .await?;
        tracing::info!(
            enrollment_id,
            actor_id,
            promoted = outcome.promoted.len(),
            "enrollment dropped"
        );
        Ok(outcome)
    }

    async fn withdraw(
        &self,
        enrollment_id: &str,
        actor_id: &str,
        target: EnrollmentStatus,
        reason: Option<&str>,
    ) -> Result<CancelOutcome, EnrollmentError> {
        self.with_retry("withdraw", || async {
            let mut tx = self.store.begin().await?;
            let result = workflow::withdraw(
                tx.as_mut(),
                enrollment_id,
                actor_id,
                target,
                reason,
            )
            .await;
            finish(tx, result).await
        })
        .await
    }

    /// Attach a captured payment to an enrolled seat.
    pub async fn record_payment(
        &self,
        enrollment_id: &str,
        order_id: &str,
        actor_id: &str,
    ) -> Result<Enrollment, EnrollmentError> {
        self.with_retry("record_payment", || async {
            let mut tx = self.store.begin().await?;
            let result =
                workflow::record_payment(tx.as_mut(), enrollment_id, order_id, actor_id).await;
            finish(tx, result).await
        })
        .await
    }

    pub async fn review_refund(
        &self,
        refund_id: &str,
        action: RefundAction,
        actor_id: &str,
    ) -> Result<Refund, EnrollmentError> {
        let refund = self
            .with_retry("review_refund", || async {
                let mut tx = self.store.begin().await?;
                let result =
                    workflow::review_refund(tx.as_mut(), refund_id, action, actor_id).await;
                finish(tx, result).await
            })
            .await?;
        tracing::info!(refund_id, actor_id, status = %refund.status, "refund reviewed");
        Ok(refund)
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut attempt: F) -> Result<T, EnrollmentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, EnrollmentError>>,
    {
        let mut retries = 0;
        loop {
            match attempt().await {
                Err(err) if err.is_retryable() && retries < self.retry.max_retries => {
                    retries += 1;
                    tracing::debug!(op, retries, "transaction busy, retrying");
                    tokio::time::sleep(self.retry.backoff * retries).await;
                }
                Err(err) if err.is_retryable() => {
                    tracing::warn!(op, attempts = retries + 1, "transaction busy, giving up");
                    return Err(err);
                }
                other => return other,
            }
        }
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(
    tx: Box<dyn StoreTx>,
    result: Result<T, EnrollmentError>,
) -> Result<T, EnrollmentError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(?rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
