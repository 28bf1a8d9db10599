//! Transaction bodies. Each function runs on a single open [`StoreTx`] and
//! leaves commit/rollback to the caller.

use chrono::{DateTime, Utc};
use diveshop_common::id::{prefix, prefixed_ulid};
use serde_json::json;

use super::error::EnrollmentError;
use super::{CancelOutcome, EnrollmentResult, RefundAction};
use crate::models::audit_log::NewAuditLog;
use crate::models::course::CourseSession;
use crate::models::enrollment::{Enrollment, NewEnrollment};
use crate::models::refund::{NewRefund, Refund};
use crate::models::status::{EnrollmentStatus, OrderStatus, RefundStatus};
use crate::models::user::User;
use crate::store::{StoreError, StoreTx};

pub(super) async fn enroll(
    tx: &mut dyn StoreTx,
    expected_course_id: Option<&str>,
    session_id: &str,
    user_id: &str,
) -> Result<EnrollmentResult, EnrollmentError> {
    let user = tx
        .find_user(user_id)
        .await?
        .ok_or_else(|| EnrollmentError::Forbidden("Unknown user".to_string()))?;
    require_active(&user)?;

    // Everything below runs under the session row lock.
    let session = tx
        .lock_session(session_id)
        .await?
        .filter(|s| s.is_active)
        .filter(|s| expected_course_id.map_or(true, |id| s.course_id == id))
        .ok_or_else(|| EnrollmentError::NotFound("Course session not found".to_string()))?;
    let now = Utc::now();

    let course_active = tx
        .find_course(&session.course_id)
        .await?
        .is_some_and(|c| c.is_active);
    if !course_active {
        return Err(EnrollmentError::NotFound("Course not found".to_string()));
    }

    if let Some(existing) = tx.find_active_enrollment(session_id, user_id).await? {
        let message = match existing.status {
            EnrollmentStatus::Waitlist => "You are already on the waitlist for this session",
            EnrollmentStatus::Dropped => "You were dropped from this session",
            _ => "You are already enrolled in this session",
        };
        return Err(EnrollmentError::Conflict(message.to_string()));
    }

    let enrolled_count = tx.count_enrolled(session_id).await?;
    let status = if session.has_room(enrolled_count) {
        EnrollmentStatus::Enrolled
    } else {
        EnrollmentStatus::Waitlist
    };

    let enrollment_id = prefixed_ulid(prefix::ENROLLMENT);
    let enrollment = tx
        .insert_enrollment(NewEnrollment {
            id: &enrollment_id,
            session_id,
            user_id,
            status,
            created_at: now,
            updated_at: now,
        })
        .await?;

    let waitlist_position = match status {
        EnrollmentStatus::Waitlist => Some(tx.waitlist_position(&enrollment).await?),
        _ => None,
    };

    audit(
        tx,
        user_id,
        "enrollment.create",
        "enrollment",
        &enrollment.id,
        json!({
            "session_id": session_id,
            "status": status,
            "enrolled_count": enrolled_count,
            "capacity": session.capacity,
            "waitlist_position": waitlist_position,
        }),
        now,
    )
    .await?;

    Ok(EnrollmentResult {
        enrollment,
        waitlist_position,
    })
}

/// Move an enrollment to `cancelled` (owner or admin) or `dropped` (admin),
/// then hand freed seats to the waitlist.
pub(super) async fn withdraw(
    tx: &mut dyn StoreTx,
    enrollment_id: &str,
    actor_id: &str,
    target: EnrollmentStatus,
    reason: Option<&str>,
) -> Result<CancelOutcome, EnrollmentError> {
    let actor = load_actor(tx, actor_id).await?;

    let found = find_enrollment(tx, enrollment_id).await?;
    let allowed = match target {
        EnrollmentStatus::Dropped => actor.is_admin(),
        _ => actor.is_admin() || found.user_id == actor.id,
    };
    if !allowed {
        return Err(EnrollmentError::Forbidden(
            "You cannot change this enrollment".to_string(),
        ));
    }

    let session = tx
        .lock_session(&found.session_id)
        .await?
        .ok_or_else(|| EnrollmentError::NotFound("Course session not found".to_string()))?;
    let now = Utc::now();

    // Re-read under the session lock; the first read may be stale.
    let current = find_enrollment(tx, enrollment_id).await?;
    ensure_transition(current.status, target)?;

    let updated = tx.update_enrollment_status(&current.id, target, now).await?;
    let action = match target {
        EnrollmentStatus::Dropped => "enrollment.drop",
        _ => "enrollment.cancel",
    };
    audit(
        tx,
        actor_id,
        action,
        "enrollment",
        &updated.id,
        json!({ "from": current.status, "to": target, "reason": reason }),
        now,
    )
    .await?;

    let was_enrolled = current.status == EnrollmentStatus::Enrolled;

    let refund = match (target, was_enrolled, current.paid_amount_cents) {
        (EnrollmentStatus::Cancelled, true, Some(amount)) => {
            Some(open_refund(tx, &current, &session, amount, reason, actor_id, now).await?)
        }
        _ => None,
    };

    let promoted = if was_enrolled {
        promote_waitlist(tx, &session, actor_id, now).await?
    } else {
        Vec::new()
    };

    Ok(CancelOutcome {
        enrollment: updated,
        refund,
        promoted,
    })
}

pub(super) async fn record_payment(
    tx: &mut dyn StoreTx,
    enrollment_id: &str,
    order_id: &str,
    actor_id: &str,
) -> Result<Enrollment, EnrollmentError> {
    require_admin(&load_actor(tx, actor_id).await?)?;

    let found = find_enrollment(tx, enrollment_id).await?;
    tx.lock_session(&found.session_id).await?;
    let now = Utc::now();
    let current = find_enrollment(tx, enrollment_id).await?;

    if current.status != EnrollmentStatus::Enrolled {
        return Err(EnrollmentError::Conflict(format!(
            "Only enrolled students can pay; enrollment is {}",
            current.status
        )));
    }
    if current.paid_amount_cents.is_some() {
        return Err(EnrollmentError::Conflict(
            "Payment already recorded for this enrollment".to_string(),
        ));
    }

    // Locked so two sessions cannot claim the same order concurrently.
    let order = tx
        .lock_order(order_id)
        .await?
        .ok_or_else(|| EnrollmentError::NotFound("Order not found".to_string()))?;
    if order.user_id != current.user_id {
        return Err(EnrollmentError::Validation(
            "Order belongs to a different user".to_string(),
        ));
    }
    if order.status != OrderStatus::Paid {
        return Err(EnrollmentError::Conflict(format!(
            "Order is {}, expected paid",
            order.status
        )));
    }
    if let Some(other) = tx.find_enrollment_by_order(&order.id).await? {
        return Err(EnrollmentError::Conflict(format!(
            "Order already pays for enrollment {}",
            other.id
        )));
    }

    let updated = tx
        .set_enrollment_payment(&current.id, &order.id, order.total_cents, now)
        .await?;

    audit(
        tx,
        actor_id,
        "enrollment.payment",
        "enrollment",
        &updated.id,
        json!({ "order_id": order.id, "paid_amount_cents": order.total_cents }),
        now,
    )
    .await?;

    Ok(updated)
}

pub(super) async fn review_refund(
    tx: &mut dyn StoreTx,
    refund_id: &str,
    action: RefundAction,
    actor_id: &str,
) -> Result<Refund, EnrollmentError> {
    require_admin(&load_actor(tx, actor_id).await?)?;

    let refund = tx
        .lock_refund(refund_id)
        .await?
        .ok_or_else(|| EnrollmentError::NotFound("Refund not found".to_string()))?;
    let now = Utc::now();

    let target = action.target_status();
    if !refund.status.can_transition_to(target) {
        return Err(EnrollmentError::Conflict(format!(
            "Cannot move a {} refund to {}",
            refund.status, target
        )));
    }

    let processed_at = target.is_final().then_some(now);
    let updated = tx
        .update_refund_status(&refund.id, target, processed_at)
        .await?;

    if target == RefundStatus::Processed {
        mark_order_refunded(tx, &refund, now).await?;
    }

    audit(
        tx,
        actor_id,
        action.audit_action(),
        "refund",
        &updated.id,
        json!({ "from": refund.status, "to": target }),
        now,
    )
    .await?;

    Ok(updated)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Fill free seats from the waitlist, oldest request first.
async fn promote_waitlist(
    tx: &mut dyn StoreTx,
    session: &CourseSession,
    actor_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Enrollment>, EnrollmentError> {
    let mut promoted = Vec::new();

    loop {
        let enrolled_count = tx.count_enrolled(&session.id).await?;
        if !session.has_room(enrolled_count) {
            break;
        }
        let Some(next) = tx.next_waitlisted(&session.id).await? else {
            break;
        };
        ensure_transition(next.status, EnrollmentStatus::Enrolled)?;

        let row = tx
            .update_enrollment_status(&next.id, EnrollmentStatus::Enrolled, now)
            .await?;
        audit(
            tx,
            actor_id,
            "enrollment.promote",
            "enrollment",
            &row.id,
            json!({ "from": next.status, "to": row.status, "session_id": session.id }),
            now,
        )
        .await?;

        tracing::info!(enrollment_id = %row.id, session_id = %session.id, "waitlist promotion");
        promoted.push(row);
    }

    Ok(promoted)
}

async fn open_refund(
    tx: &mut dyn StoreTx,
    enrollment: &Enrollment,
    session: &CourseSession,
    amount_cents: i64,
    reason: Option<&str>,
    actor_id: &str,
    now: DateTime<Utc>,
) -> Result<Refund, EnrollmentError> {
    let refund_id = prefixed_ulid(prefix::REFUND);
    let refund = tx
        .insert_refund(NewRefund {
            id: &refund_id,
            user_id: &enrollment.user_id,
            enrollment_id: &enrollment.id,
            course_id: &session.course_id,
            amount_cents,
            reason,
            status: RefundStatus::Pending,
            created_at: now,
        })
        .await?;

    audit(
        tx,
        actor_id,
        "refund.create",
        "refund",
        &refund.id,
        json!({ "enrollment_id": enrollment.id, "amount_cents": amount_cents }),
        now,
    )
    .await?;

    Ok(refund)
}

async fn mark_order_refunded(
    tx: &mut dyn StoreTx,
    refund: &Refund,
    now: DateTime<Utc>,
) -> Result<(), EnrollmentError> {
    let Some(enrollment) = tx.find_enrollment(&refund.enrollment_id).await? else {
        return Ok(());
    };
    let Some(order_id) = enrollment.order_id else {
        return Ok(());
    };
    let Some(order) = tx.find_order(&order_id).await? else {
        return Ok(());
    };

    if order.status.can_transition_to(OrderStatus::Refunded) {
        tx.update_order_status(&order.id, OrderStatus::Refunded, now)
            .await?;
    } else {
        tracing::warn!(order_id = %order.id, status = %order.status, "order not refundable, left unchanged");
    }
    Ok(())
}

async fn load_actor(tx: &mut dyn StoreTx, actor_id: &str) -> Result<User, EnrollmentError> {
    let actor = tx
        .find_user(actor_id)
        .await?
        .ok_or_else(|| EnrollmentError::Forbidden("Unknown user".to_string()))?;
    require_active(&actor)?;
    Ok(actor)
}

async fn find_enrollment(
    tx: &mut dyn StoreTx,
    enrollment_id: &str,
) -> Result<Enrollment, EnrollmentError> {
    tx.find_enrollment(enrollment_id)
        .await?
        .ok_or_else(|| EnrollmentError::NotFound("Enrollment not found".to_string()))
}

fn require_active(user: &User) -> Result<(), EnrollmentError> {
    if user.is_active() {
        Ok(())
    } else {
        Err(EnrollmentError::Forbidden(format!(
            "Account is {}",
            user.status
        )))
    }
}

fn require_admin(user: &User) -> Result<(), EnrollmentError> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(EnrollmentError::Forbidden(
            "Administrator access required".to_string(),
        ))
    }
}

fn ensure_transition(from: EnrollmentStatus, to: EnrollmentStatus) -> Result<(), EnrollmentError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(EnrollmentError::Conflict(format!(
            "Cannot move a {from} enrollment to {to}"
        )))
    }
}

async fn audit(
    tx: &mut dyn StoreTx,
    actor_id: &str,
    action: &str,
    entity: &str,
    entity_id: &str,
    changes: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let id = prefixed_ulid(prefix::AUDIT);
    tx.insert_audit_log(NewAuditLog {
        id: &id,
        actor_id,
        action,
        entity,
        entity_id,
        changes: Some(changes),
        created_at: now,
    })
    .await
}
