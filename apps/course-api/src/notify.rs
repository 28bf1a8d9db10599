//! Outbound notifications. Delivery belongs to the notification service; this
//! crate only reports events that already committed.

use async_trait::async_trait;

use crate::models::enrollment::Enrollment;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// A waitlisted student now holds a seat.
    async fn waitlist_promoted(&self, enrollment: &Enrollment);
}

/// Default notifier: writes one structured log line per event.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn waitlist_promoted(&self, enrollment: &Enrollment) {
        tracing::info!(
            enrollment_id = %enrollment.id,
            user_id = %enrollment.user_id,
            session_id = %enrollment.session_id,
            "notify: waitlist promotion"
        );
    }
}
