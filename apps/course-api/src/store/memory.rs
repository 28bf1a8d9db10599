use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    RefundScope, Store, StoreError, StoreTx, ACTIVE_ENROLLMENT_INDEX, ORDER_ENROLLMENT_INDEX,
};
use crate::models::audit_log::{AuditLogEntry, AuditLogQuery, NewAuditLog};
use crate::models::course::{Course, CourseSession, SessionSummary};
use crate::models::enrollment::{Enrollment, NewEnrollment};
use crate::models::order::Order;
use crate::models::refund::{NewRefund, Refund};
use crate::models::status::{EnrollmentStatus, OrderStatus, RefundStatus};
use crate::models::user::User;

// ---------------------------------------------------------------------------
// In-memory implementation (for tests and local runs)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct MemoryState {
    users: HashMap<String, User>,
    courses: HashMap<String, Course>,
    sessions: HashMap<String, CourseSession>,
    orders: HashMap<String, Order>,
    // Kept in insertion order.
    enrollments: Vec<Enrollment>,
    refunds: Vec<Refund>,
    audit_logs: Vec<AuditLogEntry>,
}

impl MemoryState {
    fn enrollment_mut(&mut self, enrollment_id: &str) -> Result<&mut Enrollment, StoreError> {
        self.enrollments
            .iter_mut()
            .find(|e| e.id == enrollment_id)
            .ok_or_else(|| StoreError::RowNotFound(format!("enrollment {enrollment_id}")))
    }

    fn waitlist(&self, session_id: &str) -> Vec<&Enrollment> {
        let mut queue: Vec<&Enrollment> = self
            .enrollments
            .iter()
            .filter(|e| e.session_id == session_id && e.status == EnrollmentStatus::Waitlist)
            .collect();
        queue.sort_by(|a, b| a.queue_key().cmp(&b.queue_key()));
        queue
    }

    fn enrolled_count(&self, session_id: &str) -> i64 {
        self.enrollments
            .iter()
            .filter(|e| e.session_id == session_id && e.status == EnrollmentStatus::Enrolled)
            .count() as i64
    }
}

/// Store backed by process memory.
///
/// Reads see the last committed snapshot and never wait. Transactions are
/// serialized by a single writer lock; each one works on a private copy that
/// replaces the snapshot on commit.
#[derive(Clone)]
pub struct MemoryStore {
    committed: Arc<RwLock<Arc<MemoryState>>>,
    writer: Arc<Mutex<()>>,
    lock_timeout: Duration,
}

impl MemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            committed: Arc::new(RwLock::new(Arc::new(MemoryState::default()))),
            writer: Arc::new(Mutex::new(())),
            lock_timeout,
        }
    }

    fn snapshot(&self) -> Arc<MemoryState> {
        self.committed.read().clone()
    }

    fn seed(&self, f: impl FnOnce(&mut MemoryState)) {
        let mut guard = self.committed.write();
        f(Arc::make_mut(&mut guard));
    }

    pub fn add_user(&self, user: User) {
        self.seed(|state| {
            state.users.insert(user.id.clone(), user);
        });
    }

    pub fn add_course(&self, course: Course) {
        self.seed(|state| {
            state.courses.insert(course.id.clone(), course);
        });
    }

    pub fn add_session(&self, session: CourseSession) {
        self.seed(|state| {
            state.sessions.insert(session.id.clone(), session);
        });
    }

    pub fn add_order(&self, order: Order) {
        self.seed(|state| {
            state.orders.insert(order.id.clone(), order);
        });
    }

    /// Committed enrollments in insertion order.
    pub fn enrollments(&self) -> Vec<Enrollment> {
        self.snapshot().enrollments.clone()
    }

    pub fn refunds(&self) -> Vec<Refund> {
        self.snapshot().refunds.clone()
    }

    pub fn orders(&self) -> Vec<Order> {
        self.snapshot().orders.values().cloned().collect()
    }

    pub fn audit_logs(&self) -> Vec<AuditLogEntry> {
        self.snapshot().audit_logs.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = tokio::time::timeout(self.lock_timeout, self.writer.clone().lock_owned())
            .await
            .map_err(|_| StoreError::LockTimeout)?;

        // Copy after taking the writer lock so no commit can slip in between.
        let working = (*self.snapshot()).clone();

        Ok(Box::new(MemoryTx {
            committed: self.committed.clone(),
            working,
            _guard: guard,
        }))
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.snapshot().users.get(user_id).cloned())
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        let state = self.snapshot();
        let mut courses: Vec<Course> = state
            .courses
            .values()
            .filter(|c| c.is_active)
            .cloned()
            .collect();
        courses.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(courses)
    }

    async fn find_course(&self, course_id: &str) -> Result<Option<Course>, StoreError> {
        Ok(self.snapshot().courses.get(course_id).cloned())
    }

    async fn list_session_summaries(
        &self,
        course_id: &str,
    ) -> Result<Vec<SessionSummary>, StoreError> {
        let state = self.snapshot();
        let mut sessions: Vec<&CourseSession> = state
            .sessions
            .values()
            .filter(|s| s.course_id == course_id && s.is_active)
            .collect();
        sessions.sort_by(|a, b| a.start_at.cmp(&b.start_at).then_with(|| a.id.cmp(&b.id)));

        Ok(sessions
            .into_iter()
            .map(|s| SessionSummary {
                id: s.id.clone(),
                start_at: s.start_at,
                capacity: s.capacity,
                enrolled_count: state.enrolled_count(&s.id),
                instructor_name: s
                    .instructor_id
                    .as_ref()
                    .and_then(|id| state.users.get(id))
                    .map(|u| u.display_name.clone()),
            })
            .collect())
    }

    async fn list_user_enrollments(&self, user_id: &str) -> Result<Vec<Enrollment>, StoreError> {
        let state = self.snapshot();
        let mut list: Vec<Enrollment> = state
            .enrollments
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        list.reverse();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn list_refunds(&self, scope: RefundScope) -> Result<Vec<Refund>, StoreError> {
        let state = self.snapshot();
        let mut list: Vec<Refund> = state
            .refunds
            .iter()
            .filter(|r| match &scope {
                RefundScope::User(user_id) => &r.user_id == user_id,
                RefundScope::All => true,
            })
            .cloned()
            .collect();
        list.reverse();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn list_audit_logs(
        &self,
        query: &AuditLogQuery,
    ) -> Result<Vec<AuditLogEntry>, StoreError> {
        let state = self.snapshot();
        let mut rows: Vec<AuditLogEntry> = state
            .audit_logs
            .iter()
            .filter(|a| query.actor_id.as_ref().map_or(true, |v| &a.actor_id == v))
            .filter(|a| query.entity.as_ref().map_or(true, |v| &a.entity == v))
            .filter(|a| query.entity_id.as_ref().map_or(true, |v| &a.entity_id == v))
            .filter(|a| query.before.as_ref().map_or(true, |v| a.id.as_str() < v.as_str()))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.id.cmp(&a.id));
        rows.truncate(query.limit.max(0) as usize);
        Ok(rows)
    }
}

struct MemoryTx {
    committed: Arc<RwLock<Arc<MemoryState>>>,
    working: MemoryState,
    _guard: OwnedMutexGuard<()>,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn find_user(&mut self, user_id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.working.users.get(user_id).cloned())
    }

    async fn find_course(&mut self, course_id: &str) -> Result<Option<Course>, StoreError> {
        Ok(self.working.courses.get(course_id).cloned())
    }

    async fn lock_session(
        &mut self,
        session_id: &str,
    ) -> Result<Option<CourseSession>, StoreError> {
        // The writer lock already excludes every other transaction.
        Ok(self.working.sessions.get(session_id).cloned())
    }

    async fn count_enrolled(&mut self, session_id: &str) -> Result<i64, StoreError> {
        Ok(self.working.enrolled_count(session_id))
    }

    async fn find_active_enrollment(
        &mut self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(self
            .working
            .enrollments
            .iter()
            .find(|e| {
                e.session_id == session_id && e.user_id == user_id && e.status.occupies_place()
            })
            .cloned())
    }

    async fn find_enrollment(
        &mut self,
        enrollment_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(self
            .working
            .enrollments
            .iter()
            .find(|e| e.id == enrollment_id)
            .cloned())
    }

    async fn insert_enrollment(
        &mut self,
        new: NewEnrollment<'_>,
    ) -> Result<Enrollment, StoreError> {
        let duplicate = self.working.enrollments.iter().any(|e| {
            e.id == new.id
                || (e.session_id == new.session_id
                    && e.user_id == new.user_id
                    && e.status.occupies_place()
                    && new.status.occupies_place())
        });
        if duplicate {
            return Err(StoreError::UniqueViolation(
                ACTIVE_ENROLLMENT_INDEX.to_string(),
            ));
        }

        let enrollment = Enrollment {
            id: new.id.to_string(),
            session_id: new.session_id.to_string(),
            user_id: new.user_id.to_string(),
            order_id: None,
            paid_amount_cents: None,
            status: new.status,
            created_at: new.created_at,
            updated_at: new.updated_at,
        };
        self.working.enrollments.push(enrollment.clone());
        Ok(enrollment)
    }

    async fn update_enrollment_status(
        &mut self,
        enrollment_id: &str,
        status: EnrollmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Enrollment, StoreError> {
        let row = self.working.enrollment_mut(enrollment_id)?;
        row.status = status;
        row.updated_at = at;
        Ok(row.clone())
    }

    async fn set_enrollment_payment(
        &mut self,
        enrollment_id: &str,
        order_id: &str,
        paid_amount_cents: i64,
        at: DateTime<Utc>,
    ) -> Result<Enrollment, StoreError> {
        let taken = self
            .working
            .enrollments
            .iter()
            .any(|e| e.id != enrollment_id && e.order_id.as_deref() == Some(order_id));
        if taken {
            return Err(StoreError::UniqueViolation(
                ORDER_ENROLLMENT_INDEX.to_string(),
            ));
        }

        let row = self.working.enrollment_mut(enrollment_id)?;
        row.order_id = Some(order_id.to_string());
        row.paid_amount_cents = Some(paid_amount_cents);
        row.updated_at = at;
        Ok(row.clone())
    }

    async fn waitlist_position(&mut self, enrollment: &Enrollment) -> Result<i64, StoreError> {
        let key = enrollment.queue_key();
        Ok(self
            .working
            .waitlist(&enrollment.session_id)
            .into_iter()
            .filter(|e| e.queue_key() <= key)
            .count() as i64)
    }

    async fn next_waitlisted(
        &mut self,
        session_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(self.working.waitlist(session_id).first().map(|e| (*e).clone()))
    }

    async fn find_order(&mut self, order_id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.working.orders.get(order_id).cloned())
    }

    async fn lock_order(&mut self, order_id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.working.orders.get(order_id).cloned())
    }

    async fn find_enrollment_by_order(
        &mut self,
        order_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        Ok(self
            .working
            .enrollments
            .iter()
            .find(|e| e.order_id.as_deref() == Some(order_id))
            .cloned())
    }

    async fn update_order_status(
        &mut self,
        order_id: &str,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError> {
        let order = self
            .working
            .orders
            .get_mut(order_id)
            .ok_or_else(|| StoreError::RowNotFound(format!("order {order_id}")))?;
        order.status = status;
        order.updated_at = at;
        Ok(order.clone())
    }

    async fn insert_refund(&mut self, new: NewRefund<'_>) -> Result<Refund, StoreError> {
        let refund = Refund {
            id: new.id.to_string(),
            user_id: new.user_id.to_string(),
            enrollment_id: new.enrollment_id.to_string(),
            course_id: new.course_id.to_string(),
            amount_cents: new.amount_cents,
            reason: new.reason.map(str::to_string),
            status: new.status,
            created_at: new.created_at,
            processed_at: None,
        };
        self.working.refunds.push(refund.clone());
        Ok(refund)
    }

    async fn lock_refund(&mut self, refund_id: &str) -> Result<Option<Refund>, StoreError> {
        Ok(self
            .working
            .refunds
            .iter()
            .find(|r| r.id == refund_id)
            .cloned())
    }

    async fn update_refund_status(
        &mut self,
        refund_id: &str,
        status: RefundStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<Refund, StoreError> {
        let refund = self
            .working
            .refunds
            .iter_mut()
            .find(|r| r.id == refund_id)
            .ok_or_else(|| StoreError::RowNotFound(format!("refund {refund_id}")))?;
        refund.status = status;
        if processed_at.is_some() {
            refund.processed_at = processed_at;
        }
        Ok(refund.clone())
    }

    async fn insert_audit_log(&mut self, entry: NewAuditLog<'_>) -> Result<(), StoreError> {
        self.working.audit_logs.push(AuditLogEntry {
            id: entry.id.to_string(),
            actor_id: entry.actor_id.to_string(),
            action: entry.action.to_string(),
            entity: entry.entity.to_string(),
            entity_id: entry.entity_id.to_string(),
            changes: entry.changes,
            created_at: entry.created_at,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx {
            committed,
            working,
            _guard,
        } = *self;
        *committed.write() = Arc::new(working);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::status::{UserRole, UserStatus};

    fn user(id: &str) -> User {
        User {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            display_name: id.to_string(),
            role: UserRole::Customer,
            status: UserStatus::Active,
            created_at: Utc::now(),
        }
    }

    fn new_enrollment<'a>(id: &'a str, user_id: &'a str) -> NewEnrollment<'a> {
        let now = Utc::now();
        NewEnrollment {
            id,
            session_id: "cses_1",
            user_id,
            status: EnrollmentStatus::Waitlist,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let store = MemoryStore::new(Duration::from_millis(100));
        let mut tx = store.begin().await.unwrap();
        tx.insert_enrollment(new_enrollment("enr_1", "usr_a"))
            .await
            .unwrap();
        assert!(store.enrollments().is_empty());

        tx.rollback().await.unwrap();
        assert!(store.enrollments().is_empty());
    }

    #[tokio::test]
    async fn commit_publishes_writes() {
        let store = MemoryStore::new(Duration::from_millis(100));
        let mut tx = store.begin().await.unwrap();
        tx.insert_enrollment(new_enrollment("enr_1", "usr_a"))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.enrollments().len(), 1);
    }

    #[tokio::test]
    async fn second_transaction_times_out_while_first_is_open() {
        let store = MemoryStore::new(Duration::from_millis(50));
        let _held = store.begin().await.unwrap();

        match store.begin().await {
            Err(err) => {
                assert!(matches!(err, StoreError::LockTimeout));
                assert!(err.is_retryable());
            }
            Ok(_) => panic!("expected lock timeout"),
        }
    }

    #[tokio::test]
    async fn reads_do_not_wait_for_open_transactions() {
        let store = MemoryStore::new(Duration::from_millis(50));
        store.add_user(user("usr_a"));
        let _held = store.begin().await.unwrap();

        let found = store.find_user("usr_a").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn duplicate_live_enrollment_is_rejected() {
        let store = MemoryStore::new(Duration::from_millis(100));
        let mut tx = store.begin().await.unwrap();
        tx.insert_enrollment(new_enrollment("enr_1", "usr_a"))
            .await
            .unwrap();
        let err = tx
            .insert_enrollment(new_enrollment("enr_2", "usr_a"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(_)));
    }

    #[tokio::test]
    async fn order_pays_for_one_enrollment_only() {
        let store = MemoryStore::new(Duration::from_millis(100));
        let mut tx = store.begin().await.unwrap();
        tx.insert_enrollment(new_enrollment("enr_1", "usr_a"))
            .await
            .unwrap();
        tx.insert_enrollment(new_enrollment("enr_2", "usr_b"))
            .await
            .unwrap();
        tx.set_enrollment_payment("enr_1", "ord_1", 100, Utc::now())
            .await
            .unwrap();

        let err = tx
            .set_enrollment_payment("enr_2", "ord_1", 100, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation(index) if index == ORDER_ENROLLMENT_INDEX));
        let found = tx.find_enrollment_by_order("ord_1").await.unwrap().unwrap();
        assert_eq!(found.id, "enr_1");
    }

    #[tokio::test]
    async fn waitlist_position_follows_request_order() {
        let store = MemoryStore::new(Duration::from_millis(100));
        let mut tx = store.begin().await.unwrap();
        let first = tx
            .insert_enrollment(new_enrollment("enr_1", "usr_a"))
            .await
            .unwrap();
        let second = tx
            .insert_enrollment(new_enrollment("enr_2", "usr_b"))
            .await
            .unwrap();

        assert_eq!(tx.waitlist_position(&first).await.unwrap(), 1);
        assert_eq!(tx.waitlist_position(&second).await.unwrap(), 2);
        let next = tx.next_waitlisted("cses_1").await.unwrap().unwrap();
        assert_eq!(next.id, "enr_1");
    }
}
