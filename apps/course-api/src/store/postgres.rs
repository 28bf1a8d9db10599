//! PostgreSQL store on diesel-async.
//!
//! Each [`PgTx`] owns one pooled connection with an open transaction.
//! `lock_session` takes a `FOR UPDATE` row lock on the session, which is what
//! serializes concurrent enroll and cancel calls against the same session.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, OptionalExtension};
use diesel_async::pooled_connection::deadpool::{Object, PoolError};
use diesel_async::{AnsiTransactionManager, AsyncPgConnection, TransactionManager};

use super::{RefundScope, Store, StoreError, StoreTx};
use crate::db::pool::DbPool;
use crate::db::schema::{audit_logs, course_sessions, courses, enrollments, orders, refunds, users};
use crate::models::audit_log::{AuditLogEntry, AuditLogQuery, NewAuditLog};
use crate::models::course::{Course, CourseSession, SessionSummary};
use crate::models::enrollment::{Enrollment, NewEnrollment};
use crate::models::order::Order;
use crate::models::refund::{NewRefund, Refund};
use crate::models::status::{EnrollmentStatus, OrderStatus, RefundStatus};
use crate::models::user::User;

type PgTransactionManager = AnsiTransactionManager;

impl From<diesel::result::Error> for StoreError {
    fn from(err: diesel::result::Error) -> Self {
        use diesel::result::Error;

        match err {
            Error::NotFound => StoreError::RowNotFound("query returned no rows".to_string()),
            Error::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => {
                StoreError::SerializationFailure
            }
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::UniqueViolation(info.constraint_name().unwrap_or("unknown").to_string())
            }
            // SQLSTATE 55P03 has no dedicated diesel kind.
            Error::DatabaseError(_, info) if info.message().contains("lock timeout") => {
                StoreError::LockTimeout
            }
            other => {
                tracing::error!(err = ?other, "database error");
                StoreError::Database(other.to_string())
            }
        }
    }
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        tracing::error!(?err, "pool error");
        StoreError::Pool(err.to_string())
    }
}

pub struct PgStore {
    pool: DbPool,
    lock_timeout: Duration,
    checkout_timeout: Duration,
}

impl PgStore {
    pub fn new(pool: DbPool, lock_timeout: Duration, checkout_timeout: Duration) -> Self {
        Self {
            pool,
            lock_timeout,
            checkout_timeout,
        }
    }

    /// Take a pooled connection, waiting at most `checkout_timeout`.
    async fn checkout(&self) -> Result<Object<AsyncPgConnection>, StoreError> {
        match tokio::time::timeout(self.checkout_timeout, self.pool.get()).await {
            Ok(conn) => Ok(conn?),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.checkout_timeout.as_millis() as u64,
                    "connection pool exhausted"
                );
                Err(StoreError::Pool(
                    "timed out waiting for a database connection".to_string(),
                ))
            }
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let mut conn = self.checkout().await?;

        <PgTransactionManager as TransactionManager<AsyncPgConnection>>::begin_transaction(
            &mut *conn,
        )
        .await?;

        let set_timeout = diesel::sql_query(format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ));
        if let Err(err) = diesel_async::RunQueryDsl::execute(set_timeout, &mut conn).await {
            if let Err(rollback_err) =
                <PgTransactionManager as TransactionManager<AsyncPgConnection>>::rollback_transaction(
                    &mut *conn,
                )
                .await
            {
                tracing::error!(?rollback_err, "rollback after failed begin");
            }
            return Err(err.into());
        }

        Ok(Box::new(PgTx { conn: Some(conn) }))
    }

    async fn find_user(&self, user_id: &str) -> Result<Option<User>, StoreError> {
        let mut conn = self.checkout().await?;
        let user = diesel_async::RunQueryDsl::get_result(
            users::table.find(user_id).select(User::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(user)
    }

    async fn list_courses(&self) -> Result<Vec<Course>, StoreError> {
        let mut conn = self.checkout().await?;
        let list = diesel_async::RunQueryDsl::load(
            courses::table
                .filter(courses::is_active.eq(true))
                .order((courses::title.asc(), courses::id.asc()))
                .select(Course::as_select()),
            &mut conn,
        )
        .await?;
        Ok(list)
    }

    async fn find_course(&self, course_id: &str) -> Result<Option<Course>, StoreError> {
        let mut conn = self.checkout().await?;
        let course = diesel_async::RunQueryDsl::get_result(
            courses::table.find(course_id).select(Course::as_select()),
            &mut conn,
        )
        .await
        .optional()?;
        Ok(course)
    }

    async fn list_session_summaries(
        &self,
        course_id: &str,
    ) -> Result<Vec<SessionSummary>, StoreError> {
        let mut conn = self.checkout().await?;

        let sessions: Vec<(CourseSession, Option<String>)> = diesel_async::RunQueryDsl::load(
            course_sessions::table
                .left_join(users::table)
                .filter(course_sessions::course_id.eq(course_id))
                .filter(course_sessions::is_active.eq(true))
                .order((course_sessions::start_at.asc(), course_sessions::id.asc()))
                .select((CourseSession::as_select(), users::display_name.nullable())),
            &mut conn,
        )
        .await?;

        if sessions.is_empty() {
            return Ok(Vec::new());
        }

        // Counted live on every read; there is no cached counter to drift.
        let ids: Vec<String> = sessions.iter().map(|(s, _)| s.id.clone()).collect();
        let counts: Vec<(String, i64)> = diesel_async::RunQueryDsl::load(
            enrollments::table
                .filter(enrollments::session_id.eq_any(ids))
                .filter(enrollments::status.eq(EnrollmentStatus::Enrolled))
                .group_by(enrollments::session_id)
                .select((enrollments::session_id, diesel::dsl::count_star())),
            &mut conn,
        )
        .await?;

        Ok(sessions
            .into_iter()
            .map(|(session, instructor_name)| {
                let enrolled_count = counts
                    .iter()
                    .find(|(id, _)| *id == session.id)
                    .map_or(0, |(_, count)| *count);
                SessionSummary {
                    id: session.id,
                    start_at: session.start_at,
                    capacity: session.capacity,
                    enrolled_count,
                    instructor_name,
                }
            })
            .collect())
    }

    async fn list_user_enrollments(&self, user_id: &str) -> Result<Vec<Enrollment>, StoreError> {
        let mut conn = self.checkout().await?;
        let list = diesel_async::RunQueryDsl::load(
            enrollments::table
                .filter(enrollments::user_id.eq(user_id))
                .order((enrollments::created_at.desc(), enrollments::id.desc()))
                .select(Enrollment::as_select()),
            &mut conn,
        )
        .await?;
        Ok(list)
    }

    async fn list_refunds(&self, scope: RefundScope) -> Result<Vec<Refund>, StoreError> {
        let mut conn = self.checkout().await?;

        let mut query = refunds::table
            .order((refunds::created_at.desc(), refunds::id.desc()))
            .select(Refund::as_select())
            .into_boxed();

        if let RefundScope::User(user_id) = scope {
            query = query.filter(refunds::user_id.eq(user_id));
        }

        let list = diesel_async::RunQueryDsl::load(query, &mut conn).await?;
        Ok(list)
    }

    async fn list_audit_logs(
        &self,
        params: &AuditLogQuery,
    ) -> Result<Vec<AuditLogEntry>, StoreError> {
        let mut conn = self.checkout().await?;

        let mut query = audit_logs::table
            .order(audit_logs::id.desc())
            .limit(params.limit)
            .select(AuditLogEntry::as_select())
            .into_boxed();

        if let Some(ref actor_id) = params.actor_id {
            query = query.filter(audit_logs::actor_id.eq(actor_id));
        }

        if let Some(ref entity) = params.entity {
            query = query.filter(audit_logs::entity.eq(entity));
        }

        if let Some(ref entity_id) = params.entity_id {
            query = query.filter(audit_logs::entity_id.eq(entity_id));
        }

        if let Some(ref before) = params.before {
            query = query.filter(audit_logs::id.lt(before));
        }

        let rows = diesel_async::RunQueryDsl::load(query, &mut conn).await?;
        Ok(rows)
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

pub struct PgTx {
    // `None` once committed or rolled back.
    conn: Option<Object<AsyncPgConnection>>,
}

impl PgTx {
    fn conn(&mut self) -> Result<&mut Object<AsyncPgConnection>, StoreError> {
        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::Database("transaction already finished".to_string()))
    }
}

impl Drop for PgTx {
    fn drop(&mut self) {
        // Abandoned mid-transaction: detach the connection so the pool never
        // hands out a session with an open transaction. Closing it aborts the
        // transaction server-side.
        if let Some(conn) = self.conn.take() {
            tracing::warn!("transaction dropped without commit or rollback");
            drop(Object::take(conn));
        }
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn find_user(&mut self, user_id: &str) -> Result<Option<User>, StoreError> {
        let user = diesel_async::RunQueryDsl::get_result(
            users::table.find(user_id).select(User::as_select()),
            self.conn()?,
        )
        .await
        .optional()?;
        Ok(user)
    }

    async fn find_course(&mut self, course_id: &str) -> Result<Option<Course>, StoreError> {
        let course = diesel_async::RunQueryDsl::get_result(
            courses::table.find(course_id).select(Course::as_select()),
            self.conn()?,
        )
        .await
        .optional()?;
        Ok(course)
    }

    async fn lock_session(
        &mut self,
        session_id: &str,
    ) -> Result<Option<CourseSession>, StoreError> {
        let session = diesel_async::RunQueryDsl::get_result(
            course_sessions::table
                .find(session_id)
                .select(CourseSession::as_select())
                .for_update(),
            self.conn()?,
        )
        .await
        .optional()?;
        Ok(session)
    }

    async fn count_enrolled(&mut self, session_id: &str) -> Result<i64, StoreError> {
        let count: i64 = diesel_async::RunQueryDsl::get_result(
            enrollments::table
                .filter(enrollments::session_id.eq(session_id))
                .filter(enrollments::status.eq(EnrollmentStatus::Enrolled))
                .count(),
            self.conn()?,
        )
        .await?;
        Ok(count)
    }

    async fn find_active_enrollment(
        &mut self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        let enrollment = diesel_async::RunQueryDsl::first(
            enrollments::table
                .filter(enrollments::session_id.eq(session_id))
                .filter(enrollments::user_id.eq(user_id))
                .filter(enrollments::status.ne(EnrollmentStatus::Cancelled))
                .select(Enrollment::as_select()),
            self.conn()?,
        )
        .await
        .optional()?;
        Ok(enrollment)
    }

    async fn find_enrollment(
        &mut self,
        enrollment_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        let enrollment = diesel_async::RunQueryDsl::get_result(
            enrollments::table
                .find(enrollment_id)
                .select(Enrollment::as_select()),
            self.conn()?,
        )
        .await
        .optional()?;
        Ok(enrollment)
    }

    async fn insert_enrollment(
        &mut self,
        enrollment: NewEnrollment<'_>,
    ) -> Result<Enrollment, StoreError> {
        let row = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(enrollments::table)
                .values(enrollment)
                .returning(Enrollment::as_returning()),
            self.conn()?,
        )
        .await?;
        Ok(row)
    }

    async fn update_enrollment_status(
        &mut self,
        enrollment_id: &str,
        status: EnrollmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Enrollment, StoreError> {
        let row = diesel_async::RunQueryDsl::get_result(
            diesel::update(enrollments::table.find(enrollment_id))
                .set((enrollments::status.eq(status), enrollments::updated_at.eq(at)))
                .returning(Enrollment::as_returning()),
            self.conn()?,
        )
        .await?;
        Ok(row)
    }

    async fn set_enrollment_payment(
        &mut self,
        enrollment_id: &str,
        order_id: &str,
        paid_amount_cents: i64,
        at: DateTime<Utc>,
    ) -> Result<Enrollment, StoreError> {
        let row = diesel_async::RunQueryDsl::get_result(
            diesel::update(enrollments::table.find(enrollment_id))
                .set((
                    enrollments::order_id.eq(order_id),
                    enrollments::paid_amount_cents.eq(paid_amount_cents),
                    enrollments::updated_at.eq(at),
                ))
                .returning(Enrollment::as_returning()),
            self.conn()?,
        )
        .await?;
        Ok(row)
    }

    async fn waitlist_position(&mut self, enrollment: &Enrollment) -> Result<i64, StoreError> {
        let ahead_or_same: i64 = diesel_async::RunQueryDsl::get_result(
            enrollments::table
                .filter(enrollments::session_id.eq(&enrollment.session_id))
                .filter(enrollments::status.eq(EnrollmentStatus::Waitlist))
                .filter(
                    enrollments::created_at.lt(enrollment.created_at).or(enrollments::created_at
                        .eq(enrollment.created_at)
                        .and(enrollments::id.le(&enrollment.id))),
                )
                .count(),
            self.conn()?,
        )
        .await?;
        Ok(ahead_or_same)
    }

    async fn next_waitlisted(
        &mut self,
        session_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        let next = diesel_async::RunQueryDsl::first(
            enrollments::table
                .filter(enrollments::session_id.eq(session_id))
                .filter(enrollments::status.eq(EnrollmentStatus::Waitlist))
                .order((enrollments::created_at.asc(), enrollments::id.asc()))
                .select(Enrollment::as_select()),
            self.conn()?,
        )
        .await
        .optional()?;
        Ok(next)
    }

    async fn find_order(&mut self, order_id: &str) -> Result<Option<Order>, StoreError> {
        let order = diesel_async::RunQueryDsl::get_result(
            orders::table.find(order_id).select(Order::as_select()),
            self.conn()?,
        )
        .await
        .optional()?;
        Ok(order)
    }

    async fn lock_order(&mut self, order_id: &str) -> Result<Option<Order>, StoreError> {
        let order = diesel_async::RunQueryDsl::get_result(
            orders::table
                .find(order_id)
                .select(Order::as_select())
                .for_update(),
            self.conn()?,
        )
        .await
        .optional()?;
        Ok(order)
    }

    async fn find_enrollment_by_order(
        &mut self,
        order_id: &str,
    ) -> Result<Option<Enrollment>, StoreError> {
        let enrollment = diesel_async::RunQueryDsl::first(
            enrollments::table
                .filter(enrollments::order_id.eq(order_id))
                .select(Enrollment::as_select()),
            self.conn()?,
        )
        .await
        .optional()?;
        Ok(enrollment)
    }

    async fn update_order_status(
        &mut self,
        order_id: &str,
        status: OrderStatus,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError> {
        let order = diesel_async::RunQueryDsl::get_result(
            diesel::update(orders::table.find(order_id))
                .set((orders::status.eq(status), orders::updated_at.eq(at)))
                .returning(Order::as_returning()),
            self.conn()?,
        )
        .await?;
        Ok(order)
    }

    async fn insert_refund(&mut self, refund: NewRefund<'_>) -> Result<Refund, StoreError> {
        let row = diesel_async::RunQueryDsl::get_result(
            diesel::insert_into(refunds::table)
                .values(refund)
                .returning(Refund::as_returning()),
            self.conn()?,
        )
        .await?;
        Ok(row)
    }

    async fn lock_refund(&mut self, refund_id: &str) -> Result<Option<Refund>, StoreError> {
        let refund = diesel_async::RunQueryDsl::get_result(
            refunds::table
                .find(refund_id)
                .select(Refund::as_select())
                .for_update(),
            self.conn()?,
        )
        .await
        .optional()?;
        Ok(refund)
    }

    async fn update_refund_status(
        &mut self,
        refund_id: &str,
        status: RefundStatus,
        processed_at: Option<DateTime<Utc>>,
    ) -> Result<Refund, StoreError> {
        let target = refunds::table.find(refund_id);
        let conn = self.conn()?;

        let refund = match processed_at {
            Some(at) => {
                diesel_async::RunQueryDsl::get_result(
                    diesel::update(target)
                        .set((refunds::status.eq(status), refunds::processed_at.eq(at)))
                        .returning(Refund::as_returning()),
                    conn,
                )
                .await?
            }
            None => {
                diesel_async::RunQueryDsl::get_result(
                    diesel::update(target)
                        .set(refunds::status.eq(status))
                        .returning(Refund::as_returning()),
                    conn,
                )
                .await?
            }
        };
        Ok(refund)
    }

    async fn insert_audit_log(&mut self, entry: NewAuditLog<'_>) -> Result<(), StoreError> {
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(audit_logs::table).values(entry),
            self.conn()?,
        )
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        let mut conn = this
            .conn
            .take()
            .ok_or_else(|| StoreError::Database("transaction already finished".to_string()))?;

        match <PgTransactionManager as TransactionManager<AsyncPgConnection>>::commit_transaction(
            &mut *conn,
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                // A failed COMMIT leaves the connection in an unknown state.
                drop(Object::take(conn));
                Err(err.into())
            }
        }
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut this = self;
        let mut conn = this
            .conn
            .take()
            .ok_or_else(|| StoreError::Database("transaction already finished".to_string()))?;

        match <PgTransactionManager as TransactionManager<AsyncPgConnection>>::rollback_transaction(
            &mut *conn,
        )
        .await
        {
            Ok(()) => Ok(()),
            Err(err) => {
                drop(Object::take(conn));
                Err(err.into())
            }
        }
    }
}
