//! Fixtures backed by the `_test` PostgreSQL database named by DATABASE_URL.
//!
//! Tests call [`connect`] first and return early when it yields `None`, so the
//! suite still runs on machines without PostgreSQL.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use diesel_async::pooled_connection::deadpool::Object;
use diesel_async::AsyncPgConnection;

use course_api::db::migrations::{run_pending, with_test_db_suffix};
use course_api::db::pool::{self, DbPool};
use course_api::db::schema::{course_sessions, courses, orders, users};
use course_api::models::course::{Course, CourseSession};
use course_api::models::order::Order;
use course_api::models::status::{OrderStatus, UserRole, UserStatus};
use course_api::models::user::User;
use course_api::store::postgres::PgStore;
use diveshop_common::id::{prefix, prefixed_ulid};

static MIGRATED: OnceLock<Result<(), String>> = OnceLock::new();

pub struct PgFixture {
    pub pool: DbPool,
    pub store: Arc<PgStore>,
}

pub fn test_database_url() -> Option<String> {
    let env_path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(env_path);
    std::env::var("DATABASE_URL")
        .ok()
        .map(|url| with_test_db_suffix(&url))
}

/// Migrated test database plus a store over it, or `None` without DATABASE_URL.
pub async fn connect(lock_timeout: Duration) -> Option<PgFixture> {
    connect_with(lock_timeout, 16, Duration::from_secs(5)).await
}

pub async fn connect_with(
    lock_timeout: Duration,
    pool_size: usize,
    checkout_timeout: Duration,
) -> Option<PgFixture> {
    let Some(url) = test_database_url() else {
        eprintln!("DATABASE_URL is not set; skipping PostgreSQL test");
        return None;
    };

    // Every test binary migrates once, however many tests run in parallel.
    let migrate_url = url.clone();
    tokio::task::spawn_blocking(move || {
        MIGRATED
            .get_or_init(|| {
                run_pending(&migrate_url)
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            })
            .clone()
    })
    .await
    .expect("migration task panicked")
    .expect("failed to run migrations");

    let pool = pool::build(&url, pool_size).expect("build test pool");
    let store = Arc::new(PgStore::new(pool.clone(), lock_timeout, checkout_timeout));
    Some(PgFixture { pool, store })
}

impl PgFixture {
    async fn conn(&self) -> Object<AsyncPgConnection> {
        self.pool.get().await.expect("pooled test connection")
    }

    pub async fn add_user(&self, name: &str, role: UserRole) -> User {
        let id = prefixed_ulid(prefix::USER);
        let user = User {
            email: format!("{}@diveshop.test", id.to_lowercase()),
            display_name: name.to_string(),
            id,
            role,
            status: UserStatus::Active,
            created_at: Utc::now(),
        };
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(users::table).values(&user),
            &mut self.conn().await,
        )
        .await
        .expect("insert user");
        user
    }

    pub async fn add_course(&self, title: &str) -> Course {
        let now = Utc::now();
        let course = Course {
            id: prefixed_ulid(prefix::COURSE),
            title: title.to_string(),
            description: None,
            price_cents: 45_000,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(courses::table).values(&course),
            &mut self.conn().await,
        )
        .await
        .expect("insert course");
        course
    }

    pub async fn add_session(&self, course: &Course, capacity: i32) -> CourseSession {
        let now = Utc::now();
        let session = CourseSession {
            id: prefixed_ulid(prefix::COURSE_SESSION),
            course_id: course.id.clone(),
            instructor_id: None,
            start_at: now + chrono::Duration::days(7),
            capacity,
            is_active: true,
            created_at: now,
        };
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(course_sessions::table).values(&session),
            &mut self.conn().await,
        )
        .await
        .expect("insert session");
        session
    }

    pub async fn add_paid_order(&self, user: &User, total_cents: i64) -> Order {
        let now = Utc::now();
        let order = Order {
            id: prefixed_ulid(prefix::ORDER),
            user_id: user.id.clone(),
            total_cents,
            status: OrderStatus::Paid,
            created_at: now,
            updated_at: now,
        };
        diesel_async::RunQueryDsl::execute(
            diesel::insert_into(orders::table).values(&order),
            &mut self.conn().await,
        )
        .await
        .expect("insert order");
        order
    }
}
