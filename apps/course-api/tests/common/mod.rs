#![allow(dead_code)]

pub mod pg;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde::Serialize;

use course_api::config::Config;
use course_api::enrollment::RetryPolicy;
use course_api::models::course::{Course, CourseSession};
use course_api::models::enrollment::Enrollment;
use course_api::models::order::Order;
use course_api::models::status::{OrderStatus, UserRole, UserStatus};
use course_api::models::user::User;
use course_api::notify::Notifier;
use course_api::store::memory::MemoryStore;
use course_api::AppState;
use diveshop_common::id::{prefix, prefixed_ulid};

pub const TEST_SECRET: &str = "course-api-test-secret";

/// Notifier that remembers which enrollments were promoted.
#[derive(Default)]
pub struct RecordingNotifier {
    promoted: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn promoted(&self) -> Vec<String> {
        self.promoted.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn waitlist_promoted(&self, enrollment: &Enrollment) {
        self.promoted.lock().push(enrollment.id.clone());
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub store: Arc<MemoryStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub state: AppState,
}

pub fn test_config(lock_timeout: Duration, retry: RetryPolicy) -> Config {
    Config {
        database_url: "postgres://unused".to_string(),
        db_pool_size: 1,
        db_pool_timeout: Duration::from_secs(1),
        auth_jwt_secret: TEST_SECRET.to_string(),
        port: 0,
        lock_timeout,
        tx_max_retries: retry.max_retries,
        tx_retry_backoff: retry.backoff,
    }
}

/// Full router over an in-memory store.
pub fn test_app() -> TestApp {
    test_app_with(
        Duration::from_secs(2),
        RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(5),
        },
    )
}

pub fn test_app_with(lock_timeout: Duration, retry: RetryPolicy) -> TestApp {
    let store = Arc::new(MemoryStore::new(lock_timeout));
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState::new(
        store.clone(),
        notifier.clone(),
        test_config(lock_timeout, retry),
    );
    let app = course_api::routes::router().with_state(state.clone());
    let server = TestServer::new(app).unwrap();

    TestApp {
        server,
        store,
        notifier,
        state,
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn add_user(store: &MemoryStore, name: &str, role: UserRole) -> User {
    add_user_with_status(store, name, role, UserStatus::Active)
}

pub fn add_user_with_status(
    store: &MemoryStore,
    name: &str,
    role: UserRole,
    status: UserStatus,
) -> User {
    let user = User {
        id: prefixed_ulid(prefix::USER),
        email: format!("{}@diveshop.test", name.to_lowercase()),
        display_name: name.to_string(),
        role,
        status,
        created_at: Utc::now(),
    };
    store.add_user(user.clone());
    user
}

pub fn add_course(store: &MemoryStore, title: &str) -> Course {
    add_course_with(store, title, true)
}

pub fn add_course_with(store: &MemoryStore, title: &str, is_active: bool) -> Course {
    let now = Utc::now();
    let course = Course {
        id: prefixed_ulid(prefix::COURSE),
        title: title.to_string(),
        description: None,
        price_cents: 45_000,
        is_active,
        created_at: now,
        updated_at: now,
    };
    store.add_course(course.clone());
    course
}

pub fn add_session(store: &MemoryStore, course: &Course, capacity: i32) -> CourseSession {
    add_session_with(store, course, capacity, None, 7, true)
}

pub fn add_session_with(
    store: &MemoryStore,
    course: &Course,
    capacity: i32,
    instructor: Option<&User>,
    starts_in_days: i64,
    is_active: bool,
) -> CourseSession {
    let now = Utc::now();
    let session = CourseSession {
        id: prefixed_ulid(prefix::COURSE_SESSION),
        course_id: course.id.clone(),
        instructor_id: instructor.map(|u| u.id.clone()),
        start_at: now + chrono::Duration::days(starts_in_days),
        capacity,
        is_active,
        created_at: now,
    };
    store.add_session(session.clone());
    session
}

pub fn add_order(store: &MemoryStore, user: &User, total_cents: i64, status: OrderStatus) -> Order {
    let now = Utc::now();
    let order = Order {
        id: prefixed_ulid(prefix::ORDER),
        user_id: user.id.clone(),
        total_cents,
        status,
        created_at: now,
        updated_at: now,
    };
    store.add_order(order.clone());
    order
}

// ---------------------------------------------------------------------------
// Tokens and requests
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct TestClaims<'a> {
    sub: &'a str,
    iat: i64,
    exp: i64,
}

/// Mint an HS256 access token the way the auth service does.
pub fn mint_token(user_id: &str) -> String {
    mint_token_with(user_id, TEST_SECRET, chrono::Duration::minutes(5))
}

pub fn mint_token_with(user_id: &str, secret: &str, ttl: chrono::Duration) -> String {
    let now = Utc::now();
    let claims = TestClaims {
        sub: user_id,
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("mint test token")
}

pub fn bearer(user: &User) -> String {
    format!("Bearer {}", mint_token(&user.id))
}

/// POST /api/courses/{course}/enroll as `user`, returning status and body.
pub async fn enroll(
    server: &TestServer,
    user: &User,
    session: &CourseSession,
) -> (StatusCode, serde_json::Value) {
    let resp = server
        .post(&format!("/api/courses/{}/enroll", session.course_id))
        .add_header(AUTHORIZATION, bearer(user))
        .json(&serde_json::json!({ "sessionId": session.id }))
        .await;
    (resp.status_code(), resp.json())
}

/// Enroll and return the new enrollment ID, asserting 201.
pub async fn enroll_ok(server: &TestServer, user: &User, session: &CourseSession) -> String {
    let (status, body) = enroll(server, user, session).await;
    assert_eq!(status, StatusCode::CREATED, "enroll failed: {body}");
    body["enrollment"]["id"].as_str().unwrap().to_string()
}

pub async fn cancel(
    server: &TestServer,
    user: &User,
    enrollment_id: &str,
) -> (StatusCode, serde_json::Value) {
    let resp = server
        .post(&format!("/api/enrollments/{enrollment_id}/cancel"))
        .add_header(AUTHORIZATION, bearer(user))
        .json(&serde_json::json!({ "reason": "schedule conflict" }))
        .await;
    (resp.status_code(), resp.json())
}

pub async fn record_payment(
    server: &TestServer,
    admin: &User,
    enrollment_id: &str,
    order_id: &str,
) -> (StatusCode, serde_json::Value) {
    let resp = server
        .put(&format!("/api/enrollments/{enrollment_id}/payment"))
        .add_header(AUTHORIZATION, bearer(admin))
        .json(&serde_json::json!({ "orderId": order_id }))
        .await;
    (resp.status_code(), resp.json())
}

pub fn enrollment_status(store: &MemoryStore, enrollment_id: &str) -> String {
    store
        .enrollments()
        .into_iter()
        .find(|e| e.id == enrollment_id)
        .map(|e| e.status.to_string())
        .unwrap_or_default()
}
