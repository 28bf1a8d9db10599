//! Local development data: an admin, an instructor, a student, one course
//! with two sessions, plus bearer tokens for the seeded accounts.
//!
//! Usage:
//!   cargo run -p course-api --bin seed
//!
//! Reads DATABASE_URL and AUTH_JWT_SECRET from the environment (or .env).

use std::path::Path;

use chrono::{Duration, Utc};
use diesel::pg::PgConnection;
use diesel::{Connection, RunQueryDsl};
use diveshop_common::id::{prefix, prefixed_ulid};

use course_api::auth::tokens::issue_token;
use course_api::config::Config;
use course_api::db::schema::{course_sessions, courses, users};
use course_api::models::course::{Course, CourseSession};
use course_api::models::status::{UserRole, UserStatus};
use course_api::models::user::User;

fn user(email: &str, display_name: &str, role: UserRole) -> User {
    User {
        id: prefixed_ulid(prefix::USER),
        email: email.to_string(),
        display_name: display_name.to_string(),
        role,
        status: UserStatus::Active,
        created_at: Utc::now(),
    }
}

fn main() {
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }
    let config = Config::from_env();

    let mut conn =
        PgConnection::establish(&config.database_url).expect("failed to connect to database");

    let admin = user("admin@diveshop.test", "Shop Admin", UserRole::Admin);
    let instructor = user("instructor@diveshop.test", "Ines Instructor", UserRole::Instructor);
    let student = user("student@diveshop.test", "Sam Student", UserRole::Customer);

    let now = Utc::now();
    let course = Course {
        id: prefixed_ulid(prefix::COURSE),
        title: "Open Water Diver".to_string(),
        description: Some("Entry-level certification, four open water dives.".to_string()),
        price_cents: 49_900,
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    let sessions: Vec<CourseSession> = [7, 14]
        .into_iter()
        .map(|days| CourseSession {
            id: prefixed_ulid(prefix::COURSE_SESSION),
            course_id: course.id.clone(),
            instructor_id: Some(instructor.id.clone()),
            start_at: now + Duration::days(days),
            capacity: 2,
            is_active: true,
            created_at: now,
        })
        .collect();

    conn.transaction::<_, diesel::result::Error, _>(|conn| {
        diesel::insert_into(users::table)
            .values(vec![&admin, &instructor, &student])
            .execute(conn)?;
        diesel::insert_into(courses::table)
            .values(&course)
            .execute(conn)?;
        diesel::insert_into(course_sessions::table)
            .values(&sessions)
            .execute(conn)?;
        Ok(())
    })
    .expect("failed to insert seed data");

    println!("Course  {} ({})", course.title, course.id);
    for session in &sessions {
        println!("  Session {} starts {}", session.id, session.start_at);
    }

    let ttl = Duration::days(1);
    for account in [&admin, &student] {
        let token =
            issue_token(&account.id, &config.auth_jwt_secret, ttl).expect("failed to sign token");
        println!("{:<8} {}\n  Bearer {}", account.role, account.id, token);
    }
}
