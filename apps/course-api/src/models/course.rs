use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::{course_sessions, courses};

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, ToSchema)]
#[diesel(table_name = courses)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A scheduled occurrence of a course with a fixed seat count.
#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, ToSchema)]
#[diesel(table_name = course_sessions)]
pub struct CourseSession {
    pub id: String,
    pub course_id: String,
    pub instructor_id: Option<String>,
    pub start_at: DateTime<Utc>,
    pub capacity: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl CourseSession {
    /// Whether another student fits. Non-positive capacity is always full.
    pub fn has_room(&self, enrolled_count: i64) -> bool {
        enrolled_count < i64::from(self.capacity.max(0))
    }
}

/// Session row as shown on the course detail page.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionSummary {
    pub id: String,
    pub start_at: DateTime<Utc>,
    pub capacity: i32,
    pub enrolled_count: i64,
    pub instructor_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CourseDetail {
    #[serde(flatten)]
    pub course: Course,
    pub sessions: Vec<SessionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(capacity: i32) -> CourseSession {
        CourseSession {
            id: "cses_1".to_string(),
            course_id: "crs_1".to_string(),
            instructor_id: None,
            start_at: Utc::now(),
            capacity,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn has_room_below_capacity() {
        assert!(session(2).has_room(0));
        assert!(session(2).has_room(1));
        assert!(!session(2).has_room(2));
    }

    #[test]
    fn non_positive_capacity_is_always_full() {
        assert!(!session(0).has_room(0));
        assert!(!session(-3).has_room(0));
    }
}
