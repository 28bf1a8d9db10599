use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::db::schema::refunds;
use crate::models::status::RefundStatus;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, ToSchema)]
#[diesel(table_name = refunds)]
pub struct Refund {
    pub id: String,
    pub user_id: String,
    pub enrollment_id: String,
    pub course_id: String,
    pub amount_cents: i64,
    pub reason: Option<String>,
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = refunds)]
pub struct NewRefund<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub enrollment_id: &'a str,
    pub course_id: &'a str,
    pub amount_cents: i64,
    pub reason: Option<&'a str>,
    pub status: RefundStatus,
    pub created_at: DateTime<Utc>,
}
