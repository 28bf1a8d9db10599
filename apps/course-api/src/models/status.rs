//! Closed status vocabularies stored as lowercase text columns.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::pg::{Pg, PgValue};
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown {kind} status: {value:?}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// Wires a status enum to a diesel `Text` column and to `Display`/`FromStr`.
macro_rules! text_status {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ParseStatusError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(ParseStatusError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql<Text, Pg> for $ty {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $ty {
            fn from_sql(bytes: PgValue<'_>) -> deserialize::Result<Self> {
                let raw = std::str::from_utf8(bytes.as_bytes())?;
                Ok(raw.parse::<$ty>()?)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Enrollment
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Enrolled,
    Waitlist,
    Dropped,
    Cancelled,
}

text_status!(EnrollmentStatus, "enrollment", {
    Enrolled => "enrolled",
    Waitlist => "waitlist",
    Dropped => "dropped",
    Cancelled => "cancelled",
});

impl EnrollmentStatus {
    pub fn can_transition_to(self, next: EnrollmentStatus) -> bool {
        use EnrollmentStatus::*;
        matches!(
            (self, next),
            (Enrolled, Dropped) | (Enrolled, Cancelled) | (Waitlist, Enrolled) | (Waitlist, Cancelled)
        )
    }

    /// Whether the record still occupies the user's one place in the session.
    /// Dropped students keep it, so they cannot enroll again.
    pub fn occupies_place(self) -> bool {
        self != EnrollmentStatus::Cancelled
    }
}

// ---------------------------------------------------------------------------
// Refund
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Approved,
    Processed,
    Rejected,
}

text_status!(RefundStatus, "refund", {
    Pending => "pending",
    Approved => "approved",
    Processed => "processed",
    Rejected => "rejected",
});

impl RefundStatus {
    pub fn can_transition_to(self, next: RefundStatus) -> bool {
        use RefundStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Processed)
        )
    }

    pub fn is_final(self) -> bool {
        matches!(self, RefundStatus::Processed | RefundStatus::Rejected)
    }
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Sent,
    Delivered,
    Cancelled,
    Refunded,
}

text_status!(OrderStatus, "order", {
    Pending => "pending",
    Paid => "paid",
    Sent => "sent",
    Delivered => "delivered",
    Cancelled => "cancelled",
    Refunded => "refunded",
});

impl OrderStatus {
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Pending, Cancelled)
                | (Paid, Sent)
                | (Paid, Cancelled)
                | (Paid, Refunded)
                | (Sent, Delivered)
                | (Sent, Refunded)
                | (Delivered, Refunded)
        )
    }
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Active,
    Suspended,
    Inactive,
}

text_status!(UserStatus, "user", {
    Active => "active",
    Suspended => "suspended",
    Inactive => "inactive",
});

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Customer,
    Instructor,
    Admin,
}

text_status!(UserRole, "role", {
    Customer => "customer",
    Instructor => "instructor",
    Admin => "admin",
});
