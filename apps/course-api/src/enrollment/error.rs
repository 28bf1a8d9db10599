use crate::store::{StoreError, ACTIVE_ENROLLMENT_INDEX, ORDER_ENROLLMENT_INDEX};

/// Failure of an enrollment workflow step.
#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    /// Another transaction held the session; safe to retry.
    #[error("The session is busy, please try again")]
    Busy,

    #[error(transparent)]
    Store(StoreError),
}

impl EnrollmentError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EnrollmentError::Busy)
    }
}

impl From<StoreError> for EnrollmentError {
    fn from(err: StoreError) -> Self {
        match err {
            err if err.is_retryable() => EnrollmentError::Busy,
            StoreError::UniqueViolation(index) if index == ACTIVE_ENROLLMENT_INDEX => {
                EnrollmentError::Conflict(
                    "You already have an active enrollment for this session".to_string(),
                )
            }
            StoreError::UniqueViolation(index) if index == ORDER_ENROLLMENT_INDEX => {
                EnrollmentError::Conflict(
                    "Order already pays for another enrollment".to_string(),
                )
            }
            other => EnrollmentError::Store(other),
        }
    }
}
