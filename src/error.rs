use thiserror::Error;

use crate::models::RequestStatus;

/// Input rejected before any write reached the store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("plate number is required")]
    EmptyPlate,

    #[error("plate number may be at most {max} characters, got {len}")]
    PlateTooLong { len: usize, max: usize },

    #[error("{field} must be between 0 and 100, got {value}")]
    InvalidRate { field: &'static str, value: f64 },

    #[error("a rejection reason is required")]
    MissingReason,

    #[error("outgoing staff member must be set and differ from the incoming one")]
    InvalidParticipants,

    #[error("checklist item {0} was answered more than once")]
    DuplicateChecklistItem(i64),

    #[error("invalid sale: {0}")]
    InvalidSale(String),

    #[error("{0} is required")]
    EmptyField(&'static str),

    #[error("user {0} already exists")]
    DuplicateUser(String),

    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("invalid timestamp '{0}', expected RFC 3339")]
    InvalidTimestamp(String),

    #[error("timestamp {0} is in the future or too far in the past")]
    TimestampOutOfRange(String),

    #[error("select at least one cleaning operation")]
    NoCleaningOperations,

    #[error("cleaning operation {0} was selected more than once")]
    DuplicateCleaningOperation(i64),

    #[error("a cleaning operation named '{0}' already exists")]
    DuplicateOperationName(String),
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("no signed-in user")]
    Unauthenticated,

    #[error("access denied: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("plate {0} already has a discount record")]
    DuplicateActiveDiscount(String),

    #[error("plate {0} already has a pending request")]
    DuplicatePendingRequest(String),

    #[error("request {id} was already {status}")]
    AlreadyProcessed { id: i64, status: RequestStatus },

    #[error("handover {0} was already decided")]
    AlreadyDecided(i64),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Host-side setup failures (config, data directory).
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stale-state conflicts: the caller should refresh and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::AlreadyProcessed { .. } | AppError::AlreadyDecided(_)
        )
    }

    /// Message safe to show an end user. Store and internal failures are
    /// collapsed into a generic prompt; everything else is specific.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Store(_) | AppError::Internal(_) => {
                "Something went wrong while saving. Please try again.".to_string()
            }
            AppError::AlreadyProcessed { .. } | AppError::AlreadyDecided(_) => {
                format!("{self}. Refresh the list and try again.")
            }
            other => other.to_string(),
        }
    }
}

impl From<AppError> for String {
    fn from(err: AppError) -> String {
        err.user_message()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_get_generic_message() {
        let err = AppError::Store(rusqlite::Error::QueryReturnedNoRows);
        assert_eq!(
            err.user_message(),
            "Something went wrong while saving. Please try again."
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn conflicts_are_specific_and_retryable() {
        let err = AppError::AlreadyProcessed {
            id: 7,
            status: RequestStatus::Approved,
        };
        assert!(err.is_retryable());
        assert!(err.user_message().starts_with("request 7 was already approved"));

        let dup = AppError::DuplicatePendingRequest("06XYZ99".into());
        assert_eq!(dup.user_message(), "plate 06XYZ99 already has a pending request");
    }
}
