use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Invalid subject id: {0:?}")]
    InvalidSubject(String),

    #[error("Batch of {len} subjects exceeds the limit of {max}")]
    BatchTooLarge { len: usize, max: usize },

    #[error("Authentication required")]
    Unauthenticated,

    /// The source is kept for logging only; callers see the generic message.
    #[error("Operation failed, please retry")]
    StorageUnavailable(#[from] sqlx::Error),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidSubject(_) => "invalid_subject",
            LedgerError::BatchTooLarge { .. } => "batch_too_large",
            LedgerError::Unauthenticated => "unauthenticated",
            LedgerError::StorageUnavailable(_) => "operation_failed",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let status = match self {
            LedgerError::InvalidSubject { .. } => StatusCode::BAD_REQUEST,
            LedgerError::BatchTooLarge { .. } => StatusCode::BAD_REQUEST,
            LedgerError::Unauthenticated => StatusCode::UNAUTHORIZED,
            LedgerError::StorageUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        };

        if let LedgerError::StorageUnavailable(source) = &self {
            error!("Storage failure: {source}");
        }

        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::LedgerError;

    #[test]
    fn test_storage_message_hides_source() {
        let err = LedgerError::from(sqlx::Error::PoolTimedOut);

        assert_eq!(err.code(), "operation_failed");
        assert_eq!(err.to_string(), "Operation failed, please retry");
    }

    #[test]
    fn test_codes() {
        assert_eq!(
            LedgerError::InvalidSubject(String::new()).code(),
            "invalid_subject"
        );
        assert_eq!(
            LedgerError::BatchTooLarge { len: 3, max: 2 }.code(),
            "batch_too_large"
        );
        assert_eq!(LedgerError::Unauthenticated.code(), "unauthenticated");
    }
}
