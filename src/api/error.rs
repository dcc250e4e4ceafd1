use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::domain::DomainError;
use crate::store::StoreError;

/// API error types that can be returned from handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Conflict: {0}")]
    Conflict(String),

    /// Some tables of a multi-table write failed; the rest went through
    #[error("Partial failure: {0}")]
    PartialFailure(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

/// Error response that gets serialized to JSON
#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) | ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PartialFailure(_) => StatusCode::BAD_GATEWAY,
            ApiError::InternalError(_) | ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NotFound",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::ValidationError(_) => "ValidationError",
            ApiError::Unauthorized(_) => "Unauthorized",
            ApiError::Forbidden => "Forbidden",
            ApiError::Conflict(_) => "Conflict",
            ApiError::PartialFailure(_) => "PartialFailure",
            ApiError::InternalError(_) => "InternalServerError",
            ApiError::ServiceUnavailable(_) => "ServiceUnavailable",
            ApiError::DatabaseError(_) => "DatabaseError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_type = self.error_type();

        let message = match &self {
            ApiError::InternalError(_) | ApiError::DatabaseError(_) => {
                tracing::error!(error = %self, "API error occurred");
                "An internal error occurred".to_string()
            }
            ApiError::ServiceUnavailable(_) => {
                tracing::warn!(error = %self, "Service unavailable");
                "Service temporarily unavailable".to_string()
            }
            ApiError::PartialFailure(_) => {
                tracing::warn!(error = %self, "Multi-table write partly failed");
                self.to_string()
            }
            _ => {
                tracing::debug!(error = %self, "Client error");
                self.to_string()
            }
        };

        let error_response = ErrorResponse {
            success: false,
            error: error_type.to_string(),
            message,
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(m) => ApiError::NotFound(m),
            StoreError::Conflict(m) => ApiError::Conflict(m),
            StoreError::Backend { status, message } if (400..500).contains(&status) => ApiError::BadRequest(message),
            e @ StoreError::Backend { .. } | e @ StoreError::Transport(_) => {
                ApiError::ServiceUnavailable(e.to_string())
            }
            StoreError::Decode(m) => ApiError::InternalError(m),
            StoreError::Database(m) => ApiError::DatabaseError(m),
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::InvalidTransition { .. } => ApiError::Conflict(error.to_string()),
            DomainError::Validation(m) => ApiError::ValidationError(m),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::InternalError(error.to_string())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(errors.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SubmissionStatus;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(ApiError::NotFound("test".to_string()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::BadRequest("test".to_string()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized("no token".to_string()).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::PartialFailure("diesel_prices".to_string()).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            ApiError::InternalError("test".to_string()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_store_errors_map_to_status() {
        let cases = [
            (StoreError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (StoreError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                StoreError::Backend { status: 400, message: "bad column".into() },
                StatusCode::BAD_REQUEST,
            ),
            (
                StoreError::Backend { status: 503, message: "down".into() },
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (StoreError::Transport("reset".into()), StatusCode::SERVICE_UNAVAILABLE),
            (StoreError::Database("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_invalid_transition_is_conflict() {
        let err = DomainError::InvalidTransition {
            from: SubmissionStatus::Approved,
            to: SubmissionStatus::Rejected,
        };
        let api: ApiError = err.into();
        assert_eq!(api.status_code(), StatusCode::CONFLICT);
        assert_eq!(api.error_type(), "Conflict");
    }

    #[test]
    fn test_error_display() {
        let error = ApiError::NotFound("location ikeja-lagos".to_string());
        assert_eq!(error.to_string(), "Resource not found: location ikeja-lagos");
    }
}
