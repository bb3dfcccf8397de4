use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Requested slot is not available")]
    SlotUnavailable,

    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("Staff member is not available for the requested range")]
    StaffNotAvailable,

    #[error("Payment required before the appointment can be scheduled")]
    PaymentRequired,

    #[error("Payment failed: {0}")]
    PaymentFailed(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

fn status_and_code(error: &AppError) -> (StatusCode, &'static str, String) {
    match error {
        AppError::SlotUnavailable => {
            (StatusCode::CONFLICT, "SLOT_UNAVAILABLE", error.to_string())
        }
        AppError::InvalidTimeRange(msg) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "INVALID_TIME_RANGE",
            msg.clone(),
        ),
        AppError::InvalidTransition(msg) => {
            (StatusCode::CONFLICT, "INVALID_TRANSITION", msg.clone())
        }
        AppError::StaffNotAvailable => (
            StatusCode::CONFLICT,
            "STAFF_NOT_AVAILABLE",
            error.to_string(),
        ),
        AppError::PaymentRequired => (
            StatusCode::PAYMENT_REQUIRED,
            "PAYMENT_REQUIRED",
            error.to_string(),
        ),
        AppError::PaymentFailed(msg) => {
            (StatusCode::PAYMENT_REQUIRED, "PAYMENT_FAILED", msg.clone())
        }
        AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
        AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        AppError::Validation(msg) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            msg.clone(),
        ),
        AppError::Database(e) => {
            tracing::error!("Database error: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
            )
        }
        AppError::Request(e) => {
            tracing::error!("HTTP request error: {:?}", e);
            (
                StatusCode::BAD_GATEWAY,
                "EXTERNAL_REQUEST_FAILED",
                "Failed to communicate with external service".to_string(),
            )
        }
        AppError::Internal(e) => {
            tracing::error!("Internal error: {:?}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = status_and_code(&self);

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduling_integrity_errors_map_to_conflict() {
        let (status, code, _) = status_and_code(&AppError::SlotUnavailable);
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "SLOT_UNAVAILABLE");

        let (status, code, _) =
            status_and_code(&AppError::InvalidTransition("completed -> scheduled".to_string()));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "INVALID_TRANSITION");
    }

    #[test]
    fn payment_errors_map_to_payment_required() {
        let (status, _, _) = status_and_code(&AppError::PaymentRequired);
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

        let (status, code, _) = status_and_code(&AppError::PaymentFailed("declined".to_string()));
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(code, "PAYMENT_FAILED");
    }

    #[test]
    fn time_range_errors_map_to_unprocessable() {
        let (status, code, _) =
            status_and_code(&AppError::InvalidTimeRange("start must be before end".to_string()));
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(code, "INVALID_TIME_RANGE");
    }
}
