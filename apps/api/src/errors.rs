use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Day {0} is already claimed")]
    AlreadyClaimed(chrono::NaiveDate),

    #[error("Claim window for {0} has expired")]
    WindowExpired(chrono::NaiveDate),

    #[error("No shields available")]
    NoShieldsAvailable,

    #[error("Shield inventory is full")]
    InventoryFull,

    #[error("Streak is not paused")]
    NotPaused,

    #[error("Streak is paused")]
    StreakPaused,

    #[error("Concurrent update conflict: {0}")]
    StorageConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable code, shared by HTTP responses and log lines.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidTimezone(_) => "INVALID_TIMEZONE",
            AppError::MissingParameter(_) => "MISSING_PARAMETER",
            AppError::AlreadyClaimed(_) => "ALREADY_CLAIMED",
            AppError::WindowExpired(_) => "WINDOW_EXPIRED",
            AppError::NoShieldsAvailable => "NO_SHIELDS_AVAILABLE",
            AppError::InventoryFull => "INVENTORY_FULL",
            AppError::NotPaused => "NOT_PAUSED",
            AppError::StreakPaused => "STREAK_PAUSED",
            AppError::StorageConflict(_) => "STORAGE_CONFLICT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match &self {
            AppError::InvalidTimezone(_)
            | AppError::MissingParameter(_)
            | AppError::Validation(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::AlreadyClaimed(_)
            | AppError::InventoryFull
            | AppError::NotPaused
            | AppError::StreakPaused
            | AppError::StorageConflict(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::WindowExpired(_) | AppError::NoShieldsAvailable => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
