use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::credits::LedgerError;
use crate::extraction::ExtractionError;
use crate::generation::{GenerationError, ValidationError};
use crate::jobs::DispatchError;
use crate::storage::StoreError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Payment required: {0}")]
    PaymentRequired(String),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(e) => AppError::Database(e),
            StoreError::NotFound(what) => AppError::NotFound(what),
            StoreError::Corrupt(e) => AppError::Internal(e.into()),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::UnknownUser(id) => AppError::NotFound(format!("User {id}")),
            LedgerError::InsufficientCredits => {
                AppError::PaymentRequired("Not enough credits for this generation".to_string())
            }
            LedgerError::InvalidAmount(amount) => {
                AppError::Validation(format!("amount must be positive, got {amount}"))
            }
            LedgerError::BalanceOverflow(amount) => {
                AppError::Validation(format!("adding {amount} credits exceeds the maximum balance"))
            }
            LedgerError::Store(e) => e.into(),
        }
    }
}

impl From<DispatchError> for AppError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::NotFound(what) => AppError::NotFound(what),
            DispatchError::Validation(e) => AppError::Validation(e.to_string()),
            DispatchError::AlreadyInFlight => AppError::Conflict(e.to_string()),
            DispatchError::NotReady { .. } => AppError::InvalidState(e.to_string()),
            DispatchError::InsufficientCredits => {
                AppError::PaymentRequired("Not enough credits for this generation".to_string())
            }
            DispatchError::QueueClosed => AppError::Unavailable(e.to_string()),
            DispatchError::Store(e) => e.into(),
            DispatchError::Ledger(e) => e.into(),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(e: ValidationError) -> Self {
        AppError::Validation(e.to_string())
    }
}

impl From<GenerationError> for AppError {
    fn from(e: GenerationError) -> Self {
        match e {
            GenerationError::Validation(e) => AppError::Validation(e.to_string()),
            other => AppError::Provider(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "ALREADY_IN_FLIGHT", msg.clone()),
            AppError::InvalidState(msg) => (StatusCode::CONFLICT, "INVALID_STATE", msg.clone()),
            AppError::PaymentRequired(msg) => (
                StatusCode::PAYMENT_REQUIRED,
                "INSUFFICIENT_CREDITS",
                msg.clone(),
            ),
            AppError::Extraction(e) => {
                let status = match e {
                    ExtractionError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                    ExtractionError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    _ => StatusCode::UNPROCESSABLE_ENTITY,
                };
                (status, e.code(), e.to_string())
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Provider(msg) => {
                tracing::error!("Provider error: {msg}");
                (
                    StatusCode::BAD_GATEWAY,
                    "GENERATION_FAILED",
                    "Generation failed, please try again".to_string(),
                )
            }
            AppError::Unavailable(msg) => {
                tracing::error!("Service unavailable: {msg}");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "UNAVAILABLE",
                    "The service is shutting down, please retry".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
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
