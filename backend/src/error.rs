//! Error handling for the ledger server
//!
//! Provides consistent JSON error responses with stable error codes

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ledger_core::{LedgerError, LedgerKey, ReplayError};
use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    // Ledger decisions
    #[error("{0}")]
    Ledger(#[from] LedgerError),

    #[error("Ledger {key} could not be rebuilt: {source}")]
    ReplayFailed { key: LedgerKey, source: ReplayError },

    // Concurrency and orchestration errors
    #[error("Version conflict on ledger {key}: version {version} already written")]
    VersionConflict { key: LedgerKey, version: u64 },

    #[error("Ledger worker unavailable: {0}")]
    WorkerUnavailable(String),

    #[error("Transfer {transfer_id} incomplete: {message}")]
    TransferIncomplete {
        transfer_id: String,
        message: String,
    },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Storage errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl AppError {
    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::VersionConflict { .. }
                | AppError::WorkerUnavailable(_)
                | AppError::DatabaseError(_)
        )
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by_key(|(field, _)| *field);

        let (field, message) = fields
            .first()
            .map(|(field, errors)| {
                let message = errors
                    .first()
                    .and_then(|error| error.message.as_ref().map(|m| m.to_string()))
                    .unwrap_or_else(|| "Invalid value".to_string());
                (field.to_string(), message)
            })
            .unwrap_or_else(|| ("request".to_string(), "Invalid request".to_string()));

        AppError::Validation { field, message }
    }
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorDetail {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            field: None,
        }
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_detail) = match &self {
            AppError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                ErrorDetail::new("VALIDATION_ERROR", message.clone()).with_field(field.clone()),
            ),
            AppError::Ledger(err) => ledger_error_detail(err),
            AppError::ReplayFailed { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("LEDGER_REPLAY_FAILED", self.to_string()),
            ),
            AppError::VersionConflict { .. } => (
                StatusCode::CONFLICT,
                ErrorDetail::new("VERSION_CONFLICT", self.to_string()),
            ),
            AppError::WorkerUnavailable(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorDetail::new("WORKER_UNAVAILABLE", self.to_string()),
            ),
            AppError::TransferIncomplete { transfer_id, .. } => (
                StatusCode::BAD_GATEWAY,
                ErrorDetail::new("TRANSFER_INCOMPLETE", self.to_string())
                    .with_field(transfer_id.clone()),
            ),
            AppError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                ErrorDetail::new("NOT_FOUND", format!("{} not found", resource)),
            ),
            AppError::DatabaseError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorDetail::new("DATABASE_ERROR", "A database error occurred"),
            ),
        };

        // Log the error for debugging
        if status.is_server_error() {
            tracing::error!("Error: {:?}", self);
        } else {
            tracing::debug!("Rejected request: {}", self);
        }

        (status, Json(ErrorResponse { error: error_detail })).into_response()
    }
}

fn ledger_error_detail(err: &LedgerError) -> (StatusCode, ErrorDetail) {
    match err {
        LedgerError::Validation { field, message } => (
            StatusCode::BAD_REQUEST,
            ErrorDetail::new("VALIDATION_ERROR", *message).with_field(*field),
        ),
        LedgerError::MissingFallbackCost { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorDetail::new("FALLBACK_COST_REQUIRED", err.to_string())
                .with_field("fallback_unit_cost"),
        ),
        LedgerError::DuplicateBatch(_) => (
            StatusCode::CONFLICT,
            ErrorDetail::new("DUPLICATE_BATCH", err.to_string()).with_field("batch_id"),
        ),
        LedgerError::UnknownBatch(_) => (
            StatusCode::NOT_FOUND,
            ErrorDetail::new("NOT_FOUND", err.to_string()).with_field("batch_id"),
        ),
        LedgerError::BatchNotActive { .. } => (
            StatusCode::CONFLICT,
            ErrorDetail::new("BATCH_NOT_ACTIVE", err.to_string()).with_field("batch_id"),
        ),
        LedgerError::IdempotencyKeyReused { .. } => (
            StatusCode::CONFLICT,
            ErrorDetail::new("IDEMPOTENCY_KEY_REUSED", err.to_string()).with_field("idempotency_key"),
        ),
        LedgerError::Overflow => (
            StatusCode::UNPROCESSABLE_ENTITY,
            ErrorDetail::new("AMOUNT_OUT_OF_RANGE", err.to_string()),
        ),
        LedgerError::Replay(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetail::new("LEDGER_REPLAY_FAILED", err.to_string()),
        ),
    }
}

/// Result type alias for handlers
pub type AppResult<T> = Result<T, AppError>;
