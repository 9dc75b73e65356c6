//! Error handling for the bakery fulfillment engine
//!
//! Every fallible engine operation returns `AppResult`. Collaborators that
//! need a stable representation use `AppError::detail`.

use serde::Serialize;
use shared::{AllocationError, OrderStatus, SelectionError, StockRef};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation error: {message}")]
    Validation { field: String, message: String },

    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business logic errors
    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: OrderStatus,
        to: OrderStatus,
        reason: String,
    },

    #[error("Insufficient stock for {name} ({stock}): required {required}, available {available}")]
    InsufficientStock {
        stock: StockRef,
        name: String,
        required: i64,
        available: i64,
    },

    // Concurrency errors
    #[error("Transaction conflict: {0}")]
    TransactionConflict(String),

    #[error("{operation} gave up after {attempts} conflicting attempts")]
    RetryExhausted { operation: String, attempts: u32 },

    // Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // Internal errors
    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

/// Error detail handed to collaborators
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub retryable: bool,
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::DuplicateEntry(_) => "DUPLICATE_ENTRY",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            AppError::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            AppError::TransactionConflict(_) => "TRANSACTION_CONFLICT",
            AppError::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            AppError::Persistence(_) => "PERSISTENCE_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Conflicts are retried inside the engine
    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::TransactionConflict(_))
    }

    /// The caller may resubmit the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::TransactionConflict(_) | AppError::RetryExhausted { .. }
        )
    }

    pub fn detail(&self) -> ErrorDetail {
        let field = match self {
            AppError::Validation { field, .. } => Some(field.clone()),
            AppError::DuplicateEntry(field) => Some(field.clone()),
            AppError::InsufficientStock { stock, .. } => Some(stock.to_string()),
            _ => None,
        };

        let message = match self {
            // Driver and internal errors are logged, not exposed
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        ErrorDetail {
            code: self.code().to_string(),
            message,
            field,
            retryable: self.is_retryable(),
        }
    }
}

impl From<SelectionError> for AppError {
    fn from(err: SelectionError) -> Self {
        AppError::validation("varieties", err.to_string())
    }
}

impl From<AllocationError> for AppError {
    fn from(err: AllocationError) -> Self {
        match err {
            AllocationError::InvalidQuantity => AppError::validation("quantity", err.to_string()),
            AllocationError::Selection(selection) => selection.into(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let field = errors
            .field_errors()
            .keys()
            .next()
            .map(|f| f.to_string())
            .unwrap_or_else(|| "input".to_string());
        AppError::validation(field, errors.to_string())
    }
}

/// Result type alias for engine operations
pub type AppResult<T> = Result<T, AppError>;
