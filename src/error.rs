// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the offline engine.
//!
//! Three families, one sum type:
//!
//! - [`ValidationError`] - rejected input, always raised before any mutation
//! - [`StorageError`] - the persistent store failed (see [`crate::storage`])
//! - [`OperationError`] - a valid request that cannot proceed right now
//!
//! A bulk run with failed items is NOT an error: it returns a
//! [`crate::BulkOperationResult`] whose `errors` list is the per-item record.

use thiserror::Error;

pub use crate::storage::traits::StorageError;

/// How loudly an error should surface to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No items selected")]
    EmptySelection,
    #[error("A reason is required for {operation}")]
    EmptyReason { operation: String },
    #[error("Batch of {size} items exceeds the maximum of {max}")]
    BatchSizeExceeded { size: usize, max: usize },
    #[error("Item '{item_id}' is {status} and cannot be {operation}")]
    InvalidState {
        item_id: String,
        status: String,
        operation: String,
    },
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("Operation {operation_id} was cancelled")]
    Cancelled { operation_id: String },
    #[error("Bulk operation {operation_id} is already in progress")]
    AlreadyInProgress { operation_id: String },
    #[error("No operation available to undo")]
    UndoUnavailable,
    #[error("Undo window for operation {operation_id} has expired")]
    UndoExpired { operation_id: String },
    #[error("Invalid request state: {0}")]
    InvalidRequestState(String),
    #[error("Engine is not ready (state: {state})")]
    NotReady { state: String },
}

/// Top-level engine error.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Operation(#[from] OperationError),
}

impl EngineError {
    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(e) => match e {
                ValidationError::EmptySelection => "VALIDATION_EMPTY_SELECTION",
                ValidationError::EmptyReason { .. } => "VALIDATION_EMPTY_REASON",
                ValidationError::BatchSizeExceeded { .. } => "VALIDATION_BATCH_SIZE_EXCEEDED",
                ValidationError::InvalidState { .. } => "VALIDATION_INVALID_STATE",
                ValidationError::UnsupportedFormat(_) => "VALIDATION_UNSUPPORTED_FORMAT",
            },
            Self::Storage(e) => match e {
                StorageError::NotFound { .. } => "STORAGE_NOT_FOUND",
                StorageError::Backend(_) => "STORAGE_BACKEND",
                StorageError::InsufficientSpace { .. } => "STORAGE_INSUFFICIENT_SPACE",
                StorageError::Corruption { .. } => "STORAGE_CORRUPTED",
                StorageError::Serialization(_) => "STORAGE_SERIALIZATION",
                StorageError::SchemaMismatch { .. } => "STORAGE_SCHEMA_MISMATCH",
                StorageError::Unavailable(_) => "STORAGE_UNAVAILABLE",
                StorageError::InvalidTransition { .. } => "STORAGE_INVALID_TRANSITION",
            },
            Self::Operation(e) => match e {
                OperationError::Cancelled { .. } => "OPERATION_CANCELLED",
                OperationError::AlreadyInProgress { .. } => "OPERATION_IN_PROGRESS",
                OperationError::UndoUnavailable => "OPERATION_UNDO_UNAVAILABLE",
                OperationError::UndoExpired { .. } => "OPERATION_UNDO_EXPIRED",
                OperationError::InvalidRequestState(_) => "OPERATION_INVALID_STATE",
                OperationError::NotReady { .. } => "OPERATION_NOT_READY",
            },
        }
    }

    /// Whether the same call may succeed if repeated later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Storage(e) => matches!(e, StorageError::Backend(_) | StorageError::Unavailable(_)),
            Self::Operation(e) => matches!(
                e,
                OperationError::AlreadyInProgress { .. } | OperationError::NotReady { .. }
            ),
        }
    }

    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Validation(_) => Severity::Low,
            Self::Storage(e) if e.is_fatal() => Severity::Critical,
            Self::Storage(StorageError::Corruption { .. }) => Severity::High,
            Self::Storage(_) => Severity::Medium,
            Self::Operation(OperationError::NotReady { .. }) => Severity::Medium,
            Self::Operation(_) => Severity::Low,
        }
    }

    /// Text suitable for showing to an end user.
    #[must_use]
    pub fn display_message(&self) -> String {
        match self {
            Self::Validation(e) => e.to_string(),
            Self::Storage(e) if e.is_fatal() => {
                "Local storage is unavailable. Please free up space or restart the app.".to_string()
            }
            Self::Storage(_) => "Could not access local data. Please try again.".to_string(),
            Self::Operation(OperationError::UndoUnavailable) => "Nothing to undo.".to_string(),
            Self::Operation(OperationError::UndoExpired { .. }) => {
                "This operation can no longer be undone.".to_string()
            }
            Self::Operation(e) => e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_per_family() {
        let v: EngineError = ValidationError::EmptySelection.into();
        let s: EngineError = StorageError::Backend("boom".into()).into();
        let o: EngineError = OperationError::UndoUnavailable.into();

        assert_eq!(v.code(), "VALIDATION_EMPTY_SELECTION");
        assert_eq!(s.code(), "STORAGE_BACKEND");
        assert_eq!(o.code(), "OPERATION_UNDO_UNAVAILABLE");
    }

    #[test]
    fn test_retryable() {
        assert!(!EngineError::from(ValidationError::EmptySelection).is_retryable());
        assert!(EngineError::from(StorageError::Backend("x".into())).is_retryable());
        assert!(!EngineError::from(StorageError::SchemaMismatch { found: 3, supported: 1 }).is_retryable());
        assert!(EngineError::from(OperationError::AlreadyInProgress { operation_id: "op".into() }).is_retryable());
    }

    #[test]
    fn test_severity_ordering() {
        let fatal = EngineError::from(StorageError::Unavailable("disk gone".into()));
        let validation = EngineError::from(ValidationError::EmptySelection);
        assert_eq!(fatal.severity(), Severity::Critical);
        assert!(validation.severity() < fatal.severity());
    }

    #[test]
    fn test_display_message() {
        let err = EngineError::from(ValidationError::BatchSizeExceeded { size: 101, max: 100 });
        assert_eq!(err.display_message(), "Batch of 101 items exceeds the maximum of 100");

        let err = EngineError::from(OperationError::UndoUnavailable);
        assert_eq!(err.display_message(), "Nothing to undo.");
    }
}
