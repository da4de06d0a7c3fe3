//! # Error Types
//!
//! Domain-specific error types for fieldquote-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  fieldquote-core errors (this file)                                    │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  fieldquote-db errors                                                  │
//! │  └── DbError          - Store failures (StorageUnavailable, ...)       │
//! │                                                                         │
//! │  fieldquote-sync errors                                                │
//! │  └── SyncError        - Config, remote and engine failures             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → UI                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::action::ActionKind;
use crate::ids::EntityKind;

// =============================================================================
// Core Error
// =============================================================================

/// Domain errors raised by the pure model.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Referenced entity is not in the local cache.
    #[error("{kind} not found: {id}")]
    EntityNotFound { kind: EntityKind, id: String },

    /// A replacement payload must keep the action's kind.
    ///
    /// ## When This Occurs
    /// A merge resolution supplies an `update_quote` payload for a
    /// dead-lettered `create_customer` action.
    #[error("payload kind mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        expected: ActionKind,
        actual: ActionKind,
    },

    /// Too many line items in one request.
    #[error("cannot add more than {max} line items at once")]
    TooManyLineItems { max: usize },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised by the optimistic write path before anything touches the store.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., malformed email, unknown content type).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::EntityNotFound {
            kind: EntityKind::Quote,
            id: "tmp-1".to_string(),
        };
        assert_eq!(err.to_string(), "quote not found: tmp-1");

        let err = CoreError::KindMismatch {
            expected: ActionKind::CreateCustomer,
            actual: ActionKind::UpdateQuote,
        };
        assert_eq!(
            err.to_string(),
            "payload kind mismatch: expected create_customer, got update_quote"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "title".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
        assert_eq!(core_err.to_string(), "Validation error: title is required");
    }
}
