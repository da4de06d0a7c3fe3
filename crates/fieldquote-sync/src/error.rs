//! # Sync Error Types
//!
//! Error types for sync operations.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │    Storage      │  │     Write Path          │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Storage        │  │  Validation             │ │
//! │  │  MissingDeviceId│  │  Unavailable    │  │  NotFound               │ │
//! │  │  InvalidUrl     │  │                 │  │  ResolutionRejected     │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │     Remote      │  │    Internal     │                              │
//! │  │                 │  │                 │                              │
//! │  │  Remote(..)     │  │  ShuttingDown   │                              │
//! │  │  Http           │  │  ChannelError   │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Errors raised inside a replay pass never leave it: the engine converts
//! them to a [`ReplayFailure`](crate::status::ReplayFailure) in the status.

use fieldquote_core::{CoreError, ValidationError};
use fieldquote_db::DbError;
use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Sync error type covering all failures surfaced to callers.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Missing device ID.
    #[error("Device ID not configured")]
    MissingDeviceId,

    /// Invalid API URL.
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Local durable store cannot be used.
    #[error("Local storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Any other store failure.
    #[error("Database error: {0}")]
    DatabaseError(String),

    // =========================================================================
    // Write Path Errors
    // =========================================================================
    /// Input rejected before anything was written.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Domain rule violated.
    #[error(transparent)]
    Domain(CoreError),

    /// Referenced record does not exist locally.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The requested conflict resolution cannot be applied.
    #[error("Cannot apply resolution: {0}")]
    ResolutionRejected(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// The remote API refused or failed a request.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(String),

    /// Failed to serialize or deserialize a payload.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Agent is shutting down.
    #[error("Sync agent is shutting down")]
    ShuttingDown,

    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::StorageUnavailable(msg) => SyncError::StorageUnavailable(msg),
            DbError::NotFound { entity, id } => SyncError::NotFound { entity, id },
            other => SyncError::DatabaseError(other.to_string()),
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(v) => SyncError::Validation(v),
            CoreError::EntityNotFound { kind, id } => SyncError::NotFound {
                entity: kind.to_string(),
                id,
            },
            other => SyncError::Domain(other),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Http(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// Returns true if the operation can be retried later.
    ///
    /// ## Retryable Errors
    /// - Remote unavailable, timeouts, server errors
    /// - Pool exhaustion and similar transient store errors
    ///
    /// ## Non-Retryable Errors
    /// - Configuration and validation errors
    /// - Rejected mutations
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(remote) => remote.is_transient(),
            SyncError::DatabaseError(_) | SyncError::ChannelError(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }

    /// Returns true if the local store could not be used.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, SyncError::StorageUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldquote_core::EntityKind;

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::Remote(RemoteError::Unavailable("connection refused".into())).is_retryable());
        assert!(SyncError::Remote(RemoteError::Timeout(10)).is_retryable());

        assert!(!SyncError::Remote(RemoteError::Rejected {
            status: 422,
            message: "customer missing".into()
        })
        .is_retryable());
        assert!(!SyncError::InvalidConfig("bad".into()).is_retryable());
        assert!(!SyncError::MissingDeviceId.is_retryable());
    }

    #[test]
    fn test_db_error_mapping() {
        let err: SyncError = DbError::StorageUnavailable("disk full".into()).into();
        assert!(err.is_storage_unavailable());

        let err: SyncError = DbError::not_found("Quote", "tmp-1").into();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }

    #[test]
    fn test_core_error_mapping() {
        let err: SyncError = CoreError::EntityNotFound {
            kind: EntityKind::Quote,
            id: "q-9".into(),
        }
        .into();
        assert_eq!(err.to_string(), "quote not found: q-9");
        assert!(!err.is_config_error());
    }
}
