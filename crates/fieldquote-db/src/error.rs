//! # Store Error Types
//!
//! Error types for Local Durable Store operations.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Error Propagation                                    │
//! │                                                                         │
//! │  SQLite Error (sqlx::Error)      serde_json::Error                     │
//! │       │                                │                                │
//! │       ▼                                ▼                                │
//! │  DbError (this module) ← Adds categorization                           │
//! │       │                                                                 │
//! │       ├── is_storage_unavailable() → degrade to in-memory, warn        │
//! │       ▼                                                                 │
//! │  SyncError (fieldquote-sync) → status indicator / caller               │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::store::Collection;

/// Store operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Underlying storage cannot be used.
    ///
    /// ## When This Occurs
    /// - Database file can't be created or opened (permissions, read-only media)
    /// - Disk full / quota exceeded
    /// - Pool closed during shutdown
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Migration failed.
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Transaction failed, or an operation escaped its declared scope.
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Collection was not declared when the transaction began.
    #[error("Collection {0} is outside the transaction scope")]
    OutOfScope(Collection),

    /// Stored JSON does not match the expected shape.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A store invariant would be broken by the requested write.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// Pool exhausted (all connections in use).
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// Internal database error.
    #[error("Internal database error: {0}")]
    Internal(String),
}

impl DbError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        DbError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// True when callers should fall back to in-memory mode.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, DbError::StorageUnavailable(_))
    }
}

/// Convert sqlx errors to DbError.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::RowNotFound      → DbError::NotFound
/// sqlx::Error::Database         → full/readonly/cantopen → StorageUnavailable
///                                 otherwise               → QueryFailed
/// sqlx::Error::Io               → DbError::StorageUnavailable
/// sqlx::Error::PoolTimedOut     → DbError::PoolExhausted
/// sqlx::Error::PoolClosed       → DbError::StorageUnavailable
/// Other                         → DbError::Internal
/// ```
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => DbError::not_found("Record", "unknown"),

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message();
                let lower = msg.to_ascii_lowercase();

                // SQLITE_FULL, SQLITE_READONLY, SQLITE_CANTOPEN, SQLITE_IOERR
                if lower.contains("database or disk is full")
                    || lower.contains("readonly")
                    || lower.contains("unable to open")
                    || lower.contains("disk i/o error")
                {
                    DbError::StorageUnavailable(msg.to_string())
                } else {
                    DbError::QueryFailed(msg.to_string())
                }
            }

            sqlx::Error::Io(io_err) => DbError::StorageUnavailable(io_err.to_string()),

            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,

            sqlx::Error::PoolClosed => DbError::StorageUnavailable("Pool is closed".to_string()),

            _ => DbError::Internal(err.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        DbError::MigrationFailed(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

/// Result type for store operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_unavailable_classification() {
        assert!(DbError::from(sqlx::Error::PoolClosed).is_storage_unavailable());
        assert!(!DbError::from(sqlx::Error::PoolTimedOut).is_storage_unavailable());

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only fs");
        assert!(DbError::from(sqlx::Error::Io(io)).is_storage_unavailable());
    }

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        assert!(matches!(DbError::from(err), DbError::Serialization(_)));
    }

    #[test]
    fn test_out_of_scope_message() {
        let err = DbError::OutOfScope(Collection::Blobs);
        assert_eq!(err.to_string(), "Collection blobs is outside the transaction scope");
    }
}
