//! # fieldquote-db: Local Durable Store for FieldQuote
//!
//! Everything the sync engine persists on the device lives behind this
//! crate: the action queue, cached entities, blobs, the id map, dead-letter
//! entries and unresolved conflicts.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      FieldQuote Data Flow                               │
//! │                                                                         │
//! │  OptimisticWriter / SyncEngine (fieldquote-sync)                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  fieldquote-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │  Repositories │    │ DurableStore  │    │  Migrations  │  │   │
//! │  │   │ actions/blobs │───►│ SqliteStore   │    │  (embedded)  │  │   │
//! │  │   │ entities/...  │    │ MemoryStore   │    │ 001_local_   │  │   │
//! │  │   │ IdRemapper    │    │ (degraded)    │    │  store.sql   │  │   │
//! │  │   └───────────────┘    └───────┬───────┘    └──────────────┘  │   │
//! │  │                                │                                │   │
//! │  └────────────────────────────────┼────────────────────────────────┘   │
//! │                                   ▼                                     │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   <data dir>/fieldquote/fieldquote.db                           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`store`] - Collection-scoped store trait, SQLite and in-memory backends
//! - [`repository`] - Typed repositories over the store
//! - [`remap`] - Atomic temp → real id rewriting
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fieldquote_db::{open_store, DbConfig, Repositories};
//!
//! let opened = open_store(DbConfig::new("path/to/fieldquote.db"), true).await?;
//! let repos = Repositories::new(opened.store);
//!
//! let action = repos.actions().enqueue(payload).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod remap;
pub mod repository;
pub mod store;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};
pub use remap::{IdRemapper, RemapOutcome};
pub use store::{
    open_store, Collection, DurableStore, MemoryStore, OpenedStore, SqliteStore, StorageMode,
    StoreTransaction,
};

// Repository re-exports for convenience
pub use repository::{
    ActionRepository, BlobRepository, ConflictRepository, DeadLetterRepository, EntityCache,
    IdMapRepository, Repositories,
};
