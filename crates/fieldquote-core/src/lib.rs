//! # fieldquote-core: Pure Domain Model for the FieldQuote Sync Engine
//!
//! This crate holds every type the offline sync engine moves around, as plain
//! data with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     FieldQuote Offline Sync                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    UI (quote editor, sync widget)               │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │        fieldquote-sync (optimistic writes, replay engine)       │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │             ★ fieldquote-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │    ids    │  │   types   │  │  action   │  │ validation│  │   │
//! │  │   │ EntityId  │  │  Quote    │  │ Payload   │  │   rules   │  │   │
//! │  │   │ tmp-/real │  │ Customer  │  │ Queued    │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO STORE • NO NETWORK • PURE FUNCTIONS              │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │              fieldquote-db (Local Durable Store)                │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`ids`] - Temporary vs server-assigned entity identifiers
//! - [`types`] - Cached entities (Quote, Customer, LineItem, CachedBlob)
//! - [`action`] - The closed set of queued mutations
//! - [`conflict`] - Records the replay engine could not reconcile
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation for the optimistic write path
//!
//! ## Example Usage
//!
//! ```rust
//! use fieldquote_core::{ActionPayload, EntityId, QuoteUpdate, QuotePatch};
//!
//! let temp = EntityId::new_temporary();
//! assert!(temp.is_temporary());
//!
//! let mut update = ActionPayload::UpdateQuote(QuoteUpdate {
//!     quote_id: temp.clone(),
//!     patch: QuotePatch::default(),
//! });
//!
//! // Server confirmed the quote: rewrite the typed reference in place.
//! let real = EntityId::from("q-42");
//! assert_eq!(update.remap_reference(&temp, &real), 1);
//! assert!(update.unresolved_references().is_empty());
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod action;
pub mod conflict;
pub mod error;
pub mod ids;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use action::*;
pub use conflict::*;
pub use error::{CoreError, CoreResult, ValidationError};
pub use ids::{EntityId, EntityKind, IdMapping, TEMP_ID_PREFIX};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum line items accepted in a single `create_line_items` action.
pub const MAX_LINE_ITEMS_PER_ACTION: usize = 100;

/// Maximum quantity on a single line item.
///
/// ## Business Reason
/// Catches fat-finger entries on a phone keypad (10000 instead of 10).
pub const MAX_LINE_ITEM_QUANTITY: i64 = 9_999;

/// Maximum size of a captured photo or audio clip (25 MiB).
pub const MAX_BLOB_BYTES: usize = 25 * 1024 * 1024;
