//! # Entity Identifiers
//!
//! Every cached record is keyed by an [`EntityId`]. Records created offline
//! carry a client-generated temporary id until the server assigns a real one.
//!
//! ```text
//!   create offline            server confirms            id map
//!   ──────────────► tmp-8f3c… ───────────────► q-42   (tmp-8f3c… → q-42)
//! ```
//!
//! Temporary ids are recognisable by their prefix so any reference field can
//! be checked without consulting the store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

/// Prefix marking a client-generated placeholder id.
pub const TEMP_ID_PREFIX: &str = "tmp-";

// =============================================================================
// Entity Id
// =============================================================================

/// Identifier of a quote, customer or other server-backed record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(transparent)]
#[ts(export)]
pub struct EntityId(String);

impl EntityId {
    /// Wraps an id string as-is.
    pub fn new(id: impl Into<String>) -> Self {
        EntityId(id.into())
    }

    /// Generates a fresh temporary id (`tmp-<uuid>`).
    pub fn new_temporary() -> Self {
        EntityId(format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4()))
    }

    /// True while the id is a client placeholder.
    #[inline]
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        EntityId(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        EntityId(s)
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Entity Kind
// =============================================================================

/// Kinds of record the sync engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum EntityKind {
    Quote,
    Customer,
    LineItem,
    Blob,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Quote => "quote",
            EntityKind::Customer => "customer",
            EntityKind::LineItem => "line_item",
            EntityKind::Blob => "blob",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Id Mapping
// =============================================================================

/// One row of the temp → real mapping table.
///
/// Consulted when a queued payload still references a temp id whose creator
/// has already been confirmed, possibly earlier in the same replay pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    pub temp_id: EntityId,
    pub real_id: EntityId,
    pub kind: EntityKind,
    pub mapped_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_ids() {
        let temp = EntityId::new_temporary();
        assert!(temp.is_temporary());
        assert!(temp.as_str().starts_with("tmp-"));
        assert_ne!(temp, EntityId::new_temporary());

        assert!(!EntityId::from("q-42").is_temporary());
        // prefix must lead, not merely appear
        assert!(!EntityId::from("q-tmp-42").is_temporary());
    }

    #[test]
    fn test_entity_id_serializes_as_plain_string() {
        let id = EntityId::from("q-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"q-42\"");
        let back: EntityId = serde_json::from_str("\"tmp-1\"").unwrap();
        assert!(back.is_temporary());
    }

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(EntityKind::LineItem.to_string(), "line_item");
        assert_eq!(
            serde_json::to_string(&EntityKind::Customer).unwrap(),
            "\"customer\""
        );
    }
}
