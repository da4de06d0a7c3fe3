//! # Domain Types
//!
//! Cached records the technician works with while in the field.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Cached Entities                                 │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Customer     │   │      Quote      │   │    LineItem     │       │
//! │  │  ─────────────  │◄──│  ─────────────  │◄──│  ─────────────  │       │
//! │  │  id (EntityId)  │   │  id (EntityId)  │   │  id (local)     │       │
//! │  │  name           │   │  customer_id    │   │  quote_id       │       │
//! │  │  email, phone   │   │  title, status  │   │  qty × price    │       │
//! │  └─────────────────┘   │  total_cents    │   └─────────────────┘       │
//! │                        └────────▲────────┘                              │
//! │                                 │                                       │
//! │                        ┌────────┴────────┐                              │
//! │                        │   CachedBlob    │  photo / audio, uploaded     │
//! │                        │  local_ref      │  separately from the queue   │
//! │                        └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Arrows are entity references. Any of them may hold a temporary id while
//! the referenced record has not been confirmed by the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::ids::EntityId;

// =============================================================================
// Quote
// =============================================================================

/// Lifecycle of a quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum QuoteStatus {
    #[default]
    Draft,
    Sent,
    Accepted,
    Declined,
}

/// A quote as mirrored in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Quote {
    /// Temporary until the server confirms the quote.
    pub id: EntityId,

    /// Customer this quote is for, possibly still temporary.
    pub customer_id: Option<EntityId>,

    pub title: String,

    pub description: Option<String>,

    pub status: QuoteStatus,

    /// Sum of line item totals in cents.
    pub total_cents: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Quote {
    /// Builds a new draft quote from user input.
    pub fn from_input(id: EntityId, input: QuoteInput) -> Self {
        let now = Utc::now();
        Quote {
            id,
            customer_id: input.customer_id,
            title: input.title.trim().to_string(),
            description: input.description,
            status: QuoteStatus::Draft,
            total_cents: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Recomputes `total_cents` from the quote's line items.
    pub fn recompute_total<'a>(&mut self, items: impl IntoIterator<Item = &'a LineItem>) {
        self.total_cents = items.into_iter().map(LineItem::line_total_cents).sum();
    }
}

/// User input for a new quote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QuoteInput {
    pub customer_id: Option<EntityId>,
    pub title: String,
    pub description: Option<String>,
}

/// Partial update to a quote. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QuotePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<QuoteStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<EntityId>,
}

impl QuotePatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.customer_id.is_none()
    }

    /// Applies the patch to a cached quote.
    pub fn apply_to(&self, quote: &mut Quote) {
        if let Some(title) = &self.title {
            quote.title = title.trim().to_string();
        }
        if let Some(description) = &self.description {
            quote.description = Some(description.clone());
        }
        if let Some(status) = self.status {
            quote.status = status;
        }
        if let Some(customer_id) = &self.customer_id {
            quote.customer_id = Some(customer_id.clone());
        }
        quote.updated_at = Utc::now();
    }
}

// =============================================================================
// Customer
// =============================================================================

/// A customer as mirrored in the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Customer {
    pub id: EntityId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn from_input(id: EntityId, input: CustomerInput) -> Self {
        let now = Utc::now();
        Customer {
            id,
            name: input.name.trim().to_string(),
            email: input.email,
            phone: input.phone,
            address: input.address,
            created_at: now,
            updated_at: now,
        }
    }
}

/// User input for a new customer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CustomerInput {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

// =============================================================================
// Line Item
// =============================================================================

/// A priced line on a quote.
///
/// Line items get a local UUID at creation and are never re-keyed; only
/// their `quote_id` reference is rewritten when the quote is confirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineItem {
    pub id: String,
    pub quote_id: EntityId,
    pub description: String,
    pub quantity: i64,
    pub unit_price_cents: i64,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl LineItem {
    pub fn from_input(quote_id: EntityId, input: LineItemInput) -> Self {
        LineItem {
            id: Uuid::new_v4().to_string(),
            quote_id,
            description: input.description.trim().to_string(),
            quantity: input.quantity,
            unit_price_cents: input.unit_price_cents,
            created_at: Utc::now(),
        }
    }

    /// quantity × unit price, saturating rather than wrapping.
    #[inline]
    pub fn line_total_cents(&self) -> i64 {
        self.quantity.saturating_mul(self.unit_price_cents)
    }
}

/// User input for one line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LineItemInput {
    pub description: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

// =============================================================================
// Cached Blob
// =============================================================================

/// Media captured on site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum BlobKind {
    Photo,
    Audio,
}

impl BlobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobKind::Photo => "photo",
            BlobKind::Audio => "audio",
        }
    }
}

/// Photo or audio payload awaiting upload.
///
/// ## Delivery Rules
/// - Associated with its quote by reference, never inlined in a queued action
/// - `uploaded` flips to true only after the server acknowledged the upload
/// - Deleted from the store only after `uploaded` is observed true
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedBlob {
    /// Device-local identifier, also the upload key.
    pub local_ref: String,

    pub quote_id: EntityId,

    pub kind: BlobKind,

    pub content_type: String,

    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,

    pub uploaded: bool,

    /// Durable storage path returned by the upload API.
    pub remote_path: Option<String>,

    /// Set when the upload API rejected the blob; cleared on user retry.
    #[serde(default)]
    pub rejected: Option<String>,

    pub captured_at: DateTime<Utc>,
}

impl CachedBlob {
    pub fn new(quote_id: EntityId, kind: BlobKind, content_type: String, data: Vec<u8>) -> Self {
        CachedBlob {
            local_ref: Uuid::new_v4().to_string(),
            quote_id,
            kind,
            content_type,
            data,
            uploaded: false,
            remote_path: None,
            rejected: None,
            captured_at: Utc::now(),
        }
    }

    /// Still owed to the server.
    #[inline]
    pub fn is_pending(&self) -> bool {
        !self.uploaded
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Queue Count
// =============================================================================

/// What the connectivity widget displays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct QueueCount {
    /// Queued actions not yet confirmed by the server.
    pub pending_actions: u64,

    /// Photos/audio with `uploaded = false`.
    pub pending_blobs: u64,

    /// Conflicts awaiting user resolution.
    pub conflicts: u64,
}

impl QueueCount {
    /// Pending actions plus unresolved conflicts.
    pub fn pending_total(&self) -> u64 {
        self.pending_actions + self.conflicts
    }

    pub fn is_idle(&self) -> bool {
        self.pending_actions == 0 && self.pending_blobs == 0 && self.conflicts == 0
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: i64, unit_price_cents: i64) -> LineItem {
        LineItem::from_input(
            EntityId::from("q-1"),
            LineItemInput {
                description: "Copper pipe".to_string(),
                quantity,
                unit_price_cents,
            },
        )
    }

    #[test]
    fn test_quote_total_from_line_items() {
        let mut quote = Quote::from_input(
            EntityId::new_temporary(),
            QuoteInput {
                title: "  Boiler service ".to_string(),
                ..Default::default()
            },
        );
        assert_eq!(quote.title, "Boiler service");
        assert_eq!(quote.status, QuoteStatus::Draft);

        let items = vec![item(2, 1500), item(1, 4999)];
        quote.recompute_total(&items);
        assert_eq!(quote.total_cents, 7999);
    }

    #[test]
    fn test_patch_only_touches_set_fields() {
        let mut quote = Quote::from_input(
            EntityId::from("q-1"),
            QuoteInput {
                title: "Roof".to_string(),
                description: Some("flat roof".to_string()),
                ..Default::default()
            },
        );
        let patch = QuotePatch {
            status: Some(QuoteStatus::Sent),
            ..Default::default()
        };
        assert!(!patch.is_empty());
        patch.apply_to(&mut quote);
        assert_eq!(quote.status, QuoteStatus::Sent);
        assert_eq!(quote.title, "Roof");
        assert_eq!(quote.description.as_deref(), Some("flat roof"));

        assert!(QuotePatch::default().is_empty());
    }

    #[test]
    fn test_blob_data_is_base64_in_json() {
        let blob = CachedBlob::new(
            EntityId::from("q-1"),
            BlobKind::Photo,
            "image/jpeg".to_string(),
            vec![0xff, 0xd8, 0xff],
        );
        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(json["data"], "/9j/");
        assert_eq!(json["uploaded"], false);

        let back: CachedBlob = serde_json::from_value(json).unwrap();
        assert_eq!(back.data, vec![0xff, 0xd8, 0xff]);
        assert!(back.is_pending());
    }

    #[test]
    fn test_queue_count_totals() {
        let count = QueueCount {
            pending_actions: 3,
            pending_blobs: 1,
            conflicts: 1,
        };
        assert_eq!(count.pending_total(), 4);
        assert!(!count.is_idle());
        assert!(QueueCount::default().is_idle());
    }
}
