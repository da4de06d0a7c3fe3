//! # Queued Actions
//!
//! The closed set of mutations the offline queue can hold.
//!
//! ## Payload Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │ QueuedAction                                                            │
//! │  id: 00000000000000000007 (monotonic, FIFO key)                         │
//! │  temp_id: tmp-… (set when the action creates an entity)                 │
//! │  retry_count / last_error / next_attempt_at                             │
//! │  payload ─┐                                                             │
//! │           ▼                                                             │
//! │  { "kind": "create_line_items",                                         │
//! │    "payload": { "quote_id": "tmp-…", "items": [ … ] } }                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every field holding an entity id is an [`EntityId`], reachable through
//! [`ActionPayload::remap_reference`]. Rewriting after a server confirmation
//! touches those typed fields only, never free text such as titles or notes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::ids::{EntityId, EntityKind};
use crate::types::{LineItem, QuotePatch};

// =============================================================================
// Action Kind
// =============================================================================

/// Discriminant of [`ActionPayload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateQuote,
    UpdateQuote,
    CreateLineItems,
    CreateCustomer,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CreateQuote => "create_quote",
            ActionKind::UpdateQuote => "update_quote",
            ActionKind::CreateLineItems => "create_line_items",
            ActionKind::CreateCustomer => "create_customer",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Payload Bodies
// =============================================================================

/// Body of a `create_quote` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQuote {
    /// Placeholder id the quote is cached under until confirmed.
    pub temp_id: EntityId,
    pub customer_id: Option<EntityId>,
    pub title: String,
    pub description: Option<String>,
}

/// Body of an `update_quote` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteUpdate {
    pub quote_id: EntityId,
    pub patch: QuotePatch,
}

/// Body of a `create_line_items` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLineItems {
    pub quote_id: EntityId,
    pub items: Vec<LineItem>,
}

/// Body of a `create_customer` action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub temp_id: EntityId,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

// =============================================================================
// Action Payload
// =============================================================================

/// A pending mutation. Matched exhaustively by the replay engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ActionPayload {
    CreateQuote(NewQuote),
    UpdateQuote(QuoteUpdate),
    CreateLineItems(NewLineItems),
    CreateCustomer(NewCustomer),
}

impl ActionPayload {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionPayload::CreateQuote(_) => ActionKind::CreateQuote,
            ActionPayload::UpdateQuote(_) => ActionKind::UpdateQuote,
            ActionPayload::CreateLineItems(_) => ActionKind::CreateLineItems,
            ActionPayload::CreateCustomer(_) => ActionKind::CreateCustomer,
        }
    }

    /// The placeholder id of the entity this action creates, if any.
    pub fn created_id(&self) -> Option<&EntityId> {
        match self {
            ActionPayload::CreateQuote(q) => Some(&q.temp_id),
            ActionPayload::CreateCustomer(c) => Some(&c.temp_id),
            ActionPayload::UpdateQuote(_) | ActionPayload::CreateLineItems(_) => None,
        }
    }

    fn created_id_mut(&mut self) -> Option<&mut EntityId> {
        match self {
            ActionPayload::CreateQuote(q) => Some(&mut q.temp_id),
            ActionPayload::CreateCustomer(c) => Some(&mut c.temp_id),
            ActionPayload::UpdateQuote(_) | ActionPayload::CreateLineItems(_) => None,
        }
    }

    /// Kind of entity created by this action, if any.
    pub fn created_kind(&self) -> Option<EntityKind> {
        match self {
            ActionPayload::CreateQuote(_) => Some(EntityKind::Quote),
            ActionPayload::CreateCustomer(_) => Some(EntityKind::Customer),
            ActionPayload::UpdateQuote(_) | ActionPayload::CreateLineItems(_) => None,
        }
    }

    /// Every field referencing another entity (excluding the created id).
    pub fn references(&self) -> Vec<&EntityId> {
        match self {
            ActionPayload::CreateQuote(q) => q.customer_id.iter().collect(),
            ActionPayload::UpdateQuote(u) => std::iter::once(&u.quote_id)
                .chain(u.patch.customer_id.iter())
                .collect(),
            ActionPayload::CreateLineItems(l) => std::iter::once(&l.quote_id)
                .chain(l.items.iter().map(|item| &item.quote_id))
                .collect(),
            ActionPayload::CreateCustomer(_) => Vec::new(),
        }
    }

    fn references_mut(&mut self) -> Vec<&mut EntityId> {
        match self {
            ActionPayload::CreateQuote(q) => q.customer_id.iter_mut().collect(),
            ActionPayload::UpdateQuote(u) => std::iter::once(&mut u.quote_id)
                .chain(u.patch.customer_id.iter_mut())
                .collect(),
            ActionPayload::CreateLineItems(l) => std::iter::once(&mut l.quote_id)
                .chain(l.items.iter_mut().map(|item| &mut item.quote_id))
                .collect(),
            ActionPayload::CreateCustomer(_) => Vec::new(),
        }
    }

    /// Distinct references still holding a temporary id.
    pub fn unresolved_references(&self) -> Vec<&EntityId> {
        let mut refs: Vec<&EntityId> = self
            .references()
            .into_iter()
            .filter(|id| id.is_temporary())
            .collect();
        refs.sort();
        refs.dedup();
        refs
    }

    /// True if the action creates or references `id`.
    pub fn touches(&self, id: &EntityId) -> bool {
        self.created_id() == Some(id) || self.references().contains(&id)
    }

    /// Rewrites every reference field equal to `temp` to `real`.
    ///
    /// Returns the number of fields rewritten. The created id is left alone:
    /// a create action is removed from the queue once confirmed.
    pub fn remap_reference(&mut self, temp: &EntityId, real: &EntityId) -> usize {
        let mut rewritten = 0;
        for field in self.references_mut() {
            if field == temp {
                *field = real.clone();
                rewritten += 1;
            }
        }
        rewritten
    }

    /// Resolves temporary references through `lookup` (usually the id map).
    ///
    /// Returns the number of fields rewritten.
    pub fn resolve_references<F>(&mut self, mut lookup: F) -> usize
    where
        F: FnMut(&EntityId) -> Option<EntityId>,
    {
        let mut rewritten = 0;
        for field in self.references_mut() {
            if !field.is_temporary() {
                continue;
            }
            if let Some(real) = lookup(field) {
                *field = real;
                rewritten += 1;
            }
        }
        rewritten
    }
}

// =============================================================================
// Queued Action
// =============================================================================

/// A mutation waiting in the offline queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedAction {
    /// Monotonic sequence number assigned at enqueue time.
    pub id: u64,

    pub payload: ActionPayload,

    /// Placeholder id of the entity this action creates.
    pub temp_id: Option<EntityId>,

    /// Failed replay attempts so far.
    pub retry_count: u32,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub last_error: Option<String>,

    /// Earliest time an automatic pass may retry this action.
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl QueuedAction {
    pub fn new(id: u64, payload: ActionPayload) -> Self {
        let temp_id = payload.created_id().cloned();
        QueuedAction {
            id,
            payload,
            temp_id,
            retry_count: 0,
            created_at: Utc::now(),
            last_error: None,
            next_attempt_at: None,
        }
    }

    #[inline]
    pub fn kind(&self) -> ActionKind {
        self.payload.kind()
    }

    /// Whether the backoff window has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Fresh retry budget, used when a dead-lettered action is restored.
    pub fn reset_retries(&mut self) {
        self.retry_count = 0;
        self.last_error = None;
        self.next_attempt_at = None;
    }

    /// Replaces the payload with one of the same kind.
    ///
    /// A create action keeps its original placeholder id so queued
    /// dependants still resolve against it.
    pub fn replace_payload(&mut self, mut payload: ActionPayload) -> CoreResult<()> {
        if payload.kind() != self.kind() {
            return Err(CoreError::KindMismatch {
                expected: self.kind(),
                actual: payload.kind(),
            });
        }
        if let (Some(original), Some(created)) = (&self.temp_id, payload.created_id_mut()) {
            *created = original.clone();
        }
        self.payload = payload;
        Ok(())
    }
}

/// An action set aside after terminal failure.
///
/// Keeps the original action (id included) so it can be restored to the
/// same queue position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub action: QueuedAction,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LineItemInput;

    fn line_items_for(quote_id: &EntityId) -> ActionPayload {
        let item = LineItem::from_input(
            quote_id.clone(),
            LineItemInput {
                description: "Labour tmp-quote".to_string(),
                quantity: 2,
                unit_price_cents: 6000,
            },
        );
        ActionPayload::CreateLineItems(NewLineItems {
            quote_id: quote_id.clone(),
            items: vec![item],
        })
    }

    #[test]
    fn test_payload_serializes_with_kind_tag() {
        let payload = ActionPayload::CreateCustomer(NewCustomer {
            temp_id: EntityId::from("tmp-c1"),
            name: "Ada".to_string(),
            email: None,
            phone: None,
            address: None,
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "create_customer");
        assert_eq!(json["payload"]["temp_id"], "tmp-c1");
    }

    #[test]
    fn test_remap_rewrites_typed_references_only() {
        let temp = EntityId::from("tmp-quote");
        let real = EntityId::from("q-42");
        let mut payload = line_items_for(&temp);

        assert_eq!(payload.unresolved_references(), vec![&temp]);
        assert_eq!(payload.remap_reference(&temp, &real), 2);
        assert!(payload.unresolved_references().is_empty());

        let ActionPayload::CreateLineItems(body) = &payload else {
            panic!("kind changed");
        };
        assert_eq!(body.items[0].quote_id, real);
        // free text that happens to contain the temp id is untouched
        assert_eq!(body.items[0].description, "Labour tmp-quote");

        // second application is a no-op
        assert_eq!(payload.remap_reference(&temp, &real), 0);
    }

    #[test]
    fn test_create_action_does_not_rewrite_its_own_id() {
        let mut payload = ActionPayload::CreateQuote(NewQuote {
            temp_id: EntityId::from("tmp-q1"),
            customer_id: Some(EntityId::from("tmp-c1")),
            title: "Fence".to_string(),
            description: None,
        });
        assert_eq!(payload.created_kind(), Some(EntityKind::Quote));
        assert!(payload.touches(&EntityId::from("tmp-q1")));
        assert!(payload.touches(&EntityId::from("tmp-c1")));

        let rewritten = payload.resolve_references(|id| {
            (id.as_str() == "tmp-c1").then(|| EntityId::from("c-7"))
        });
        assert_eq!(rewritten, 1);
        assert_eq!(payload.created_id(), Some(&EntityId::from("tmp-q1")));
        assert_eq!(payload.references(), vec![&EntityId::from("c-7")]);
    }

    #[test]
    fn test_update_patch_customer_is_a_reference() {
        let payload = ActionPayload::UpdateQuote(QuoteUpdate {
            quote_id: EntityId::from("q-1"),
            patch: QuotePatch {
                customer_id: Some(EntityId::from("tmp-c9")),
                ..Default::default()
            },
        });
        assert_eq!(payload.unresolved_references(), vec![&EntityId::from("tmp-c9")]);
    }

    #[test]
    fn test_replace_payload_keeps_kind_and_temp_id() {
        let original = ActionPayload::CreateCustomer(NewCustomer {
            temp_id: EntityId::from("tmp-c1"),
            name: "Ada".to_string(),
            email: Some("ada@example".to_string()),
            phone: None,
            address: None,
        });
        let mut action = QueuedAction::new(7, original);
        assert_eq!(action.temp_id, Some(EntityId::from("tmp-c1")));

        let merged = ActionPayload::CreateCustomer(NewCustomer {
            temp_id: EntityId::from("tmp-other"),
            name: "Ada Lovelace".to_string(),
            email: Some("ada@example.com".to_string()),
            phone: None,
            address: None,
        });
        action.replace_payload(merged).unwrap();
        assert_eq!(action.payload.created_id(), Some(&EntityId::from("tmp-c1")));

        let wrong_kind = line_items_for(&EntityId::from("q-1"));
        let err = action.replace_payload(wrong_kind).unwrap_err();
        assert!(matches!(err, CoreError::KindMismatch { .. }));
    }

    #[test]
    fn test_backoff_window() {
        let mut action = QueuedAction::new(1, line_items_for(&EntityId::from("q-1")));
        let now = Utc::now();
        assert!(action.is_due(now));

        action.retry_count = 3;
        action.next_attempt_at = Some(now + chrono::Duration::seconds(30));
        assert!(!action.is_due(now));

        action.reset_retries();
        assert_eq!(action.retry_count, 0);
        assert!(action.is_due(now));
    }
}
