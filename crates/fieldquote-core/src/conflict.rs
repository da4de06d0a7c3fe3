//! # Conflicts
//!
//! Records the replay engine could not reconcile on its own. They stay on
//! the user's list until explicitly resolved.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::action::{ActionKind, ActionPayload};
use crate::ids::{EntityId, EntityKind};

/// The record a conflict is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ConflictEntity {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl ConflictEntity {
    pub fn new(kind: EntityKind, id: EntityId) -> Self {
        ConflictEntity { kind, id }
    }
}

impl fmt::Display for ConflictEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// Why the engine gave up on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum ConflictReason {
    /// Retry budget exhausted on transient failures.
    RetriesExhausted,
    /// Server refused the mutation for a business reason.
    Rejected,
    /// A temporary reference whose creator no longer exists anywhere.
    DanglingReference,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::RetriesExhausted => "retries_exhausted",
            ConflictReason::Rejected => "rejected",
            ConflictReason::DanglingReference => "dangling_reference",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unresolved conflict shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Conflict {
    pub id: String,

    pub entity: ConflictEntity,

    pub reason: ConflictReason,

    /// Human-readable detail (server message, last transport error).
    pub message: String,

    /// Dead-lettered action behind this conflict, if any.
    #[ts(type = "number | null")]
    pub action_id: Option<u64>,

    #[ts(skip)]
    pub action_kind: Option<ActionKind>,

    #[ts(as = "String")]
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    pub fn new(entity: ConflictEntity, reason: ConflictReason, message: impl Into<String>) -> Self {
        Conflict {
            id: Uuid::new_v4().to_string(),
            entity,
            reason,
            message: message.into(),
            action_id: None,
            action_kind: None,
            detected_at: Utc::now(),
        }
    }

    /// Links the conflict to the dead-lettered action it was raised for.
    pub fn for_action(mut self, action_id: u64, kind: ActionKind) -> Self {
        self.action_id = Some(action_id);
        self.action_kind = Some(kind);
        self
    }
}

/// User decision for a conflict.
///
/// `Merge` carries a payload the caller already merged; merging itself is
/// entity-specific and happens outside the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Requeue the local mutation with a fresh retry budget.
    KeepLocal,
    /// Drop the local mutation.
    Discard,
    /// Requeue with a caller-supplied payload of the same kind.
    Merge(ActionPayload),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_links_action() {
        let conflict = Conflict::new(
            ConflictEntity::new(EntityKind::Customer, EntityId::from("tmp-c1")),
            ConflictReason::RetriesExhausted,
            "server unavailable",
        )
        .for_action(3, ActionKind::CreateCustomer);

        assert_eq!(conflict.action_id, Some(3));
        assert_eq!(conflict.entity.to_string(), "customer tmp-c1");

        let json = serde_json::to_value(&conflict).unwrap();
        assert_eq!(json["reason"], "retries_exhausted");
        assert_eq!(json["action_kind"], "create_customer");
    }
}
