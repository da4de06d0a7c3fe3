//! # Action Repository
//!
//! Persistence for the offline action queue.
//!
//! ## Keys and Ordering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  enqueue(payload)                                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────── SINGLE TRANSACTION ───────────────────────────┐  │
//! │  │  id  = next_sequence("actions")          → 7                      │  │
//! │  │  key = zero-padded id                    → "00000000000000000007" │  │
//! │  │  put(actions, key, QueuedAction)                                  │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! │  get_all(actions) is key-ordered, so listing is FIFO. A dead-lettered  │
//! │  action keeps its id and returns to the same place when restored.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldquote_core::{ActionPayload, QueuedAction};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::store::{Collection, DurableStore};

/// Sequence backing queued action ids.
pub const ACTION_SEQUENCE: &str = "actions";

/// Store key for an action id; lexical order equals numeric order.
pub fn action_key(id: u64) -> String {
    format!("{id:020}")
}

/// Repository for queued actions.
#[derive(Clone)]
pub struct ActionRepository {
    store: Arc<dyn DurableStore>,
}

impl ActionRepository {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        ActionRepository { store }
    }

    /// Appends an action with the next sequence id.
    pub async fn enqueue(&self, payload: ActionPayload) -> DbResult<QueuedAction> {
        let mut tx = self.store.begin(&[Collection::Actions]).await?;
        let id = tx.next_sequence(ACTION_SEQUENCE).await?;
        let action = QueuedAction::new(id, payload);
        tx.put_as(Collection::Actions, &action_key(id), &action).await?;
        tx.commit().await?;

        debug!(action_id = id, kind = %action.kind(), temp_id = ?action.temp_id, "Action enqueued");
        Ok(action)
    }

    /// All queued actions, oldest first.
    pub async fn list(&self) -> DbResult<Vec<QueuedAction>> {
        self.store.get_all_as(Collection::Actions).await
    }

    /// Oldest queued action.
    pub async fn peek(&self) -> DbResult<Option<QueuedAction>> {
        Ok(self.list().await?.into_iter().next())
    }

    pub async fn get(&self, id: u64) -> DbResult<Option<QueuedAction>> {
        self.store.get_as(Collection::Actions, &action_key(id)).await
    }

    /// Overwrites an action in place (same id, same position).
    pub async fn update(&self, action: &QueuedAction) -> DbResult<()> {
        self.store
            .put_as(Collection::Actions, &action_key(action.id), action)
            .await
    }

    /// Removes a confirmed action. Returns whether it was present.
    pub async fn remove(&self, id: u64) -> DbResult<bool> {
        let removed = self.store.delete(Collection::Actions, &action_key(id)).await?;
        debug!(action_id = id, removed, "Action removed");
        Ok(removed)
    }

    /// Records a failed attempt: bumps the retry counter, stores the error and
    /// the earliest next attempt.
    pub async fn record_failure(
        &self,
        id: u64,
        error: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> DbResult<QueuedAction> {
        let key = action_key(id);
        let mut tx = self.store.begin(&[Collection::Actions]).await?;
        let mut action: QueuedAction = tx
            .get_as(Collection::Actions, &key)
            .await?
            .ok_or_else(|| DbError::not_found("Action", id.to_string()))?;

        action.retry_count += 1;
        action.last_error = Some(error.to_string());
        action.next_attempt_at = next_attempt_at;

        tx.put_as(Collection::Actions, &key, &action).await?;
        tx.commit().await?;

        debug!(action_id = id, retry_count = action.retry_count, "Action attempt failed");
        Ok(action)
    }

    pub async fn count(&self) -> DbResult<u64> {
        self.store.count(Collection::Actions).await
    }
}
