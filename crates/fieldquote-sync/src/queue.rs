//! # Offline Action Queue
//!
//! Global FIFO of pending mutations, with per-action retry budget and a
//! dead-letter side channel.
//!
//! ```text
//!  enqueue ──► [ #1 create_quote | #2 line_items | #3 update ] ──► peek/drain
//!                    │
//!                    │ increment_retry (retry_count < max)
//!                    ├──► stays at head, next_attempt_at = now + backoff
//!                    │
//!                    │ retry_count == max
//!                    └──► dead_letter ──► Conflict Surface
//! ```
//!
//! The queue is not partitioned per entity: an update depends on its create
//! and must never overtake it.

use std::time::Duration;

use chrono::Utc;
use fieldquote_core::{ActionPayload, DeadLetter, QueuedAction};
use fieldquote_db::Repositories;
use tracing::debug;

use crate::error::{SyncError, SyncResult};
use crate::retry::RetryPolicy;

/// What happens to an action after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Stays queued; not retried automatically before `delay` has passed.
    RetryAfter { action: QueuedAction, delay: Duration },
    /// Retry budget used up.
    Exhausted(QueuedAction),
}

/// FIFO view of the `actions` collection.
#[derive(Clone)]
pub struct ActionQueue {
    repos: Repositories,
    policy: RetryPolicy,
}

impl ActionQueue {
    pub fn new(repos: Repositories, policy: RetryPolicy) -> Self {
        ActionQueue { repos, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Appends an action at the tail.
    pub async fn enqueue(&self, payload: ActionPayload) -> SyncResult<QueuedAction> {
        Ok(self.repos.actions().enqueue(payload).await?)
    }

    /// Head of the queue.
    pub async fn peek(&self) -> SyncResult<Option<QueuedAction>> {
        Ok(self.repos.actions().peek().await?)
    }

    /// Snapshot of every queued action, head first.
    pub async fn drain(&self) -> SyncResult<Vec<QueuedAction>> {
        Ok(self.repos.actions().list().await?)
    }

    pub async fn get(&self, id: u64) -> SyncResult<Option<QueuedAction>> {
        Ok(self.repos.actions().get(id).await?)
    }

    pub async fn update(&self, action: &QueuedAction) -> SyncResult<()> {
        Ok(self.repos.actions().update(action).await?)
    }

    /// Drops a confirmed action.
    pub async fn remove(&self, id: u64) -> SyncResult<bool> {
        Ok(self.repos.actions().remove(id).await?)
    }

    /// Counts a failed attempt against the action's retry budget.
    pub async fn increment_retry(&self, id: u64, error: &str) -> SyncResult<RetryDecision> {
        let current = self
            .repos
            .actions()
            .get(id)
            .await?
            .ok_or_else(|| SyncError::NotFound {
                entity: "Action".into(),
                id: id.to_string(),
            })?;

        let failures = current.retry_count.saturating_add(1);
        if self.policy.is_exhausted(failures) {
            let action = self.repos.actions().record_failure(id, error, None).await?;
            debug!(action_id = id, failures, "Retry budget exhausted");
            return Ok(RetryDecision::Exhausted(action));
        }

        let delay = self.policy.delay_for(failures);
        let next_attempt_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay));
        let action = self
            .repos
            .actions()
            .record_failure(id, error, next_attempt_at)
            .await?;
        Ok(RetryDecision::RetryAfter { action, delay })
    }

    /// Sets a terminally failed action aside.
    pub async fn dead_letter(&self, id: u64, reason: &str) -> SyncResult<DeadLetter> {
        Ok(self.repos.dead_letters().move_to_dead_letter(id, reason).await?)
    }

    /// Puts a dead-lettered action back at its original position.
    pub async fn restore(
        &self,
        id: u64,
        replacement: Option<ActionPayload>,
    ) -> SyncResult<QueuedAction> {
        Ok(self.repos.dead_letters().restore(id, replacement).await?)
    }

    pub async fn pending_count(&self) -> SyncResult<u64> {
        Ok(self.repos.actions().count().await?)
    }

    pub async fn is_empty(&self) -> SyncResult<bool> {
        Ok(self.pending_count().await? == 0)
    }
}
