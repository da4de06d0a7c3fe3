//! # Conflict Surface
//!
//! Accumulates what the replay engine could not reconcile and applies the
//! user's decision.
//!
//! ## Resolution
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  conflict                 KeepLocal          Discard        Merge(p)    │
//! │  ───────────────────────  ─────────────────  ─────────────  ─────────── │
//! │  dead-lettered action     restore, fresh     drop from      restore     │
//! │                           retry budget       dead-letter    with p      │
//! │                                              (+ unconfirmed             │
//! │                                              entity, media)             │
//! │  rejected blob            clear rejection,   refused        refused     │
//! │                           upload again                                  │
//! │  no linked action         clear              clear          refused     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every accepted resolution clears the conflict entry. Merge payloads are
//! produced by the caller; no merge strategy is applied here.

use fieldquote_core::{
    Conflict, ConflictEntity, ConflictReason, EntityKind, QueuedAction, Resolution,
};
use std::sync::Arc;

use fieldquote_db::Repositories;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::error::{SyncError, SyncResult};

/// Effect of an accepted resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "action", rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// The action is back in the queue at its original position.
    Requeued(QueuedAction),
    /// The dead-lettered action was dropped.
    Discarded,
    /// Nothing left to act on; the entry was cleared.
    Cleared,
}

/// UI-visible list of unresolved conflicts, persisted in the store.
#[derive(Clone)]
pub struct ConflictSurface {
    repos: Repositories,
    feed: broadcast::Sender<Conflict>,
    entity_lock: Arc<Mutex<()>>,
}

impl ConflictSurface {
    /// `entity_lock` is the writer's; discarding a create deletes cached
    /// entities a concurrent write could otherwise re-create.
    pub(crate) fn new(repos: Repositories, entity_lock: Arc<Mutex<()>>) -> Self {
        let (feed, _) = broadcast::channel(64);
        ConflictSurface {
            repos,
            feed,
            entity_lock,
        }
    }

    /// New conflicts as they are reported.
    pub fn subscribe(&self) -> broadcast::Receiver<Conflict> {
        self.feed.subscribe()
    }

    pub async fn report_conflict(
        &self,
        entity: ConflictEntity,
        reason: ConflictReason,
        message: impl Into<String>,
    ) -> SyncResult<Conflict> {
        let conflict = Conflict::new(entity, reason, message);
        self.report(conflict.clone()).await?;
        Ok(conflict)
    }

    /// Persists a conflict and notifies listeners.
    pub async fn report(&self, conflict: Conflict) -> SyncResult<()> {
        self.repos.conflicts().append(&conflict).await?;
        warn!(
            conflict_id = %conflict.id,
            entity = %conflict.entity,
            reason = %conflict.reason,
            message = %conflict.message,
            "Conflict reported"
        );
        let _ = self.feed.send(conflict);
        Ok(())
    }

    pub async fn list(&self) -> SyncResult<Vec<Conflict>> {
        Ok(self.repos.conflicts().list().await?)
    }

    pub async fn count(&self) -> SyncResult<u64> {
        Ok(self.repos.conflicts().count().await?)
    }

    /// Applies the user's decision and clears the conflict.
    ///
    /// A refused resolution leaves the conflict in place.
    pub async fn resolve(
        &self,
        conflict_id: &str,
        resolution: Resolution,
    ) -> SyncResult<ResolveOutcome> {
        let conflict = self
            .repos
            .conflicts()
            .get(conflict_id)
            .await?
            .ok_or_else(|| SyncError::NotFound {
                entity: "Conflict".into(),
                id: conflict_id.to_string(),
            })?;

        let outcome = if conflict.entity.kind == EntityKind::Blob {
            self.resolve_blob(&conflict, resolution).await?
        } else {
            match conflict.action_id {
                Some(action_id) => self.resolve_action(&conflict, action_id, resolution).await?,
                None => match resolution {
                    Resolution::KeepLocal | Resolution::Discard => ResolveOutcome::Cleared,
                    Resolution::Merge(_) => {
                        return Err(SyncError::ResolutionRejected(
                            "no queued action to merge into".into(),
                        ))
                    }
                },
            }
        };

        self.repos.conflicts().remove(&conflict.id).await?;
        info!(conflict_id, entity = %conflict.entity, ?outcome, "Conflict resolved");
        Ok(outcome)
    }

    async fn resolve_action(
        &self,
        conflict: &Conflict,
        action_id: u64,
        resolution: Resolution,
    ) -> SyncResult<ResolveOutcome> {
        let dead_letters = self.repos.dead_letters();
        match resolution {
            Resolution::KeepLocal => match dead_letters.restore(action_id, None).await {
                Ok(action) => Ok(ResolveOutcome::Requeued(action)),
                // already restored by an earlier, interrupted resolution
                Err(fieldquote_db::DbError::NotFound { .. }) => Ok(ResolveOutcome::Cleared),
                Err(err) => Err(err.into()),
            },
            Resolution::Discard => {
                let _entities = self.entity_lock.lock().await;
                dead_letters.discard(action_id).await?;
                Ok(ResolveOutcome::Discarded)
            }
            Resolution::Merge(payload) => {
                if let Some(expected) = conflict.action_kind {
                    if payload.kind() != expected {
                        return Err(SyncError::ResolutionRejected(format!(
                            "merged payload must be {expected}, got {}",
                            payload.kind()
                        )));
                    }
                }
                if dead_letters.get(action_id).await?.is_none() {
                    return Err(SyncError::ResolutionRejected(format!(
                        "action {action_id} is no longer dead-lettered"
                    )));
                }
                let action = dead_letters.restore(action_id, Some(payload)).await?;
                Ok(ResolveOutcome::Requeued(action))
            }
        }
    }

    async fn resolve_blob(
        &self,
        conflict: &Conflict,
        resolution: Resolution,
    ) -> SyncResult<ResolveOutcome> {
        match resolution {
            Resolution::KeepLocal => {
                match self.repos.blobs().clear_rejection(conflict.entity.id.as_str()).await {
                    Ok(_) | Err(fieldquote_db::DbError::NotFound { .. }) => {
                        Ok(ResolveOutcome::Cleared)
                    }
                    Err(err) => Err(err.into()),
                }
            }
            Resolution::Discard | Resolution::Merge(_) => Err(SyncError::ResolutionRejected(
                "captured media is kept until uploaded; retry the upload instead".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldquote_core::{
        ActionKind, ActionPayload, BlobKind, CachedBlob, EntityId, NewCustomer,
    };
    use fieldquote_db::MemoryStore;
    use std::sync::Arc;

    fn surface() -> (ConflictSurface, Repositories) {
        let repos = Repositories::new(Arc::new(MemoryStore::new()));
        (ConflictSurface::new(repos.clone(), Arc::default()), repos)
    }

    fn customer(name: &str) -> ActionPayload {
        ActionPayload::CreateCustomer(NewCustomer {
            temp_id: EntityId::from("tmp-c1"),
            name: name.to_string(),
            email: None,
            phone: None,
            address: None,
        })
    }

    async fn dead_lettered(repos: &Repositories, surface: &ConflictSurface) -> Conflict {
        let action = repos.actions().enqueue(customer("Ada")).await.unwrap();
        repos
            .dead_letters()
            .move_to_dead_letter(action.id, "server unavailable")
            .await
            .unwrap();
        let conflict = Conflict::new(
            ConflictEntity::new(EntityKind::Customer, EntityId::from("tmp-c1")),
            ConflictReason::RetriesExhausted,
            "server unavailable",
        )
        .for_action(action.id, ActionKind::CreateCustomer);
        surface.report(conflict.clone()).await.unwrap();
        conflict
    }

    #[tokio::test]
    async fn test_report_persists_and_notifies() {
        let (surface, _) = surface();
        let mut feed = surface.subscribe();

        let conflict = surface
            .report_conflict(
                ConflictEntity::new(EntityKind::Quote, EntityId::from("tmp-q1")),
                ConflictReason::DanglingReference,
                "customer tmp-c9 no longer exists",
            )
            .await
            .unwrap();

        assert_eq!(feed.try_recv().unwrap().id, conflict.id);
        assert_eq!(surface.list().await.unwrap(), vec![conflict]);
        assert_eq!(surface.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_keep_local_requeues_with_fresh_budget() {
        let (surface, repos) = surface();
        let conflict = dead_lettered(&repos, &surface).await;

        let outcome = surface.resolve(&conflict.id, Resolution::KeepLocal).await.unwrap();
        let ResolveOutcome::Requeued(action) = outcome else {
            panic!("expected requeue");
        };
        assert_eq!(Some(action.id), conflict.action_id);
        assert_eq!(action.retry_count, 0);
        assert_eq!(repos.actions().count().await.unwrap(), 1);
        assert_eq!(surface.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_merge_checks_kind_and_keeps_temp_id() {
        let (surface, repos) = surface();
        let conflict = dead_lettered(&repos, &surface).await;

        let wrong = ActionPayload::UpdateQuote(fieldquote_core::QuoteUpdate {
            quote_id: EntityId::from("q-1"),
            patch: Default::default(),
        });
        let err = surface
            .resolve(&conflict.id, Resolution::Merge(wrong))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ResolutionRejected(_)));
        assert_eq!(surface.count().await.unwrap(), 1);

        let mut merged = customer("Ada Lovelace");
        if let ActionPayload::CreateCustomer(body) = &mut merged {
            body.temp_id = EntityId::from("tmp-other");
        }
        let outcome = surface
            .resolve(&conflict.id, Resolution::Merge(merged))
            .await
            .unwrap();
        let ResolveOutcome::Requeued(action) = outcome else {
            panic!("expected requeue");
        };
        let ActionPayload::CreateCustomer(body) = &action.payload else {
            panic!("kind changed");
        };
        assert_eq!(body.name, "Ada Lovelace");
        assert_eq!(body.temp_id, EntityId::from("tmp-c1"));
    }

    #[tokio::test]
    async fn test_discard_drops_dead_letter() {
        let (surface, repos) = surface();
        let conflict = dead_lettered(&repos, &surface).await;

        let outcome = surface.resolve(&conflict.id, Resolution::Discard).await.unwrap();
        assert_eq!(outcome, ResolveOutcome::Discarded);
        assert_eq!(repos.dead_letters().count().await.unwrap(), 0);
        assert_eq!(repos.actions().count().await.unwrap(), 0);
        assert!(surface.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_blob_can_only_be_retried() {
        let (surface, repos) = surface();
        let blob = CachedBlob::new(
            EntityId::from("q-42"),
            BlobKind::Photo,
            "image/jpeg".to_string(),
            vec![1, 2, 3],
        );
        repos.blobs().save(&blob).await.unwrap();
        repos.blobs().mark_rejected(&blob.local_ref, "too large").await.unwrap();
        let conflict = surface
            .report_conflict(
                ConflictEntity::new(EntityKind::Blob, EntityId::from(blob.local_ref.as_str())),
                ConflictReason::Rejected,
                "too large",
            )
            .await
            .unwrap();

        let err = surface.resolve(&conflict.id, Resolution::Discard).await.unwrap_err();
        assert!(matches!(err, SyncError::ResolutionRejected(_)));
        assert!(repos.blobs().get(&blob.local_ref).await.unwrap().is_some());

        let outcome = surface.resolve(&conflict.id, Resolution::KeepLocal).await.unwrap();
        assert_eq!(outcome, ResolveOutcome::Cleared);
        let stored = repos.blobs().get(&blob.local_ref).await.unwrap().unwrap();
        assert!(stored.rejected.is_none());
        assert!(!stored.uploaded);
    }

    #[tokio::test]
    async fn test_unknown_conflict() {
        let (surface, _) = surface();
        let err = surface.resolve("nope", Resolution::KeepLocal).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound { .. }));
    }
}
