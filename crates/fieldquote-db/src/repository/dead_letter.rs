//! # Dead-Letter Repository
//!
//! Holding area for actions that failed terminally. Moving an action in or
//! out is a single transaction over `actions` and `dead_letter`, so an
//! action is always in exactly one of the two.

use std::sync::Arc;

use chrono::Utc;
use fieldquote_core::{
    ActionPayload, CachedBlob, Conflict, DeadLetter, EntityId, EntityKind, LineItem, Quote,
    QueuedAction,
};
use tracing::{info, warn};

use super::actions::action_key;
use crate::error::{DbError, DbResult};
use crate::store::{Collection, DurableStore, StoreTransaction};

const SCOPE: [Collection; 2] = [Collection::Actions, Collection::DeadLetter];

/// Repository for dead-lettered actions.
#[derive(Clone)]
pub struct DeadLetterRepository {
    store: Arc<dyn DurableStore>,
}

impl DeadLetterRepository {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        DeadLetterRepository { store }
    }

    /// Moves a queued action to the dead-letter collection.
    pub async fn move_to_dead_letter(&self, action_id: u64, reason: &str) -> DbResult<DeadLetter> {
        let key = action_key(action_id);
        let mut tx = self.store.begin(&SCOPE).await?;
        let action: QueuedAction = tx
            .get_as(Collection::Actions, &key)
            .await?
            .ok_or_else(|| DbError::not_found("Action", action_id.to_string()))?;

        let entry = DeadLetter {
            action,
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };
        tx.delete(Collection::Actions, &key).await?;
        tx.put_as(Collection::DeadLetter, &key, &entry).await?;
        tx.commit().await?;

        warn!(action_id, kind = %entry.action.kind(), reason, "Action moved to dead-letter");
        Ok(entry)
    }

    /// Dead-lettered actions in original queue order.
    pub async fn list(&self) -> DbResult<Vec<DeadLetter>> {
        self.store.get_all_as(Collection::DeadLetter).await
    }

    pub async fn get(&self, action_id: u64) -> DbResult<Option<DeadLetter>> {
        self.store
            .get_as(Collection::DeadLetter, &action_key(action_id))
            .await
    }

    /// Puts a dead-lettered action back in its original queue position with
    /// a fresh retry budget, optionally with a replacement payload of the
    /// same kind.
    pub async fn restore(
        &self,
        action_id: u64,
        replacement: Option<ActionPayload>,
    ) -> DbResult<QueuedAction> {
        let key = action_key(action_id);
        let mut tx = self.store.begin(&SCOPE).await?;
        let entry: DeadLetter = tx
            .get_as(Collection::DeadLetter, &key)
            .await?
            .ok_or_else(|| DbError::not_found("Dead letter", action_id.to_string()))?;

        let mut action = entry.action;
        action.reset_retries();
        if let Some(payload) = replacement {
            action
                .replace_payload(payload)
                .map_err(|e| DbError::InvariantViolation(e.to_string()))?;
        }

        tx.delete(Collection::DeadLetter, &key).await?;
        tx.put_as(Collection::Actions, &key, &action).await?;
        tx.commit().await?;

        info!(action_id, kind = %action.kind(), "Dead-lettered action restored to queue");
        Ok(action)
    }

    /// Drops a dead-lettered action for good.
    ///
    /// A discarded create takes its unconfirmed entity with it: the cached
    /// record, its line items and media, and any media conflicts. Quotes
    /// pointing at a discarded customer lose the link. All in one
    /// transaction.
    pub async fn discard(&self, action_id: u64) -> DbResult<bool> {
        let key = action_key(action_id);
        let mut tx = self.store.begin(&Collection::ALL).await?;
        let Some(entry) = tx.get_as::<DeadLetter>(Collection::DeadLetter, &key).await? else {
            return Ok(false);
        };
        tx.delete(Collection::DeadLetter, &key).await?;

        let mut dropped = 0;
        if let (Some(kind), Some(temp)) = (entry.action.payload.created_kind(), &entry.action.temp_id)
        {
            // a confirmed entity lives on under its real id
            if tx.get(Collection::IdMap, temp.as_str()).await?.is_none() {
                dropped = drop_unconfirmed(tx.as_mut(), kind, temp).await?;
            }
        }
        tx.commit().await?;

        info!(action_id, dropped, "Dead-lettered action discarded");
        Ok(true)
    }

    pub async fn count(&self) -> DbResult<u64> {
        self.store.count(Collection::DeadLetter).await
    }
}

/// Removes every local trace of an entity the server never confirmed.
async fn drop_unconfirmed(
    tx: &mut dyn StoreTransaction,
    kind: EntityKind,
    temp: &EntityId,
) -> DbResult<usize> {
    let mut dropped = 0;
    match kind {
        EntityKind::Quote => {
            if tx.delete(Collection::Quotes, temp.as_str()).await? {
                dropped += 1;
            }
            for (key, item) in tx.get_all_as::<LineItem>(Collection::LineItems).await? {
                if item.quote_id == *temp {
                    tx.delete(Collection::LineItems, &key).await?;
                    dropped += 1;
                }
            }
            let mut media = Vec::new();
            for (key, blob) in tx.get_all_as::<CachedBlob>(Collection::Blobs).await? {
                if blob.quote_id == *temp {
                    tx.delete(Collection::Blobs, &key).await?;
                    media.push(blob.local_ref);
                }
            }
            for (key, conflict) in tx.get_all_as::<Conflict>(Collection::Conflicts).await? {
                if conflict.entity.kind == EntityKind::Blob
                    && media.iter().any(|local_ref| conflict.entity.id.as_str() == local_ref)
                {
                    tx.delete(Collection::Conflicts, &key).await?;
                }
            }
            dropped += media.len();
        }
        EntityKind::Customer => {
            if tx.delete(Collection::Customers, temp.as_str()).await? {
                dropped += 1;
            }
            for (key, mut quote) in tx.get_all_as::<Quote>(Collection::Quotes).await? {
                if quote.customer_id.as_ref() == Some(temp) {
                    quote.customer_id = None;
                    tx.put_as(Collection::Quotes, &key, &quote).await?;
                }
            }
        }
        EntityKind::LineItem | EntityKind::Blob => {}
    }
    Ok(dropped)
}
